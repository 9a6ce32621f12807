//! Binds parsed expressions to concrete twins
//!
//! Bracketed leaves are looked up against the context twin's neighborhood
//! in the graph: first as a literal twin id, then by display name, and
//! model references fan out to every matching twin. A leaf that matches
//! nothing is left unbound; that is a gap, not an error, and the caller
//! decides what a gap means (instances still evaluate, they just report
//! missing values for that leaf).

use tracing::debug;
use twin_expr::{AggregateOp, TokenExpr};
use twin_model::TwinGraph;

/// Result of binding one expression against a context twin
#[derive(Debug, Clone)]
pub struct BoundExpression {
    pub expression: TokenExpr,
    /// Point ids read by the bound tree, in source order with duplicates
    pub point_ids: Vec<String>,
    /// Leaves that matched no twin
    pub unresolved: Vec<String>,
}

/// Rewrite variable and model leaves of `expr` to concrete twin ids,
/// resolving against `context_id`'s neighborhood in `graph`.
pub fn resolve(expr: &TokenExpr, context_id: &str, graph: &TwinGraph) -> BoundExpression {
    let mut binder = Binder {
        context_id,
        graph,
        point_ids: Vec::new(),
        unresolved: Vec::new(),
    };
    let expression = binder.bind(expr);
    if !binder.unresolved.is_empty() {
        debug!(
            context = context_id,
            unresolved = ?binder.unresolved,
            "expression bound with gaps"
        );
    }
    BoundExpression {
        expression,
        point_ids: binder.point_ids,
        unresolved: binder.unresolved,
    }
}

struct Binder<'a> {
    context_id: &'a str,
    graph: &'a TwinGraph,
    point_ids: Vec<String>,
    unresolved: Vec<String>,
}

impl Binder<'_> {
    fn bind(&mut self, expr: &TokenExpr) -> TokenExpr {
        match expr {
            TokenExpr::Constant(v) => TokenExpr::Constant(v.clone()),
            TokenExpr::Variable(name) => self.bind_variable(name),
            TokenExpr::ModelRef { model_id, via } => self.bind_model_ref(model_id, via),
            TokenExpr::Unary { op, child } => TokenExpr::Unary {
                op: *op,
                child: Box::new(self.bind(child)),
            },
            TokenExpr::Binary { op, lhs, rhs } => TokenExpr::Binary {
                op: *op,
                lhs: Box::new(self.bind(lhs)),
                rhs: Box::new(self.bind(rhs)),
            },
            TokenExpr::Array(items) => {
                TokenExpr::Array(items.iter().map(|i| self.bind(i)).collect())
            }
            TokenExpr::Aggregate { op, child } => TokenExpr::Aggregate {
                op: *op,
                child: Box::new(self.bind(child)),
            },
            TokenExpr::Failed(args) => {
                TokenExpr::Failed(args.iter().map(|a| self.bind(a)).collect())
            }
            TokenExpr::If {
                cond,
                then,
                otherwise,
            } => TokenExpr::If {
                cond: Box::new(self.bind(cond)),
                then: Box::new(self.bind(then)),
                otherwise: Box::new(self.bind(otherwise)),
            },
            TokenExpr::Function { name, args } => TokenExpr::Function {
                name: name.clone(),
                args: args.iter().map(|a| self.bind(a)).collect(),
            },
            TokenExpr::Property { object, name } => TokenExpr::Property {
                object: Box::new(self.bind(object)),
                name: name.clone(),
            },
        }
    }

    /// Each occurrence binds its own leaf, so `sensor1 + sensor1` records
    /// `sensor1` twice.
    fn bind_variable(&mut self, name: &str) -> TokenExpr {
        // properties like NOW are evaluation-time symbols, never twins
        if name == "NOW" {
            return TokenExpr::variable(name);
        }

        if self.graph.contains(name) {
            self.point_ids.push(name.to_string());
            return TokenExpr::variable(name);
        }

        let matched = self
            .graph
            .neighborhood(self.context_id)
            .into_iter()
            .find(|t| t.id == name || t.name == name)
            .map(|t| t.id.clone());

        match matched {
            Some(id) => {
                self.point_ids.push(id.clone());
                TokenExpr::Variable(id)
            }
            None => {
                self.unresolved.push(name.to_string());
                TokenExpr::variable(name)
            }
        }
    }

    fn bind_model_ref(&mut self, model_id: &str, via: &[String]) -> TokenExpr {
        let matches = self
            .graph
            .resolve_model_path(self.context_id, via, model_id);
        if matches.is_empty() {
            self.unresolved.push(model_id.to_string());
            return TokenExpr::Array(Vec::new());
        }
        let leaves: Vec<TokenExpr> = matches
            .into_iter()
            .map(|t| {
                self.point_ids.push(t.id.clone());
                TokenExpr::Variable(t.id.clone())
            })
            .collect();
        match leaves.len() {
            1 => leaves.into_iter().next().unwrap_or(TokenExpr::Array(Vec::new())),
            _ => TokenExpr::Array(leaves),
        }
    }
}

/// Convenience for `SUM([Model;1])`-style binding checks
pub fn bound_aggregate(expr: &TokenExpr) -> Option<(AggregateOp, &[TokenExpr])> {
    if let TokenExpr::Aggregate { op, child } = expr {
        if let TokenExpr::Array(items) = child.as_ref() {
            return Some((*op, items));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use twin_expr::parse;
    use twin_model::Twin;

    fn graph() -> TwinGraph {
        let mut g = TwinGraph::new();
        g.add_twin(Twin::new("equipment", "dtmi:acme:TerminalUnit;1"));
        g.add_twin(Twin::new("sensor1", "dtmi:acme:Sensor;1"));
        g.add_twin(Twin::new("sensor2", "dtmi:acme:Sensor;1"));
        g.add_twin(Twin::new("calcpoint", "dtmi:acme:Sensor;1").with_value_expression("sensor1 + 1"));
        g.add_relation("equipment", "sensor1");
        g.add_relation("equipment", "sensor2");
        g.add_relation("equipment", "calcpoint");
        g
    }

    #[test]
    fn binds_literal_ids() {
        let g = graph();
        let expr = parse("[sensor1] + 1").unwrap();
        let bound = resolve(&expr, "equipment", &g);
        assert_eq!(bound.point_ids, vec!["sensor1"]);
        assert!(bound.unresolved.is_empty());
    }

    #[test]
    fn duplicate_reference_binds_two_leaves() {
        let g = graph();
        let expr = parse("sensor1 + sensor1").unwrap();
        let bound = resolve(&expr, "equipment", &g);
        assert_eq!(bound.point_ids, vec!["sensor1", "sensor1"]);
    }

    #[test]
    fn model_ref_fans_out_to_array() {
        let g = graph();
        let expr = parse("SUM([dtmi:acme:Sensor;1])").unwrap();
        let bound = resolve(&expr, "equipment", &g);
        let (op, items) = bound_aggregate(&bound.expression).unwrap();
        assert_eq!(op, AggregateOp::Sum);
        // set equality, order is not a contract
        let mut ids: Vec<String> = items
            .iter()
            .map(|i| match i {
                TokenExpr::Variable(v) => v.clone(),
                other => panic!("expected variable leaf, got {:?}", other),
            })
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["calcpoint", "sensor1", "sensor2"]);
    }

    #[test]
    fn missing_twin_is_a_gap_not_an_error() {
        let g = graph();
        let expr = parse("[nosuchpoint] * 2").unwrap();
        let bound = resolve(&expr, "equipment", &g);
        assert!(bound.point_ids.is_empty());
        assert_eq!(bound.unresolved, vec!["nosuchpoint"]);
    }

    #[test]
    fn now_is_never_bound() {
        let g = graph();
        let expr = parse("NOW.Second").unwrap();
        let bound = resolve(&expr, "equipment", &g);
        assert!(bound.point_ids.is_empty());
        assert!(bound.unresolved.is_empty());
    }
}
