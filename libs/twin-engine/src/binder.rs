//! Rule instance generation
//!
//! Combines rule definitions and calculated points with the twin graph to
//! produce bound rule instances. Calculated points become synthetic
//! single-parameter instances so the same actor machinery evaluates them.
//! A point whose expression fails to parse contributes nothing and stops
//! nothing; a point caught in a reference cycle gets an instance that is
//! present but marked invalid.

use rustc_hash::FxHashMap;
use tracing::{debug, warn};
use twin_expr::parse;
use twin_model::{
    CalculatedPoint, InstanceStatus, Rule, RuleInstance, RuleParameterBound, TwinGraph,
    TEMPLATE_CALCULATED_POINT,
};

use crate::deps::{order_points, DependencyOrder};
use crate::resolver::resolve;

/// Everything one generation pass produces
#[derive(Debug, Default)]
pub struct Generation {
    pub instances: Vec<RuleInstance>,
    /// Upsert-tracking records for the calculated points that were processed
    pub points: Vec<CalculatedPoint>,
    /// Evaluation ordering for calculated-point actors
    pub order: DependencyOrder,
}

impl Generation {
    pub fn instance(&self, id: &str) -> Option<&RuleInstance> {
        self.instances.iter().find(|i| i.id == id)
    }
}

/// Generate rule instances for every rule x matching twin, plus one
/// synthetic instance per parseable calculated point. Re-running with
/// unchanged input produces the same instance set, keyed by id.
pub fn generate_rule_instances(
    rules: &[Rule],
    calculated_points: &[CalculatedPoint],
    graph: &TwinGraph,
) -> Generation {
    let mut generation = Generation::default();

    // bind before ordering: a model-ref fan-out can reach a calculated
    // point too, and those edges must count toward staging and cycles
    let mut parsed = Vec::new();
    let mut deps: FxHashMap<String, Vec<String>> = FxHashMap::default();
    for point in calculated_points {
        match parse(&point.value_expression) {
            Ok(expr) => {
                let bound = resolve(&expr, &point.id, graph);
                let refs: Vec<String> = bound
                    .expression
                    .unbound_variables()
                    .into_iter()
                    .filter(|name| calculated_points.iter().any(|p| p.id == *name))
                    .map(str::to_string)
                    .collect();
                deps.insert(point.id.clone(), refs);
                parsed.push((point, bound));
            }
            Err(err) => {
                // skip this point, siblings keep processing
                warn!(point = %point.id, %err, "calculated point expression failed to parse");
            }
        }
    }
    generation.order = order_points(&deps);

    for (point, bound) in parsed {
        let status = if generation.order.is_cyclic(&point.id) {
            InstanceStatus::CircularDependency
        } else {
            InstanceStatus::Valid
        };
        generation.instances.push(RuleInstance {
            id: point.id.clone(),
            rule_id: point.id.clone(),
            twin_id: point.id.clone(),
            template_id: TEMPLATE_CALCULATED_POINT.to_string(),
            parameters_bound: vec![RuleParameterBound {
                name: point.name.clone(),
                field_id: "result".to_string(),
                expression: bound.expression,
                cumulative_setting: Default::default(),
                point_ids: bound.point_ids,
            }],
            impact_scores_bound: Vec::new(),
            status,
            disabled: !point.is_enabled,
        });
        // tracking record regardless of enablement
        generation.points.push(point.clone());
    }

    for rule in rules {
        let mut twin_ids: Vec<&str> = graph
            .twins_of_model(&rule.primary_model_id)
            .filter(|twin| match &rule.related_model_id {
                None => true,
                Some(related) => graph
                    .neighborhood(&twin.id)
                    .iter()
                    .any(|t| t.model_id == *related),
            })
            .map(|twin| twin.id.as_str())
            .collect();
        twin_ids.sort_unstable();

        for twin_id in twin_ids {
            generation
                .instances
                .push(bind_rule(rule, twin_id, graph, &generation.order));
        }
    }

    debug!(
        instances = generation.instances.len(),
        cyclic = generation.order.cyclic.len(),
        "generated rule instances"
    );
    generation
}

fn bind_rule(rule: &Rule, twin_id: &str, graph: &TwinGraph, order: &DependencyOrder) -> RuleInstance {
    let mut parameters_bound = Vec::with_capacity(rule.parameters.len());
    let mut status = InstanceStatus::Valid;
    let mut earlier_fields: Vec<&str> = Vec::new();

    for param in &rule.parameters {
        let expr = match parse(&param.point_expression) {
            Ok(expr) => expr,
            Err(err) => {
                warn!(
                    rule = %rule.id,
                    parameter = %param.name,
                    %err,
                    "rule parameter failed to parse"
                );
                status = InstanceStatus::ParseFailed(err.to_string());
                break;
            }
        };
        let mut bound = resolve(&expr, twin_id, graph);
        // leaves naming earlier parameters are step-local, not graph gaps
        bound.unresolved.retain(|n| !earlier_fields.contains(&n.as_str()));
        if !bound.unresolved.is_empty() {
            debug!(
                rule = %rule.id,
                twin = %twin_id,
                parameter = %param.name,
                unresolved = ?bound.unresolved,
                "parameter references names absent from the twin graph"
            );
        }
        if bound.point_ids.iter().any(|p| order.is_cyclic(p)) {
            status = InstanceStatus::CircularDependency;
        }
        parameters_bound.push(RuleParameterBound {
            name: param.name.clone(),
            field_id: param.field_id.clone(),
            expression: bound.expression,
            cumulative_setting: param.cumulative_setting,
            point_ids: bound.point_ids,
        });
        earlier_fields.push(param.field_id.as_str());
    }

    // impact scores bind best-effort, a bad score never fails the instance
    let mut impact_scores_bound = Vec::with_capacity(rule.impact_scores.len());
    for score in &rule.impact_scores {
        let expr = match parse(&score.point_expression) {
            Ok(expr) => expr,
            Err(err) => {
                warn!(rule = %rule.id, score = %score.name, %err, "impact score failed to parse");
                continue;
            }
        };
        let bound = resolve(&expr, twin_id, graph);
        impact_scores_bound.push(RuleParameterBound {
            name: score.name.clone(),
            field_id: score.field_id.clone(),
            expression: bound.expression,
            cumulative_setting: score.cumulative_setting,
            point_ids: bound.point_ids,
        });
    }

    RuleInstance {
        id: RuleInstance::id_for(&rule.id, twin_id),
        rule_id: rule.id.clone(),
        twin_id: twin_id.to_string(),
        template_id: rule.template_id.clone(),
        parameters_bound,
        impact_scores_bound,
        status,
        disabled: false,
    }
}
