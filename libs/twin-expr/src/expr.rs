//! Expression token tree
//!
//! A closed sum type over every node the grammar can produce. Evaluation and
//! binding pattern-match exhaustively, so adding a node is a compile-time
//! checklist of every consumer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A literal value carried by a constant node or produced by evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Double(f64),
    Bool(bool),
    Text(String),
}

impl Value {
    /// Numeric view of the value. Booleans coerce to 0/1 so that a boolean
    /// result never leaves the engine as the words "true"/"false".
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(_) => None,
        }
    }

    /// Boolean view. Numbers follow the usual non-zero convention.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Double(d) => Some(*d != 0.0),
            Value::Text(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Double(d) => write!(f, "{}", d),
            Value::Bool(b) => write!(f, "{}", if *b { 1 } else { 0 }),
            Value::Text(t) => write!(f, "\"{}\"", t),
        }
    }
}

/// Binary operators in precedence order (low to high)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinaryOp {
    /// Left binding power for the Pratt parser. Right is bp + 1 for
    /// left-associative operators; Pow is right-associative.
    pub fn binding_power(self) -> (u8, u8) {
        match self {
            BinaryOp::Or => (1, 2),
            BinaryOp::And => (3, 4),
            BinaryOp::Eq | BinaryOp::Ne => (5, 6),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => (7, 8),
            BinaryOp::Add | BinaryOp::Sub => (9, 10),
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => (11, 12),
            BinaryOp::Pow => (16, 15),
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Minus,
    Not,
}

/// Aggregates over an array child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggregateOp {
    pub fn name(self) -> &'static str {
        match self {
            AggregateOp::Sum => "SUM",
            AggregateOp::Avg => "AVERAGE",
            AggregateOp::Min => "MIN",
            AggregateOp::Max => "MAX",
            AggregateOp::Count => "COUNT",
        }
    }
}

/// Expression tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenExpr {
    /// Literal constant
    Constant(Value),
    /// Reference to a named point / variable, resolved at bind time to a
    /// concrete twin id or result-stream key
    Variable(String),
    /// Reference to a model type, e.g. `[dtmi:acme:Sensor;1]`. `via` holds
    /// earlier path segments for graph traversal chains like
    /// `[ModelA;1].[ModelB;1]` (via = [ModelA;1], model_id = ModelB;1).
    ModelRef { model_id: String, via: Vec<String> },
    /// Unary operation
    Unary { op: UnaryOp, child: Box<TokenExpr> },
    /// Binary operation
    Binary {
        op: BinaryOp,
        lhs: Box<TokenExpr>,
        rhs: Box<TokenExpr>,
    },
    /// Unordered collection, `{a, b, c}`. Element order carries no meaning.
    Array(Vec<TokenExpr>),
    /// Aggregate over an array or single child
    Aggregate {
        op: AggregateOp,
        child: Box<TokenExpr>,
    },
    /// `FAILED("message", expr)` - fault marker with a diagnostic message
    Failed(Vec<TokenExpr>),
    /// `IF(cond, then, otherwise)`
    If {
        cond: Box<TokenExpr>,
        then: Box<TokenExpr>,
        otherwise: Box<TokenExpr>,
    },
    /// Uninterpreted function call, resolved at evaluation time
    Function { name: String, args: Vec<TokenExpr> },
    /// Dotted property access, e.g. `NOW.Second`
    Property {
        object: Box<TokenExpr>,
        name: String,
    },
}

impl TokenExpr {
    pub const TRUE: TokenExpr = TokenExpr::Constant(Value::Bool(true));

    pub fn constant(v: f64) -> Self {
        TokenExpr::Constant(Value::Double(v))
    }

    pub fn variable(name: impl Into<String>) -> Self {
        TokenExpr::Variable(name.into())
    }

    pub fn binary(op: BinaryOp, lhs: TokenExpr, rhs: TokenExpr) -> Self {
        TokenExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Collect every variable leaf, in source order. The same name may
    /// appear more than once; duplicates are intentional (an expression
    /// referring to the same point twice binds two independent leaves).
    pub fn unbound_variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            TokenExpr::Variable(name) => out.push(name),
            TokenExpr::Constant(_) | TokenExpr::ModelRef { .. } => {}
            TokenExpr::Unary { child, .. } | TokenExpr::Aggregate { child, .. } => {
                child.collect_variables(out)
            }
            TokenExpr::Binary { lhs, rhs, .. } => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
            TokenExpr::Array(items) | TokenExpr::Failed(items) => {
                for item in items {
                    item.collect_variables(out);
                }
            }
            TokenExpr::If {
                cond,
                then,
                otherwise,
            } => {
                cond.collect_variables(out);
                then.collect_variables(out);
                otherwise.collect_variables(out);
            }
            TokenExpr::Function { args, .. } => {
                for arg in args {
                    arg.collect_variables(out);
                }
            }
            TokenExpr::Property { object, .. } => object.collect_variables(out),
        }
    }

    /// True when any leaf is an unresolved model reference
    pub fn has_model_refs(&self) -> bool {
        match self {
            TokenExpr::ModelRef { .. } => true,
            TokenExpr::Constant(_) | TokenExpr::Variable(_) => false,
            TokenExpr::Unary { child, .. } | TokenExpr::Aggregate { child, .. } => {
                child.has_model_refs()
            }
            TokenExpr::Binary { lhs, rhs, .. } => lhs.has_model_refs() || rhs.has_model_refs(),
            TokenExpr::Array(items) | TokenExpr::Failed(items) => {
                items.iter().any(|i| i.has_model_refs())
            }
            TokenExpr::If {
                cond,
                then,
                otherwise,
            } => cond.has_model_refs() || then.has_model_refs() || otherwise.has_model_refs(),
            TokenExpr::Function { args, .. } => args.iter().any(|a| a.has_model_refs()),
            TokenExpr::Property { object, .. } => object.has_model_refs(),
        }
    }
}

/// True if the identifier can round-trip without brackets
fn is_simple_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_')
        && name.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
}

impl fmt::Display for TokenExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenExpr::Constant(v) => write!(f, "{}", v),
            TokenExpr::Variable(name) => {
                if is_simple_identifier(name) {
                    write!(f, "{}", name)
                } else {
                    write!(f, "[{}]", name)
                }
            }
            TokenExpr::ModelRef { model_id, via } => {
                for segment in via {
                    write!(f, "[{}].", segment)?;
                }
                write!(f, "[{}]", model_id)
            }
            TokenExpr::Unary {
                op: UnaryOp::Minus,
                child,
            } => write!(f, "-{}", child),
            TokenExpr::Unary {
                op: UnaryOp::Not,
                child,
            } => write!(f, "!{}", child),
            TokenExpr::Binary { op, lhs, rhs } => {
                write!(f, "({} {} {})", lhs, op.symbol(), rhs)
            }
            TokenExpr::Array(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
            TokenExpr::Aggregate { op, child } => write!(f, "{}({})", op.name(), child),
            TokenExpr::Failed(args) => {
                write!(f, "FAILED(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            TokenExpr::If {
                cond,
                then,
                otherwise,
            } => write!(f, "IF({}, {}, {})", cond, then, otherwise),
            TokenExpr::Function { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            TokenExpr::Property { object, name } => write!(f, "{}.{}", object, name),
        }
    }
}
