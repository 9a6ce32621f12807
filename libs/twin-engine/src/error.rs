//! Engine error types
//!
//! Nothing here ever crosses the batch boundary: parse, cycle and
//! evaluation failures all degrade to per-unit skip or invalid marking
//! inside the binder and executor. The variants exist so those layers can
//! log and classify what went wrong.

use thiserror::Error;
use twin_expr::{EvalError, ParseError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("expression parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("circular calculated point dependency: {cycle}")]
    Cycle { cycle: String },

    #[error("evaluation failed: {0}")]
    Eval(#[from] EvalError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
