//! Expression Error Types

use thiserror::Error;

/// Result type for parse operations
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Result type for evaluation
pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Errors raised while tokenizing or parsing expression text
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    /// Unexpected character in the input
    #[error("Unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),

    /// Unterminated bracketed reference or string literal
    #[error("Unterminated '{0}' starting at position {1}")]
    Unterminated(char, usize),

    /// Parentheses mismatch
    #[error("Parentheses mismatch")]
    ParenMismatch,

    /// Expression ended where an operand was expected
    #[error("Incomplete expression, expected an operand")]
    MissingOperand,

    /// Unexpected token
    #[error("Unexpected token '{0}', expected an operator, comma, or end of expression")]
    UnexpectedToken(String),

    /// Wrong number of arguments to a known function
    #[error("{0}() does not take {1} arguments")]
    BadArity(String, usize),

    /// Input was empty or all whitespace
    #[error("Empty expression")]
    Empty,
}

/// Errors raised while evaluating a bound expression
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    /// A variable leaf had no value in the environment
    #[error("No value for '{0}'")]
    UnboundVariable(String),

    /// Result was NaN or infinite. The message is surfaced verbatim in
    /// output records, so keep the format stable.
    #[error("Bad value for result={value} from {expr}")]
    BadValue { value: String, expr: String },

    /// Operand had the wrong type for the operator
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Unknown function name
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    /// An unresolved model reference reached evaluation
    #[error("Unresolved model reference '{0}'")]
    UnresolvedModelRef(String),

    /// Aggregate over an empty set
    #[error("Aggregate {0} over empty set")]
    EmptyAggregate(String),
}
