//! twin-expr - Expression library for the twin rules engine
//!
//! Parses textual point expressions into an immutable token tree and
//! evaluates bound trees incrementally over streamed samples.
//!
//! # Features
//!
//! - **Grammar**: arithmetic, comparison (`=` is equality), logic,
//!   bracketed point references `[zone-temp]`, model references
//!   `[dtmi:acme:Sensor;1]` with dotted graph-path chaining, curly arrays,
//!   aggregates (`SUM`, `AVERAGE`, `MIN`, `MAX`, `COUNT`), `IF`, `FAILED`,
//!   unit conversions (`FAHRENHEIT`, `CELSIUS`) and `NOW.Second`-style
//!   timestamp components
//! - **Round-trip display**: `parse(s).to_string()` reproduces the
//!   expression up to array element order
//! - **Guarded evaluation**: non-finite results and type errors surface as
//!   [`EvalError`], never as NaN or "true"/"false" text
//!
//! # Example
//!
//! ```
//! use twin_expr::{parse, eval, Env, Value};
//!
//! let expr = parse("[zone-temp] - [zone-stpt] > 2").unwrap();
//! let mut env = Env::new();
//! env.assign_double("zone-temp", 24.5);
//! env.assign_double("zone-stpt", 21.0);
//! let v = eval(&expr, &env).unwrap();
//! assert_eq!(v.as_f64(), Some(1.0)); // booleans surface as 0/1
//! ```

pub mod env;
pub mod error;
pub mod eval;
pub mod expr;
pub mod parser;
pub mod token;

// Re-export public API
pub use env::Env;
pub use error::{EvalError, EvalResult, ParseError, ParseResult};
pub use eval::{eval, eval_numeric};
pub use expr::{AggregateOp, BinaryOp, TokenExpr, UnaryOp, Value};
pub use parser::parse;
