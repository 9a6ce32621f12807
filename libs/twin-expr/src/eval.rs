//! Expression evaluation
//!
//! Walks a bound token tree against an [`Env`] for a single timestep.
//! Two hard guarantees at this boundary:
//!
//! - a numeric result is always finite; NaN or infinity from a division (or
//!   any other arithmetic) comes back as a descriptive [`EvalError`], never
//!   as a value
//! - boolean results coerce to 0/1 whenever a numeric view is taken, so
//!   "true"/"false" never leave the engine

use crate::env::Env;
use crate::error::{EvalError, EvalResult};
use crate::expr::{AggregateOp, BinaryOp, TokenExpr, UnaryOp, Value};
use chrono::{Datelike, Timelike};

/// Evaluate a bound expression for one step
pub fn eval(expr: &TokenExpr, env: &Env) -> EvalResult<Value> {
    match expr {
        TokenExpr::Constant(v) => Ok(v.clone()),

        TokenExpr::Variable(name) => env
            .get_bound_value(name)
            .cloned()
            .ok_or_else(|| EvalError::UnboundVariable(name.clone())),

        TokenExpr::ModelRef { model_id, .. } => {
            Err(EvalError::UnresolvedModelRef(model_id.clone()))
        }

        TokenExpr::Unary { op, child } => {
            let v = eval(child, env)?;
            match op {
                UnaryOp::Minus => {
                    let n = numeric(&v, child)?;
                    finite(-n, expr)
                }
                UnaryOp::Not => {
                    let b = truthy(&v, child)?;
                    Ok(Value::Bool(!b))
                }
            }
        }

        TokenExpr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, expr, env),

        TokenExpr::Array(_) => Err(EvalError::TypeMismatch(
            "array is not a scalar value".to_string(),
        )),

        TokenExpr::Aggregate { op, child } => eval_aggregate(*op, child, env),

        // FAILED("message", expr): the condition is the last argument; the
        // message is read off the tree by the rule template when faulted
        TokenExpr::Failed(args) => match args.last() {
            Some(condition) => eval(condition, env),
            None => Ok(Value::Bool(true)),
        },

        TokenExpr::If {
            cond,
            then,
            otherwise,
        } => {
            let c = eval(cond, env)?;
            if truthy(&c, cond)? {
                eval(then, env)
            } else {
                eval(otherwise, env)
            }
        }

        TokenExpr::Function { name, args } => eval_function(name, args, expr, env),

        TokenExpr::Property { object, name } => eval_property(object, name, env),
    }
}

/// Evaluate and coerce to a finite f64 (booleans become 0/1)
pub fn eval_numeric(expr: &TokenExpr, env: &Env) -> EvalResult<f64> {
    let v = eval(expr, env)?;
    numeric(&v, expr)
}

fn numeric(v: &Value, expr: &TokenExpr) -> EvalResult<f64> {
    v.as_f64()
        .ok_or_else(|| EvalError::TypeMismatch(format!("{} is not numeric", expr)))
}

fn truthy(v: &Value, expr: &TokenExpr) -> EvalResult<bool> {
    v.as_bool()
        .ok_or_else(|| EvalError::TypeMismatch(format!("{} is not boolean", expr)))
}

/// NaN guard: any non-finite arithmetic result is an error carrying the
/// offending expression text, e.g. "Bad value for result=NaN from (a / b)"
fn finite(result: f64, expr: &TokenExpr) -> EvalResult<Value> {
    if result.is_finite() {
        Ok(Value::Double(result))
    } else {
        Err(EvalError::BadValue {
            value: result.to_string(),
            expr: expr.to_string(),
        })
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &TokenExpr,
    rhs: &TokenExpr,
    whole: &TokenExpr,
    env: &Env,
) -> EvalResult<Value> {
    // Logic operators get short-circuit treatment
    match op {
        BinaryOp::And => {
            let l = eval(lhs, env)?;
            if !truthy(&l, lhs)? {
                return Ok(Value::Bool(false));
            }
            let r = eval(rhs, env)?;
            return Ok(Value::Bool(truthy(&r, rhs)?));
        }
        BinaryOp::Or => {
            let l = eval(lhs, env)?;
            if truthy(&l, lhs)? {
                return Ok(Value::Bool(true));
            }
            let r = eval(rhs, env)?;
            return Ok(Value::Bool(truthy(&r, rhs)?));
        }
        _ => {}
    }

    let l = eval(lhs, env)?;
    let r = eval(rhs, env)?;

    // Text equality is allowed; all other text comparisons are not
    if let (Value::Text(a), Value::Text(b)) = (&l, &r) {
        return match op {
            BinaryOp::Eq => Ok(Value::Bool(a == b)),
            BinaryOp::Ne => Ok(Value::Bool(a != b)),
            _ => Err(EvalError::TypeMismatch(format!(
                "cannot apply operator to strings in {}",
                whole
            ))),
        };
    }

    let a = numeric(&l, lhs)?;
    let b = numeric(&r, rhs)?;

    match op {
        BinaryOp::Add => finite(a + b, whole),
        BinaryOp::Sub => finite(a - b, whole),
        BinaryOp::Mul => finite(a * b, whole),
        BinaryOp::Div => finite(a / b, whole),
        BinaryOp::Mod => finite(a % b, whole),
        BinaryOp::Pow => finite(a.powf(b), whole),
        BinaryOp::Eq => Ok(Value::Bool(a == b)),
        BinaryOp::Ne => Ok(Value::Bool(a != b)),
        BinaryOp::Lt => Ok(Value::Bool(a < b)),
        BinaryOp::Le => Ok(Value::Bool(a <= b)),
        BinaryOp::Gt => Ok(Value::Bool(a > b)),
        BinaryOp::Ge => Ok(Value::Bool(a >= b)),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn eval_aggregate(op: AggregateOp, child: &TokenExpr, env: &Env) -> EvalResult<Value> {
    let values = match child {
        TokenExpr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_numeric(item, env)?);
            }
            out
        }
        single => vec![eval_numeric(single, env)?],
    };

    if values.is_empty() {
        return if op == AggregateOp::Count {
            Ok(Value::Double(0.0))
        } else {
            Err(EvalError::EmptyAggregate(op.name().to_string()))
        };
    }

    let result = match op {
        AggregateOp::Sum => values.iter().sum(),
        AggregateOp::Avg => values.iter().sum::<f64>() / values.len() as f64,
        AggregateOp::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregateOp::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggregateOp::Count => values.len() as f64,
    };

    finite(result, child)
}

fn eval_function(
    name: &str,
    args: &[TokenExpr],
    whole: &TokenExpr,
    env: &Env,
) -> EvalResult<Value> {
    let unary = |args: &[TokenExpr]| -> EvalResult<f64> {
        match args {
            [single] => eval_numeric(single, env),
            _ => Err(EvalError::TypeMismatch(format!(
                "{} takes one argument",
                name
            ))),
        }
    };

    match name.to_ascii_uppercase().as_str() {
        "FAHRENHEIT" => finite(unary(args)? * 9.0 / 5.0 + 32.0, whole),
        "CELSIUS" => finite((unary(args)? - 32.0) * 5.0 / 9.0, whole),
        "ABS" => finite(unary(args)?.abs(), whole),
        "SQRT" => finite(unary(args)?.sqrt(), whole),
        "FLOOR" => finite(unary(args)?.floor(), whole),
        "CEILING" => finite(unary(args)?.ceil(), whole),
        "LOG" => finite(unary(args)?.ln(), whole),
        "EXP" => finite(unary(args)?.exp(), whole),
        "ROUND" => match args {
            [value] => finite(eval_numeric(value, env)?.round(), whole),
            [value, decimals] => {
                let factor = 10f64.powi(eval_numeric(decimals, env)? as i32);
                finite((eval_numeric(value, env)? * factor).round() / factor, whole)
            }
            _ => Err(EvalError::TypeMismatch("ROUND takes 1 or 2 arguments".to_string())),
        },
        _ => Err(EvalError::UnknownFunction(name.to_string())),
    }
}

/// `NOW.Second`, `NOW.Minute`, etc. read components off the sample timestamp
fn eval_property(object: &TokenExpr, name: &str, env: &Env) -> EvalResult<Value> {
    if let TokenExpr::Variable(var) = object {
        if var.eq_ignore_ascii_case("NOW") {
            let now = env
                .now()
                .ok_or_else(|| EvalError::UnboundVariable("NOW".to_string()))?;
            let component = match name.to_ascii_lowercase().as_str() {
                "second" => now.second() as f64,
                "minute" => now.minute() as f64,
                "hour" => now.hour() as f64,
                "day" => now.day() as f64,
                "month" => now.month() as f64,
                "year" => now.year() as f64,
                "dayofweek" => now.weekday().num_days_from_sunday() as f64,
                _ => {
                    return Err(EvalError::TypeMismatch(format!(
                        "unknown time component NOW.{}",
                        name
                    )))
                }
            };
            return Ok(Value::Double(component));
        }
    }

    Err(EvalError::TypeMismatch(format!(
        "cannot access property {} on {}",
        name, object
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use chrono::{TimeZone, Utc};

    fn env_with(bindings: &[(&str, f64)]) -> Env {
        let mut env = Env::new();
        for (name, value) in bindings {
            env.assign_double(*name, *value);
        }
        env
    }

    #[test]
    fn evaluates_arithmetic() {
        let expr = parse("a + b * 2").unwrap();
        let env = env_with(&[("a", 10.0), ("b", 5.0)]);
        assert_eq!(eval(&expr, &env).unwrap(), Value::Double(20.0));
    }

    #[test]
    fn equality_yields_bool_coerced_to_zero_or_one() {
        let expr = parse("([a] = [b])").unwrap();
        let env = env_with(&[("a", 21.5), ("b", 21.5)]);
        let v = eval(&expr, &env).unwrap();
        assert_eq!(v.as_f64(), Some(1.0));

        let env = env_with(&[("a", 21.5), ("b", 22.0)]);
        let v = eval(&expr, &env).unwrap();
        assert_eq!(v.as_f64(), Some(0.0));
    }

    #[test]
    fn division_by_zero_is_caught_not_nan() {
        let expr = parse("a / b").unwrap();
        let env = env_with(&[("a", 0.0), ("b", 0.0)]);
        let err = eval(&expr, &env).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Bad value for result=NaN from (a / b)"
        );
    }

    #[test]
    fn infinite_division_is_caught() {
        let expr = parse("a / b").unwrap();
        let env = env_with(&[("a", 1.0), ("b", 0.0)]);
        assert!(matches!(
            eval(&expr, &env),
            Err(EvalError::BadValue { .. })
        ));
    }

    #[test]
    fn missing_variable_reports_name() {
        let expr = parse("sensor9 + 1").unwrap();
        let env = Env::new();
        assert_eq!(
            eval(&expr, &env),
            Err(EvalError::UnboundVariable("sensor9".to_string()))
        );
    }

    #[test]
    fn same_variable_twice_doubles() {
        let expr = parse("sensor1 + sensor1").unwrap();
        let env = env_with(&[("sensor1", 3.5)]);
        assert_eq!(eval(&expr, &env).unwrap(), Value::Double(7.0));
    }

    #[test]
    fn sum_over_array() {
        let expr = parse("SUM({sensor1, sensor2})").unwrap();
        let env = env_with(&[("sensor1", 1.0), ("sensor2", 2.5)]);
        assert_eq!(eval(&expr, &env).unwrap(), Value::Double(3.5));
    }

    #[test]
    fn now_second_component() {
        let expr = parse("NOW.Second").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 42).unwrap();
        let env = Env::at(now);
        assert_eq!(eval(&expr, &env).unwrap(), Value::Double(42.0));
    }

    #[test]
    fn ternary_if() {
        let expr = parse("IF(a > 1, 10, 20)").unwrap();
        assert_eq!(
            eval(&expr, &env_with(&[("a", 2.0)])).unwrap(),
            Value::Double(10.0)
        );
        assert_eq!(
            eval(&expr, &env_with(&[("a", 0.0)])).unwrap(),
            Value::Double(20.0)
        );
    }

    #[test]
    fn fahrenheit_conversion() {
        let expr = parse("FAHRENHEIT(c)").unwrap();
        let env = env_with(&[("c", 100.0)]);
        assert_eq!(eval(&expr, &env).unwrap(), Value::Double(212.0));
    }

    #[test]
    fn unresolved_model_ref_fails_cleanly() {
        let expr = parse("[dtmi:acme:Sensor;1] + 1").unwrap();
        let env = Env::new();
        assert!(matches!(
            eval(&expr, &env),
            Err(EvalError::UnresolvedModelRef(_))
        ));
    }
}
