//! Evaluation environment
//!
//! Holds the values bound to variable leaves for a single evaluation step,
//! plus the timestamp of the sample being processed (`NOW`).

use crate::expr::Value;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Variable bindings for one evaluation step
#[derive(Debug, Clone, Default)]
pub struct Env {
    values: HashMap<String, Value>,
    now: Option<DateTime<Utc>>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment anchored at a sample timestamp, binding `NOW`
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            values: HashMap::new(),
            now: Some(now),
        }
    }

    /// Bind a value to a variable name, replacing any previous binding
    pub fn assign(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn assign_double(&mut self, name: impl Into<String>, value: f64) {
        self.assign(name, Value::Double(value));
    }

    /// Latest value bound to a name, if any
    pub fn get_bound_value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn now(&self) -> Option<DateTime<Utc>> {
        self.now
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
