//! Rule binding and time-series evaluation engine
//!
//! Pipeline: rules and calculated points are bound against a twin graph
//! ([`generate_rule_instances`]), each bound instance gets an actor, and
//! [`RulesEngine::execute_rules`] drives those actors over batches of
//! timestamped samples, producing compacted output logs and insights.
//!
//! Failure containment is the governing rule throughout: a malformed
//! expression, a circular calculated-point reference or a bad value at one
//! timestep degrades that one unit and nothing else.

pub mod actor;
pub mod binder;
pub mod config;
pub mod deps;
pub mod error;
pub mod executor;
pub mod resolver;

pub use actor::{ActorSettings, ActorState};
pub use binder::{generate_rule_instances, Generation};
pub use config::EngineSettings;
pub use deps::{order_points, DependencyOrder};
pub use error::{EngineError, Result};
pub use executor::{Batch, ExecutionSummary, RulesEngine};
pub use resolver::{resolve, BoundExpression};
