//! Domain model for twin-based rule evaluation
//!
//! Twins, rules, bound rule instances, calculated points, time-series
//! buffers, the squashing output log and derived insights. Pure data and
//! data-local behavior; orchestration lives in `twin-engine`.

pub mod calc_point;
pub mod insight;
pub mod instance;
pub mod output;
pub mod rules;
pub mod time_series;
pub mod twin;

pub use calc_point::{CalculatedPoint, TwinAction, TwinSyncStatus};
pub use insight::{resolve_markers, Insight, InsightOccurrence};
pub use instance::{InstanceStatus, RuleInstance, RuleParameterBound};
pub use output::{
    CommandOutputValue, InvalidCategory, OutputValue, OutputValues, OutputValuesCommand,
    MAX_OUTPUT_TEXT,
};
pub use rules::{
    fields, CumulativeType, Rule, RuleParameter, RuleUiElement, UiElementKind, TEMPLATE_ANY_FAULT,
    TEMPLATE_CALCULATED_POINT,
};
pub use time_series::{TimeSeriesBuffer, TimedValue};
pub use twin::{NamedPoint, Twin, TwinGraph};
