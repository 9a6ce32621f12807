//! Rule definitions as loaded from user or file input
//!
//! A rule is immutable once loaded. Instance generation reads it together
//! with the twin graph to produce bound [`crate::RuleInstance`]s.

use serde::{Deserialize, Serialize};

/// Template for rules that fault whenever any parameter signals a fault
pub const TEMPLATE_ANY_FAULT: &str = "any-fault";
/// Template for synthetic rules backing calculated points
pub const TEMPLATE_CALCULATED_POINT: &str = "calculated-point";

/// How a parameter's value combines across evaluation steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CumulativeType {
    /// Each step stands alone
    #[default]
    Simple,
    /// Running sum of step values
    Accumulate,
    /// Value integrated over elapsed seconds between steps
    AccumulateTimeSeconds,
    /// Value integrated over elapsed minutes between steps
    AccumulateTimeMinutes,
    /// Value integrated over elapsed hours between steps
    AccumulateTimeHours,
}

impl CumulativeType {
    pub fn is_cumulative(&self) -> bool {
        !matches!(self, CumulativeType::Simple)
    }
}

/// One named expression slot on a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleParameter {
    pub name: String,
    /// Key the bound series is stored under, usually a slug of the name
    pub field_id: String,
    /// Raw expression text, parsed at binding time
    pub point_expression: String,
    #[serde(default)]
    pub cumulative_setting: CumulativeType,
}

impl RuleParameter {
    pub fn new(
        name: impl Into<String>,
        field_id: impl Into<String>,
        point_expression: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            field_id: field_id.into(),
            point_expression: point_expression.into(),
            cumulative_setting: CumulativeType::Simple,
        }
    }

    pub fn cumulative(mut self, setting: CumulativeType) -> Self {
        self.cumulative_setting = setting;
        self
    }
}

/// Well-known template configuration fields
pub mod fields {
    use super::RuleUiElement;

    pub fn over_how_many_hours() -> RuleUiElement {
        RuleUiElement::number("over-how-many-hours", "Over how many hours")
    }

    pub fn percentage_of_time() -> RuleUiElement {
        RuleUiElement::percentage("percentage-of-time", "Percentage of time")
    }

    pub fn min_trigger_time() -> RuleUiElement {
        RuleUiElement::number("min-trigger-time", "Minimum trigger time (minutes)")
    }
}

/// A template configuration knob shown in the rule editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleUiElement {
    pub id: String,
    pub name: String,
    pub kind: UiElementKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiElementKind {
    Number,
    Percentage,
}

impl RuleUiElement {
    pub fn number(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: UiElementKind::Number,
            value: None,
        }
    }

    pub fn percentage(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: UiElementKind::Percentage,
            value: None,
        }
    }

    pub fn with(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

/// An immutable rule definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub template_id: String,
    /// Model the rule instantiates against
    pub primary_model_id: String,
    /// Optional scoping: only primary twins related to a twin of this model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_model_id: Option<String>,
    /// Ordered; the last parameter is conventionally named `result`
    pub parameters: Vec<RuleParameter>,
    /// Extra expressions (cost, comfort, reliability scores) evaluated
    /// alongside the parameters; a score that fails never fails the rule
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub impact_scores: Vec<RuleParameter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<RuleUiElement>,
    /// Fault description template, may contain FAULTYTEXT/NONFAULTYTEXT markers
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

impl Rule {
    pub fn new(
        id: impl Into<String>,
        template_id: impl Into<String>,
        primary_model_id: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            template_id: template_id.into(),
            primary_model_id: primary_model_id.into(),
            related_model_id: None,
            parameters: Vec::new(),
            impact_scores: Vec::new(),
            elements: Vec::new(),
            description: String::new(),
            recommendations: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: RuleParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_impact_score(mut self, score: RuleParameter) -> Self {
        self.impact_scores.push(score);
        self
    }

    pub fn with_element(mut self, element: RuleUiElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn element_value(&self, id: &str) -> Option<f64> {
        self.elements.iter().find(|e| e.id == id).and_then(|e| e.value)
    }

    /// The `result` parameter drives the fault verdict
    pub fn result_parameter(&self) -> Option<&RuleParameter> {
        self.parameters
            .iter()
            .rev()
            .find(|p| p.field_id == "result")
            .or(self.parameters.last())
    }
}
