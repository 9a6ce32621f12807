//! Rule instances: a rule bound to one concrete twin

use serde::{Deserialize, Serialize};
use twin_expr::TokenExpr;

use crate::rules::CumulativeType;

/// Why an instance will not evaluate, when it won't
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    /// Ready to evaluate
    Valid,
    /// Participates in a circular calculated-point dependency
    CircularDependency,
    /// A parameter expression failed to parse
    ParseFailed(String),
}

/// One parameter after binding: leaves rewritten to concrete point ids
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleParameterBound {
    pub name: String,
    pub field_id: String,
    pub expression: TokenExpr,
    pub cumulative_setting: CumulativeType,
    /// Point ids this parameter reads, duplicates preserved
    pub point_ids: Vec<String>,
}

/// A rule materialized against one primary twin
///
/// Immutable after generation apart from the `disabled` flag, which is
/// external operator state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleInstance {
    /// Deterministic: `{rule_id}_{twin_id}` so regeneration is idempotent
    pub id: String,
    pub rule_id: String,
    pub twin_id: String,
    pub template_id: String,
    pub parameters_bound: Vec<RuleParameterBound>,
    /// Bound impact-score expressions; evaluated best-effort per step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub impact_scores_bound: Vec<RuleParameterBound>,
    pub status: InstanceStatus,
    #[serde(default)]
    pub disabled: bool,
}

impl RuleInstance {
    pub fn id_for(rule_id: &str, twin_id: &str) -> String {
        format!("{}_{}", rule_id, twin_id)
    }

    pub fn is_valid(&self) -> bool {
        self.status == InstanceStatus::Valid
    }

    pub fn parameter(&self, field_id: &str) -> Option<&RuleParameterBound> {
        self.parameters_bound.iter().find(|p| p.field_id == field_id)
    }

    /// All point ids the instance reads, across every parameter and score
    pub fn point_ids(&self) -> impl Iterator<Item = &str> {
        self.parameters_bound
            .iter()
            .chain(self.impact_scores_bound.iter())
            .flat_map(|p| p.point_ids.iter())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(field_id: &str, points: &[&str]) -> RuleParameterBound {
        RuleParameterBound {
            name: field_id.to_string(),
            field_id: field_id.to_string(),
            expression: TokenExpr::constant(1.0),
            cumulative_setting: CumulativeType::Simple,
            point_ids: points.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn id_is_deterministic() {
        assert_eq!(RuleInstance::id_for("rule1", "ahu-1"), "rule1_ahu-1");
    }

    #[test]
    fn point_ids_preserve_duplicates() {
        let instance = RuleInstance {
            id: "rule1_ahu-1".into(),
            rule_id: "rule1".into(),
            twin_id: "ahu-1".into(),
            template_id: "any-fault".into(),
            parameters_bound: vec![bound("s1", &["sensor1", "sensor1"]), bound("result", &[])],
            impact_scores_bound: Vec::new(),
            status: InstanceStatus::Valid,
            disabled: false,
        };
        let ids: Vec<&str> = instance.point_ids().collect();
        assert_eq!(ids, vec!["sensor1", "sensor1"]);
        assert!(instance.is_valid());
    }
}
