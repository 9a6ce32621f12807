//! Calculated points and their sync-tracking records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the sync layer should do with the derived twin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TwinAction {
    #[default]
    None,
    /// Create or update the twin to match this record
    Upsert,
    /// Remove the twin
    Delete,
}

/// Where the derived twin stands against the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TwinSyncStatus {
    #[default]
    Unknown,
    /// No twin materialized yet
    NoTwinExist,
    InSync,
    OutOfSync,
}

/// A point whose value is derived from an expression over other points
///
/// Doubles as the upsert-tracking record handed to the persistence sink:
/// `action_required`/`action_status` record what the sync layer must do,
/// independent of whether the point is currently enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculatedPoint {
    pub id: String,
    pub name: String,
    pub value_expression: String,
    /// Synthetic stream id for the derived series
    pub trend_id: Uuid,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub action_required: TwinAction,
    #[serde(default)]
    pub action_status: TwinSyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
}

impl CalculatedPoint {
    pub fn new(id: impl Into<String>, value_expression: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            value_expression: value_expression.into(),
            trend_id: Uuid::new_v4(),
            unit: None,
            is_enabled: true,
            action_required: TwinAction::Upsert,
            action_status: TwinSyncStatus::NoTwinExist,
            last_synced: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn mark_synced(&mut self, when: DateTime<Utc>) {
        self.action_status = TwinSyncStatus::InSync;
        self.last_synced = Some(when);
    }
}
