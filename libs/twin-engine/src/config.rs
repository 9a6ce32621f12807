//! Engine configuration
//!
//! Loaded from a TOML file with environment-variable overrides prefixed
//! `TWIN_ENGINE_`, so deployments can tune retention without editing files.

use chrono::Duration;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    /// Most samples kept per point buffer
    pub max_buffer_count: usize,
    /// Oldest sample age kept per point buffer, in hours
    pub max_buffer_age_hours: i64,
    /// Output recording starts this many seconds after actor creation
    pub settle_interval_secs: i64,
    /// Output log rows older than this are trimmed, in days
    pub output_retention_days: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_buffer_count: 10_000,
            max_buffer_age_hours: 48,
            settle_interval_secs: 0,
            output_retention_days: 90,
        }
    }
}

impl EngineSettings {
    /// Defaults, then `path` if it exists, then `TWIN_ENGINE_*` env vars
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Figment::from(figment::providers::Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TWIN_ENGINE_"))
            .extract()
            .map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn max_buffer_age(&self) -> Duration {
        Duration::hours(self.max_buffer_age_hours)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::seconds(self.settle_interval_secs)
    }

    pub fn output_retention(&self) -> Duration {
        Duration::days(self.output_retention_days)
    }
}
