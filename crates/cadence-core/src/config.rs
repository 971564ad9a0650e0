use chrono::Duration;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default config file looked up in the working directory.
pub const CONFIG_FILE: &str = "cadence.toml";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub database_path: String,
    pub generation: GenerationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "cadence.db".to_string(),
            generation: GenerationConfig::default(),
        }
    }
}

/// Bounds for instance generation and reconciliation
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// How far past "now" instances are generated (days)
    pub advance_horizon_days: u32,
    /// Two due dates closer than this are the same slot (milliseconds)
    pub duplicate_tolerance_ms: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            advance_horizon_days: 365,
            duplicate_tolerance_ms: 1000,
        }
    }
}

impl GenerationConfig {
    pub fn advance_horizon(&self) -> Duration {
        Duration::days(i64::from(self.advance_horizon_days))
    }

    pub fn duplicate_tolerance(&self) -> Duration {
        Duration::milliseconds(i64::from(self.duplicate_tolerance_ms))
    }
}

impl Config {
    /// Loads `cadence.toml` and `CADENCE_*` environment variables over the defaults.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CADENCE_GENERATION__ADVANCE_HORIZON_DAYS=90`.
    pub fn load() -> Result<Self, CoreError> {
        Ok(Self::figment().extract()?)
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed("CADENCE_").split("__"))
    }
}
