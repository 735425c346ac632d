use crate::error::Result;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Tunables for the authorization switch.
///
/// Every field has a default, so a partial JSON document (or none at all)
/// yields a working configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// Sliding window during which a repeated STAN is a replay (seconds).
    #[serde(default = "default_replay_window_secs")]
    pub replay_window_secs: u64,

    /// Upper bound on tracked sequence records.
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,

    /// Response signature validity (seconds).
    #[serde(default = "default_signature_validity_secs")]
    pub signature_validity_secs: u64,

    #[serde(default = "default_fraud_threshold")]
    pub fraud_threshold: f64,

    /// Recent transactions per card fed to the scoring engines.
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,

    #[serde(default = "default_rotation_validity_days")]
    pub rotation_validity_days: i64,

    #[serde(default = "default_compromise_validity_days")]
    pub compromise_validity_days: i64,

    /// Version offset applied to emergency keys.
    #[serde(default = "default_compromise_version_jump")]
    pub compromise_version_jump: u32,

    /// ISO 4217 numeric currency used when field 49 is absent.
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_replay_window_secs() -> u64 {
    300
}

fn default_replay_capacity() -> usize {
    10_000
}

fn default_signature_validity_secs() -> u64 {
    60
}

fn default_fraud_threshold() -> f64 {
    0.7
}

fn default_history_depth() -> usize {
    20
}

fn default_rotation_validity_days() -> i64 {
    30
}

fn default_compromise_validity_days() -> i64 {
    7
}

fn default_compromise_version_jump() -> u32 {
    100
}

fn default_currency() -> String {
    "978".to_string()
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            replay_window_secs: default_replay_window_secs(),
            replay_capacity: default_replay_capacity(),
            signature_validity_secs: default_signature_validity_secs(),
            fraud_threshold: default_fraud_threshold(),
            history_depth: default_history_depth(),
            rotation_validity_days: default_rotation_validity_days(),
            compromise_validity_days: default_compromise_validity_days(),
            compromise_version_jump: default_compromise_version_jump(),
            currency: default_currency(),
        }
    }
}

impl SwitchConfig {
    /// Loads a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let config = serde_json::from_reader(BufReader::new(file))?;
        Ok(config)
    }

    pub fn replay_window(&self) -> Duration {
        Duration::seconds(self.replay_window_secs as i64)
    }

    pub fn signature_validity(&self) -> Duration {
        Duration::seconds(self.signature_validity_secs as i64)
    }

    pub fn rotation_validity(&self) -> Duration {
        Duration::days(self.rotation_validity_days)
    }

    pub fn compromise_validity(&self) -> Duration {
        Duration::days(self.compromise_validity_days)
    }
}
