//! JSON configuration file: loading and validation.
//!
//! The service reloads this file at the start of every cycle; a file that
//! fails to load or validate leaves the previous settings in effect.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config;
use crate::core::desired::ConflictPolicy;
use crate::core::model::InstanceSpec;
use crate::error::EngineError;

/// What happens to a running instance whose address cannot be resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFailurePolicy {
    /// Treat the instance as not running; its rules are removed.
    #[default]
    DropInstance,
    /// Leave the instance's configured ports exactly as installed this cycle.
    HoldPorts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub check_interval_seconds: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    #[serde(default)]
    pub address_failure: AddressFailurePolicy,
    #[serde(default)]
    pub instances: Vec<InstanceSpec>,
}

fn default_command_timeout() -> u64 {
    config::DEFAULT_COMMAND_TIMEOUT_SECS
}

impl Settings {
    /// Read, parse and validate a settings file.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        let settings: Settings = serde_json::from_str(text)
            .map_err(|e| EngineError::Config(format!("failed to parse JSON config: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the engine cannot run with. Duplicate external ports
    /// across instances are allowed; they are resolved at runtime.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(config::MIN_CHECK_INTERVAL_SECS..=config::MAX_CHECK_INTERVAL_SECS)
            .contains(&self.check_interval_seconds)
        {
            return Err(EngineError::Config(format!(
                "check_interval_seconds must be between {} and {}",
                config::MIN_CHECK_INTERVAL_SECS,
                config::MAX_CHECK_INTERVAL_SECS
            )));
        }
        if !(1..=config::MAX_COMMAND_TIMEOUT_SECS).contains(&self.command_timeout_seconds) {
            return Err(EngineError::Config(format!(
                "command_timeout_seconds must be between 1 and {}",
                config::MAX_COMMAND_TIMEOUT_SECS
            )));
        }

        for instance in &self.instances {
            if instance.name.trim().is_empty() {
                return Err(EngineError::Config("instance name cannot be empty".into()));
            }
            for port in &instance.ports {
                if port.external_port == 0 {
                    return Err(EngineError::Config(format!(
                        "invalid external port number 0 in instance {}",
                        instance.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    pub fn port_count(&self) -> usize {
        self.instances.iter().map(|i| i.ports.len()).sum()
    }
}
