use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::eviction::{EvictionBudget, EvictionPolicy};
use crate::core::memory_monitor::MonitorSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid JSON in config file: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Tuning knobs for the engine. Every field has a default, so a partial JSON
/// file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Minimum spacing of operation-triggered pressure checks.
    pub memory_check_interval_ms: u64,
    /// Period of the control loop's monitor tick.
    pub monitor_tick_interval_ms: u64,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub aggressive_cooldown_ms: u64,
    pub eviction_min_age_ms: u64,
    pub eviction_budget: EvictionBudget,
    /// Heap ceiling. Physical memory is used when unset.
    pub heap_budget_mb: Option<u64>,
    /// OS low memory is reported when available memory drops below this.
    pub low_memory_threshold_mb: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_check_interval_ms: 5_000,
            monitor_tick_interval_ms: 5_000,
            warning_threshold: 0.80,
            critical_threshold: 0.90,
            aggressive_cooldown_ms: 30_000,
            eviction_min_age_ms: 30_000,
            eviction_budget: EvictionBudget::HalfPlusOne,
            heap_budget_mb: None,
            low_memory_threshold_mb: 256,
        }
    }
}

impl EngineConfig {
    /// Loads and validates a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("warningThreshold", self.warning_threshold),
            ("criticalThreshold", self.critical_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is outside (0, 1]"),
                });
            }
        }
        if self.warning_threshold >= self.critical_threshold {
            return Err(ConfigError::Invalid {
                field: "warningThreshold",
                reason: "must be below criticalThreshold".to_string(),
            });
        }
        for (field, value) in [
            ("memoryCheckIntervalMs", self.memory_check_interval_ms),
            ("monitorTickIntervalMs", self.monitor_tick_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.heap_budget_mb == Some(0) {
            return Err(ConfigError::Invalid {
                field: "heapBudgetMb",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            warning_threshold: self.warning_threshold,
            critical_threshold: self.critical_threshold,
            aggressive_cooldown_ms: self.aggressive_cooldown_ms,
            check_interval_ms: self.memory_check_interval_ms,
        }
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy::new(self.eviction_min_age_ms, self.eviction_budget)
    }
}

impl fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EngineConfig
    Check interval: {} ms,
    Tick interval: {} ms,
    Thresholds: warning {:.2}, critical {:.2},
    Aggressive cooldown: {} ms,
    Eviction: min age {} ms, budget {:?},
    Heap budget: {},
    Low memory threshold: {} MB",
            self.memory_check_interval_ms,
            self.monitor_tick_interval_ms,
            self.warning_threshold,
            self.critical_threshold,
            self.aggressive_cooldown_ms,
            self.eviction_min_age_ms,
            self.eviction_budget,
            self.heap_budget_mb
                .map(|mb| format!("{mb} MB"))
                .unwrap_or_else(|| "physical memory".to_string()),
            self.low_memory_threshold_mb,
        )
    }
}
