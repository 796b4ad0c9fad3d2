//! Indicator configuration loaded from TOML.

use std::time::Duration;

use mconnect_bus::DEFAULT_BUS_NAME;
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub indicator: IndicatorSettings,
    #[serde(default)]
    pub service: ServiceConfig,
}

/// What the presentation layer shows. May change at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IndicatorSettings {
    /// Keep disconnected devices expanded rather than collapsed.
    #[serde(default)]
    pub show_offline: bool,
    /// Include devices that are not allowed.
    #[serde(default)]
    pub show_unallowed: bool,
    /// One top-level indicator per device instead of a single aggregate.
    #[serde(default)]
    pub per_device_indicators: bool,
    /// Launch the service when it is absent.
    #[serde(default = "default_true")]
    pub start_daemon: bool,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            show_offline: false,
            show_unallowed: false,
            per_device_indicators: false,
            start_daemon: true,
        }
    }
}

/// Service connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceConfig {
    #[serde(default = "default_bus_name")]
    pub bus_name: String,
    #[serde(default = "default_transition_timeout_ms")]
    pub transition_timeout_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl ServiceConfig {
    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bus_name: default_bus_name(),
            transition_timeout_ms: default_transition_timeout_ms(),
            log_level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_bus_name() -> String {
    DEFAULT_BUS_NAME.to_string()
}

fn default_transition_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}
