// ABOUTME: Health check configuration for the rotation gate.
// ABOUTME: Maps YAML settings onto the HealthProbe retry budget.

use serde::Deserialize;
use std::time::Duration;

use crate::health::HealthProbe;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthcheckConfig {
    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Per-request timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HealthcheckConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            attempts: default_attempts(),
            interval: default_interval(),
            timeout: default_timeout(),
        }
    }
}

impl HealthcheckConfig {
    pub fn probe(&self) -> HealthProbe {
        HealthProbe {
            path: self.path.clone(),
            attempts: self.attempts,
            interval: self.interval,
            request_timeout: self.timeout,
        }
    }
}

fn default_path() -> String {
    "/".to_string()
}

fn default_attempts() -> u32 {
    10
}

fn default_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}
