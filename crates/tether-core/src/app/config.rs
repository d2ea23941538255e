//! Configuration.
//!
//! Defaults match the server's expectations; every knob can be overridden
//! from the environment:
//!
//! | Variable                      | Default | Description                              |
//! |-------------------------------|---------|------------------------------------------|
//! | `TETHER_BASE_URL`             | --      | Server root, e.g. `https://erp.example`  |
//! | `TETHER_SESSION`              | --      | Session cookie value sent with requests  |
//! | `TETHER_HIDDEN_DELAY_MS`      | `4000`  | Base wait after a successful poll        |
//! | `TETHER_ERROR_DELAY_MS`       | `10000` | Base wait after a failed poll            |
//! | `TETHER_JOB_TIME_LIMIT_SECS`  | `1200`  | Queue time plus running time of a job    |

use std::time::Duration;

use serde::Deserialize;

use super::backoff::Backoff;
use crate::domain::ConfigError;

/// 20 minutes: time in the queue plus running time.
pub const DEFAULT_JOB_TIME_LIMIT: Duration = Duration::from_secs(20 * 60);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub hidden_delay_ms: u64,
    pub error_delay_ms: u64,
    /// Capacity of the notification fan-out; slow subscribers lag past it.
    pub fanout_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        let backoff = Backoff::default();
        Self {
            hidden_delay_ms: backoff.hidden_delay.as_millis() as u64,
            error_delay_ms: backoff.error_delay.as_millis() as u64,
            fanout_capacity: 1024,
        }
    }
}

impl BusConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            hidden_delay: Duration::from_millis(self.hidden_delay_ms),
            error_delay: Duration::from_millis(self.error_delay_ms),
            ..Backoff::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub job_time_limit_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            job_time_limit_secs: DEFAULT_JOB_TIME_LIMIT.as_secs(),
        }
    }
}

impl TrackerConfig {
    pub fn job_time_limit(&self) -> Duration {
        Duration::from_secs(self.job_time_limit_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub base_url: Option<String>,
    pub session_cookie: Option<String>,
    pub bus: BusConfig,
    pub tracker: TrackerConfig,
}

impl TetherConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = TetherConfig {
            base_url: lookup("TETHER_BASE_URL").map(|url| url.trim_end_matches('/').to_string()),
            session_cookie: lookup("TETHER_SESSION"),
            ..TetherConfig::default()
        };
        if let Some(ms) = parse_u64(&lookup, "TETHER_HIDDEN_DELAY_MS")? {
            config.bus.hidden_delay_ms = ms;
        }
        if let Some(ms) = parse_u64(&lookup, "TETHER_ERROR_DELAY_MS")? {
            config.bus.error_delay_ms = ms;
        }
        if let Some(secs) = parse_u64(&lookup, "TETHER_JOB_TIME_LIMIT_SECS")? {
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    var: "TETHER_JOB_TIME_LIMIT_SECS",
                    expected: "a positive number of seconds",
                    value: secs.to_string(),
                });
            }
            config.tracker.job_time_limit_secs = secs;
        }
        Ok(config)
    }

    pub fn require_base_url(&self) -> Result<&str, ConfigError> {
        self.base_url
            .as_deref()
            .ok_or(ConfigError::Missing("TETHER_BASE_URL"))
    }
}

fn parse_u64<F>(lookup: &F, var: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => match raw.trim().parse() {
            Ok(value) => Ok(Some(value)),
            Err(_) => Err(ConfigError::Invalid {
                var,
                expected: "an unsigned integer",
                value: raw,
            }),
        },
    }
}
