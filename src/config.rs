//! Scheduler configuration using Figment
//!
//! Configuration is loaded from (in order of precedence, last wins):
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `LAB_SCHEDULER_`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! LAB_SCHEDULER_IMX_URL=http://imx-host:5050/imx
//! LAB_SCHEDULER_POLL_INTERVAL_S=0.5
//! LAB_SCHEDULER_LOG_LEVEL=debug
//! ```
//!
//! # Example
//!
//! ```toml
//! imx_url = "http://10.10.0.56:5050/imx"
//! pf_url = "http://10.10.0.98:5050/pf"
//! poll_interval_s = 1.0
//! http_timeout_s = 600
//!
//! [resources]
//! fridge = "http://10.10.0.56:5050/incu"
//!
//! [estimates]
//! acquire = 900.0
//!
//! [estimates.programs]
//! "h1 to imx" = 25.0
//! ```

use crate::error::{AppResult, SchedulerError};
use crate::experiment::feasibility::EstimateTable;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "LAB_SCHEDULER_";

/// Top-level scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the imaging instrument service
    pub imx_url: String,
    /// Base URL of the robot arm service
    pub pf_url: String,
    /// Status probe cadence in seconds
    pub poll_interval_s: f64,
    /// Per-call HTTP timeout in seconds
    pub http_timeout_s: f64,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Additional resources, `name -> base_url`
    pub resources: BTreeMap<String, String>,
    /// Duration estimates for the feasibility checker
    pub estimates: EstimateTable,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            imx_url: "localhost:1234".to_string(),
            pf_url: "localhost:1235".to_string(),
            poll_interval_s: 1.0,
            http_timeout_s: 600.0,
            log_level: "info".to_string(),
            resources: BTreeMap::new(),
            estimates: EstimateTable::default(),
        }
    }
}

impl Settings {
    /// Load settings from defaults, an optional TOML file and the environment.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(SchedulerError::Config(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        let settings: Settings = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.poll_interval_s.is_finite() && self.poll_interval_s > 0.0) {
            return Err(SchedulerError::Config(format!(
                "poll_interval_s must be positive, got {}",
                self.poll_interval_s
            )));
        }
        if !(self.http_timeout_s.is_finite() && self.http_timeout_s > 0.0) {
            return Err(SchedulerError::Config(format!(
                "http_timeout_s must be positive, got {}",
                self.http_timeout_s
            )));
        }
        let named_urls = [("imx_url", &self.imx_url), ("pf_url", &self.pf_url)]
            .into_iter()
            .chain(self.resources.iter().map(|(k, v)| (k.as_str(), v)));
        for (name, url) in named_urls {
            if url.trim().is_empty() {
                return Err(SchedulerError::Config(format!("{name}: empty URL")));
            }
        }
        Ok(())
    }

    /// Status probe cadence.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_s)
    }

    /// Per-call HTTP timeout.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.http_timeout_s)
    }
}
