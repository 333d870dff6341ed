mod activity;
mod session_tracking;

pub use activity::*;
pub use session_tracking::*;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub session_tracking: SessionTrackingConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
}

impl Config {
    /// Parse a TOML document.  Missing sections fall back to defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = self.session_tracking.validate();

        if self.activity.throttle_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "activity.throttle_ms".into(),
                message: "zero throttle probes the session on every signal".into(),
            });
        }

        if self.activity.signals.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "activity.signals".into(),
                message: "no activity signals enabled; sessions only refresh on explicit calls"
                    .into(),
            });
        }

        errors
    }
}

impl SessionTrackingConfig {
    /// Checks that only concern the session-tracking section.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if !(0.0..=1.0).contains(&self.sampling_rate) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "session_tracking.sampling_rate".into(),
                message: format!("must be within [0, 1], got {}", self.sampling_rate),
            });
        }

        if self.inactivity_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "session_tracking.inactivity_ms".into(),
                message: "inactivity timeout must be greater than 0".into(),
            });
        }

        if self.expiration_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "session_tracking.expiration_ms".into(),
                message: "session lifetime must be greater than 0".into(),
            });
        }

        if self.inactivity_ms >= self.expiration_ms && self.expiration_ms > 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "session_tracking.inactivity_ms".into(),
                message: "inactivity timeout is never reached before the absolute lifetime"
                    .into(),
            });
        }

        if self.storage_key.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "session_tracking.storage_key".into(),
                message: "storage key must not be empty".into(),
            });
        }

        if let Some(session) = &self.session {
            if session.id.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "session_tracking.session.id".into(),
                    message: "initial session id must not be empty".into(),
                });
            }
        }

        errors
    }

    /// First `Error`-severity issue, as a hard error.
    pub fn ensure_valid(&self) -> Result<()> {
        match self
            .validate()
            .into_iter()
            .find(|e| e.severity == ConfigSeverity::Error)
        {
            Some(issue) => Err(Error::Config(issue.to_string())),
            None => Ok(()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
