//! Device configuration
//!
//! Patient and monitor settings with per-field defaults. Both load from and
//! save to JSON, and the CLI overrides individual fields.

use crate::error::FallWatchError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Port the patient device serves status on
pub const DEFAULT_STATUS_PORT: u16 = 8080;
/// Port of the remote classification server
pub const DEFAULT_CLASSIFICATION_PORT: u16 = 4011;
/// How long the patient has to confirm they are fine
pub const DEFAULT_CONFIRMATION_TIMEOUT_MS: u64 = 5000;

/// Patient device settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientConfig {
    /// Status server listen port
    pub listen_port: u16,
    /// Classification server IP address (user-editable). A hostname is resolved
    /// outside the connect timeout.
    pub classification_host: String,
    pub classification_port: u16,
    pub classify_connect_timeout_ms: u64,
    pub classify_read_timeout_ms: u64,
    pub confirmation_timeout_ms: u64,
    /// Directory for recorded event windows and features; recording is off when unset
    pub record_dir: Option<PathBuf>,
}

impl Default for PatientConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_STATUS_PORT,
            classification_host: "172.20.10.2".to_string(),
            classification_port: DEFAULT_CLASSIFICATION_PORT,
            classify_connect_timeout_ms: 2000,
            classify_read_timeout_ms: 2000,
            confirmation_timeout_ms: DEFAULT_CONFIRMATION_TIMEOUT_MS,
            record_dir: None,
        }
    }
}

impl PatientConfig {
    pub fn from_json(json: &str) -> Result<Self, FallWatchError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, FallWatchError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), FallWatchError> {
        if self.classification_port == 0 {
            return Err(FallWatchError::InvalidConfig(
                "classification_port must be non-zero".to_string(),
            ));
        }
        if self.classification_host.trim().is_empty() {
            return Err(FallWatchError::InvalidConfig(
                "classification_host must not be empty".to_string(),
            ));
        }
        if self.classify_connect_timeout_ms == 0 || self.classify_read_timeout_ms == 0 {
            return Err(FallWatchError::InvalidConfig(
                "classification timeouts must be non-zero".to_string(),
            ));
        }
        if self.confirmation_timeout_ms == 0 {
            return Err(FallWatchError::InvalidConfig(
                "confirmation_timeout_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Monitor device settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Patient device IP address (user-editable). A hostname is resolved
    /// outside the connect timeout.
    pub patient_host: String,
    pub patient_port: u16,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            patient_host: "172.20.10.4".to_string(),
            patient_port: DEFAULT_STATUS_PORT,
            connect_timeout_ms: 1000,
            read_timeout_ms: 1000,
        }
    }
}

impl MonitorConfig {
    pub fn from_json(json: &str) -> Result<Self, FallWatchError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, FallWatchError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), FallWatchError> {
        if self.patient_port == 0 {
            return Err(FallWatchError::InvalidConfig(
                "patient_port must be non-zero".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 || self.read_timeout_ms == 0 {
            return Err(FallWatchError::InvalidConfig(
                "poll timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
