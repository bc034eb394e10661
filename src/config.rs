use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::domains::envelope::{Address, Identity};
use crate::error::{Result, TransportError};

pub const DEFAULT_NACK_ERROR_CODE: &str = "1000";
pub const DEFAULT_NACK_ERROR_TEXT: &str = "Example error";
pub const DEFAULT_NACK_DIAGNOSTIC_TEXT: &str = "Example diagnostic text";
pub const DEFAULT_RESOURCE_PATH: &str = "download/{deviceId}/{patientId}";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AcknowledgementConfig {
    pub positive_response: Option<String>,
    pub audit_identity: Option<String>,
    pub sender_address: Option<String>,
    pub nack_error_code: Option<String>,
    pub nack_error_text: Option<String>,
    pub nack_diagnostic_text: Option<String>,
    pub template_dir: Option<String>,
}

impl AcknowledgementConfig {
    /// Unset, or anything starting with `y`, means a positive acknowledgement.
    pub fn is_positive(&self) -> bool {
        match self.positive_response.as_deref() {
            None => true,
            Some(value) => value.trim().to_lowercase().starts_with('y'),
        }
    }

    pub fn audit_identity(&self) -> Result<Identity> {
        let value = required(self.audit_identity.as_deref(), "audit_identity")?;
        Identity::parse(value).map_err(|e| TransportError::Config(e.to_string()))
    }

    pub fn sender_address(&self) -> Result<Address> {
        let value = required(self.sender_address.as_deref(), "sender_address")?;
        Address::parse(value).map_err(|e| TransportError::Config(e.to_string()))
    }

    pub fn nack_error_code(&self) -> &str {
        self.nack_error_code
            .as_deref()
            .unwrap_or(DEFAULT_NACK_ERROR_CODE)
    }

    pub fn nack_error_text(&self) -> &str {
        self.nack_error_text
            .as_deref()
            .unwrap_or(DEFAULT_NACK_ERROR_TEXT)
    }

    pub fn nack_diagnostic_text(&self) -> &str {
        self.nack_diagnostic_text
            .as_deref()
            .unwrap_or(DEFAULT_NACK_DIAGNOSTIC_TEXT)
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| TransportError::Config(format!("acknowledgement {name} is not set")))
}

/// What the poller does after a cycle the concentrator rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Try again on the next scheduled tick.
    #[default]
    NextCycle,
    /// Skip an exponentially growing number of ticks, capped at `max_skipped_cycles`.
    Backoff { max_skipped_cycles: u32 },
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PollerConfig {
    pub base_url: Option<String>,
    pub resource_path: Option<String>,
    pub device_id: Option<String>,
    pub patient_id: Option<String>,
    pub poll_seconds: Option<u64>,
    pub timeout_seconds: Option<u64>,
    pub failure_policy: Option<FailurePolicy>,
    pub inbox_dir: Option<String>,
}

impl PollerConfig {
    pub fn base_url(&self) -> Result<&str> {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| TransportError::Config("poller base_url is not set".to_string()))
    }

    pub fn device_id(&self) -> Result<&str> {
        self.device_id
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| TransportError::Config("poller device_id is not set".to_string()))
    }

    pub fn resource_path(&self) -> &str {
        self.resource_path
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_RESOURCE_PATH)
    }

    pub fn poll_seconds(&self) -> u64 {
        self.poll_seconds.unwrap_or(60).max(1)
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds.unwrap_or(10).max(1)
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub acknowledgement: Option<AcknowledgementConfig>,
    pub poller: Option<PollerConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| TransportError::Config(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| TransportError::Config(e.to_string()))?;
        Ok(config)
    }
}

/// Shared, replaceable acknowledgement settings.
///
/// Readers take a snapshot per operation, so a reload is seen by the next
/// acknowledgement without restarting anything.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<AcknowledgementConfig>>,
}

impl SettingsHandle {
    pub fn new(config: AcknowledgementConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn snapshot(&self) -> AcknowledgementConfig {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, config: AcknowledgementConfig) {
        match self.inner.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }
}
