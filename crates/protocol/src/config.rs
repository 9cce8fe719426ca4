//! Protocol configuration and validation

use chart_frame_shared::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time a sender waits for an acknowledgment
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 10_000;

/// Upper bound accepted for `ack_timeout_ms` (5 minutes)
pub const MAX_ACK_TIMEOUT_MS: u64 = 300_000;

/// Settings for one side of a host/frame pairing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolConfig {
    /// Origin inbound messages must come from, matched exactly.
    /// Also used as the `targetOrigin` of outbound messages.
    pub expected_origin: String,

    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

fn default_ack_timeout_ms() -> u64 {
    DEFAULT_ACK_TIMEOUT_MS
}

impl ProtocolConfig {
    pub fn new(expected_origin: impl Into<String>) -> Self {
        Self {
            expected_origin: expected_origin.into(),
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
        }
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ProtocolError::InvalidConfig {
            message: format!("Failed to parse config: {e}"),
            field: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ProtocolResult<()> {
        Self::validate_origin(&self.expected_origin)?;

        if self.ack_timeout_ms == 0 || self.ack_timeout_ms > MAX_ACK_TIMEOUT_MS {
            return Err(ProtocolError::invalid_config(
                format!(
                    "Invalid ack_timeout_ms: {}. Must be between 1 and {}",
                    self.ack_timeout_ms, MAX_ACK_TIMEOUT_MS
                ),
                "ackTimeoutMs",
            ));
        }

        Ok(())
    }

    fn validate_origin(origin: &str) -> ProtocolResult<()> {
        if origin.is_empty() {
            return Err(ProtocolError::invalid_config(
                "Expected origin must not be empty",
                "expectedOrigin",
            ));
        }

        // Origin matching is the only trust boundary, a wildcard disables it
        if origin == "*" {
            return Err(ProtocolError::invalid_config(
                "Wildcard origin is not allowed",
                "expectedOrigin",
            ));
        }

        // Sandboxed frames without allow-same-origin report the opaque origin "null"
        if origin == "null" {
            return Ok(());
        }

        let url = url::Url::parse(origin).map_err(|e| {
            ProtocolError::invalid_config(
                format!("Origin '{origin}' is not a valid URL: {e}"),
                "expectedOrigin",
            )
        })?;

        // Inbound origins are compared verbatim against the browser's serialization
        let serialized = url.origin().ascii_serialization();
        if serialized != origin {
            return Err(ProtocolError::invalid_config(
                format!("Origin '{origin}' must be in serialized form '{serialized}'"),
                "expectedOrigin",
            ));
        }

        Ok(())
    }
}

/// Identity the host announces in `Initialize`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostOptions {
    #[serde(default = "new_component_id")]
    pub component_id: String,
    pub host_url: String,
}

fn new_component_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl HostOptions {
    /// Options with a freshly generated component id
    pub fn new(host_url: impl Into<String>) -> Self {
        Self {
            component_id: new_component_id(),
            host_url: host_url.into(),
        }
    }

    pub fn with_component_id(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = component_id.into();
        self
    }
}
