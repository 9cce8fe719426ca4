//! Error type shared by both sides of the chart-frame protocol

use crate::events::EventTag;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the transport, the handshake and the runtime context
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum ProtocolError {
    // Transport errors
    #[error("No acknowledgment for {event} within {timeout_ms}ms")]
    AckTimeout { event: EventTag, timeout_ms: u64 },

    #[error("Response channel already received its reply")]
    AlreadyReplied,

    #[error("{event} rejected by receiver: {message}")]
    Rejected { event: EventTag, message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    // Handshake errors
    #[error("Handshake failed at {step}: {reason}")]
    HandshakeFailed { step: EventTag, reason: String },

    #[error("Handshake already in progress ({state})")]
    HandshakeInProgress { state: String },

    #[error("Chart is not initialized")]
    NotInitialized,

    // Render lifecycle errors
    #[error("A render cycle is already running")]
    RenderInProgress,

    #[error("Unknown context menu action: {id}")]
    UnknownAction { id: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        message: String,
        field: Option<String>,
    },

    #[error("Chart runtime has been torn down")]
    TornDown,
}

/// Result type alias for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

impl ProtocolError {
    /// Whether this error means the peer never answered in time
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProtocolError::AckTimeout { .. })
    }

    pub fn invalid_config(message: impl Into<String>, field: &str) -> Self {
        ProtocolError::InvalidConfig {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Helper macro for converting foreign errors into `ProtocolError::Transport`
#[macro_export]
macro_rules! map_transport_error {
    ($result:expr, $message:expr) => {
        $result.map_err(|e| $crate::errors::ProtocolError::Transport {
            message: format!("{}: {:?}", $message, e),
        })
    };
}
