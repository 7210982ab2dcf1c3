use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ProducerId, RoomId, TransportId};

/// Signaling error taxonomy.
///
/// Every variant carries its human-readable message, so the wire
/// `{code, message}` form maps back onto the same variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("{0}")]
    RoomNotFound(String),

    #[error("{0}")]
    TransportNotFound(String),

    #[error("{0}")]
    ProducerNotFound(String),

    #[error("{0}")]
    Timeout(String),

    /// Media engine message, forwarded verbatim
    #[error("{0}")]
    EngineFailure(String),

    #[error("{0}")]
    Validation(String),

    // Client-local variants, never sent over the wire
    #[error("request already pending: {0}")]
    DuplicateRequest(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    #[must_use]
    pub fn room_not_found(room_id: &RoomId) -> Self {
        Self::RoomNotFound(format!("room {room_id} not found"))
    }

    #[must_use]
    pub fn transport_not_found(transport_id: &TransportId) -> Self {
        Self::TransportNotFound(format!("transport {transport_id} not found"))
    }

    #[must_use]
    pub fn producer_not_found(producer_id: &ProducerId) -> Self {
        Self::ProducerNotFound(format!("producer {producer_id} not found"))
    }

    #[must_use]
    pub fn timeout(event: &str, after: Duration) -> Self {
        Self::Timeout(format!("{event} timed out after {}ms", after.as_millis()))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Wire code for this error, `None` for client-local variants
    #[must_use]
    pub const fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::RoomNotFound(_) => Some(ErrorCode::RoomNotFound),
            Self::TransportNotFound(_) => Some(ErrorCode::TransportNotFound),
            Self::ProducerNotFound(_) => Some(ErrorCode::ProducerNotFound),
            Self::Timeout(_) => Some(ErrorCode::Timeout),
            Self::EngineFailure(_) => Some(ErrorCode::EngineFailure),
            Self::Validation(_) => Some(ErrorCode::ValidationError),
            Self::DuplicateRequest(_) | Self::ConnectionClosed | Self::Transport(_) => None,
        }
    }

    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code().unwrap_or(ErrorCode::EngineFailure),
            message: self.to_string(),
        }
    }

    #[must_use]
    pub fn from_payload(payload: ErrorPayload) -> Self {
        let ErrorPayload { code, message } = payload;
        match code {
            ErrorCode::RoomNotFound => Self::RoomNotFound(message),
            ErrorCode::TransportNotFound => Self::TransportNotFound(message),
            ErrorCode::ProducerNotFound => Self::ProducerNotFound(message),
            ErrorCode::Timeout => Self::Timeout(message),
            ErrorCode::EngineFailure => Self::EngineFailure(message),
            ErrorCode::ValidationError => Self::Validation(message),
        }
    }
}

impl From<crate::engine::EngineError> for Error {
    fn from(err: crate::engine::EngineError) -> Self {
        Self::EngineFailure(err.0)
    }
}

/// Stable error code carried in `…Error` payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    RoomNotFound,
    TransportNotFound,
    ProducerNotFound,
    Timeout,
    EngineFailure,
    ValidationError,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RoomNotFound => "roomNotFound",
            Self::TransportNotFound => "transportNotFound",
            Self::ProducerNotFound => "producerNotFound",
            Self::Timeout => "timeout",
            Self::EngineFailure => "engineFailure",
            Self::ValidationError => "validationError",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of every `<event>Error` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorPayload {
    /// Lenient decode: a payload without a recognizable code is treated as
    /// an engine failure carrying whatever message it has.
    #[must_use]
    pub fn from_value(value: serde_json::Value) -> Self {
        if let Ok(payload) = serde_json::from_value::<Self>(value.clone()) {
            return payload;
        }
        let message = match &value {
            serde_json::Value::String(s) => s.clone(),
            other => other
                .get("message")
                .and_then(serde_json::Value::as_str)
                .map_or_else(|| other.to_string(), str::to_string),
        };
        Self {
            code: ErrorCode::EngineFailure,
            message,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
