//! Error types for the Duet wire protocol

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol-level errors
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("signal payload missing")]
    MissingSignal,

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Malformed(e.to_string())
    }
}

/// Wire error codes (sent over network)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Frame could not be decoded
    BadMessage,

    /// Frame exceeded the size limit
    MessageTooLarge,

    /// Internal server error
    InternalError,
}

impl From<&ProtocolError> for ErrorCode {
    fn from(e: &ProtocolError) -> Self {
        match e {
            ProtocolError::Malformed(_) => ErrorCode::BadMessage,
            ProtocolError::MissingSignal => ErrorCode::BadMessage,
            ProtocolError::Serialization(_) => ErrorCode::InternalError,
            ProtocolError::MessageTooLarge { .. } => ErrorCode::MessageTooLarge,
        }
    }
}
