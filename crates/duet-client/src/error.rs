//! Client error types

use serde::Serialize;
use thiserror::Error;

use duet_core::ErrorKind;

/// An error surfaced to the rendering layer
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{kind:?}: {message}")]
pub struct ClientError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn permissions(err: &MediaError) -> Self {
        let message = match err {
            MediaError::Denied => {
                "Camera and microphone access denied. Please allow access and try again."
            }
            MediaError::Unavailable(_) => {
                "Failed to access camera/microphone. Please check your device settings."
            }
        };
        Self::new(ErrorKind::Permissions, message)
    }

    pub fn partner_left() -> Self {
        Self::new(
            ErrorKind::Connection,
            "Partner disconnected. Looking for someone new...",
        )
    }

    pub fn handshake_failed() -> Self {
        Self::new(
            ErrorKind::Connection,
            "Connection failed. Looking for another person...",
        )
    }

    pub fn handshake_timeout() -> Self {
        Self::new(ErrorKind::Connection, "Connection timeout. Trying again...")
    }

    pub fn network_lost() -> Self {
        Self::new(
            ErrorKind::Network,
            "Lost connection to server. Reconnecting...",
        )
    }

    pub fn network_exhausted() -> Self {
        Self::new(
            ErrorKind::Network,
            "Cannot connect to server. Please check your internet connection.",
        )
    }
}

/// Media capture errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("media access denied")]
    Denied,

    #[error("media unavailable: {0}")]
    Unavailable(String),
}

/// Peer connection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("failed to create peer connection: {0}")]
    Setup(String),

    #[error("failed to apply signal: {0}")]
    Signal(String),

    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("connection closed")]
    Closed,

    #[error("no remote media within {0:?}")]
    Timeout(std::time::Duration),
}

/// Relay transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("gave up after {0} attempts")]
    Exhausted(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_messages() {
        let denied = ClientError::permissions(&MediaError::Denied);
        assert_eq!(denied.kind, ErrorKind::Permissions);
        assert!(denied.message.contains("denied"));

        let missing = ClientError::permissions(&MediaError::Unavailable("no camera".into()));
        assert!(missing.message.contains("device settings"));
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::handshake_timeout();
        assert_eq!(err.to_string(), "Connection: Connection timeout. Trying again...");
    }
}
