//! Media capture seam
//!
//! The client never touches audio or video itself. A [`MediaProvider`]
//! hands out a local capture handle, the peer connection produces a remote
//! one, and the rendering layer displays both.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MediaError;

/// A live audio/video stream
pub trait MediaStream: Send + Sync {
    /// Stable identifier, for logs and rendering
    fn id(&self) -> &str;

    /// Stop every track. Must be idempotent.
    fn stop(&self);
}

/// Handle to a stream shared between the controller and the rendering layer
#[derive(Clone)]
pub struct MediaHandle(Arc<dyn MediaStream>);

impl MediaHandle {
    pub fn new(stream: impl MediaStream + 'static) -> Self {
        Self(Arc::new(stream))
    }

    pub fn id(&self) -> &str {
        self.0.id()
    }

    pub fn stop(&self) {
        self.0.stop()
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MediaHandle").field(&self.id()).finish()
    }
}

/// Local camera + microphone capture
pub type LocalMedia = MediaHandle;

/// Media received from the partner
pub type RemoteMedia = MediaHandle;

/// Source of local capture; typically prompts the user for permission
#[async_trait]
pub trait MediaProvider: Send + Sync {
    async fn acquire(&self) -> Result<LocalMedia, MediaError>;
}
