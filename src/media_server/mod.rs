//! Media server integration: ask the library server to rescan after a publish.

mod plex;

use async_trait::async_trait;
use serde::Serialize;

use crate::uploads::MediaType;

pub use plex::PlexClient;

#[derive(Debug, thiserror::Error)]
pub enum MediaServerError {
    #[error("media server integration is not configured")]
    Disabled,

    #[error("library section '{0}' not found on media server")]
    SectionNotFound(String),

    #[error("media server request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("media server returned HTTP {0}")]
    HttpStatus(u16),
}

/// Identity of the connected media server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaServerInfo {
    pub server_name: String,
    pub version: String,
    pub platform: String,
}

#[async_trait]
pub trait MediaServer: Send + Sync {
    /// Request a rescan of the library section holding `media_type`.
    async fn refresh(&self, media_type: MediaType) -> Result<(), MediaServerError>;

    async fn server_info(&self) -> Result<MediaServerInfo, MediaServerError>;
}

/// Used when no media server is configured. Every call reports [`MediaServerError::Disabled`].
pub struct DisabledMediaServer;

#[async_trait]
impl MediaServer for DisabledMediaServer {
    async fn refresh(&self, _media_type: MediaType) -> Result<(), MediaServerError> {
        Err(MediaServerError::Disabled)
    }

    async fn server_info(&self) -> Result<MediaServerInfo, MediaServerError> {
        Err(MediaServerError::Disabled)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records refresh requests; optionally fails them.
    #[derive(Default)]
    pub struct RecordingMediaServer {
        pub refreshed: Mutex<Vec<MediaType>>,
        pub fail: bool,
    }

    #[async_trait]
    impl MediaServer for RecordingMediaServer {
        async fn refresh(&self, media_type: MediaType) -> Result<(), MediaServerError> {
            if self.fail {
                return Err(MediaServerError::HttpStatus(503));
            }
            self.refreshed.lock().unwrap().push(media_type);
            Ok(())
        }

        async fn server_info(&self) -> Result<MediaServerInfo, MediaServerError> {
            Ok(MediaServerInfo {
                server_name: "fake".to_string(),
                version: "0".to_string(),
                platform: "test".to_string(),
            })
        }
    }
}
