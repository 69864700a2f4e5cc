//! Local media collaborator
//!
//! Device acquisition and track management live outside this crate. The
//! orchestrator only needs to know, at publish time, which local tracks
//! exist, and to wait for acquisition when it has not happened yet.

use crate::Result;
use async_trait::async_trait;

/// Presence of local tracks, reported in the publish command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackFlags {
    pub video: bool,
    pub audio: bool,
}

impl TrackFlags {
    pub fn new(video: bool, audio: bool) -> Self {
        Self { video, audio }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// External provider of local media
#[async_trait]
pub trait MediaProvider: Send + Sync {
    /// Ensure local media is acquired and report which tracks exist.
    /// Awaited before the publish command is sent.
    async fn ensure_local_media(&self) -> Result<TrackFlags>;
}

/// Provider with a fixed answer, for data-only and headless deployments
#[derive(Debug, Clone, Copy)]
pub struct StaticMediaProvider {
    flags: TrackFlags,
}

impl StaticMediaProvider {
    pub fn new(flags: TrackFlags) -> Self {
        Self { flags }
    }
}

#[async_trait]
impl MediaProvider for StaticMediaProvider {
    async fn ensure_local_media(&self) -> Result<TrackFlags> {
        Ok(self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_reports_fixed_flags() {
        let provider = StaticMediaProvider::new(TrackFlags::new(true, false));
        let flags = provider.ensure_local_media().await.unwrap();
        assert!(flags.video);
        assert!(!flags.audio);
    }
}
