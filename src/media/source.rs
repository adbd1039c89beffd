//! Media acquisition seam
//!
//! Platform capture (getUserMedia / getDisplayMedia equivalents) lives
//! behind [`MediaSource`] so the call core stays independent of the capture
//! backend. [`StaticMediaSource`] is the always-granting default used by
//! demos and embedders that wire payload production elsewhere.

use super::{MediaStream, MediaTrack, TrackKind, TrackSource};
use crate::{Error, Result};
use async_trait::async_trait;
use tracing::debug;

/// Supplier of local capture streams
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Request microphone and/or camera capture
    ///
    /// Fails with [`Error::MediaAccess`] when permission is denied or no
    /// device is available. The caller owns the returned stream and must
    /// release it on every call-ending path.
    async fn acquire(&self, audio: bool, video: bool) -> Result<MediaStream>;

    /// Request display capture for screen sharing
    ///
    /// Same failure contract as [`MediaSource::acquire`].
    async fn acquire_screen(&self) -> Result<MediaStream>;
}

/// Always-granting media source producing placeholder tracks
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticMediaSource;

impl StaticMediaSource {
    /// Create a new static source
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaSource for StaticMediaSource {
    async fn acquire(&self, audio: bool, video: bool) -> Result<MediaStream> {
        if !audio && !video {
            return Err(Error::MediaAccess(
                "at least one of audio/video must be requested".to_string(),
            ));
        }

        let mut tracks = Vec::new();
        if audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, TrackSource::Microphone));
        }
        if video {
            tracks.push(MediaTrack::new(TrackKind::Video, TrackSource::Camera));
        }

        let stream = MediaStream::new(tracks);
        debug!(
            "acquired local stream {} (audio={}, video={})",
            stream.id(),
            audio,
            video
        );
        Ok(stream)
    }

    async fn acquire_screen(&self) -> Result<MediaStream> {
        let stream = MediaStream::new(vec![MediaTrack::new(
            TrackKind::Video,
            TrackSource::Screen,
        )]);
        debug!("acquired screen stream {}", stream.id());
        Ok(stream)
    }
}
