//! Local and remote media stream handles
//!
//! Tracks here are ownership/lifecycle handles, not sample pipelines: the
//! session controller toggles, replaces, and stops them, and the peer
//! connection layer maps them onto negotiated transport tracks. Producing
//! actual media payload belongs to the embedding application's capture
//! layer behind [`MediaSource`](crate::media::MediaSource).

pub mod source;

pub use source::{MediaSource, StaticMediaSource};

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl TrackKind {
    /// Lowercase kind name, as used in track/stream ids
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// Where a track's media comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    /// Local microphone capture
    Microphone,
    /// Local camera capture
    Camera,
    /// Local display capture (screen share)
    Screen,
    /// Track assembled from the remote peer
    Remote,
}

type EndedHook = Box<dyn Fn() + Send + Sync>;

/// A single media track handle
///
/// `enabled` mirrors the mute/camera-off toggles (the track keeps flowing,
/// consumers discard it); `stop` releases the underlying device and is
/// permanent. Both are safe to call from any thread.
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    source: TrackSource,
    enabled: AtomicBool,
    stopped: AtomicBool,
    ended_hooks: Mutex<Vec<EndedHook>>,
}

impl MediaTrack {
    /// Create a new live, enabled track
    pub fn new(kind: TrackKind, source: TrackSource) -> Arc<Self> {
        Arc::new(Self {
            id: format!("{}-{}", kind.as_str(), Uuid::new_v4()),
            kind,
            source,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            ended_hooks: Mutex::new(Vec::new()),
        })
    }

    /// Unique track id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Media kind
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Capture source
    pub fn source(&self) -> TrackSource {
        self.source
    }

    /// Whether consumers should render this track
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Flip the enabled flag (mute / camera-off toggle)
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Whether the track has been stopped
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Register a hook that fires once when the track stops
    ///
    /// Used for platform-initiated endings (e.g. the user stopping a screen
    /// share from the native UI) as well as local `stop` calls.
    pub fn on_ended(&self, hook: impl Fn() + Send + Sync + 'static) {
        if self.is_stopped() {
            hook();
            return;
        }
        self.ended_hooks.lock().push(Box::new(hook));
    }

    /// Stop the track and release its device; idempotent
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("track {} stopped", self.id);
        let hooks = std::mem::take(&mut *self.ended_hooks.lock());
        for hook in hooks {
            hook();
        }
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

struct StreamInner {
    id: String,
    tracks: RwLock<Vec<Arc<MediaTrack>>>,
}

/// A group of media tracks handled as one unit
///
/// Cheap to clone; all clones share the same track list.
#[derive(Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

impl MediaStream {
    /// Create a stream from an initial track list
    pub fn new(tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: format!("stream-{}", Uuid::new_v4()),
                tracks: RwLock::new(tracks),
            }),
        }
    }

    /// Create an empty stream (remote streams start empty and accumulate)
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Unique stream id
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Snapshot of the current track list
    pub fn tracks(&self) -> Vec<Arc<MediaTrack>> {
        self.inner.tracks.read().clone()
    }

    /// Snapshot of tracks of one kind
    pub fn tracks_of_kind(&self, kind: TrackKind) -> Vec<Arc<MediaTrack>> {
        self.inner
            .tracks
            .read()
            .iter()
            .filter(|t| t.kind() == kind)
            .cloned()
            .collect()
    }

    /// Append a track
    pub fn add_track(&self, track: Arc<MediaTrack>) {
        self.inner.tracks.write().push(track);
    }

    /// Replace the first video track with `new`, returning the old one
    ///
    /// Appends `new` when the stream has no video track yet.
    pub fn replace_video_track(&self, new: Arc<MediaTrack>) -> Option<Arc<MediaTrack>> {
        let mut tracks = self.inner.tracks.write();
        match tracks.iter().position(|t| t.kind() == TrackKind::Video) {
            Some(idx) => Some(std::mem::replace(&mut tracks[idx], new)),
            None => {
                tracks.push(new);
                None
            }
        }
    }

    /// Stop every track in the stream; idempotent
    pub fn release(&self) {
        for track in self.inner.tracks.read().iter() {
            track.stop();
        }
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.inner.id)
            .field("tracks", &self.inner.tracks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_track_toggle_is_reversible() {
        let track = MediaTrack::new(TrackKind::Audio, TrackSource::Microphone);
        assert!(track.is_enabled());
        track.set_enabled(false);
        assert!(!track.is_enabled());
        track.set_enabled(true);
        assert!(track.is_enabled());
    }

    #[test]
    fn test_track_stop_is_idempotent_and_fires_hooks_once() {
        let track = MediaTrack::new(TrackKind::Video, TrackSource::Screen);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_for_hook = Arc::clone(&fired);
        track.on_ended(move || {
            fired_for_hook.fetch_add(1, Ordering::SeqCst);
        });

        track.stop();
        track.stop();
        assert!(track.is_stopped());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hook_on_already_stopped_track_fires_immediately() {
        let track = MediaTrack::new(TrackKind::Video, TrackSource::Screen);
        track.stop();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_for_hook = Arc::clone(&fired);
        track.on_ended(move || {
            fired_for_hook.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stream_release_stops_all_tracks() {
        let stream = MediaStream::new(vec![
            MediaTrack::new(TrackKind::Audio, TrackSource::Microphone),
            MediaTrack::new(TrackKind::Video, TrackSource::Camera),
        ]);
        stream.release();
        stream.release(); // second release is safe
        assert!(stream.tracks().iter().all(|t| t.is_stopped()));
    }

    #[test]
    fn test_replace_video_track_keeps_single_video() {
        let camera = MediaTrack::new(TrackKind::Video, TrackSource::Camera);
        let stream = MediaStream::new(vec![
            MediaTrack::new(TrackKind::Audio, TrackSource::Microphone),
            camera.clone(),
        ]);

        let screen = MediaTrack::new(TrackKind::Video, TrackSource::Screen);
        let old = stream.replace_video_track(screen.clone()).unwrap();
        assert_eq!(old.id(), camera.id());

        let videos = stream.tracks_of_kind(TrackKind::Video);
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].id(), screen.id());
    }

    #[test]
    fn test_replace_video_track_on_audio_only_stream_appends() {
        let stream = MediaStream::new(vec![MediaTrack::new(
            TrackKind::Audio,
            TrackSource::Microphone,
        )]);
        let screen = MediaTrack::new(TrackKind::Video, TrackSource::Screen);
        assert!(stream.replace_video_track(screen).is_none());
        assert_eq!(stream.tracks_of_kind(TrackKind::Video).len(), 1);
    }
}
