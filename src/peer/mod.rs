//! Peer connection management
//!
//! [`PeerConnection`] owns the negotiated point-to-point connection for one
//! call attempt: it attaches local tracks, relays discovered ICE candidates,
//! applies remote descriptions and candidates (buffering candidates that
//! arrive early), assembles the remote stream, and tears everything down
//! exactly once. A fresh instance is created per call attempt and never
//! reused.

pub mod negotiator;
pub mod rtc;

pub use negotiator::{
    IceCandidateInit, NegotiatorFactory, SdpKind, SdpNegotiator,
};
pub use rtc::{WebRtcNegotiator, WebRtcNegotiatorFactory};

use crate::media::{MediaStream, MediaTrack, TrackKind, TrackSource};
use crate::{Error, Result};
use parking_lot::{Mutex as SyncMutex, RwLock as SyncRwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Lifecycle of one peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Created, no negotiation started
    New,
    /// Offer/answer or candidate exchange in progress
    Negotiating,
    /// Transport established
    Connected,
    /// Torn down; the connection is never reused
    Closed,
}

/// Push events surfaced by a [`PeerConnection`]
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A locally discovered ICE candidate ready to be relayed
    LocalCandidate(IceCandidateInit),
    /// A remote track was added to the remote stream
    RemoteTrackAdded {
        /// Media kind of the arrived track
        kind: TrackKind,
    },
    /// The transport reached the connected state
    Connected,
}

/// The negotiated point-to-point connection for a single call attempt
pub struct PeerConnection {
    negotiator: Arc<dyn SdpNegotiator>,
    state: Arc<SyncRwLock<PeerState>>,
    remote_described: AtomicBool,
    pending_candidates: Mutex<Vec<IceCandidateInit>>,
    remote_stream: MediaStream,
    events: SyncMutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    closed: Arc<AtomicBool>,
}

impl PeerConnection {
    /// Wrap a negotiator and wire its callbacks into the event stream
    pub fn new(negotiator: Arc<dyn SdpNegotiator>) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = Arc::new(SyncRwLock::new(PeerState::New));
        let closed = Arc::new(AtomicBool::new(false));
        let remote_stream = MediaStream::empty();

        let candidate_tx = event_tx.clone();
        negotiator.on_ice_candidate(Arc::new(move |candidate| {
            let _ = candidate_tx.send(PeerEvent::LocalCandidate(candidate));
        }));

        let track_tx = event_tx.clone();
        let stream_for_tracks = remote_stream.clone();
        negotiator.on_remote_track(Arc::new(move |kind, track_id| {
            debug!("remote {} track arrived: {}", kind.as_str(), track_id);
            stream_for_tracks.add_track(MediaTrack::new(kind, TrackSource::Remote));
            let _ = track_tx.send(PeerEvent::RemoteTrackAdded { kind });
        }));

        let state_for_connected = Arc::clone(&state);
        let closed_for_connected = Arc::clone(&closed);
        negotiator.on_connected(Arc::new(move || {
            if closed_for_connected.load(Ordering::Acquire) {
                return;
            }
            *state_for_connected.write() = PeerState::Connected;
            let _ = event_tx.send(PeerEvent::Connected);
        }));

        Arc::new(Self {
            negotiator,
            state,
            remote_described: AtomicBool::new(false),
            pending_candidates: Mutex::new(Vec::new()),
            remote_stream,
            events: SyncMutex::new(Some(event_rx)),
            closed,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> PeerState {
        *self.state.read()
    }

    /// Take the event receiver; available exactly once
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events.lock().take()
    }

    /// The stream accumulating remote tracks
    pub fn remote_stream(&self) -> MediaStream {
        self.remote_stream.clone()
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Negotiation(format!(
                "{} on a closed peer connection",
                operation
            )));
        }
        Ok(())
    }

    fn mark_negotiating(&self) {
        let mut state = self.state.write();
        if *state == PeerState::New {
            *state = PeerState::Negotiating;
        }
    }

    /// Attach every track of the local stream; must precede offer/answer
    /// creation
    pub async fn attach_local_tracks(&self, stream: &MediaStream) -> Result<()> {
        self.ensure_open("attach_local_tracks")?;
        for track in stream.tracks() {
            self.negotiator.add_track(track).await?;
        }
        Ok(())
    }

    /// Create the local offer (committed as local description)
    pub async fn create_offer(&self) -> Result<String> {
        self.ensure_open("create_offer")?;
        let sdp = self.negotiator.create_offer().await?;
        self.mark_negotiating();
        Ok(sdp)
    }

    /// Create the local answer; requires a previously applied remote offer
    pub async fn create_answer(&self) -> Result<String> {
        self.ensure_open("create_answer")?;
        if !self.remote_described.load(Ordering::Acquire) {
            return Err(Error::Negotiation(
                "create_answer requires the remote offer to be applied first".to_string(),
            ));
        }
        let sdp = self.negotiator.create_answer().await?;
        self.mark_negotiating();
        Ok(sdp)
    }

    /// Apply the remote description, then flush any buffered candidates
    pub async fn apply_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<()> {
        self.ensure_open("apply_remote_description")?;
        self.negotiator.set_remote_description(kind, sdp).await?;
        self.remote_described.store(true, Ordering::Release);
        self.mark_negotiating();

        let pending = std::mem::take(&mut *self.pending_candidates.lock().await);
        if !pending.is_empty() {
            debug!("flushing {} buffered ICE candidates", pending.len());
        }
        for candidate in pending {
            // A single unusable candidate must not kill the negotiation;
            // others may still complete the path.
            if let Err(e) = self.negotiator.add_ice_candidate(&candidate).await {
                warn!("Failed to apply buffered ICE candidate: {}", e);
            }
        }
        Ok(())
    }

    /// Feed a remote candidate in, buffering it when the remote description
    /// has not been applied yet
    pub async fn apply_remote_candidate(&self, candidate: IceCandidateInit) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            // Candidates racing with teardown are expected; drop quietly.
            debug!("dropping ICE candidate for closed connection");
            return Ok(());
        }

        if !self.remote_described.load(Ordering::Acquire) {
            let mut pending = self.pending_candidates.lock().await;
            // Recheck under the lock: the description may have just landed.
            if !self.remote_described.load(Ordering::Acquire) {
                debug!("buffering ICE candidate until remote description applies");
                pending.push(candidate);
                return Ok(());
            }
        }

        self.negotiator.add_ice_candidate(&candidate).await
    }

    /// Swap the outgoing video track (screen-share toggle)
    pub async fn replace_video_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        self.ensure_open("replace_video_track")?;
        self.negotiator.replace_video_track(track).await
    }

    /// Number of candidates waiting for the remote description
    pub async fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.lock().await.len()
    }

    /// Tear the connection down; idempotent
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("closing peer connection");
        *self.state.write() = PeerState::Closed;
        self.pending_candidates.lock().await.clear();
        self.negotiator.close().await
    }
}
