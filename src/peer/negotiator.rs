//! SDP negotiation seam
//!
//! [`SdpNegotiator`] is the surface the peer connection manager needs from
//! an ICE/SDP negotiation object: description handling, candidate exchange,
//! track attachment, and teardown. The default implementation is
//! [`WebRtcNegotiator`](crate::peer::WebRtcNegotiator); tests substitute
//! deterministic fakes.

use crate::config::CallConfig;
use crate::media::{MediaTrack, TrackKind};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which side of the offer/answer exchange a description is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    /// Initiating side's description
    Offer,
    /// Receiving side's description
    Answer,
}

/// A serialized ICE candidate plus its SDP association fields
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    /// Transport-address blob
    pub candidate: String,
    /// Media section the candidate belongs to
    #[serde(default)]
    pub sdp_mid: Option<String>,
    /// Media line index of the candidate
    #[serde(default)]
    pub sdp_mline_index: Option<u16>,
}

/// Callback for locally discovered ICE candidates
pub type IceCandidateCallback = Arc<dyn Fn(IceCandidateInit) + Send + Sync>;

/// Callback for remote tracks arriving on the connection (`kind`, track id)
pub type RemoteTrackCallback = Arc<dyn Fn(TrackKind, String) + Send + Sync>;

/// Callback fired when the transport reaches the connected state
pub type ConnectedCallback = Arc<dyn Fn() + Send + Sync>;

/// An ICE/SDP negotiation object for one call attempt
///
/// Implementations must commit each created description as the local
/// description before returning it, and must reject `create_answer` when no
/// remote offer has been applied.
#[async_trait]
pub trait SdpNegotiator: Send + Sync {
    /// Attach a local track; must happen before offer/answer creation
    async fn add_track(&self, track: Arc<MediaTrack>) -> Result<()>;

    /// Swap the outgoing video track, adding it when no video sender exists
    async fn replace_video_track(&self, track: Arc<MediaTrack>) -> Result<()>;

    /// Create an offer and commit it as the local description
    async fn create_offer(&self) -> Result<String>;

    /// Create an answer and commit it as the local description
    ///
    /// Fails with a negotiation error unless a remote offer was applied.
    async fn create_answer(&self) -> Result<String>;

    /// Apply the remote peer's description
    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<()>;

    /// Feed a remote ICE candidate into the negotiation
    async fn add_ice_candidate(&self, candidate: &IceCandidateInit) -> Result<()>;

    /// Register the local-candidate discovery callback
    ///
    /// Candidates form a lazy, unbounded, non-restartable sequence for the
    /// lifetime of the connection.
    fn on_ice_candidate(&self, callback: IceCandidateCallback);

    /// Register the remote-track arrival callback
    fn on_remote_track(&self, callback: RemoteTrackCallback);

    /// Register the connected-state callback
    fn on_connected(&self, callback: ConnectedCallback);

    /// Release all underlying transport resources; idempotent
    async fn close(&self) -> Result<()>;
}

/// Builds a fresh negotiator per call attempt
#[async_trait]
pub trait NegotiatorFactory: Send + Sync {
    /// Create a negotiator configured from `config`
    async fn create(&self, config: &CallConfig) -> Result<Arc<dyn SdpNegotiator>>;
}
