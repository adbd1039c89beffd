//! Peer-to-peer call engine over pub/sub signaling
//!
//! This crate implements one-to-one audio/video calls negotiated over a
//! conversation-scoped pub/sub channel: offer/answer exchange, trickle ICE,
//! local capture management, mute/camera toggles, and screen sharing.
//!
//! # Features
//!
//! - **Call lifecycle**: `idle → calling | ringing → active → idle` driven
//!   by [`CallSession`]
//! - **Pluggable signaling**: WebSocket broker for production, in-process
//!   broker for tests, or any [`SignalingBroker`] implementation
//! - **Pluggable negotiation**: a [`webrtc`]-backed negotiator by default;
//!   the [`SdpNegotiator`] seam keeps session logic testable offline
//! - **Out-of-order tolerance**: ICE candidates arriving before the remote
//!   description are buffered and flushed once it lands
//! - **Screen sharing**: sender-side video track replacement with automatic
//!   revert when the platform ends the capture
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Application (UI, listeners)                           │
//! │  ↓                                                     │
//! │  CallSession (lifecycle state machine)                 │
//! │  ├─ SignalingBroker → SignalingChannel (pub/sub)       │
//! │  │   └─ WebSocketBroker | MemoryBroker                 │
//! │  ├─ MediaSource (capture acquisition)                  │
//! │  └─ PeerConnection (candidate buffering, events)       │
//! │      └─ SdpNegotiator → WebRtcNegotiator               │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use peercall::{CallConfig, CallSession, CallType, WebSocketBroker};
//! use std::sync::Arc;
//!
//! let broker = Arc::new(WebSocketBroker::connect("wss://signal.example").await?);
//! let session = CallSession::new(CallConfig::default(), broker);
//!
//! session.join_channel("conversation-42", "alice").await?;
//! let local = session.start_call(CallType::Video, "alice", "Alice").await?;
//! // ... render `local`, react to session events, end_call() when done
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::{CallConfig, IceServerConfig};
pub use error::{Error, Result};
pub use media::{MediaSource, MediaStream, MediaTrack, StaticMediaSource, TrackKind, TrackSource};
pub use peer::{
    IceCandidateInit, NegotiatorFactory, PeerConnection, PeerEvent, PeerState, SdpKind,
    SdpNegotiator, WebRtcNegotiatorFactory,
};
pub use session::{CallSession, CallSessionEvent, CallState, ListenerId, TerminationReason};
pub use signaling::{
    CallOffer, CallType, MemoryBroker, SignalingBroker, SignalingChannel, SignalingMessage,
    SignalingSender, WebSocketBroker,
};

/// Crate version string
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
