//! Signaling transport for call setup
//!
//! The core treats the signaling broker as an external collaborator: any
//! pub/sub primitive that can fan messages out to the other subscribers of
//! a conversation-scoped channel satisfies [`SignalingBroker`]. Two
//! implementations ship with the crate:
//! - [`MemoryBroker`]: in-process broker for tests and single-process use
//! - [`WebSocketBroker`]: client for a WebSocket pub/sub relay

pub mod memory;
pub mod protocol;
pub mod websocket;

pub use memory::MemoryBroker;
pub use protocol::{
    CallAnswer, CallEnded, CallOffer, CallRejected, CallType, IceCandidate, SignalingMessage,
};
pub use websocket::WebSocketBroker;

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound half of a joined conversation channel
///
/// Broadcasts are fire-and-forget: delivery is best effort and in order per
/// sender; no cross-sender ordering is guaranteed. The sender never receives
/// its own broadcasts back.
#[async_trait]
pub trait SignalingSender: Send + Sync {
    /// Publish a message to every other subscriber of the channel
    async fn broadcast(&self, message: SignalingMessage) -> Result<()>;

    /// Unsubscribe and release the channel
    ///
    /// Closes the inbound stream handed out at join time. Idempotent.
    async fn leave(&self) -> Result<()>;
}

/// A joined conversation channel: the broadcast half plus the inbound
/// message stream
pub struct SignalingChannel {
    /// Conversation id this channel is scoped to
    pub conversation_id: String,
    /// Outbound half
    pub sender: Arc<dyn SignalingSender>,
    /// Inbound messages from other subscribers; closes on leave
    pub inbound: mpsc::UnboundedReceiver<SignalingMessage>,
}

impl std::fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingChannel")
            .field("conversation_id", &self.conversation_id)
            .finish_non_exhaustive()
    }
}

/// A pub/sub broker that can join conversation-scoped channels
#[async_trait]
pub trait SignalingBroker: Send + Sync {
    /// Subscribe to the channel for `conversation_id`
    async fn join(&self, conversation_id: &str) -> Result<SignalingChannel>;
}
