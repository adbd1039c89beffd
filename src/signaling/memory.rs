//! In-process signaling broker
//!
//! Routes messages between subscribers of the same conversation channel
//! within one process. Used by tests and by embedders that colocate both
//! call surfaces (e.g. a desktop app with two windows).

use super::{SignalingBroker, SignalingChannel, SignalingMessage, SignalingSender};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

type Subscribers = Vec<(Uuid, mpsc::UnboundedSender<SignalingMessage>)>;

/// In-process pub/sub broker
///
/// Cheap to clone; all clones share the same channel table.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    channels: Arc<Mutex<HashMap<String, Subscribers>>>,
}

impl MemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers on a channel (for diagnostics)
    pub fn subscriber_count(&self, conversation_id: &str) -> usize {
        self.channels
            .lock()
            .get(conversation_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    fn publish(&self, conversation_id: &str, from: Uuid, message: &SignalingMessage) {
        let channels = self.channels.lock();
        let Some(subs) = channels.get(conversation_id) else {
            warn!(
                "broadcast to unknown channel {} ({})",
                conversation_id,
                message.event_name()
            );
            return;
        };

        for (id, tx) in subs {
            if *id == from {
                continue;
            }
            // A closed receiver just means that subscriber already left.
            let _ = tx.send(message.clone());
        }
    }

    fn unsubscribe(&self, conversation_id: &str, id: Uuid) {
        let mut channels = self.channels.lock();
        if let Some(subs) = channels.get_mut(conversation_id) {
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
                channels.remove(conversation_id);
            }
        }
    }
}

struct MemorySender {
    broker: MemoryBroker,
    conversation_id: String,
    subscriber_id: Uuid,
}

#[async_trait]
impl SignalingSender for MemorySender {
    async fn broadcast(&self, message: SignalingMessage) -> Result<()> {
        debug!(
            "broadcast {} on channel {}",
            message.event_name(),
            self.conversation_id
        );
        self.broker
            .publish(&self.conversation_id, self.subscriber_id, &message);
        Ok(())
    }

    async fn leave(&self) -> Result<()> {
        debug!("leaving channel {}", self.conversation_id);
        self.broker
            .unsubscribe(&self.conversation_id, self.subscriber_id);
        Ok(())
    }
}

#[async_trait]
impl SignalingBroker for MemoryBroker {
    async fn join(&self, conversation_id: &str) -> Result<SignalingChannel> {
        if conversation_id.is_empty() {
            return Err(Error::Signaling("empty conversation id".to_string()));
        }

        let subscriber_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.channels
            .lock()
            .entry(conversation_id.to_string())
            .or_default()
            .push((subscriber_id, tx));

        debug!("joined channel {} as {}", conversation_id, subscriber_id);

        Ok(SignalingChannel {
            conversation_id: conversation_id.to_string(),
            sender: Arc::new(MemorySender {
                broker: self.clone(),
                conversation_id: conversation_id.to_string(),
                subscriber_id,
            }),
            inbound: rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::protocol::CallEnded;

    fn ended(user: &str) -> SignalingMessage {
        SignalingMessage::CallEnded(CallEnded {
            user_id: user.to_string(),
        })
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let broker = MemoryBroker::new();
        let mut a = broker.join("convo-1").await.unwrap();
        let mut b = broker.join("convo-1").await.unwrap();

        a.sender.broadcast(ended("alice")).await.unwrap();

        let received = b.inbound.recv().await.unwrap();
        assert_eq!(received.event_name(), "call-ended");
        assert!(a.inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let broker = MemoryBroker::new();
        let a = broker.join("convo-1").await.unwrap();
        let mut b = broker.join("convo-2").await.unwrap();

        a.sender.broadcast(ended("alice")).await.unwrap();
        assert!(b.inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_stops_delivery_and_prunes_channel() {
        let broker = MemoryBroker::new();
        let a = broker.join("convo-1").await.unwrap();
        let b = broker.join("convo-1").await.unwrap();
        assert_eq!(broker.subscriber_count("convo-1"), 2);

        b.sender.leave().await.unwrap();
        assert_eq!(broker.subscriber_count("convo-1"), 1);

        a.sender.leave().await.unwrap();
        assert_eq!(broker.subscriber_count("convo-1"), 0);
    }

    #[tokio::test]
    async fn test_join_empty_conversation_id_fails() {
        let broker = MemoryBroker::new();
        let err = broker.join("").await.unwrap_err();
        assert!(matches!(err, Error::Signaling(_)));
    }
}
