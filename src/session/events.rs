//! Session event fan-out
//!
//! Inbound signaling and lifecycle events are fanned out to every
//! registered listener over its own unbounded queue. No ordering is
//! promised between listeners; within one listener, events arrive in
//! dispatch order.

use crate::media::TrackKind;
use crate::signaling::{CallAnswer, CallOffer, IceCandidate};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Why a call terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The peer ended an established or in-progress call
    Ended,
    /// The callee declined the offer
    Rejected,
}

/// Events delivered to session listeners
#[derive(Debug, Clone)]
pub enum CallSessionEvent {
    /// An inbound offer is ringing; the embedder decides accept/reject
    OfferReceived(CallOffer),
    /// The callee answered our outgoing call
    AnswerReceived(CallAnswer),
    /// The remote peer relayed an ICE candidate
    CandidateReceived(IceCandidate),
    /// The call was terminated by the remote peer
    CallTerminated {
        /// User id of the terminating peer
        user_id: String,
        /// End vs. reject
        reason: TerminationReason,
    },
    /// A remote media track was added to the remote stream
    RemoteTrackAdded {
        /// Media kind of the arrived track
        kind: TrackKind,
    },
    /// An error occurred while handling an asynchronously received event
    Error {
        /// Human-readable error message
        message: String,
    },
}

impl CallSessionEvent {
    /// Event name for logging/debugging
    pub fn name(&self) -> &'static str {
        match self {
            Self::OfferReceived(_) => "offer_received",
            Self::AnswerReceived(_) => "answer_received",
            Self::CandidateReceived(_) => "candidate_received",
            Self::CallTerminated { .. } => "call_terminated",
            Self::RemoteTrackAdded { .. } => "remote_track_added",
            Self::Error { .. } => "error",
        }
    }
}

/// Handle for unregistering a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(Uuid);

/// Registry of session listeners
#[derive(Default)]
pub(crate) struct Listeners {
    inner: Mutex<Vec<(ListenerId, mpsc::UnboundedSender<CallSessionEvent>)>>,
}

impl Listeners {
    pub(crate) fn add(&self) -> (ListenerId, mpsc::UnboundedReceiver<CallSessionEvent>) {
        let id = ListenerId(Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().push((id, tx));
        (id, rx)
    }

    pub(crate) fn remove(&self, id: ListenerId) {
        self.inner.lock().retain(|(lid, _)| *lid != id);
    }

    /// Deliver an event to every live listener, pruning closed ones
    pub(crate) fn notify(&self, event: CallSessionEvent) {
        let mut listeners = self.inner.lock();
        listeners.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = CallSessionEvent::CallTerminated {
            user_id: "alice".to_string(),
            reason: TerminationReason::Rejected,
        };
        assert_eq!(event.name(), "call_terminated");

        let event = CallSessionEvent::Error {
            message: "boom".to_string(),
        };
        assert_eq!(event.name(), "error");
    }

    #[tokio::test]
    async fn test_notify_reaches_every_listener() {
        let listeners = Listeners::default();
        let (_id_a, mut rx_a) = listeners.add();
        let (_id_b, mut rx_b) = listeners.add();

        listeners.notify(CallSessionEvent::RemoteTrackAdded {
            kind: TrackKind::Audio,
        });

        assert_eq!(rx_a.recv().await.unwrap().name(), "remote_track_added");
        assert_eq!(rx_b.recv().await.unwrap().name(), "remote_track_added");
    }

    #[tokio::test]
    async fn test_removed_listener_gets_nothing() {
        let listeners = Listeners::default();
        let (id, mut rx) = listeners.add();
        listeners.remove(id);

        listeners.notify(CallSessionEvent::Error {
            message: "boom".to_string(),
        });
        assert!(rx.try_recv().is_err());
        assert_eq!(listeners.len(), 0);
    }

    #[tokio::test]
    async fn test_dropped_receivers_are_pruned() {
        let listeners = Listeners::default();
        let (_id, rx) = listeners.add();
        drop(rx);

        listeners.notify(CallSessionEvent::Error {
            message: "boom".to_string(),
        });
        assert_eq!(listeners.len(), 0);
    }
}
