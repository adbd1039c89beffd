//! Signaling wire protocol for call setup
//!
//! The five message kinds exchanged over a conversation channel form a
//! closed, tagged union so the session controller's dispatch is exhaustive.
//! Payload fields use camelCase on the wire for compatibility with browser
//! peers sending JSON directly.

use serde::{Deserialize, Serialize};

/// Kind of media requested for a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    /// Audio-only call (microphone)
    Audio,
    /// Audio + video call (microphone and camera)
    Video,
}

impl CallType {
    /// Whether this call type captures video
    pub fn wants_video(&self) -> bool {
        matches!(self, CallType::Video)
    }
}

/// Session description offer from the initiating peer
///
/// Produced once per call attempt and consumed exactly once by the
/// receiving peer to seed its remote description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOffer {
    /// SDP blob describing the caller's proposed media session
    pub sdp: String,
    /// Caller's user id (opaque, supplied by the embedding application)
    pub caller_id: String,
    /// Caller's display name, surfaced to the callee UI
    pub caller_name: String,
    /// Requested media kind
    pub call_type: CallType,
}

/// Session description answer from the receiving peer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAnswer {
    /// SDP blob completing the negotiation
    pub sdp: String,
    /// Answerer's user id
    pub answerer_id: String,
}

/// A discovered network path, relayed to the remote peer as it appears
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Transport-address blob from the local negotiation object
    pub candidate: String,
    /// Media section this candidate belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Media line index of the candidate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    /// User id of the peer that discovered the candidate
    pub sender_id: String,
}

/// Terminal call event: the sending peer ended the call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnded {
    /// User id of the peer that ended the call
    pub user_id: String,
}

/// Terminal call event: the receiving peer declined the offer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRejected {
    /// User id of the peer that rejected the call
    pub user_id: String,
}

/// Closed union of every message a conversation channel carries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SignalingMessage {
    /// An offer from the initiating peer
    CallOffer(CallOffer),
    /// An answer from the receiving peer
    CallAnswer(CallAnswer),
    /// A discovered ICE candidate from either side
    IceCandidate(IceCandidate),
    /// The remote peer ended the call
    CallEnded(CallEnded),
    /// The remote peer rejected the offer
    CallRejected(CallRejected),
}

impl SignalingMessage {
    /// Wire event name for logging/debugging
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::CallOffer(_) => "call-offer",
            Self::CallAnswer(_) => "call-answer",
            Self::IceCandidate(_) => "ice-candidate",
            Self::CallEnded(_) => "call-ended",
            Self::CallRejected(_) => "call-rejected",
        }
    }
}
