//! Call session controller
//!
//! [`CallSession`] sequences the signaling transport, media acquisition,
//! and peer connection layers into the call lifecycle
//! `idle → calling | ringing → active → idle` and exposes the public
//! operations used by the embedding application: join/leave a conversation
//! channel, start/answer/reject/end a call, mute and camera toggles, and
//! screen sharing. One session instance drives at most one call at a time;
//! the embedder owns its lifetime and may run one per call surface.

pub mod events;

pub use events::{CallSessionEvent, ListenerId, TerminationReason};

use crate::config::CallConfig;
use crate::media::{MediaSource, MediaStream, MediaTrack, StaticMediaSource, TrackKind};
use crate::peer::{
    IceCandidateInit, NegotiatorFactory, PeerConnection, PeerEvent, SdpKind,
    WebRtcNegotiatorFactory,
};
use crate::signaling::{
    CallAnswer, CallEnded, CallOffer, CallRejected, CallType, IceCandidate, SignalingBroker,
    SignalingMessage, SignalingSender,
};
use crate::{Error, Result};
use events::Listeners;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Call lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// No call in progress
    Idle,
    /// Outgoing offer broadcast, waiting for an answer
    Calling,
    /// Inbound offer primed, waiting for the local accept/reject decision
    Ringing,
    /// Negotiation completed, call established
    Active,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::Calling => "calling",
            CallState::Ringing => "ringing",
            CallState::Active => "active",
        };
        f.write_str(name)
    }
}

struct ActiveChannel {
    conversation_id: String,
    sender: Arc<dyn SignalingSender>,
    reader: JoinHandle<()>,
}

struct Shared {
    config: CallConfig,
    broker: Arc<dyn SignalingBroker>,
    media: Arc<dyn MediaSource>,
    negotiators: Arc<dyn NegotiatorFactory>,
    state: RwLock<CallState>,
    channel: RwLock<Option<ActiveChannel>>,
    local_user: RwLock<Option<String>>,
    peer: RwLock<Option<Arc<PeerConnection>>>,
    local_stream: RwLock<Option<MediaStream>>,
    pending_offer: RwLock<Option<CallOffer>>,
    early_candidates: RwLock<Vec<IceCandidate>>,
    screen_track: RwLock<Option<Arc<MediaTrack>>>,
    pump: RwLock<Option<JoinHandle<()>>>,
    listeners: Listeners,
}

/// The call session controller
///
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct CallSession {
    shared: Arc<Shared>,
}

impl CallSession {
    /// Create a session with the default media source and WebRTC negotiator
    pub fn new(config: CallConfig, broker: Arc<dyn SignalingBroker>) -> Self {
        Self::with_components(
            config,
            broker,
            Arc::new(StaticMediaSource::new()),
            Arc::new(WebRtcNegotiatorFactory::new()),
        )
    }

    /// Create a session with explicit media and negotiation backends
    pub fn with_components(
        config: CallConfig,
        broker: Arc<dyn SignalingBroker>,
        media: Arc<dyn MediaSource>,
        negotiators: Arc<dyn NegotiatorFactory>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                broker,
                media,
                negotiators,
                state: RwLock::new(CallState::Idle),
                channel: RwLock::new(None),
                local_user: RwLock::new(None),
                peer: RwLock::new(None),
                local_stream: RwLock::new(None),
                pending_offer: RwLock::new(None),
                early_candidates: RwLock::new(Vec::new()),
                screen_track: RwLock::new(None),
                pump: RwLock::new(None),
                listeners: Listeners::default(),
            }),
        }
    }

    /// Current lifecycle state
    pub async fn state(&self) -> CallState {
        *self.shared.state.read().await
    }

    /// The local capture stream, while a call is in progress
    pub async fn local_stream(&self) -> Option<MediaStream> {
        self.shared.local_stream.read().await.clone()
    }

    /// The stream accumulating remote tracks, while a call is in progress
    pub async fn remote_stream(&self) -> Option<MediaStream> {
        self.shared
            .peer
            .read()
            .await
            .as_ref()
            .map(|peer| peer.remote_stream())
    }

    /// Register a listener; events arrive on the returned queue
    pub fn add_listener(&self) -> (ListenerId, mpsc::UnboundedReceiver<CallSessionEvent>) {
        self.shared.listeners.add()
    }

    /// Unregister a listener
    pub fn remove_listener(&self, id: ListenerId) {
        self.shared.listeners.remove(id);
    }

    /// Join the signaling channel for a conversation
    ///
    /// At most one channel is active per session: joining a new conversation
    /// leaves the previous channel first, and any call in progress on it is
    /// ended.
    pub async fn join_channel(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        if *self.shared.state.read().await != CallState::Idle {
            info!("joining a new channel while a call is live; ending it first");
            self.end_call().await?;
        }
        self.detach_channel().await?;

        *self.shared.local_user.write().await = Some(user_id.to_string());

        let channel = self.shared.broker.join(conversation_id).await?;
        let sender = Arc::clone(&channel.sender);
        let reader = tokio::spawn(Self::run_reader(self.clone(), channel.inbound));

        *self.shared.channel.write().await = Some(ActiveChannel {
            conversation_id: conversation_id.to_string(),
            sender,
            reader,
        });

        info!("joined channel {} as {}", conversation_id, user_id);
        Ok(())
    }

    /// Leave the active signaling channel, ending any call in progress
    pub async fn leave_channel(&self) -> Result<()> {
        if *self.shared.state.read().await != CallState::Idle {
            self.end_call().await?;
        }
        self.detach_channel().await
    }

    /// Conversation id of the active channel, if any
    pub async fn current_channel(&self) -> Option<String> {
        self.shared
            .channel
            .read()
            .await
            .as_ref()
            .map(|c| c.conversation_id.clone())
    }

    async fn detach_channel(&self) -> Result<()> {
        if let Some(old) = self.shared.channel.write().await.take() {
            debug!("leaving channel {}", old.conversation_id);
            old.reader.abort();
            old.sender.leave().await?;
        }
        Ok(())
    }

    async fn channel_sender(&self, operation: &str) -> Result<Arc<dyn SignalingSender>> {
        self.shared
            .channel
            .read()
            .await
            .as_ref()
            .map(|c| Arc::clone(&c.sender))
            .ok_or_else(|| {
                Error::InvalidState(format!("{} requires a joined channel", operation))
            })
    }

    /// Start an outgoing call; valid only from `idle`
    ///
    /// Acquires local media, builds a fresh peer connection, and broadcasts
    /// the offer. On any failure every partially constructed resource is
    /// rolled back and the session returns to `idle`. Returns the local
    /// stream for immediate UI preview.
    pub async fn start_call(
        &self,
        call_type: CallType,
        user_id: &str,
        user_name: &str,
    ) -> Result<MediaStream> {
        let sender = self.channel_sender("start_call").await?;

        {
            let mut state = self.shared.state.write().await;
            if *state != CallState::Idle {
                return Err(Error::InvalidState(format!(
                    "start_call is only valid from idle (state: {})",
                    state
                )));
            }
            *state = CallState::Calling;
        }
        *self.shared.local_user.write().await = Some(user_id.to_string());

        info!("starting {:?} call as {}", call_type, user_id);

        match self.establish_outgoing(call_type, user_id, user_name, sender).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                warn!("start_call failed: {}", e);
                self.teardown().await;
                Err(e)
            }
        }
    }

    async fn establish_outgoing(
        &self,
        call_type: CallType,
        user_id: &str,
        user_name: &str,
        sender: Arc<dyn SignalingSender>,
    ) -> Result<MediaStream> {
        let stream = self
            .shared
            .media
            .acquire(true, call_type.wants_video())
            .await?;
        *self.shared.local_stream.write().await = Some(stream.clone());

        let peer = self.build_peer(Arc::clone(&sender)).await?;
        peer.attach_local_tracks(&stream).await?;

        let sdp = peer.create_offer().await?;
        sender
            .broadcast(SignalingMessage::CallOffer(CallOffer {
                sdp,
                caller_id: user_id.to_string(),
                caller_name: user_name.to_string(),
                call_type,
            }))
            .await?;

        Ok(stream)
    }

    /// Answer the ringing inbound call; valid only from `ringing`
    ///
    /// The peer connection must already be primed with the remote offer
    /// (done when the offer arrived); answering in any other state fails
    /// with [`Error::InvalidState`]. Returns the local stream.
    pub async fn answer_call(&self, user_id: &str) -> Result<MediaStream> {
        let sender = self.channel_sender("answer_call").await?;

        {
            let state = self.shared.state.read().await;
            if *state != CallState::Ringing {
                return Err(Error::InvalidState(format!(
                    "answer_call is only valid from ringing (state: {})",
                    state
                )));
            }
        }

        let peer = self.shared.peer.read().await.clone().ok_or_else(|| {
            Error::InvalidState("answer_call requires a primed peer connection".to_string())
        })?;
        let stream = self.shared.local_stream.read().await.clone().ok_or_else(|| {
            Error::InvalidState("answer_call requires an acquired local stream".to_string())
        })?;

        *self.shared.local_user.write().await = Some(user_id.to_string());

        let result = async {
            let sdp = peer.create_answer().await?;
            sender
                .broadcast(SignalingMessage::CallAnswer(CallAnswer {
                    sdp,
                    answerer_id: user_id.to_string(),
                }))
                .await
        }
        .await;

        match result {
            Ok(()) => {
                *self.shared.state.write().await = CallState::Active;
                *self.shared.pending_offer.write().await = None;
                info!("answered call as {}", user_id);
                Ok(stream)
            }
            Err(e) => {
                warn!("answer_call failed: {}", e);
                if let Err(teardown_err) = self.end_call().await {
                    warn!("teardown after failed answer also failed: {}", teardown_err);
                }
                Err(e)
            }
        }
    }

    /// Decline the ringing inbound call; valid only from `ringing`
    pub async fn reject_call(&self, user_id: &str) -> Result<()> {
        let sender = self.channel_sender("reject_call").await?;

        {
            let state = self.shared.state.read().await;
            if *state != CallState::Ringing {
                return Err(Error::InvalidState(format!(
                    "reject_call is only valid from ringing (state: {})",
                    state
                )));
            }
        }

        info!("rejecting call as {}", user_id);
        if let Err(e) = sender
            .broadcast(SignalingMessage::CallRejected(CallRejected {
                user_id: user_id.to_string(),
            }))
            .await
        {
            warn!("failed to broadcast call-rejected: {}", e);
        }
        self.teardown().await;
        Ok(())
    }

    /// End the call from any in-progress state; redundant calls are no-ops
    ///
    /// Broadcasts `call-ended`, then unconditionally stops every local
    /// track, closes the peer connection, and clears the remote stream
    /// reference.
    pub async fn end_call(&self) -> Result<()> {
        if *self.shared.state.read().await == CallState::Idle {
            debug!("end_call with no call in progress; nothing to do");
            return Ok(());
        }

        let user_id = self
            .shared
            .local_user
            .read()
            .await
            .clone()
            .unwrap_or_default();

        if let Ok(sender) = self.channel_sender("end_call").await {
            if let Err(e) = sender
                .broadcast(SignalingMessage::CallEnded(CallEnded { user_id }))
                .await
            {
                // Teardown must proceed even when the broadcast fails.
                warn!("failed to broadcast call-ended: {}", e);
            }
        }

        self.teardown().await;
        Ok(())
    }

    /// Flip `enabled` on every local audio track; no-op without a stream
    pub async fn toggle_audio(&self, enabled: bool) {
        self.toggle_tracks(TrackKind::Audio, enabled).await;
    }

    /// Flip `enabled` on every local video track; no-op without a stream
    pub async fn toggle_video(&self, enabled: bool) {
        self.toggle_tracks(TrackKind::Video, enabled).await;
    }

    async fn toggle_tracks(&self, kind: TrackKind, enabled: bool) {
        let Some(stream) = self.shared.local_stream.read().await.clone() else {
            debug!("toggle {} with no local stream; ignoring", kind.as_str());
            return;
        };
        for track in stream.tracks_of_kind(kind) {
            track.set_enabled(enabled);
        }
    }

    /// Toggle screen sharing on the active call
    ///
    /// Enabling acquires a display-capture stream, swaps it in as the
    /// outgoing video track, and auto-reverts when the platform ends the
    /// capture (e.g. the user stops sharing from the native UI). Disabling
    /// re-acquires the camera and swaps it back. Failures surface as errors
    /// without tearing down the call. Returns the screen stream when
    /// enabling, `None` otherwise.
    pub async fn share_screen(&self, enabled: bool) -> Result<Option<MediaStream>> {
        if enabled {
            self.start_screen_share().await.map(Some)
        } else {
            self.stop_screen_share().await?;
            Ok(None)
        }
    }

    async fn start_screen_share(&self) -> Result<MediaStream> {
        let peer = self.shared.peer.read().await.clone().ok_or_else(|| {
            Error::InvalidState("share_screen requires a call in progress".to_string())
        })?;
        let local = self.shared.local_stream.read().await.clone().ok_or_else(|| {
            Error::InvalidState("share_screen requires a local stream".to_string())
        })?;
        if self.shared.screen_track.read().await.is_some() {
            debug!("screen share already enabled");
            return Err(Error::InvalidState(
                "screen share is already enabled".to_string(),
            ));
        }

        let screen_stream = self.shared.media.acquire_screen().await?;
        let screen_track = screen_stream
            .tracks_of_kind(TrackKind::Video)
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::Internal("screen capture yielded no video track".to_string())
            })?;

        if let Err(e) = peer.replace_video_track(Arc::clone(&screen_track)).await {
            screen_stream.release();
            return Err(e);
        }

        // Auto-revert when the platform ends the capture.
        let session = self.clone();
        screen_track.on_ended(move || {
            let session = session.clone();
            tokio::spawn(async move {
                // Equivalent to `share_screen(false)`; called directly so the
                // spawned future doesn't recurse into `share_screen`'s own
                // opaque future type.
                if let Err(e) = session.stop_screen_share().await {
                    warn!("failed to revert ended screen share: {}", e);
                }
            });
        });

        if let Some(camera) = local.replace_video_track(Arc::clone(&screen_track)) {
            camera.stop();
        }
        *self.shared.screen_track.write().await = Some(screen_track);

        info!("screen share enabled");
        Ok(screen_stream)
    }

    async fn stop_screen_share(&self) -> Result<()> {
        if self.shared.screen_track.read().await.is_none() {
            debug!("screen share not enabled; nothing to do");
            return Ok(());
        }

        let peer = self.shared.peer.read().await.clone().ok_or_else(|| {
            Error::InvalidState("share_screen requires a call in progress".to_string())
        })?;
        let local = self.shared.local_stream.read().await.clone().ok_or_else(|| {
            Error::InvalidState("share_screen requires a local stream".to_string())
        })?;

        // Re-acquire the camera before dropping the screen track, so a
        // denied camera leaves the current state untouched.
        let camera_stream = self.shared.media.acquire(false, true).await?;
        let camera_track = camera_stream
            .tracks_of_kind(TrackKind::Video)
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::Internal("camera capture yielded no video track".to_string())
            })?;

        let Some(screen_track) = self.shared.screen_track.write().await.take() else {
            return Ok(()); // reverted concurrently
        };

        peer.replace_video_track(Arc::clone(&camera_track)).await?;
        local.replace_video_track(camera_track);
        screen_track.stop();

        info!("screen share disabled, camera restored");
        Ok(())
    }

    async fn build_peer(&self, sender: Arc<dyn SignalingSender>) -> Result<Arc<PeerConnection>> {
        let negotiator = self.shared.negotiators.create(&self.shared.config).await?;
        let peer = PeerConnection::new(negotiator);

        let events = peer.take_events().ok_or_else(|| {
            Error::Internal("peer event stream already taken".to_string())
        })?;
        let pump = tokio::spawn(Self::run_pump(self.clone(), events, sender));
        *self.shared.pump.write().await = Some(pump);

        *self.shared.peer.write().await = Some(Arc::clone(&peer));
        Ok(peer)
    }

    /// Forwards peer events: local candidates out to the channel, remote
    /// tracks and connection milestones to the listeners
    async fn run_pump(
        session: CallSession,
        mut events: mpsc::UnboundedReceiver<PeerEvent>,
        sender: Arc<dyn SignalingSender>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                PeerEvent::LocalCandidate(candidate) => {
                    session.relay_candidate(candidate, &sender).await;
                }
                PeerEvent::RemoteTrackAdded { kind } => {
                    session
                        .shared
                        .listeners
                        .notify(CallSessionEvent::RemoteTrackAdded { kind });
                }
                PeerEvent::Connected => {
                    debug!("peer connection established");
                }
            }
        }
        debug!("peer event pump ended");
    }

    async fn relay_candidate(
        &self,
        candidate: IceCandidateInit,
        sender: &Arc<dyn SignalingSender>,
    ) {
        let sender_id = self
            .shared
            .local_user
            .read()
            .await
            .clone()
            .unwrap_or_default();

        let message = SignalingMessage::IceCandidate(IceCandidate {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            sender_id,
        });

        if let Err(e) = sender.broadcast(message).await {
            warn!("failed to relay ICE candidate: {}", e);
            self.shared.listeners.notify(CallSessionEvent::Error {
                message: format!("failed to relay ICE candidate: {}", e),
            });
        }
    }

    /// Reads the channel until it closes, dispatching each inbound message
    async fn run_reader(
        session: CallSession,
        mut inbound: mpsc::UnboundedReceiver<SignalingMessage>,
    ) {
        while let Some(message) = inbound.recv().await {
            debug!("inbound signaling message: {}", message.event_name());
            session.handle_message(message).await;
        }
        debug!("signaling reader ended");
    }

    async fn handle_message(&self, message: SignalingMessage) {
        match message {
            SignalingMessage::CallOffer(offer) => self.handle_offer(offer).await,
            SignalingMessage::CallAnswer(answer) => self.handle_answer(answer).await,
            SignalingMessage::IceCandidate(candidate) => self.handle_candidate(candidate).await,
            SignalingMessage::CallEnded(ev) => {
                self.handle_termination(ev.user_id, TerminationReason::Ended)
                    .await
            }
            SignalingMessage::CallRejected(ev) => {
                self.handle_termination(ev.user_id, TerminationReason::Rejected)
                    .await
            }
        }
    }

    /// Primes an inbound offer: acquire media for the offered call type,
    /// build the peer connection, apply the remote description, and ring
    async fn handle_offer(&self, offer: CallOffer) {
        {
            let mut state = self.shared.state.write().await;
            if *state != CallState::Idle {
                warn!(
                    "ignoring offer from {} while {} (busy)",
                    offer.caller_id, state
                );
                return;
            }
            *state = CallState::Ringing;
        }

        info!(
            "incoming {:?} call from {} ({})",
            offer.call_type, offer.caller_name, offer.caller_id
        );

        let primed = async {
            let sender = self.channel_sender("handle_offer").await?;
            let stream = self
                .shared
                .media
                .acquire(true, offer.call_type.wants_video())
                .await?;
            *self.shared.local_stream.write().await = Some(stream);

            let peer = self.build_peer(sender).await?;
            peer.apply_remote_description(SdpKind::Offer, &offer.sdp)
                .await
        }
        .await;

        match primed {
            Ok(()) => {
                let early =
                    std::mem::take(&mut *self.shared.early_candidates.write().await);
                for candidate in early {
                    self.handle_candidate(candidate).await;
                }
                *self.shared.pending_offer.write().await = Some(offer.clone());
                self.shared
                    .listeners
                    .notify(CallSessionEvent::OfferReceived(offer));
            }
            Err(e) => {
                warn!("failed to prime inbound offer: {}", e);
                self.shared.listeners.notify(CallSessionEvent::Error {
                    message: format!("failed to handle incoming call: {}", e),
                });
                self.teardown().await;
            }
        }
    }

    /// Completes negotiation on the initiating side
    async fn handle_answer(&self, answer: CallAnswer) {
        if *self.shared.state.read().await != CallState::Calling {
            debug!("ignoring answer from {} (not calling)", answer.answerer_id);
            return;
        }
        let Some(peer) = self.shared.peer.read().await.clone() else {
            debug!("ignoring answer without a peer connection");
            return;
        };

        match peer
            .apply_remote_description(SdpKind::Answer, &answer.sdp)
            .await
        {
            Ok(()) => {
                *self.shared.state.write().await = CallState::Active;
                info!("call answered by {}", answer.answerer_id);
                self.shared
                    .listeners
                    .notify(CallSessionEvent::AnswerReceived(answer));
            }
            Err(e) => {
                warn!("failed to apply remote answer: {}", e);
                self.shared.listeners.notify(CallSessionEvent::Error {
                    message: format!("failed to apply remote answer: {}", e),
                });
                if let Err(e) = self.end_call().await {
                    warn!("teardown after failed answer also failed: {}", e);
                }
            }
        }
    }

    async fn handle_candidate(&self, candidate: IceCandidate) {
        let Some(peer) = self.shared.peer.read().await.clone() else {
            // Signaling carries no cross-sender ordering, so a candidate can
            // overtake the offer it belongs to. Hold it until the offer
            // primes a peer connection.
            debug!(
                "buffering ICE candidate from {} until the offer arrives",
                candidate.sender_id
            );
            self.shared.early_candidates.write().await.push(candidate);
            return;
        };

        let init = IceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
        };

        if let Err(e) = peer.apply_remote_candidate(init).await {
            // A bad candidate is non-fatal; other paths may still connect.
            warn!("failed to apply remote ICE candidate: {}", e);
            self.shared.listeners.notify(CallSessionEvent::Error {
                message: format!("failed to apply remote ICE candidate: {}", e),
            });
            return;
        }

        self.shared
            .listeners
            .notify(CallSessionEvent::CandidateReceived(candidate));
    }

    /// Remote peer ended or rejected the call: tear down symmetrically,
    /// notify listeners, never re-broadcast
    async fn handle_termination(&self, user_id: String, reason: TerminationReason) {
        if *self.shared.state.read().await == CallState::Idle {
            debug!("ignoring {:?} from {} while idle", reason, user_id);
            return;
        }

        info!("call terminated by {} ({:?})", user_id, reason);
        self.teardown().await;
        self.shared
            .listeners
            .notify(CallSessionEvent::CallTerminated { user_id, reason });
    }

    /// Releases every call resource and returns to `idle`; idempotent
    ///
    /// Every exit path funnels through here so no teardown step can be
    /// missed: local tracks stopped, peer connection closed, remote stream
    /// and pending offer cleared, event pump stopped.
    async fn teardown(&self) {
        if let Some(stream) = self.shared.local_stream.write().await.take() {
            stream.release();
        }
        *self.shared.screen_track.write().await = None;

        if let Some(peer) = self.shared.peer.write().await.take() {
            if let Err(e) = peer.close().await {
                warn!("error closing peer connection: {}", e);
            }
        }

        if let Some(pump) = self.shared.pump.write().await.take() {
            pump.abort();
        }

        *self.shared.pending_offer.write().await = None;
        self.shared.early_candidates.write().await.clear();
        *self.shared.state.write().await = CallState::Idle;
        debug!("call resources released");
    }
}
