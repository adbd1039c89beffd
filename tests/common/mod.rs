//! Shared harness for the call-flow integration tests: a deterministic
//! negotiator fake, denying media sources, and polling helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use peercall::peer::negotiator::{
    ConnectedCallback, IceCandidateCallback, RemoteTrackCallback,
};
use peercall::{
    CallConfig, CallSession, CallSessionEvent, Error, IceCandidateInit, MediaSource, MediaStream,
    MemoryBroker, NegotiatorFactory, Result, SdpKind, SdpNegotiator, TrackKind,
};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::mpsc;

pub use peercall::MediaTrack;

const CANDIDATES_PER_SIDE: usize = 2;

static TRACING: Once = Once::new();

/// Route session logs through the test writer; `RUST_LOG` filters apply
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Scripted negotiator: descriptions encode the attached track kinds, and
/// applying a remote description replays those kinds as remote tracks.
/// Local candidates are emitted when a description is created.
pub struct FakeNegotiator {
    tracks: Mutex<Vec<Arc<MediaTrack>>>,
    video_swaps: Mutex<Vec<Arc<MediaTrack>>>,
    local_description: Mutex<Option<String>>,
    remote_description: Mutex<Option<(SdpKind, String)>>,
    applied_candidates: Mutex<Vec<IceCandidateInit>>,
    on_candidate: Mutex<Option<IceCandidateCallback>>,
    on_track: Mutex<Option<RemoteTrackCallback>>,
    on_connected: Mutex<Option<ConnectedCallback>>,
    closed: AtomicBool,
}

impl FakeNegotiator {
    pub fn new() -> Self {
        Self {
            tracks: Mutex::new(Vec::new()),
            video_swaps: Mutex::new(Vec::new()),
            local_description: Mutex::new(None),
            remote_description: Mutex::new(None),
            applied_candidates: Mutex::new(Vec::new()),
            on_candidate: Mutex::new(None),
            on_track: Mutex::new(None),
            on_connected: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn applied_candidate_count(&self) -> usize {
        self.applied_candidates.lock().len()
    }

    pub fn video_swap_count(&self) -> usize {
        self.video_swaps.lock().len()
    }

    pub fn last_video_swap(&self) -> Option<Arc<MediaTrack>> {
        self.video_swaps.lock().last().cloned()
    }

    fn kinds_blob(&self) -> String {
        let tracks = self.tracks.lock();
        let mut kinds: Vec<&str> = tracks.iter().map(|t| t.kind().as_str()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        kinds.join("+")
    }

    fn emit_local_candidates(&self) {
        let callback = self.on_candidate.lock().clone();
        if let Some(callback) = callback {
            for n in 0..CANDIDATES_PER_SIDE {
                callback(IceCandidateInit {
                    candidate: format!("candidate:fake {} udp 1 0.0.0.0 9 typ host", n),
                    sdp_mid: Some("0".to_string()),
                    sdp_mline_index: Some(0),
                });
            }
        }
    }
}

#[async_trait]
impl SdpNegotiator for FakeNegotiator {
    async fn add_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        self.tracks.lock().push(track);
        Ok(())
    }

    async fn replace_video_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        self.video_swaps.lock().push(track);
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        let sdp = format!("v=0 fake-offer {}", self.kinds_blob());
        *self.local_description.lock() = Some(sdp.clone());
        self.emit_local_candidates();
        Ok(sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        if self.remote_description.lock().is_none() {
            return Err(Error::Negotiation(
                "cannot create an answer without a remote offer".to_string(),
            ));
        }
        let sdp = format!("v=0 fake-answer {}", self.kinds_blob());
        *self.local_description.lock() = Some(sdp.clone());
        self.emit_local_candidates();
        Ok(sdp)
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<()> {
        *self.remote_description.lock() = Some((kind, sdp.to_string()));

        // Replay the kinds advertised in the description as remote tracks.
        let on_track = self.on_track.lock().clone();
        if let Some(on_track) = on_track {
            if sdp.contains("audio") {
                on_track(TrackKind::Audio, "remote-audio".to_string());
            }
            if sdp.contains("video") {
                on_track(TrackKind::Video, "remote-video".to_string());
            }
        }
        let on_connected = self.on_connected.lock().clone();
        if let Some(on_connected) = on_connected {
            on_connected();
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidateInit) -> Result<()> {
        self.applied_candidates.lock().push(candidate.clone());
        Ok(())
    }

    fn on_ice_candidate(&self, callback: IceCandidateCallback) {
        *self.on_candidate.lock() = Some(callback);
    }

    fn on_remote_track(&self, callback: RemoteTrackCallback) {
        *self.on_track.lock() = Some(callback);
    }

    fn on_connected(&self, callback: ConnectedCallback) {
        *self.on_connected.lock() = Some(callback);
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory that remembers every negotiator it hands out
#[derive(Clone, Default)]
pub struct FakeNegotiatorFactory {
    created: Arc<Mutex<Vec<Arc<FakeNegotiator>>>>,
}

impl FakeNegotiatorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> Vec<Arc<FakeNegotiator>> {
        self.created.lock().clone()
    }

    pub fn latest(&self) -> Arc<FakeNegotiator> {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("no negotiator created yet")
    }
}

#[async_trait]
impl NegotiatorFactory for FakeNegotiatorFactory {
    async fn create(&self, _config: &CallConfig) -> Result<Arc<dyn SdpNegotiator>> {
        let negotiator = Arc::new(FakeNegotiator::new());
        self.created.lock().push(Arc::clone(&negotiator));
        Ok(negotiator)
    }
}

/// Media source that denies every request
pub struct DenyingMediaSource;

#[async_trait]
impl MediaSource for DenyingMediaSource {
    async fn acquire(&self, _audio: bool, _video: bool) -> Result<MediaStream> {
        Err(Error::MediaAccess("permission denied".to_string()))
    }

    async fn acquire_screen(&self) -> Result<MediaStream> {
        Err(Error::MediaAccess("permission denied".to_string()))
    }
}

/// Media source that grants capture but denies display capture
pub struct ScreenDeniedSource;

#[async_trait]
impl MediaSource for ScreenDeniedSource {
    async fn acquire(&self, audio: bool, video: bool) -> Result<MediaStream> {
        peercall::StaticMediaSource::new().acquire(audio, video).await
    }

    async fn acquire_screen(&self) -> Result<MediaStream> {
        Err(Error::MediaAccess("display capture denied".to_string()))
    }
}

/// One participant in a test scenario
pub struct TestPeer {
    pub session: CallSession,
    pub negotiators: FakeNegotiatorFactory,
    pub events: mpsc::UnboundedReceiver<CallSessionEvent>,
    skipped: VecDeque<CallSessionEvent>,
}

impl TestPeer {
    pub async fn join(broker: &MemoryBroker, conversation_id: &str, user_id: &str) -> Self {
        Self::join_with_media(
            broker,
            conversation_id,
            user_id,
            Arc::new(peercall::StaticMediaSource::new()),
        )
        .await
    }

    pub async fn join_with_media(
        broker: &MemoryBroker,
        conversation_id: &str,
        user_id: &str,
        media: Arc<dyn MediaSource>,
    ) -> Self {
        init_tracing();
        let negotiators = FakeNegotiatorFactory::new();
        let session = CallSession::with_components(
            CallConfig::default(),
            Arc::new(broker.clone()),
            media,
            Arc::new(negotiators.clone()),
        );
        let (_, events) = session.add_listener();
        session
            .join_channel(conversation_id, user_id)
            .await
            .expect("join_channel failed");
        Self {
            session,
            negotiators,
            events,
            skipped: VecDeque::new(),
        }
    }

    /// Return the first matching event, panicking on timeout
    ///
    /// Event ordering across the signaling and peer pumps is not total, so
    /// non-matching events are held aside for later expectations instead of
    /// being dropped.
    pub async fn expect_event<F>(&mut self, what: &str, mut matches: F) -> CallSessionEvent
    where
        F: FnMut(&CallSessionEvent) -> bool,
    {
        if let Some(pos) = self.skipped.iter().position(&mut matches) {
            return self.skipped.remove(pos).unwrap();
        }
        let deadline = Duration::from_secs(2);
        loop {
            let event = tokio::time::timeout(deadline, self.events.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
                .unwrap_or_else(|| panic!("event stream closed waiting for {}", what));
            if matches(&event) {
                return event;
            }
            self.skipped.push_back(event);
        }
    }
}

/// Poll `check` until it holds, panicking after two seconds
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Give in-flight broker and pump tasks a moment to settle
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
