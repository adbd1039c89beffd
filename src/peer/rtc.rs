//! WebRTC-backed SDP negotiator
//!
//! Wraps a `webrtc::RTCPeerConnection` behind the [`SdpNegotiator`] trait.
//! Local [`MediaTrack`] handles are mapped onto static-sample transport
//! tracks (Opus for audio, VP8 for video); payload production stays with
//! the embedding application.

use super::negotiator::{
    ConnectedCallback, IceCandidateCallback, IceCandidateInit, NegotiatorFactory,
    RemoteTrackCallback, SdpKind, SdpNegotiator,
};
use crate::config::CallConfig;
use crate::media::{MediaTrack, TrackKind};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// [`SdpNegotiator`] implementation over the `webrtc` crate
pub struct WebRtcNegotiator {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<Vec<(TrackKind, Arc<RTCRtpSender>)>>,
    closed: AtomicBool,
}

impl WebRtcNegotiator {
    /// Build a peer connection configured with the ICE servers in `config`
    pub async fn new(config: &CallConfig) -> Result<Self> {
        if config.ice_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one ICE server is required".to_string(),
            ));
        }

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Negotiation(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| Error::Negotiation(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone(),
                credential: s.credential.clone(),
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to create peer connection: {}", e)))?;

        info!("created peer connection");

        Ok(Self {
            pc: Arc::new(pc),
            senders: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn transport_track(track: &MediaTrack) -> Arc<TrackLocalStaticSample> {
        let mime_type = match track.kind() {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track.id().to_string(),
            "peercall".to_string(),
        ))
    }
}

#[async_trait]
impl SdpNegotiator for WebRtcNegotiator {
    async fn add_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        let local = Self::transport_track(&track);
        let sender = self
            .pc
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to add track: {}", e)))?;

        self.senders.lock().await.push((track.kind(), sender));
        debug!("attached local {} track {}", track.kind().as_str(), track.id());
        Ok(())
    }

    async fn replace_video_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        let local = Self::transport_track(&track);
        let senders = self.senders.lock().await;
        match senders.iter().find(|(kind, _)| *kind == TrackKind::Video) {
            Some((_, sender)) => {
                sender
                    .replace_track(Some(local as Arc<dyn TrackLocal + Send + Sync>))
                    .await
                    .map_err(|e| {
                        Error::Negotiation(format!("Failed to replace video track: {}", e))
                    })?;
                debug!("replaced outgoing video track with {}", track.id());
                Ok(())
            }
            None => {
                drop(senders);
                // No video sender yet (audio-only call): add instead.
                self.add_track(track).await
            }
        }
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to create offer: {}", e)))?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set local description: {}", e)))?;
        Ok(sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        if self.pc.remote_description().await.is_none() {
            return Err(Error::Negotiation(
                "create_answer requires a remote offer".to_string(),
            ));
        }
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to create answer: {}", e)))?;
        let sdp = answer.sdp.clone();
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set local description: {}", e)))?;
        Ok(sdp)
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<()> {
        let desc = match kind {
            SdpKind::Offer => RTCSessionDescription::offer(sdp.to_string()),
            SdpKind::Answer => RTCSessionDescription::answer(sdp.to_string()),
        }
        .map_err(|e| Error::Negotiation(format!("Invalid SDP: {}", e)))?;

        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidateInit) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidate(format!("Failed to add ICE candidate: {}", e)))
    }

    fn on_ice_candidate(&self, callback: IceCandidateCallback) {
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let callback = Arc::clone(&callback);
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        return; // gathering complete
                    };
                    match candidate.to_json() {
                        Ok(json) => callback(IceCandidateInit {
                            candidate: json.candidate,
                            sdp_mid: json.sdp_mid,
                            sdp_mline_index: json.sdp_mline_index,
                        }),
                        Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
                    }
                })
            }));
    }

    fn on_remote_track(&self, callback: RemoteTrackCallback) {
        self.pc
            .on_track(Box::new(move |track, _receiver, _transceiver| {
                let callback = Arc::clone(&callback);
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => TrackKind::Audio,
                        RTPCodecType::Video => TrackKind::Video,
                        _ => return,
                    };
                    callback(kind, track.id());
                })
            }));
    }

    fn on_connected(&self, callback: ConnectedCallback) {
        self.pc.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let callback = Arc::clone(&callback);
                Box::pin(async move {
                    debug!("peer connection state: {}", state);
                    if state == RTCPeerConnectionState::Connected {
                        callback();
                    }
                })
            },
        ));
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.pc
            .close()
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to close peer connection: {}", e)))
    }
}

/// Factory producing [`WebRtcNegotiator`]s, one per call attempt
#[derive(Debug, Clone, Copy, Default)]
pub struct WebRtcNegotiatorFactory;

impl WebRtcNegotiatorFactory {
    /// Create the factory
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NegotiatorFactory for WebRtcNegotiatorFactory {
    async fn create(&self, config: &CallConfig) -> Result<Arc<dyn SdpNegotiator>> {
        Ok(Arc::new(WebRtcNegotiator::new(config).await?))
    }
}
