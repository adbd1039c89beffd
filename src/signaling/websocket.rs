//! WebSocket signaling broker client
//!
//! Connects to a WebSocket pub/sub relay and maps conversation channels onto
//! it with a small JSON frame protocol: `subscribe` / `unsubscribe` control
//! frames and `publish` frames carrying a [`SignalingMessage`]. Relays that
//! echo published frames back to the sender are tolerated: every frame
//! carries the local subscriber id and own echoes are dropped on receive.

use super::{SignalingBroker, SignalingChannel, SignalingMessage, SignalingSender};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type ChannelRoutes = Arc<Mutex<HashMap<String, Vec<(Uuid, mpsc::UnboundedSender<SignalingMessage>)>>>>;

/// Frames exchanged with the relay
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireFrame {
    /// Subscribe the connection to a channel
    Subscribe { channel: String, sender: Uuid },
    /// Drop a channel subscription
    Unsubscribe { channel: String, sender: Uuid },
    /// Publish a signaling message to a channel
    Publish {
        channel: String,
        sender: Uuid,
        message: SignalingMessage,
    },
}

/// WebSocket-backed [`SignalingBroker`]
pub struct WebSocketBroker {
    url: String,
    outbound: mpsc::UnboundedSender<Message>,
    routes: ChannelRoutes,
}

impl WebSocketBroker {
    /// Connect to the relay and start the send/receive tasks
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to signaling relay: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(format!("Failed to connect: {}", e)))?;

        info!("Connected to signaling relay");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let routes: ChannelRoutes = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(read, Arc::clone(&routes)));

        Ok(Self {
            url: url.to_string(),
            outbound: tx,
            routes,
        })
    }

    /// Relay URL this broker is connected to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sender task: drains the outbound queue into the WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket frame: {}", e);
                break;
            }
        }
        debug!("Sender task terminated");
    }

    /// Receiver task: routes publish frames to the joined channels
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        routes: ChannelRoutes,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    Self::route_frame(&text, &routes);
                }
                Ok(Message::Close(_)) => {
                    info!("Signaling relay connection closed");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        // Connection is gone; close every inbound stream so sessions notice.
        routes.lock().clear();
        debug!("Receiver task terminated");
    }

    fn route_frame(text: &str, routes: &ChannelRoutes) {
        let frame: WireFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Ignoring malformed relay frame: {}", e);
                return;
            }
        };

        let WireFrame::Publish {
            channel,
            sender,
            message,
        } = frame
        else {
            // Control frames are relay-bound only.
            return;
        };

        let routes = routes.lock();
        let Some(subs) = routes.get(&channel) else {
            debug!("Dropping frame for unjoined channel {}", channel);
            return;
        };

        for (id, tx) in subs {
            if *id == sender {
                continue; // own echo
            }
            let _ = tx.send(message.clone());
        }
    }

    fn send_frame(&self, frame: &WireFrame) -> Result<()> {
        let json = serde_json::to_string(frame)?;
        self.outbound
            .send(Message::Text(json))
            .map_err(|e| Error::Signaling(format!("Relay connection closed: {}", e)))
    }
}

struct WebSocketSender {
    conversation_id: String,
    subscriber_id: Uuid,
    outbound: mpsc::UnboundedSender<Message>,
    routes: ChannelRoutes,
}

impl WebSocketSender {
    fn send_frame(&self, frame: &WireFrame) -> Result<()> {
        let json = serde_json::to_string(frame)?;
        self.outbound
            .send(Message::Text(json))
            .map_err(|e| Error::Signaling(format!("Relay connection closed: {}", e)))
    }
}

#[async_trait]
impl SignalingSender for WebSocketSender {
    async fn broadcast(&self, message: SignalingMessage) -> Result<()> {
        debug!(
            "publish {} to relay channel {}",
            message.event_name(),
            self.conversation_id
        );
        self.send_frame(&WireFrame::Publish {
            channel: self.conversation_id.clone(),
            sender: self.subscriber_id,
            message,
        })
    }

    async fn leave(&self) -> Result<()> {
        {
            let mut routes = self.routes.lock();
            if let Some(subs) = routes.get_mut(&self.conversation_id) {
                subs.retain(|(id, _)| *id != self.subscriber_id);
                if subs.is_empty() {
                    routes.remove(&self.conversation_id);
                }
            }
        }
        self.send_frame(&WireFrame::Unsubscribe {
            channel: self.conversation_id.clone(),
            sender: self.subscriber_id,
        })
    }
}

#[async_trait]
impl SignalingBroker for WebSocketBroker {
    async fn join(&self, conversation_id: &str) -> Result<SignalingChannel> {
        if conversation_id.is_empty() {
            return Err(Error::Signaling("empty conversation id".to_string()));
        }

        let subscriber_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.routes
            .lock()
            .entry(conversation_id.to_string())
            .or_default()
            .push((subscriber_id, tx));

        self.send_frame(&WireFrame::Subscribe {
            channel: conversation_id.to_string(),
            sender: subscriber_id,
        })?;

        debug!(
            "joined relay channel {} as {}",
            conversation_id, subscriber_id
        );

        Ok(SignalingChannel {
            conversation_id: conversation_id.to_string(),
            sender: Arc::new(WebSocketSender {
                conversation_id: conversation_id.to_string(),
                subscriber_id,
                outbound: self.outbound.clone(),
                routes: Arc::clone(&self.routes),
            }),
            inbound: rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::protocol::{CallOffer, CallType};

    #[test]
    fn test_publish_frame_wire_format() {
        let frame = WireFrame::Publish {
            channel: "call-convo-1".to_string(),
            sender: Uuid::nil(),
            message: SignalingMessage::CallOffer(CallOffer {
                sdp: "v=0".to_string(),
                caller_id: "alice".to_string(),
                caller_name: "Alice".to_string(),
                call_type: CallType::Audio,
            }),
        };

        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "publish");
        assert_eq!(json["channel"], "call-convo-1");
        assert_eq!(json["message"]["event"], "call-offer");
    }

    #[test]
    fn test_route_frame_filters_own_echo() {
        let routes: ChannelRoutes = Arc::new(Mutex::new(HashMap::new()));
        let me = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        routes
            .lock()
            .insert("c".to_string(), vec![(me, tx)]);

        let echo = serde_json::to_string(&WireFrame::Publish {
            channel: "c".to_string(),
            sender: me,
            message: SignalingMessage::CallEnded(crate::signaling::protocol::CallEnded {
                user_id: "alice".to_string(),
            }),
        })
        .unwrap();

        WebSocketBroker::route_frame(&echo, &routes);
        assert!(rx.try_recv().is_err());
    }
}
