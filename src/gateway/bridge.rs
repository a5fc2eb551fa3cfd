//! WhatsApp gateway over a local WebSocket bridge
//!
//! The bridge process owns the WhatsApp Web login and speaks JSON frames:
//! `message`, `status`, `qr` and `error` come in; `send` and `send_media`
//! go out. Documents travel base64-encoded inside `send_media`.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{GatewayError, InboundMessage, MessagingGateway, Outbound};
use crate::GatewayConfig;

type WsSink = futures::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

const SEEN_CAPACITY: usize = 1000;

#[derive(Debug, Deserialize)]
struct BridgeFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    qr: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum OutboundFrame<'a> {
    #[serde(rename = "send")]
    Text { to: &'a str, text: &'a str },
    #[serde(rename = "send_media")]
    Media {
        to: &'a str,
        media_type: &'static str,
        media_data: String,
        media_filename: &'a str,
        mime_type: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<&'a str>,
    },
}

/// Remembers recent message ids; the bridge replays on reconnect
#[derive(Debug, Default)]
struct SeenMessages {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenMessages {
    /// Returns false if `id` was already recorded
    fn insert(&mut self, id: &str) -> bool {
        if !self.ids.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

pub struct BridgeGateway {
    config: GatewayConfig,
    inbound_tx: mpsc::Sender<InboundMessage>,
    seen: parking_lot::Mutex<SeenMessages>,
    sink: Mutex<Option<WsSink>>,
}

impl BridgeGateway {
    pub fn new(config: GatewayConfig, inbound_tx: mpsc::Sender<InboundMessage>) -> Arc<Self> {
        Arc::new(Self {
            config,
            inbound_tx,
            seen: parking_lot::Mutex::new(SeenMessages::default()),
            sink: Mutex::new(None),
        })
    }

    fn is_allowed(&self, sender: &str) -> bool {
        if self.config.allow_from.is_empty() {
            return true;
        }
        // "5567999990000@c.us" -> "5567999990000"
        let phone = sender.split('@').next().unwrap_or(sender);
        self.config
            .allow_from
            .iter()
            .any(|allowed| allowed == sender || allowed == phone)
    }

    /// Keep a bridge connection alive until `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let retry = Duration::from_secs(self.config.reconnect_delay_secs);
        info!(bridge_url = %self.config.bridge_url, "WhatsApp gateway starting");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.connect_and_run() => match result {
                    Ok(()) => info!("WhatsApp bridge connection closed"),
                    Err(e) => error!(error = %e, "WhatsApp bridge connection failed"),
                },
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(retry) => debug!("Reconnecting to WhatsApp bridge"),
            }
        }

        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        info!("WhatsApp gateway stopped");
    }

    async fn connect_and_run(&self) -> Result<(), GatewayError> {
        let (stream, _) = connect_async(self.config.bridge_url.as_str())
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        info!("Connected to WhatsApp bridge");

        let (write, mut read) = stream.split();
        *self.sink.lock().await = Some(write);

        let result = loop {
            match read.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Err(e) = self.handle_frame(&text).await {
                        warn!(error = %e, "Dropping bridge frame");
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    if let Some(sink) = self.sink.lock().await.as_mut() {
                        if let Err(e) = sink.send(WsMessage::Pong(data)).await {
                            warn!(error = %e, "Failed to answer bridge ping");
                        }
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(GatewayError::Transport(e.to_string())),
            }
        };

        *self.sink.lock().await = None;
        result
    }

    async fn handle_frame(&self, text: &str) -> Result<(), GatewayError> {
        let frame: BridgeFrame = serde_json::from_str(text)?;

        match frame.frame_type.as_str() {
            "message" => {
                if let Some(message) = self.accept(frame) {
                    self.inbound_tx
                        .send(message)
                        .await
                        .map_err(|e| GatewayError::Transport(e.to_string()))?;
                }
            }
            "status" => {
                if let Some(status) = frame.status {
                    info!(status = %status, "WhatsApp bridge status");
                }
            }
            "qr" => {
                if let Some(qr) = frame.qr {
                    info!("WhatsApp login required, scan the QR code shown by the bridge");
                    debug!(qr = %qr, "QR code data");
                }
            }
            "error" => {
                if let Some(err) = frame.error {
                    error!(error = %err, "WhatsApp bridge error");
                }
            }
            other => debug!(frame_type = %other, "Ignoring bridge frame"),
        }
        Ok(())
    }

    /// Filter an inbound `message` frame down to something the bot handles
    fn accept(&self, frame: BridgeFrame) -> Option<InboundMessage> {
        let sender = frame.sender.filter(|s| !s.is_empty())?;
        if !self.is_allowed(&sender) {
            debug!(sender = %sender, "Sender not in allow list");
            return None;
        }
        let text = frame.content.filter(|c| !c.trim().is_empty())?;

        if let Some(id) = frame.id.as_deref() {
            if !self.seen.lock().insert(id) {
                debug!(id = %id, "Duplicate bridge message");
                return None;
            }
        }

        Some(InboundMessage {
            conversation_id: sender,
            text,
        })
    }

    async fn write_frame(&self, frame: &OutboundFrame<'_>) -> Result<(), GatewayError> {
        let payload = serde_json::to_string(frame)?;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(GatewayError::NotConnected)?;
        sink.send(WsMessage::Text(payload))
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }
}

#[async_trait]
impl MessagingGateway for BridgeGateway {
    async fn send(&self, conversation_id: &str, content: Outbound) -> Result<(), GatewayError> {
        match content {
            Outbound::Text(text) => {
                self.write_frame(&OutboundFrame::Text {
                    to: conversation_id,
                    text: &text,
                })
                .await
            }
            Outbound::Document(attachment) => {
                let bytes = tokio::fs::read(&attachment.path).await?;
                debug!(
                    conversation = %conversation_id,
                    file = %attachment.file_name,
                    bytes = bytes.len(),
                    "Sending document"
                );
                self.write_frame(&OutboundFrame::Media {
                    to: conversation_id,
                    media_type: "document",
                    media_data: BASE64.encode(&bytes),
                    media_filename: &attachment.file_name,
                    mime_type: &attachment.mime_type,
                    caption: attachment.caption.as_deref(),
                })
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(allow_from: &[&str]) -> (Arc<BridgeGateway>, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(8);
        let config = GatewayConfig {
            allow_from: allow_from.iter().map(|s| s.to_string()).collect(),
            ..GatewayConfig::default()
        };
        (BridgeGateway::new(config, tx), rx)
    }

    #[tokio::test]
    async fn message_frames_become_inbound_messages() {
        let (gateway, mut rx) = gateway(&[]);
        gateway
            .handle_frame(r#"{"type":"message","id":"m1","sender":"5567@c.us","content":"oi"}"#)
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            InboundMessage {
                conversation_id: "5567@c.us".into(),
                text: "oi".into()
            }
        );
    }

    #[tokio::test]
    async fn duplicates_and_strangers_are_dropped() {
        let (gateway, mut rx) = gateway(&["5567"]);
        let frame = r#"{"type":"message","id":"m1","sender":"5567@c.us","content":"1"}"#;
        gateway.handle_frame(frame).await.unwrap();
        gateway.handle_frame(frame).await.unwrap();
        gateway
            .handle_frame(r#"{"type":"message","id":"m2","sender":"9999@c.us","content":"1"}"#)
            .await
            .unwrap();
        gateway
            .handle_frame(r#"{"type":"status","status":"connected"}"#)
            .await
            .unwrap();

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_connection_fails() {
        let (gateway, _rx) = gateway(&[]);
        let err = gateway
            .send("5567@c.us", Outbound::Text("oi".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotConnected));
    }

    #[test]
    fn media_frame_shape() {
        let frame = OutboundFrame::Media {
            to: "5567@c.us",
            media_type: "document",
            media_data: BASE64.encode(b"%PDF"),
            media_filename: "certidao.pdf",
            mime_type: "application/pdf",
            caption: Some("aqui"),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "send_media");
        assert_eq!(value["media_data"], "JVBERg==");
        assert_eq!(value["caption"], "aqui");
    }

    #[test]
    fn seen_ids_are_bounded() {
        let mut seen = SeenMessages::default();
        for i in 0..SEEN_CAPACITY + 10 {
            assert!(seen.insert(&i.to_string()));
        }
        assert_eq!(seen.ids.len(), SEEN_CAPACITY);
        assert!(seen.insert("0"));
    }
}
