//! Signaling channel to the realtime voice service.
//!
//! A [`SignalingChannel`] is a duplex, message-oriented connection. Outbound
//! [`ClientEvent`]s go through a bounded queue drained by the transport;
//! inbound frames arrive as [`InboundMessage`]s on a single receiver that the
//! session's dispatch loop owns.
//!
//! [`WebSocketTransport`] is the production transport. [`SignalingChannel::loopback`]
//! builds an in-memory channel whose far end is driven directly, which is how
//! the session is exercised without a network.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use http::header::AUTHORIZATION;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::base::{CallError, CallResult};
use super::credentials::EphemeralCredential;
use super::messages::ClientEvent;
use crate::config::{AuthMode, CallConfig};

/// Channel capacity for outbound and inbound message queues.
pub const SIGNALING_CHANNEL_CAPACITY: usize = 256;

/// How long to wait for the close frame to be written.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// Channel
// =============================================================================

/// Message delivered from the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// A text frame, normally one JSON protocol event
    Text(String),
    /// The connection ended; carries the reason when one is known
    Closed(Option<String>),
}

/// Cloneable, non-blocking handle for sending on a channel.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<ClientEvent>,
    open: Arc<AtomicBool>,
}

impl ChannelSender {
    /// Whether outbound messages can currently be delivered.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    /// Queue an event without waiting.
    ///
    /// Fails with `NotConnected` once the channel is closed, and with a
    /// connection error when the outbound queue is full.
    pub fn send(&self, event: ClientEvent) -> CallResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(CallError::NotConnected);
        }
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) => CallError::Connection(format!(
                "outbound queue full, dropped {}",
                event.event_type()
            )),
            TrySendError::Closed(_) => CallError::NotConnected,
        })
    }
}

/// Duplex connection owned by one session.
pub struct SignalingChannel {
    sender: ChannelSender,
    inbound: Option<mpsc::Receiver<InboundMessage>>,
    cancel: CancellationToken,
}

impl SignalingChannel {
    /// Assemble a channel from its queues. `cancel` is triggered on close so
    /// the transport can shut down.
    pub fn new(
        outbound: mpsc::Sender<ClientEvent>,
        inbound: mpsc::Receiver<InboundMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sender: ChannelSender {
                tx: outbound,
                open: Arc::new(AtomicBool::new(true)),
            },
            inbound: Some(inbound),
            cancel,
        }
    }

    /// In-memory channel plus the peer that plays the remote side.
    pub fn loopback() -> (Self, LoopbackPeer) {
        let (out_tx, out_rx) = mpsc::channel(SIGNALING_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(SIGNALING_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let channel = Self::new(out_tx, in_rx, cancel.clone());
        let peer = LoopbackPeer {
            outbound: out_rx,
            inbound: in_tx,
            closed: cancel,
        };
        (channel, peer)
    }

    /// Handle for sending on this channel.
    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    pub fn is_open(&self) -> bool {
        self.sender.is_open()
    }

    /// Take the inbound stream. Only the first call gets it.
    pub fn take_inbound(&mut self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound.take()
    }

    /// Close the channel. Idempotent.
    pub fn close(&mut self) {
        if self.sender.open.swap(false, Ordering::SeqCst) {
            tracing::debug!("Closing signaling channel");
        }
        self.cancel.cancel();
        self.inbound = None;
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Far end of a loopback channel.
pub struct LoopbackPeer {
    /// Events the local side sent
    pub outbound: mpsc::Receiver<ClientEvent>,
    /// Feed for messages the local side receives
    pub inbound: mpsc::Sender<InboundMessage>,
    closed: CancellationToken,
}

impl LoopbackPeer {
    /// Deliver a JSON event to the local side.
    pub async fn send_json(&self, value: serde_json::Value) -> bool {
        self.inbound
            .send(InboundMessage::Text(value.to_string()))
            .await
            .is_ok()
    }

    /// Simulate the remote side closing the connection.
    pub async fn close(&self, reason: Option<&str>) -> bool {
        self.inbound
            .send(InboundMessage::Closed(reason.map(str::to_owned)))
            .await
            .is_ok()
    }

    /// Whether the local side has closed the channel.
    pub fn is_closed_locally(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Drain every event the local side has sent so far.
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.outbound.try_recv() {
            events.push(event);
        }
        events
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Opens signaling channels.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Open a channel authenticated with `credential`.
    async fn connect(&self, credential: &EphemeralCredential) -> CallResult<SignalingChannel>;
}

/// WebSocket transport for the realtime endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    model: Option<String>,
    auth_mode: AuthMode,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, model: Option<String>) -> Self {
        Self {
            url: url.into(),
            model,
            auth_mode: AuthMode::Bearer,
        }
    }

    pub fn from_config(config: &CallConfig) -> Self {
        Self {
            url: config.realtime_url.clone(),
            model: config.model.clone(),
            auth_mode: config.auth_mode,
        }
    }

    /// Select how the credential is presented during the handshake.
    pub fn with_auth_mode(mut self, auth_mode: AuthMode) -> Self {
        self.auth_mode = auth_mode;
        self
    }

    /// Endpoint URL with the model query parameter applied.
    pub fn build_url(&self) -> CallResult<String> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| CallError::InvalidConfiguration(format!("invalid realtime URL: {e}")))?;
        if let Some(model) = self.model.as_deref().filter(|m| !m.is_empty())
            && !url.query_pairs().any(|(key, _)| key == "model")
        {
            url.query_pairs_mut().append_pair("model", model);
        }
        Ok(url.to_string())
    }
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn connect(&self, credential: &EphemeralCredential) -> CallResult<SignalingChannel> {
        let url = self.build_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| CallError::Connection(e.to_string()))?;

        let headers = request.headers_mut();
        match self.auth_mode {
            AuthMode::Bearer => {
                let value = HeaderValue::from_str(&format!("Bearer {}", credential.secret()))
                    .map_err(|e| CallError::Credential(format!("unusable credential: {e}")))?;
                headers.insert(AUTHORIZATION, value);
                headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));
            }
            AuthMode::Subprotocol => {
                let protocols = format!(
                    "realtime, openai-insecure-api-key.{}, openai-beta.realtime-v1",
                    credential.secret()
                );
                let value = HeaderValue::from_str(&protocols)
                    .map_err(|e| CallError::Credential(format!("unusable credential: {e}")))?;
                headers.insert("Sec-WebSocket-Protocol", value);
            }
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| CallError::Connection(e.to_string()))?;

        tracing::info!("Connected to realtime voice service");

        let (out_tx, out_rx) = mpsc::channel::<ClientEvent>(SIGNALING_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<InboundMessage>(SIGNALING_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        tokio::spawn(run_bridge(ws_stream, out_rx, in_tx, cancel.clone()));

        Ok(SignalingChannel::new(out_tx, in_rx, cancel))
    }
}

/// Pump outbound events into the socket and socket frames into the inbound queue.
async fn run_bridge<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    mut outbound: mpsc::Receiver<ClientEvent>,
    inbound: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws_sink.send(Message::Close(None))).await;
                tracing::debug!("Signaling bridge stopped");
                return;
            }

            // Handle outgoing messages
            event = outbound.recv() => {
                let Some(event) = event else {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws_sink.send(Message::Close(None))).await;
                    return;
                };
                let json = match serde_json::to_string(&event) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize event: {}", e);
                        continue;
                    }
                };

                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break Some(e.to_string());
                }
            }

            // Handle incoming messages
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if inbound.send(InboundMessage::Text(text.as_str().to_owned())).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!("WebSocket closed by server");
                        break frame
                            .map(|f| f.reason.as_str().to_owned())
                            .filter(|r| !r.is_empty());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            tracing::error!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break Some(e.to_string());
                    }
                    None => break None,
                }
            }
        }
    };

    let _ = inbound.send(InboundMessage::Closed(reason)).await;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_round_trip() {
        let (mut channel, mut peer) = SignalingChannel::loopback();
        let mut inbound = channel.take_inbound().unwrap();
        assert!(channel.take_inbound().is_none());

        channel
            .sender()
            .send(ClientEvent::user_text("hello"))
            .unwrap();
        let sent = peer.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event_type(), "conversation.item.create");

        assert!(peer.send_json(serde_json::json!({"type": "session.updated"})).await);
        match inbound.recv().await {
            Some(InboundMessage::Text(text)) => assert!(text.contains("session.updated")),
            other => panic!("Expected text message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_stops_sends() {
        let (mut channel, peer) = SignalingChannel::loopback();
        let sender = channel.sender();
        assert!(sender.is_open());

        channel.close();
        channel.close();

        assert!(!sender.is_open());
        assert!(peer.is_closed_locally());
        assert_eq!(
            sender.send(ClientEvent::audio_append(&[0.0; 4])),
            Err(CallError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_drop_closes_channel() {
        let (channel, peer) = SignalingChannel::loopback();
        let sender = channel.sender();
        drop(channel);
        assert!(!sender.is_open());
        assert!(peer.is_closed_locally());
    }

    #[tokio::test]
    async fn test_full_queue_reports_connection_error() {
        let (channel, _peer) = SignalingChannel::loopback();
        let sender = channel.sender();
        for _ in 0..SIGNALING_CHANNEL_CAPACITY {
            sender.send(ClientEvent::audio_append(&[0.0; 2])).unwrap();
        }
        match sender.send(ClientEvent::audio_append(&[0.0; 2])) {
            Err(CallError::Connection(msg)) => assert!(msg.contains("input_audio_buffer.append")),
            other => panic!("Expected Connection error, got {other:?}"),
        }
    }

    #[test]
    fn test_build_url_appends_model() {
        let transport = WebSocketTransport::new(
            "wss://api.x.ai/v1/realtime",
            Some("grok-3-fast-realtime".to_string()),
        );
        assert_eq!(
            transport.build_url().unwrap(),
            "wss://api.x.ai/v1/realtime?model=grok-3-fast-realtime"
        );
    }

    #[test]
    fn test_build_url_keeps_existing_model() {
        let transport = WebSocketTransport::new(
            "wss://example.com/v1/realtime?model=custom",
            Some("other".to_string()),
        );
        assert_eq!(
            transport.build_url().unwrap(),
            "wss://example.com/v1/realtime?model=custom"
        );
    }

    #[test]
    fn test_build_url_rejects_garbage() {
        let transport = WebSocketTransport::new("not a url", None);
        match transport.build_url() {
            Err(CallError::InvalidConfiguration(_)) => {}
            other => panic!("Expected InvalidConfiguration, got {other:?}"),
        }
    }
}
