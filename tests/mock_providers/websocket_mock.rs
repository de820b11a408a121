//! WebSocket Mock Server for the realtime voice service
//!
//! Accepts one call at a time and behaves like the realtime endpoint:
//! - answers `session.update` with `session.created` + `session.updated`
//! - answers `response.create` with an agent audio chunk and its transcript
//! - records the handshake and every client event it receives

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;

/// What the mock server observed.
#[derive(Default)]
pub struct RealtimeMockState {
    pub authorization: Mutex<Option<String>>,
    pub subprotocols: Mutex<Option<String>>,
    pub uri: Mutex<Option<String>>,
    pub events: Mutex<Vec<Value>>,
    pub closed: Mutex<bool>,
}

impl RealtimeMockState {
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| e["type"].as_str().map(str::to_owned))
            .collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.event_types().iter().filter(|t| *t == event_type).count()
    }
}

/// Mock realtime endpoint on an ephemeral local port.
pub struct RealtimeMockServer {
    pub url: String,
    pub state: Arc<RealtimeMockState>,
    /// Audio chunk sent in reply to `response.create`
    pub reply_audio: String,
}

impl RealtimeMockServer {
    pub async fn start(reply_audio: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock realtime server");
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(RealtimeMockState::default());

        let server_state = state.clone();
        let audio = reply_audio.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = server_state.clone();
                let audio = audio.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state, audio).await;
                });
            }
        });

        Self {
            url: format!("ws://{addr}/v1/realtime"),
            state,
            reply_audio,
        }
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    state: Arc<RealtimeMockState>,
    reply_audio: String,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handshake_state = state.clone();
    let callback = move |request: &Request,
                          mut response: Response|
          -> Result<Response, ErrorResponse> {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        *handshake_state.authorization.lock() = header("authorization");
        *handshake_state.uri.lock() = Some(request.uri().to_string());
        let protocols = header("sec-websocket-protocol");
        if protocols.is_some() {
            // The client requires one of its offered protocols back.
            response
                .headers_mut()
                .insert("sec-websocket-protocol", HeaderValue::from_static("realtime"));
        }
        *handshake_state.subprotocols.lock() = protocols;
        Ok(response)
    };

    let ws_stream = accept_hdr_async(stream, callback).await?;
    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let event: Value = serde_json::from_str(text.as_str())?;
                let event_type = event["type"].as_str().unwrap_or_default().to_string();
                state.events.lock().push(event);

                match event_type.as_str() {
                    "session.update" => {
                        let created = json!({
                            "type": "session.created",
                            "session": {"id": "sess_mock", "model": "grok-3-fast-realtime"}
                        });
                        write.send(Message::Text(created.to_string().into())).await?;
                        let updated = json!({"type": "session.updated", "session": {"id": "sess_mock"}});
                        write.send(Message::Text(updated.to_string().into())).await?;
                    }
                    "response.create" => {
                        let delta = json!({
                            "type": "response.audio.delta",
                            "response_id": "resp_1",
                            "item_id": "item_1",
                            "delta": reply_audio
                        });
                        write.send(Message::Text(delta.to_string().into())).await?;
                        let done = json!({
                            "type": "response.audio_transcript.done",
                            "response_id": "resp_1",
                            "item_id": "item_1",
                            "transcript": "Hi! How can I help?"
                        });
                        write.send(Message::Text(done.to_string().into())).await?;
                    }
                    _ => {}
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    *state.closed.lock() = true;
    Ok(())
}
