// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end spec harness: an in-process room server stub speaking the
//! tandem wire protocol over axum WebSockets.
//!
//! The stub serves the public auth endpoint and one WebSocket room. Frames
//! from the client surface on a channel for assertions; tests inject server
//! frames (or a close) at will. `"ping"` is answered with `"pong"`
//! automatically.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// What a test can push down the socket.
enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

struct StubState {
    next_actor: AtomicU32,
    inbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: AsyncMutex<mpsc::UnboundedReceiver<Outbound>>,
}

/// In-process room server stub.
pub struct StubServer {
    addr: SocketAddr,
    inbound_rx: mpsc::UnboundedReceiver<String>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl StubServer {
    /// Bind on an ephemeral port and start serving.
    pub async fn start() -> anyhow::Result<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let state = Arc::new(StubState {
            next_actor: AtomicU32::new(1),
            inbound_tx,
            outbound_rx: AsyncMutex::new(outbound_rx),
        });

        let router = Router::new()
            .route("/auth", post(auth_handler))
            .route("/", get(ws_handler))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self { addr, inbound_rx, outbound_tx })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn auth_url(&self) -> String {
        format!("http://{}/auth", self.addr)
    }

    /// Next data frame from the client, JSON-parsed. Control frames are
    /// handled inside the stub and never surface here.
    pub async fn recv_json(&mut self) -> anyhow::Result<serde_json::Value> {
        let frame = tokio::time::timeout(RECV_TIMEOUT, self.inbound_rx.recv())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for a client frame"))?
            .ok_or_else(|| anyhow::anyhow!("stub connection ended"))?;
        Ok(serde_json::from_str(&frame)?)
    }

    /// Push a raw text frame to the client.
    pub fn send_text(&self, frame: impl Into<String>) {
        let _ = self.outbound_tx.send(Outbound::Text(frame.into()));
    }

    /// Push a server message to the client.
    pub fn send_msg(&self, msg: &tandem_protocol::ServerMsg) {
        self.send_text(msg.to_value().to_string());
    }

    /// Close the socket with the given code.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.outbound_tx.send(Outbound::Close { code, reason: reason.into() });
    }
}

/// `POST /auth` — public auth endpoint: mints an unsigned JWT with a fresh
/// actor id.
async fn auth_handler(State(state): State<Arc<StubState>>) -> Json<serde_json::Value> {
    let actor = state.next_actor.fetch_add(1, Ordering::Relaxed);
    let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = b64.encode(br#"{"alg":"none"}"#);
    let claims = serde_json::json!({ "actor": actor, "exp": 4_000_000_000u64 });
    let payload = b64.encode(claims.to_string().as_bytes());
    Json(serde_json::json!({ "token": format!("{header}.{payload}.stub") }))
}

async fn ws_handler(
    State(state): State<Arc<StubState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<StubState>) {
    let mut outbound = state.outbound_rx.lock().await;
    loop {
        tokio::select! {
            cmd = outbound.recv() => {
                match cmd {
                    Some(Outbound::Text(text)) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let _ = socket
                            .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
                            .await;
                        break;
                    }
                    None => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text == "ping" {
                            if socket.send(Message::Text("pong".into())).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        let _ = state.inbound_tx.send(text.to_string());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}
