// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tokio transport shell around the synchronous room machine.
//!
//! One background task owns the socket and drives the machine: it performs
//! auth fetches, opens connections, pumps frames, and fires timers. All
//! machine access is serialized behind a mutex held only across synchronous
//! calls — never across an await — so the machine's single-threaded
//! execution model holds.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tandem_protocol::JsonObject;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthClient;
use crate::config::RoomConfig;
use crate::connection::ConnectionStatus;
use crate::crdt::StorageUpdate;
use crate::effects::{epoch_ms, Effects};
use crate::error::RoomError;
use crate::presence::OtherUser;
use crate::room::Room;
use crate::subscription::{CustomEvent, HistoryNotification, OthersNotification};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Heartbeat,
    PongTimeout,
    Flush,
    Reconnect,
}

enum DriverEvent {
    Authenticate,
    CloseSocket,
    Timer(TimerKind),
    SocketText { conn_gen: u64, text: String },
    SocketClosed { conn_gen: u64, code: u16, reason: String },
}

/// Production [`Effects`]: timers are cancellable sleep tasks, sends go to
/// the current connection's write pump, auth and teardown are delegated to
/// the driver loop.
struct TokioEffects {
    events: mpsc::UnboundedSender<DriverEvent>,
    out: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
    root: CancellationToken,
    heartbeat: Option<CancellationToken>,
    pong: Option<CancellationToken>,
    flush: Option<CancellationToken>,
    reconnect: Option<CancellationToken>,
}

impl TokioEffects {
    fn spawn_timeout(&self, kind: TimerKind, delay: Duration) -> CancellationToken {
        let token = self.root.child_token();
        let events = self.events.clone();
        let guard = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = guard.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = events.send(DriverEvent::Timer(kind));
                }
            }
        });
        token
    }

    fn cancel(slot: &mut Option<CancellationToken>) {
        if let Some(token) = slot.take() {
            token.cancel();
        }
    }
}

impl Effects for TokioEffects {
    fn now_ms(&self) -> u64 {
        epoch_ms()
    }

    fn send(&mut self, frame: String) {
        match self.out.lock().as_ref() {
            Some(tx) => {
                let _ = tx.send(Message::Text(frame.into()));
            }
            None => tracing::debug!("dropping outbound frame without a socket"),
        }
    }

    fn authenticate(&mut self) {
        let _ = self.events.send(DriverEvent::Authenticate);
    }

    fn close_socket(&mut self) {
        let _ = self.events.send(DriverEvent::CloseSocket);
    }

    fn schedule_flush(&mut self, delay: Duration) {
        Self::cancel(&mut self.flush);
        self.flush = Some(self.spawn_timeout(TimerKind::Flush, delay));
    }

    fn clear_flush(&mut self) {
        Self::cancel(&mut self.flush);
    }

    fn start_heartbeat(&mut self, interval: Duration) {
        Self::cancel(&mut self.heartbeat);
        let token = self.root.child_token();
        let events = self.events.clone();
        let guard = token.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            timer.tick().await; // first tick is immediate
            loop {
                tokio::select! {
                    _ = guard.cancelled() => break,
                    _ = timer.tick() => {
                        if events.send(DriverEvent::Timer(TimerKind::Heartbeat)).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        self.heartbeat = Some(token);
    }

    fn stop_heartbeat(&mut self) {
        Self::cancel(&mut self.heartbeat);
    }

    fn schedule_pong_timeout(&mut self, delay: Duration) {
        Self::cancel(&mut self.pong);
        self.pong = Some(self.spawn_timeout(TimerKind::PongTimeout, delay));
    }

    fn clear_pong_timeout(&mut self) {
        Self::cancel(&mut self.pong);
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        Self::cancel(&mut self.reconnect);
        self.reconnect = Some(self.spawn_timeout(TimerKind::Reconnect, delay));
    }

    fn clear_reconnect(&mut self) {
        Self::cancel(&mut self.reconnect);
    }
}

/// Handle to a running room. Clones share the same machine.
#[derive(Clone)]
pub struct RoomHandle {
    room: Arc<Mutex<Room>>,
    cancel: CancellationToken,
}

/// Build the machine and spawn its driver. The room starts disconnected;
/// call [`RoomHandle::connect`].
pub fn open_room(config: RoomConfig) -> RoomHandle {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let out: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>> = Arc::new(Mutex::new(None));
    let cancel = CancellationToken::new();

    let effects = TokioEffects {
        events: events_tx.clone(),
        out: Arc::clone(&out),
        root: cancel.clone(),
        heartbeat: None,
        pong: None,
        flush: None,
        reconnect: None,
    };
    let room = Arc::new(Mutex::new(Room::new(config.clone(), Box::new(effects))));

    tokio::spawn(run_loop(
        Arc::clone(&room),
        config,
        events_tx,
        events_rx,
        out,
        cancel.clone(),
    ));

    RoomHandle { room, cancel }
}

impl RoomHandle {
    /// Run a closure against the machine. The lock is held only for the
    /// closure's synchronous duration.
    pub fn with<T>(&self, f: impl FnOnce(&mut Room) -> T) -> T {
        let mut room = self.room.lock();
        f(&mut room)
    }

    pub fn connect(&self) {
        self.with(Room::connect);
    }

    pub fn disconnect(&self) {
        self.with(Room::disconnect);
    }

    /// Disconnect and stop the driver task for good.
    pub fn shutdown(&self) {
        self.disconnect();
        self.cancel.cancel();
    }

    pub fn status(&self) -> ConnectionStatus {
        self.with(|room| room.status())
    }

    pub fn me(&self) -> JsonObject {
        self.with(|room| room.me().clone())
    }

    pub fn others(&self) -> Vec<OtherUser> {
        self.with(|room| room.others())
    }

    pub fn update_presence(&self, patch: JsonObject, add_to_history: bool) {
        self.with(|room| room.update_presence(patch, add_to_history));
    }

    pub fn broadcast_event(&self, event: Value) {
        self.with(|room| room.broadcast_event(event));
    }

    pub fn batch<T>(&self, f: impl FnOnce(&mut Room) -> T) -> Result<T, RoomError> {
        self.with(|room| room.batch(f))
    }

    pub fn undo(&self) -> Result<(), RoomError> {
        self.with(Room::undo)
    }

    pub fn redo(&self) -> Result<(), RoomError> {
        self.with(Room::redo)
    }

    pub fn can_undo(&self) -> bool {
        self.with(|room| room.can_undo())
    }

    pub fn can_redo(&self) -> bool {
        self.with(|room| room.can_redo())
    }

    pub fn pause_history(&self) {
        self.with(Room::pause_history);
    }

    pub fn resume_history(&self) {
        self.with(Room::resume_history);
    }

    /// Await the storage document, requesting it if needed, and return its
    /// JSON snapshot. Resolves immediately once loaded.
    pub async fn storage(&self) -> anyhow::Result<Value> {
        let mut loaded = self.with(|room| {
            room.request_storage();
            room.storage_loaded()
        });
        loaded
            .wait_for(|loaded| *loaded)
            .await
            .map_err(|_| anyhow::anyhow!("room shut down before storage loaded"))?;
        self.with(|room| room.storage_snapshot())
            .ok_or_else(|| anyhow::anyhow!("storage unavailable after load"))
    }

    pub fn storage_snapshot(&self) -> Option<Value> {
        self.with(|room| room.storage_snapshot())
    }

    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.with(|room| room.subscribe_connection())
    }

    pub fn subscribe_my_presence(&self) -> broadcast::Receiver<JsonObject> {
        self.with(|room| room.subscribe_my_presence())
    }

    pub fn subscribe_others(&self) -> broadcast::Receiver<OthersNotification> {
        self.with(|room| room.subscribe_others())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CustomEvent> {
        self.with(|room| room.subscribe_events())
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<RoomError> {
        self.with(|room| room.subscribe_errors())
    }

    pub fn subscribe_storage(&self) -> broadcast::Receiver<Vec<StorageUpdate>> {
        self.with(|room| room.subscribe_storage())
    }

    pub fn subscribe_history(&self) -> broadcast::Receiver<HistoryNotification> {
        self.with(|room| room.subscribe_history())
    }

    pub fn storage_loaded(&self) -> watch::Receiver<bool> {
        self.with(|room| room.storage_loaded())
    }
}

// -- Driver loop --------------------------------------------------------------

async fn run_loop(
    room: Arc<Mutex<Room>>,
    config: RoomConfig,
    events_tx: mpsc::UnboundedSender<DriverEvent>,
    mut events_rx: mpsc::UnboundedReceiver<DriverEvent>,
    out: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
    cancel: CancellationToken,
) {
    let mut auth = AuthClient::new(config.auth.clone());
    let mut socket_cancel: Option<CancellationToken> = None;
    // Connection generation: events from pumps of a torn-down socket are
    // stale and must not reach the machine.
    let mut conn_gen: u64 = 0;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            DriverEvent::Authenticate => {
                match auth.fetch(&config.room_id).await {
                    Ok(token) => {
                        room.lock().authentication_success(&token);
                        conn_gen += 1;
                        match open_socket(
                            &config,
                            &token.raw,
                            conn_gen,
                            &events_tx,
                            &out,
                            &cancel,
                        )
                        .await
                        {
                            Ok(token_cancel) => {
                                socket_cancel = Some(token_cancel);
                                room.lock().socket_open();
                            }
                            Err(e) => {
                                tracing::debug!(err = %e, "socket connect failed");
                                room.lock().socket_close(1006, "connect failed");
                            }
                        }
                    }
                    Err(e) => room.lock().authentication_failure(&format!("{e:#}")),
                }
            }
            DriverEvent::CloseSocket => {
                conn_gen += 1;
                if let Some(token) = socket_cancel.take() {
                    token.cancel();
                }
                *out.lock() = None;
            }
            DriverEvent::SocketText { conn_gen: event_gen, text } => {
                if event_gen == conn_gen {
                    room.lock().socket_message(&text);
                }
            }
            DriverEvent::SocketClosed { conn_gen: event_gen, code, reason } => {
                if event_gen != conn_gen {
                    continue;
                }
                conn_gen += 1;
                if let Some(token) = socket_cancel.take() {
                    token.cancel();
                }
                *out.lock() = None;
                room.lock().socket_close(code, &reason);
            }
            DriverEvent::Timer(kind) => {
                let mut room = room.lock();
                match kind {
                    TimerKind::Heartbeat => room.heartbeat_tick(),
                    TimerKind::PongTimeout => room.pong_timeout(),
                    TimerKind::Flush => room.flush_due(),
                    TimerKind::Reconnect => room.reconnect_due(),
                }
            }
        }
    }

    if let Some(token) = socket_cancel {
        token.cancel();
    }
}

/// Open the socket and spawn its read/write pump. Returns the pump's
/// cancellation token.
async fn open_socket(
    config: &RoomConfig,
    token: &str,
    conn_gen: u64,
    events: &mpsc::UnboundedSender<DriverEvent>,
    out: &Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
    cancel: &CancellationToken,
) -> anyhow::Result<CancellationToken> {
    let url = format!(
        "{}/?token={token}&version={}",
        config.server_url.trim_end_matches('/'),
        env!("CARGO_PKG_VERSION"),
    );
    let (stream, _) = tokio_tungstenite::connect_async(&url).await?;
    let (mut write, mut read) = stream.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    *out.lock() = Some(out_tx);

    let pump_cancel = cancel.child_token();
    let guard = pump_cancel.clone();
    let events = events.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = guard.cancelled() => break,

                // Machine -> socket
                msg = out_rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if write.send(msg).await.is_err() {
                                let _ = events.send(DriverEvent::SocketClosed {
                                    conn_gen,
                                    code: 1006,
                                    reason: "write failed".to_owned(),
                                });
                                break;
                            }
                        }
                        None => break,
                    }
                }

                // Socket -> machine
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let _ = events.send(DriverEvent::SocketText {
                                conn_gen,
                                text: text.to_string(),
                            });
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = match frame {
                                Some(frame) => {
                                    (u16::from(frame.code), frame.reason.to_string())
                                }
                                None => (1005, String::new()),
                            };
                            let _ = events.send(DriverEvent::SocketClosed { conn_gen, code, reason });
                            break;
                        }
                        Some(Ok(_)) => {} // binary/ping/pong frames ignored
                        Some(Err(e)) => {
                            let _ = events.send(DriverEvent::SocketClosed {
                                conn_gen,
                                code: 1006,
                                reason: e.to_string(),
                            });
                            break;
                        }
                        None => {
                            let _ = events.send(DriverEvent::SocketClosed {
                                conn_gen,
                                code: 1006,
                                reason: "stream ended".to_owned(),
                            });
                            break;
                        }
                    }
                }
            }
        }
    });

    Ok(pump_cancel)
}
