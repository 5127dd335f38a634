// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: recording effects with a virtual clock,
//! room builders, and frame helpers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tandem_protocol::{JsonObject, ServerMsg};

use crate::auth::{AuthEndpoint, AuthToken};
use crate::config::RoomConfig;
use crate::effects::Effects;
use crate::room::Room;

/// Everything the machine asked the effects surface to do.
#[derive(Debug)]
pub struct Recorded {
    /// Virtual clock, epoch millis.
    pub now_ms: u64,
    /// Outbound frames in send order, including `"ping"` control frames.
    pub sent: Vec<String>,
    pub auth_requests: u32,
    pub socket_closes: u32,
    pub flush_delay: Option<Duration>,
    pub heartbeat_interval: Option<Duration>,
    pub pong_timeout: Option<Duration>,
    pub reconnect_delay: Option<Duration>,
}

impl Default for Recorded {
    fn default() -> Self {
        Self {
            // Far from zero so the first flush window is already open, as
            // it is with a wall clock.
            now_ms: 1_000_000,
            sent: Vec::new(),
            auth_requests: 0,
            socket_closes: 0,
            flush_delay: None,
            heartbeat_interval: None,
            pong_timeout: None,
            reconnect_delay: None,
        }
    }
}

/// Shared view into a [`RecordingEffects`], kept by the test after the
/// effects box moves into the room.
#[derive(Clone, Default)]
pub struct EffectsHandle(Arc<Mutex<Recorded>>);

impl EffectsHandle {
    pub fn advance(&self, ms: u64) {
        self.0.lock().now_ms += ms;
    }

    pub fn now_ms(&self) -> u64 {
        self.0.lock().now_ms
    }

    pub fn sent(&self) -> Vec<String> {
        self.0.lock().sent.clone()
    }

    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut self.0.lock().sent)
    }

    /// Sent JSON frames, parsed; control frames are skipped.
    pub fn sent_json(&self) -> Vec<Value> {
        self.0
            .lock()
            .sent
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    pub fn snapshot<T>(&self, f: impl FnOnce(&Recorded) -> T) -> T {
        f(&self.0.lock())
    }
}

/// Recording [`Effects`] implementation with a virtual clock. Timers are
/// recorded, never fired; tests drive the machine's timer entry points
/// directly.
pub struct RecordingEffects(EffectsHandle);

impl Effects for RecordingEffects {
    fn now_ms(&self) -> u64 {
        self.0 .0.lock().now_ms
    }

    fn send(&mut self, frame: String) {
        self.0 .0.lock().sent.push(frame);
    }

    fn authenticate(&mut self) {
        self.0 .0.lock().auth_requests += 1;
    }

    fn close_socket(&mut self) {
        self.0 .0.lock().socket_closes += 1;
    }

    fn schedule_flush(&mut self, delay: Duration) {
        self.0 .0.lock().flush_delay = Some(delay);
    }

    fn clear_flush(&mut self) {
        self.0 .0.lock().flush_delay = None;
    }

    fn start_heartbeat(&mut self, interval: Duration) {
        self.0 .0.lock().heartbeat_interval = Some(interval);
    }

    fn stop_heartbeat(&mut self) {
        self.0 .0.lock().heartbeat_interval = None;
    }

    fn schedule_pong_timeout(&mut self, delay: Duration) {
        self.0 .0.lock().pong_timeout = Some(delay);
    }

    fn clear_pong_timeout(&mut self) {
        self.0 .0.lock().pong_timeout = None;
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        self.0 .0.lock().reconnect_delay = Some(delay);
    }

    fn clear_reconnect(&mut self) {
        self.0 .0.lock().reconnect_delay = None;
    }
}

pub fn recording_effects() -> (Box<RecordingEffects>, EffectsHandle) {
    let handle = EffectsHandle::default();
    (Box::new(RecordingEffects(handle.clone())), handle)
}

pub fn test_config() -> RoomConfig {
    RoomConfig::new(
        "ws://127.0.0.1:9810",
        "room:test",
        AuthEndpoint::Private { url: "http://127.0.0.1:9810/auth".to_owned() },
    )
}

/// Token as the machine sees it after a successful auth fetch.
pub fn test_token(actor: u32) -> AuthToken {
    AuthToken { raw: format!("token-{actor}"), actor, id: None, info: None, expires_at: u64::MAX }
}

/// Room with recorded effects, driven through a complete cold connect.
pub fn connected_room(actor: u32) -> (Room, EffectsHandle) {
    let (effects, handle) = recording_effects();
    let mut room = Room::new(test_config(), effects);
    room.connect();
    room.authentication_success(&test_token(actor));
    room.socket_open();
    (room, handle)
}

/// Same, but with specific initial presence.
pub fn connected_room_with_presence(actor: u32, initial: JsonObject) -> (Room, EffectsHandle) {
    let (effects, handle) = recording_effects();
    let mut config = test_config();
    config.initial_presence = initial;
    let mut room = Room::new(config, effects);
    room.connect();
    room.authentication_success(&test_token(actor));
    room.socket_open();
    (room, handle)
}

pub fn obj(pairs: &[(&str, Value)]) -> JsonObject {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}

/// Encode a server message as an inbound text frame.
pub fn server_frame(msg: &ServerMsg) -> String {
    msg.to_value().to_string()
}

/// Drain everything currently queued on a broadcast receiver.
pub fn drain<T: Clone>(rx: &mut tokio::sync::broadcast::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}
