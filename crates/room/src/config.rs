// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tandem_protocol::JsonObject;

use crate::auth::AuthEndpoint;

/// Configuration for one room connection.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// WebSocket base URL of the room server (e.g. `wss://rooms.example.com`).
    pub server_url: String,

    /// Room identifier; one machine per room.
    pub room_id: String,

    /// Token source.
    pub auth: AuthEndpoint,

    /// Outbound flush throttle in milliseconds.
    pub throttle_ms: u64,

    /// Heartbeat interval in milliseconds.
    pub heartbeat_ms: u64,

    /// Pong timeout in milliseconds.
    pub pong_timeout_ms: u64,

    /// Presence announced when joining.
    pub initial_presence: JsonObject,

    /// Default storage shape: keys set on the root if absent after the
    /// first storage load. This is how a brand-new room is populated.
    pub initial_storage: JsonObject,
}

impl RoomConfig {
    pub fn new(server_url: impl Into<String>, room_id: impl Into<String>, auth: AuthEndpoint) -> Self {
        Self {
            server_url: server_url.into(),
            room_id: room_id.into(),
            auth,
            throttle_ms: 100,
            heartbeat_ms: 30_000,
            pong_timeout_ms: 2_000,
            initial_presence: JsonObject::new(),
            initial_storage: JsonObject::new(),
        }
    }

    pub fn throttle(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.throttle_ms)
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.heartbeat_ms)
    }

    pub fn pong_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.pong_timeout_ms)
    }
}
