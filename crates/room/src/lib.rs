// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tandem: client-side room state machine for real-time collaboration.
//!
//! A room is a shared workspace whose participants exchange presence
//! (ephemeral, per-connection) and storage (a durable CRDT document) over
//! one WebSocket. The [`room::Room`] machine is synchronous and fully
//! deterministic; the [`driver`] wraps it in a tokio transport with real
//! timers, auth fetches, and a reconnect-capable socket.

pub mod auth;
pub mod config;
pub mod connection;
pub mod crdt;
pub mod driver;
pub mod effects;
pub mod error;
pub mod flush;
pub mod history;
pub mod presence;
pub mod room;
pub mod storage;
pub mod subscription;

pub use config::RoomConfig;
pub use connection::ConnectionStatus;
pub use driver::{open_room, RoomHandle};
pub use error::RoomError;
pub use room::Room;

pub mod test_support;
