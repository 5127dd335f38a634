// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Injected side-effect surface for the room machine.
//!
//! The machine is synchronous and deterministic; everything with a clock, a
//! socket, or a future behind it goes through this trait. The production
//! implementation is the tokio driver; tests use a recording double with a
//! virtual clock.

use std::time::Duration;

/// Side effects requested by the room machine.
///
/// Timer semantics: each kind has at most one armed instance. Scheduling
/// re-arms (cancelling any pending instance); clearing disarms. A timer that
/// is not armed is distinct from one armed for zero.
pub trait Effects {
    /// Current wall-clock time, epoch milliseconds.
    fn now_ms(&self) -> u64;

    /// Send one text frame on the socket. Dropped with a log when no socket
    /// is attached.
    fn send(&mut self, frame: String);

    /// Kick off the async auth flow. The result re-enters the machine via
    /// `authentication_success` / `authentication_failure`.
    fn authenticate(&mut self);

    /// Tear down the current socket, if any. No close event is synthesized;
    /// the machine has already transitioned.
    fn close_socket(&mut self);

    fn schedule_flush(&mut self, delay: Duration);
    fn clear_flush(&mut self);

    fn start_heartbeat(&mut self, interval: Duration);
    fn stop_heartbeat(&mut self);

    fn schedule_pong_timeout(&mut self, delay: Duration);
    fn clear_pong_timeout(&mut self);

    fn schedule_reconnect(&mut self, delay: Duration);
    fn clear_reconnect(&mut self);
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
