// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire format for the tandem room protocol.
//!
//! Frames are text. The literal strings `"ping"` and `"pong"` are control
//! frames; every other frame is JSON — either a single message object or an
//! array batch. Messages are discriminated by an integer `type` code, so the
//! codecs here are explicit `to_value`/`from_value` conversions rather than
//! serde-derived tagged enums.

pub mod msg;
pub mod node;
pub mod op;

pub use msg::{decode_frame, encode_frame, ClientMsg, InboundFrame, RoomStateUser, ServerMsg};
pub use node::{JsonObject, SerializedNode};
pub use op::Op;

/// Close code for a terminal close: the client must not retry.
pub const CLOSE_WITHOUT_RETRY: u16 = 4999;

/// Whether a close code is a server-semantic failure (surfaced to error
/// listeners, retried on the slow backoff schedule).
pub fn is_server_error_code(code: u16) -> bool {
    (4000..=4100).contains(&code)
}

/// Presence `targetActor` sentinel for a full-presence broadcast.
pub const TARGET_ALL: i64 = -1;
