// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors surfaced by the room machine.
///
/// Transport and auth failures are recovered internally with backoff and
/// never reach the caller as a `RoomError`; what does reach the caller is
/// either a server-semantic rejection (`Protocol`) delivered on the error
/// channel, or immediate API misuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomError {
    /// Auth endpoint returned non-2xx, non-JSON, or a malformed token.
    Authentication { message: String },
    /// Server-indicated close in the 4000..=4100 range.
    Protocol { code: u16, reason: String },
    /// `batch` called while a batch is already open.
    NestedBatch,
    /// `undo`/`redo` called inside a batch.
    HistoryInBatch,
    /// An operation that requires a live connection ran without one.
    NotConnected,
    /// A local mutation targeted a node id absent from the tree.
    UnknownNode { id: String },
    /// `INITIAL_STORAGE_STATE` arrived with no items.
    EmptyStorageItems,
}

impl RoomError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "AUTHENTICATION",
            Self::Protocol { .. } => "PROTOCOL",
            Self::NestedBatch => "NESTED_BATCH",
            Self::HistoryInBatch => "HISTORY_IN_BATCH",
            Self::NotConnected => "NOT_CONNECTED",
            Self::UnknownNode { .. } => "UNKNOWN_NODE",
            Self::EmptyStorageItems => "EMPTY_STORAGE_ITEMS",
        }
    }
}

impl fmt::Display for RoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication { message } => write!(f, "authentication failed: {message}"),
            Self::Protocol { code, reason } => write!(f, "server closed ({code}): {reason}"),
            Self::NestedBatch => f.write_str("batches cannot be nested"),
            Self::HistoryInBatch => f.write_str("undo/redo is not available inside a batch"),
            Self::NotConnected => f.write_str("no active connection"),
            Self::UnknownNode { id } => write!(f, "unknown node: {id}"),
            Self::EmptyStorageItems => f.write_str("initial storage state carried no items"),
        }
    }
}

impl std::error::Error for RoomError {}
