// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound message buffering and frame composition.

use tandem_protocol::{ClientMsg, Op, TARGET_ALL};

use crate::presence::PresenceBuffer;

/// Everything queued for the next flush.
#[derive(Debug, Default)]
pub struct OutBuffer {
    /// Pending own-presence update, coalesced between flushes.
    pub presence: Option<PresenceBuffer>,
    /// Queued client messages: targeted presence for joiners, broadcasts,
    /// storage fetches.
    pub messages: Vec<ClientMsg>,
    /// Storage ops produced by local mutations.
    pub storage_ops: Vec<Op>,
}

impl OutBuffer {
    pub fn is_empty(&self) -> bool {
        self.presence.is_none() && self.messages.is_empty() && self.storage_ops.is_empty()
    }

    /// Compose one outbound frame in wire order: presence update first, then
    /// queued messages, then a single `UpdateStorage` with the buffered ops.
    /// Zero-op storage messages are suppressed.
    pub fn compose(&self) -> Vec<ClientMsg> {
        let mut out = Vec::new();
        match &self.presence {
            Some(PresenceBuffer::Full(data)) => out.push(ClientMsg::UpdatePresence {
                data: data.clone(),
                target_actor: Some(TARGET_ALL),
            }),
            Some(PresenceBuffer::Partial(data)) => {
                out.push(ClientMsg::UpdatePresence { data: data.clone(), target_actor: None })
            }
            None => {}
        }
        out.extend(self.messages.iter().cloned());
        if !self.storage_ops.is_empty() {
            out.push(ClientMsg::UpdateStorage { ops: self.storage_ops.clone() });
        }
        out
    }

    /// Discard everything; called after a successful send.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
#[path = "flush_tests.rs"]
mod tests;
