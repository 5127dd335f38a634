// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded undo/redo stacks with pause/resume folding.
//!
//! Every entry is a list of reverse items; replaying an entry in order
//! undoes the forward mutation it was recorded for. New reverse items are
//! therefore always prepended, both inside entries and into the paused
//! accumulator.

use tandem_protocol::{JsonObject, Op};

/// Maximum undo depth; the oldest entry is shifted out on overflow.
pub const MAX_UNDO_DEPTH: usize = 50;

/// One item of a history entry: a storage op or a partial presence patch.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryItem {
    Op(Op),
    Presence(JsonObject),
}

pub type HistoryEntry = Vec<HistoryItem>;

#[derive(Debug, Default)]
pub struct History {
    undo: Vec<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    paused: Option<Vec<HistoryItem>>,
}

impl History {
    /// Record a reverse entry. While paused, items fold into the pending
    /// accumulator instead of forming their own entry.
    pub fn record(&mut self, entry: HistoryEntry) {
        if entry.is_empty() {
            return;
        }
        match &mut self.paused {
            Some(pending) => {
                pending.splice(0..0, entry);
            }
            None => self.push_undo(entry),
        }
    }

    /// Redirect subsequent records into a single pending entry. A second
    /// pause while already paused is a no-op.
    pub fn pause(&mut self) {
        if self.paused.is_none() {
            self.paused = Some(Vec::new());
        }
    }

    /// Flush the paused accumulator as one undo entry. Returns whether the
    /// stacks changed.
    pub fn resume(&mut self) -> bool {
        match self.paused.take() {
            Some(pending) if !pending.is_empty() => {
                self.push_undo(pending);
                true
            }
            _ => false,
        }
    }

    pub fn push_undo(&mut self, entry: HistoryEntry) {
        if entry.is_empty() {
            return;
        }
        self.undo.push(entry);
        if self.undo.len() > MAX_UNDO_DEPTH {
            self.undo.remove(0);
        }
    }

    pub fn push_redo(&mut self, entry: HistoryEntry) {
        if !entry.is_empty() {
            self.redo.push(entry);
        }
    }

    pub fn pop_undo(&mut self) -> Option<HistoryEntry> {
        self.undo.pop()
    }

    pub fn pop_redo(&mut self) -> Option<HistoryEntry> {
        self.redo.pop()
    }

    /// Empty the redo stack. Returns whether it held anything.
    pub fn clear_redo(&mut self) -> bool {
        let had = !self.redo.is_empty();
        self.redo.clear();
        had
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }
}

#[cfg(test)]
#[path = "history_tests.rs"]
mod tests;
