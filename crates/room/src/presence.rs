// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Presence: own ephemeral state, the outbound presence buffer, and the
//! map of everyone else in the room.
//!
//! A peer's first presence arrives either as a targeted full update or as
//! part of joining. Until it does, non-targeted diffs for that peer are
//! dropped — a diff against nothing is invalid.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tandem_protocol::{JsonObject, RoomStateUser};

/// Merge a presence patch into a target object. A `null` value deletes the
/// key.
pub fn merge_presence(target: &mut JsonObject, patch: &JsonObject) {
    for (key, value) in patch {
        if value.is_null() {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Patch that restores `current`'s values for every key `patch` touches.
/// Keys absent from `current` reverse to `null` (delete).
pub fn reverse_patch(current: &JsonObject, patch: &JsonObject) -> JsonObject {
    patch.keys().map(|k| (k.clone(), current.get(k).cloned().unwrap_or(Value::Null))).collect()
}

// -- Presence buffer ----------------------------------------------------------

/// Pending outbound presence. A full buffer declares "my entire presence is
/// this"; a partial buffer carries only changed keys.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceBuffer {
    Partial(JsonObject),
    Full(JsonObject),
}

impl PresenceBuffer {
    /// Coalesce `update` into the pending buffer. A pending full absorbs
    /// partials without changing kind; a pending partial absorbs keys from
    /// both partials and fulls and stays partial; an empty buffer adopts the
    /// update's kind.
    pub fn merge(buffer: &mut Option<PresenceBuffer>, update: PresenceBuffer) {
        match (buffer.as_mut(), update) {
            (None, update) => *buffer = Some(update),
            (Some(Self::Full(data)), Self::Full(full)) => *data = full,
            (Some(Self::Full(data) | Self::Partial(data)), Self::Partial(patch))
            | (Some(Self::Partial(data)), Self::Full(patch)) => {
                for (key, value) in patch {
                    data.insert(key, value);
                }
            }
        }
    }
}

// -- Others -------------------------------------------------------------------

/// Per-peer record as tracked internally.
#[derive(Debug, Clone, PartialEq)]
pub struct UserEntry {
    pub connection_id: u32,
    pub id: Option<String>,
    pub info: Option<Value>,
    pub presence: Option<JsonObject>,
    pub has_received_initial_presence: bool,
}

/// Peer view exposed to subscribers; omits the gating flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OtherUser {
    pub connection_id: u32,
    pub id: Option<String>,
    pub info: Option<Value>,
    pub presence: Option<JsonObject>,
}

/// What changed in the others map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OthersEvent {
    Enter { actor: u32 },
    Leave { actor: u32 },
    Update { actor: u32 },
    Reset,
}

/// Everyone else in the room, keyed by actor id.
#[derive(Debug, Default)]
pub struct OthersState {
    users: BTreeMap<u32, UserEntry>,
}

impl OthersState {
    /// Handle `USER_JOINED`. The newcomer's presence arrives separately (its
    /// own full broadcast, or our targeted reply), so diffs stay gated until
    /// a targeted update lands.
    pub fn join(&mut self, actor: u32, id: Option<String>, info: Option<Value>) {
        self.users.insert(
            actor,
            UserEntry {
                connection_id: actor,
                id,
                info,
                presence: None,
                has_received_initial_presence: false,
            },
        );
    }

    /// Handle `UPDATE_PRESENCE`. Returns false when the message must be
    /// dropped (a non-targeted diff before any initial presence).
    pub fn apply_update(&mut self, actor: u32, data: &JsonObject, targeted: bool) -> bool {
        match self.users.get_mut(&actor) {
            None => {
                self.users.insert(
                    actor,
                    UserEntry {
                        connection_id: actor,
                        id: None,
                        info: None,
                        presence: Some(data.clone()),
                        has_received_initial_presence: true,
                    },
                );
                true
            }
            Some(entry) => {
                if !entry.has_received_initial_presence && !targeted {
                    return false;
                }
                merge_presence(entry.presence.get_or_insert_with(JsonObject::new), data);
                if targeted {
                    entry.has_received_initial_presence = true;
                }
                true
            }
        }
    }

    /// Handle `USER_LEFT`. Returns false when the actor was unknown.
    pub fn leave(&mut self, actor: u32) -> bool {
        self.users.remove(&actor).is_some()
    }

    /// Handle `ROOM_STATE`: replace the map wholesale. Presence for the
    /// seeded peers has not arrived yet.
    pub fn reset(&mut self, seed: &BTreeMap<u32, RoomStateUser>) {
        self.users = seed
            .iter()
            .map(|(&actor, user)| {
                (
                    actor,
                    UserEntry {
                        connection_id: actor,
                        id: user.id.clone(),
                        info: user.info.clone(),
                        presence: None,
                        has_received_initial_presence: false,
                    },
                )
            })
            .collect();
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn count(&self) -> usize {
        self.users.len()
    }

    /// Immutable view for subscribers, in actor order.
    pub fn view(&self) -> Vec<OtherUser> {
        self.users
            .values()
            .map(|entry| OtherUser {
                connection_id: entry.connection_id,
                id: entry.id.clone(),
                info: entry.info.clone(),
                presence: entry.presence.clone(),
            })
            .collect()
    }

    pub fn get(&self, actor: u32) -> Option<&UserEntry> {
        self.users.get(&actor)
    }
}

#[cfg(test)]
#[path = "presence_tests.rs"]
mod tests;
