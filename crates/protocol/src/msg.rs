// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client and server messages, and the text-frame codec.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::{self, JsonObject, SerializedNode};
use crate::op::{self, Op};

/// Client → server message codes.
mod client_code {
    pub const UPDATE_PRESENCE: u64 = 100;
    pub const BROADCAST_EVENT: u64 = 103;
    pub const FETCH_STORAGE: u64 = 200;
    pub const UPDATE_STORAGE: u64 = 201;
}

/// Server → client message codes.
mod server_code {
    pub const UPDATE_PRESENCE: u64 = 100;
    pub const USER_JOINED: u64 = 101;
    pub const USER_LEFT: u64 = 102;
    pub const BROADCASTED_EVENT: u64 = 103;
    pub const ROOM_STATE: u64 = 104;
    pub const INITIAL_STORAGE_STATE: u64 = 200;
    pub const UPDATE_STORAGE: u64 = 201;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMsg {
    /// `target_actor`: `Some(-1)` full-presence broadcast, `None` partial
    /// update, `Some(actor)` targeted full presence (sent to a newcomer).
    UpdatePresence { data: JsonObject, target_actor: Option<i64> },
    BroadcastEvent { event: Value },
    FetchStorage,
    UpdateStorage { ops: Vec<Op> },
}

impl ClientMsg {
    pub fn to_value(&self) -> Value {
        let mut obj = JsonObject::new();
        match self {
            Self::UpdatePresence { data, target_actor } => {
                obj.insert("type".to_owned(), Value::from(client_code::UPDATE_PRESENCE));
                obj.insert("data".to_owned(), Value::Object(data.clone()));
                if let Some(target) = target_actor {
                    obj.insert("targetActor".to_owned(), Value::from(*target));
                }
            }
            Self::BroadcastEvent { event } => {
                obj.insert("type".to_owned(), Value::from(client_code::BROADCAST_EVENT));
                obj.insert("event".to_owned(), event.clone());
            }
            Self::FetchStorage => {
                obj.insert("type".to_owned(), Value::from(client_code::FETCH_STORAGE));
            }
            Self::UpdateStorage { ops } => {
                obj.insert("type".to_owned(), Value::from(client_code::UPDATE_STORAGE));
                obj.insert("ops".to_owned(), op::ops_to_value(ops));
            }
        }
        Value::Object(obj)
    }

    pub fn from_value(v: &Value) -> Option<Self> {
        match v.get("type").and_then(Value::as_u64)? {
            client_code::UPDATE_PRESENCE => Some(Self::UpdatePresence {
                data: v.get("data").and_then(Value::as_object).cloned().unwrap_or_default(),
                target_actor: v.get("targetActor").and_then(Value::as_i64),
            }),
            client_code::BROADCAST_EVENT => {
                Some(Self::BroadcastEvent { event: v.get("event").cloned().unwrap_or(Value::Null) })
            }
            client_code::FETCH_STORAGE => Some(Self::FetchStorage),
            client_code::UPDATE_STORAGE => Some(Self::UpdateStorage {
                ops: op::ops_from_value(v.get("ops").unwrap_or(&Value::Null)),
            }),
            _ => None,
        }
    }
}

/// Seed entry of a `ROOM_STATE` users map: identity only, no presence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoomStateUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMsg {
    UpdatePresence { actor: u32, data: JsonObject, target_actor: Option<i64> },
    UserJoined { actor: u32, id: Option<String>, info: Option<Value> },
    UserLeft { actor: u32 },
    BroadcastedEvent { actor: u32, event: Value },
    RoomState { users: BTreeMap<u32, RoomStateUser> },
    InitialStorageState { items: Vec<(String, SerializedNode)> },
    UpdateStorage { ops: Vec<Op> },
}

impl ServerMsg {
    pub fn to_value(&self) -> Value {
        let mut obj = JsonObject::new();
        match self {
            Self::UpdatePresence { actor, data, target_actor } => {
                obj.insert("type".to_owned(), Value::from(server_code::UPDATE_PRESENCE));
                obj.insert("actor".to_owned(), Value::from(*actor));
                obj.insert("data".to_owned(), Value::Object(data.clone()));
                if let Some(target) = target_actor {
                    obj.insert("targetActor".to_owned(), Value::from(*target));
                }
            }
            Self::UserJoined { actor, id, info } => {
                obj.insert("type".to_owned(), Value::from(server_code::USER_JOINED));
                obj.insert("actor".to_owned(), Value::from(*actor));
                if let Some(id) = id {
                    obj.insert("id".to_owned(), Value::String(id.clone()));
                }
                if let Some(info) = info {
                    obj.insert("info".to_owned(), info.clone());
                }
            }
            Self::UserLeft { actor } => {
                obj.insert("type".to_owned(), Value::from(server_code::USER_LEFT));
                obj.insert("actor".to_owned(), Value::from(*actor));
            }
            Self::BroadcastedEvent { actor, event } => {
                obj.insert("type".to_owned(), Value::from(server_code::BROADCASTED_EVENT));
                obj.insert("actor".to_owned(), Value::from(*actor));
                obj.insert("event".to_owned(), event.clone());
            }
            Self::RoomState { users } => {
                obj.insert("type".to_owned(), Value::from(server_code::ROOM_STATE));
                let mut map = JsonObject::new();
                for (actor, user) in users {
                    let mut entry = JsonObject::new();
                    if let Some(id) = &user.id {
                        entry.insert("id".to_owned(), Value::String(id.clone()));
                    }
                    if let Some(info) = &user.info {
                        entry.insert("info".to_owned(), info.clone());
                    }
                    map.insert(actor.to_string(), Value::Object(entry));
                }
                obj.insert("users".to_owned(), Value::Object(map));
            }
            Self::InitialStorageState { items } => {
                obj.insert("type".to_owned(), Value::from(server_code::INITIAL_STORAGE_STATE));
                obj.insert("items".to_owned(), node::items_to_value(items));
            }
            Self::UpdateStorage { ops } => {
                obj.insert("type".to_owned(), Value::from(server_code::UPDATE_STORAGE));
                obj.insert("ops".to_owned(), op::ops_to_value(ops));
            }
        }
        Value::Object(obj)
    }

    pub fn from_value(v: &Value) -> Option<Self> {
        let actor = || v.get("actor").and_then(Value::as_u64).map(|a| a as u32);
        match v.get("type").and_then(Value::as_u64)? {
            server_code::UPDATE_PRESENCE => Some(Self::UpdatePresence {
                actor: actor()?,
                data: v.get("data").and_then(Value::as_object).cloned().unwrap_or_default(),
                target_actor: v.get("targetActor").and_then(Value::as_i64),
            }),
            server_code::USER_JOINED => Some(Self::UserJoined {
                actor: actor()?,
                id: v.get("id").and_then(Value::as_str).map(str::to_owned),
                info: v.get("info").cloned().filter(|i| !i.is_null()),
            }),
            server_code::USER_LEFT => Some(Self::UserLeft { actor: actor()? }),
            server_code::BROADCASTED_EVENT => Some(Self::BroadcastedEvent {
                actor: actor()?,
                event: v.get("event").cloned().unwrap_or(Value::Null),
            }),
            server_code::ROOM_STATE => {
                let mut users = BTreeMap::new();
                if let Some(map) = v.get("users").and_then(Value::as_object) {
                    for (key, entry) in map {
                        let Ok(actor) = key.parse::<u32>() else {
                            continue;
                        };
                        users.insert(
                            actor,
                            RoomStateUser {
                                id: entry.get("id").and_then(Value::as_str).map(str::to_owned),
                                info: entry.get("info").cloned().filter(|i| !i.is_null()),
                            },
                        );
                    }
                }
                Some(Self::RoomState { users })
            }
            server_code::INITIAL_STORAGE_STATE => Some(Self::InitialStorageState {
                items: node::items_from_value(v.get("items").unwrap_or(&Value::Null)),
            }),
            server_code::UPDATE_STORAGE => Some(Self::UpdateStorage {
                ops: op::ops_from_value(v.get("ops").unwrap_or(&Value::Null)),
            }),
            _ => None,
        }
    }
}

/// A decoded inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Ping,
    Pong,
    /// JSON payload: one message, or an array batch. Unrecognized message
    /// types within a valid frame are dropped.
    Messages(Vec<ServerMsg>),
}

/// Decode an inbound text frame. Returns `None` for malformed JSON frames,
/// which callers drop without disturbing state.
pub fn decode_frame(text: &str) -> Option<InboundFrame> {
    match text {
        "ping" => return Some(InboundFrame::Ping),
        "pong" => return Some(InboundFrame::Pong),
        _ => {}
    }
    let value: Value = serde_json::from_str(text).ok()?;
    let msgs = match &value {
        Value::Array(entries) => entries.iter().filter_map(ServerMsg::from_value).collect(),
        Value::Object(_) => ServerMsg::from_value(&value).into_iter().collect(),
        _ => return None,
    };
    Some(InboundFrame::Messages(msgs))
}

/// Encode outbound client messages into one text frame: a bare object for a
/// single message, an array for a batch. Empty input encodes to `None`.
pub fn encode_frame(msgs: &[ClientMsg]) -> Option<String> {
    let value = match msgs {
        [] => return None,
        [single] => single.to_value(),
        many => Value::Array(many.iter().map(ClientMsg::to_value).collect()),
    };
    serde_json::to_string(&value).ok()
}

#[cfg(test)]
#[path = "msg_tests.rs"]
mod tests;
