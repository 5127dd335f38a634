// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serialized CRDT node forms as they travel in `INITIAL_STORAGE_STATE`.

use serde_json::Value;

/// A JSON object, the payload shape for presence and object data.
pub type JsonObject = serde_json::Map<String, Value>;

/// Wire type codes for serialized nodes.
mod code {
    pub const OBJECT: u64 = 0;
    pub const REGISTER: u64 = 1;
    pub const MAP: u64 = 2;
    pub const LIST: u64 = 3;
}

/// One node of the storage tree in wire form.
///
/// The root is the single entry with no `parent_id`; every other node hangs
/// off its parent under `parent_key` (a field name for objects and maps, a
/// fractional position string for lists).
#[derive(Debug, Clone, PartialEq)]
pub enum SerializedNode {
    Object { parent_id: Option<String>, parent_key: Option<String>, data: JsonObject },
    Register { parent_id: Option<String>, parent_key: Option<String>, data: Value },
    Map { parent_id: Option<String>, parent_key: Option<String> },
    List { parent_id: Option<String>, parent_key: Option<String> },
}

impl SerializedNode {
    /// Parent link, `(parent_id, parent_key)`. Both absent on the root.
    pub fn parent(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Self::Object { parent_id, parent_key, .. }
            | Self::Register { parent_id, parent_key, .. }
            | Self::Map { parent_id, parent_key }
            | Self::List { parent_id, parent_key } => {
                (parent_id.as_deref(), parent_key.as_deref())
            }
        }
    }

    /// Whether this is the tree root (no parent link).
    pub fn is_root(&self) -> bool {
        self.parent().0.is_none()
    }

    pub fn to_value(&self) -> Value {
        let mut obj = JsonObject::new();
        let (type_code, parent_id, parent_key) = match self {
            Self::Object { parent_id, parent_key, data } => {
                obj.insert("data".to_owned(), Value::Object(data.clone()));
                (code::OBJECT, parent_id, parent_key)
            }
            Self::Register { parent_id, parent_key, data } => {
                obj.insert("data".to_owned(), data.clone());
                (code::REGISTER, parent_id, parent_key)
            }
            Self::Map { parent_id, parent_key } => (code::MAP, parent_id, parent_key),
            Self::List { parent_id, parent_key } => (code::LIST, parent_id, parent_key),
        };
        obj.insert("type".to_owned(), Value::from(type_code));
        if let Some(id) = parent_id {
            obj.insert("parentId".to_owned(), Value::String(id.clone()));
        }
        if let Some(key) = parent_key {
            obj.insert("parentKey".to_owned(), Value::String(key.clone()));
        }
        Value::Object(obj)
    }

    pub fn from_value(v: &Value) -> Option<Self> {
        let parent_id = v.get("parentId").and_then(Value::as_str).map(str::to_owned);
        let parent_key = v.get("parentKey").and_then(Value::as_str).map(str::to_owned);
        match v.get("type").and_then(Value::as_u64)? {
            code::OBJECT => Some(Self::Object {
                parent_id,
                parent_key,
                data: v.get("data").and_then(Value::as_object).cloned().unwrap_or_default(),
            }),
            code::REGISTER => Some(Self::Register {
                parent_id,
                parent_key,
                data: v.get("data").cloned().unwrap_or(Value::Null),
            }),
            code::MAP => Some(Self::Map { parent_id, parent_key }),
            code::LIST => Some(Self::List { parent_id, parent_key }),
            _ => None,
        }
    }
}

/// Decode the `items` array of an `INITIAL_STORAGE_STATE` message:
/// a list of `[id, node]` tuples. Malformed entries are skipped.
pub fn items_from_value(v: &Value) -> Vec<(String, SerializedNode)> {
    let Some(arr) = v.as_array() else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|entry| {
            let tuple = entry.as_array()?;
            let id = tuple.first()?.as_str()?.to_owned();
            let node = SerializedNode::from_value(tuple.get(1)?)?;
            Some((id, node))
        })
        .collect()
}

/// Encode `[id, node]` tuples into the wire `items` array.
pub fn items_to_value(items: &[(String, SerializedNode)]) -> Value {
    Value::Array(
        items
            .iter()
            .map(|(id, node)| Value::Array(vec![Value::String(id.clone()), node.to_value()]))
            .collect(),
    )
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
