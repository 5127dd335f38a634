// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage operations: discrete mutations of the CRDT tree.
//!
//! Every op targets a node by `id` and carries an `op_id` unique to the
//! issuing connection. An op synthesized by undo/redo starts without an
//! `op_id`; one is assigned on first local application.

use serde_json::Value;

use crate::node::JsonObject;

/// Wire op codes.
mod code {
    pub const SET_PARENT_KEY: u64 = 1;
    pub const CREATE_LIST: u64 = 2;
    pub const UPDATE_OBJECT: u64 = 3;
    pub const CREATE_OBJECT: u64 = 4;
    pub const DELETE_CRDT: u64 = 5;
    pub const DELETE_OBJECT_KEY: u64 = 6;
    pub const CREATE_MAP: u64 = 7;
    pub const CREATE_REGISTER: u64 = 8;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    CreateObject {
        op_id: Option<String>,
        id: String,
        parent_id: Option<String>,
        parent_key: Option<String>,
        data: JsonObject,
    },
    CreateList {
        op_id: Option<String>,
        id: String,
        parent_id: Option<String>,
        parent_key: Option<String>,
    },
    CreateMap {
        op_id: Option<String>,
        id: String,
        parent_id: Option<String>,
        parent_key: Option<String>,
    },
    CreateRegister {
        op_id: Option<String>,
        id: String,
        parent_id: Option<String>,
        parent_key: Option<String>,
        data: Value,
    },
    UpdateObject {
        op_id: Option<String>,
        id: String,
        data: JsonObject,
    },
    DeleteObjectKey {
        op_id: Option<String>,
        id: String,
        key: String,
    },
    DeleteCrdt {
        op_id: Option<String>,
        id: String,
    },
    SetParentKey {
        op_id: Option<String>,
        id: String,
        parent_key: String,
    },
}

impl Op {
    /// The id of the node this op targets.
    pub fn target_id(&self) -> &str {
        match self {
            Self::CreateObject { id, .. }
            | Self::CreateList { id, .. }
            | Self::CreateMap { id, .. }
            | Self::CreateRegister { id, .. }
            | Self::UpdateObject { id, .. }
            | Self::DeleteObjectKey { id, .. }
            | Self::DeleteCrdt { id, .. }
            | Self::SetParentKey { id, .. } => id,
        }
    }

    pub fn op_id(&self) -> Option<&str> {
        match self {
            Self::CreateObject { op_id, .. }
            | Self::CreateList { op_id, .. }
            | Self::CreateMap { op_id, .. }
            | Self::CreateRegister { op_id, .. }
            | Self::UpdateObject { op_id, .. }
            | Self::DeleteObjectKey { op_id, .. }
            | Self::DeleteCrdt { op_id, .. }
            | Self::SetParentKey { op_id, .. } => op_id.as_deref(),
        }
    }

    pub fn set_op_id(&mut self, new: String) {
        match self {
            Self::CreateObject { op_id, .. }
            | Self::CreateList { op_id, .. }
            | Self::CreateMap { op_id, .. }
            | Self::CreateRegister { op_id, .. }
            | Self::UpdateObject { op_id, .. }
            | Self::DeleteObjectKey { op_id, .. }
            | Self::DeleteCrdt { op_id, .. }
            | Self::SetParentKey { op_id, .. } => *op_id = Some(new),
        }
    }

    /// Whether this op creates a node.
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Self::CreateObject { .. }
                | Self::CreateList { .. }
                | Self::CreateMap { .. }
                | Self::CreateRegister { .. }
        )
    }

    pub fn to_value(&self) -> Value {
        let mut obj = JsonObject::new();
        match self {
            Self::CreateObject { op_id, id, parent_id, parent_key, data } => {
                obj.insert("type".to_owned(), Value::from(code::CREATE_OBJECT));
                put_create_fields(&mut obj, op_id, id, parent_id, parent_key);
                obj.insert("data".to_owned(), Value::Object(data.clone()));
            }
            Self::CreateList { op_id, id, parent_id, parent_key } => {
                obj.insert("type".to_owned(), Value::from(code::CREATE_LIST));
                put_create_fields(&mut obj, op_id, id, parent_id, parent_key);
            }
            Self::CreateMap { op_id, id, parent_id, parent_key } => {
                obj.insert("type".to_owned(), Value::from(code::CREATE_MAP));
                put_create_fields(&mut obj, op_id, id, parent_id, parent_key);
            }
            Self::CreateRegister { op_id, id, parent_id, parent_key, data } => {
                obj.insert("type".to_owned(), Value::from(code::CREATE_REGISTER));
                put_create_fields(&mut obj, op_id, id, parent_id, parent_key);
                obj.insert("data".to_owned(), data.clone());
            }
            Self::UpdateObject { op_id, id, data } => {
                obj.insert("type".to_owned(), Value::from(code::UPDATE_OBJECT));
                put_id_fields(&mut obj, op_id, id);
                obj.insert("data".to_owned(), Value::Object(data.clone()));
            }
            Self::DeleteObjectKey { op_id, id, key } => {
                obj.insert("type".to_owned(), Value::from(code::DELETE_OBJECT_KEY));
                put_id_fields(&mut obj, op_id, id);
                obj.insert("key".to_owned(), Value::String(key.clone()));
            }
            Self::DeleteCrdt { op_id, id } => {
                obj.insert("type".to_owned(), Value::from(code::DELETE_CRDT));
                put_id_fields(&mut obj, op_id, id);
            }
            Self::SetParentKey { op_id, id, parent_key } => {
                obj.insert("type".to_owned(), Value::from(code::SET_PARENT_KEY));
                put_id_fields(&mut obj, op_id, id);
                obj.insert("parentKey".to_owned(), Value::String(parent_key.clone()));
            }
        }
        Value::Object(obj)
    }

    pub fn from_value(v: &Value) -> Option<Self> {
        let op_id = v.get("opId").and_then(Value::as_str).map(str::to_owned);
        let id = v.get("id").and_then(Value::as_str)?.to_owned();
        let parent_id = v.get("parentId").and_then(Value::as_str).map(str::to_owned);
        let parent_key = v.get("parentKey").and_then(Value::as_str).map(str::to_owned);
        match v.get("type").and_then(Value::as_u64)? {
            code::CREATE_OBJECT => Some(Self::CreateObject {
                op_id,
                id,
                parent_id,
                parent_key,
                data: v.get("data").and_then(Value::as_object).cloned().unwrap_or_default(),
            }),
            code::CREATE_LIST => Some(Self::CreateList { op_id, id, parent_id, parent_key }),
            code::CREATE_MAP => Some(Self::CreateMap { op_id, id, parent_id, parent_key }),
            code::CREATE_REGISTER => Some(Self::CreateRegister {
                op_id,
                id,
                parent_id,
                parent_key,
                data: v.get("data").cloned().unwrap_or(Value::Null),
            }),
            code::UPDATE_OBJECT => Some(Self::UpdateObject {
                op_id,
                id,
                data: v.get("data").and_then(Value::as_object).cloned().unwrap_or_default(),
            }),
            code::DELETE_OBJECT_KEY => Some(Self::DeleteObjectKey {
                op_id,
                id,
                key: v.get("key").and_then(Value::as_str)?.to_owned(),
            }),
            code::DELETE_CRDT => Some(Self::DeleteCrdt { op_id, id }),
            code::SET_PARENT_KEY => Some(Self::SetParentKey { op_id, id, parent_key: parent_key? }),
            _ => None,
        }
    }
}

fn put_id_fields(obj: &mut JsonObject, op_id: &Option<String>, id: &str) {
    if let Some(op_id) = op_id {
        obj.insert("opId".to_owned(), Value::String(op_id.clone()));
    }
    obj.insert("id".to_owned(), Value::String(id.to_owned()));
}

fn put_create_fields(
    obj: &mut JsonObject,
    op_id: &Option<String>,
    id: &str,
    parent_id: &Option<String>,
    parent_key: &Option<String>,
) {
    put_id_fields(obj, op_id, id);
    if let Some(parent_id) = parent_id {
        obj.insert("parentId".to_owned(), Value::String(parent_id.clone()));
    }
    if let Some(parent_key) = parent_key {
        obj.insert("parentKey".to_owned(), Value::String(parent_key.clone()));
    }
}

/// Decode a wire `ops` array, skipping malformed entries.
pub fn ops_from_value(v: &Value) -> Vec<Op> {
    v.as_array()
        .map(|arr| arr.iter().filter_map(Op::from_value).collect())
        .unwrap_or_default()
}

/// Encode ops into a wire `ops` array.
pub fn ops_to_value(ops: &[Op]) -> Value {
    Value::Array(ops.iter().map(Op::to_value).collect())
}

#[cfg(test)]
#[path = "op_tests.rs"]
mod tests;
