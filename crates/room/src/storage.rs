// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage reconciliation: offline op bookkeeping and the synthetic op
//! stream that reconciles a live tree against a fresh server snapshot.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tandem_protocol::{JsonObject, Op, SerializedNode};

/// Locally applied ops awaiting server acknowledgement, keyed by op id in
/// emission order so a replay resends them as originally produced.
pub type OfflineOps = IndexMap<String, Op>;

/// Compute the op stream that transforms `current` into `incoming`.
///
/// Used after a reconnect when a root already exists locally: the ops are
/// applied as remote, so subscribers observe the reconciliation as ordinary
/// storage updates. Ids missing from the snapshot are deleted, new ids are
/// created, object data is diffed per key, and re-keyed children are moved.
pub fn tree_diff_ops(
    current: &HashMap<String, SerializedNode>,
    incoming: &[(String, SerializedNode)],
) -> Vec<Op> {
    let incoming_ids: HashSet<&str> = incoming.iter().map(|(id, _)| id.as_str()).collect();
    let mut ops = Vec::new();

    let mut stale: Vec<&String> =
        current.keys().filter(|id| !incoming_ids.contains(id.as_str())).collect();
    stale.sort();
    for id in stale {
        ops.push(Op::DeleteCrdt { op_id: None, id: id.clone() });
    }

    for (id, node) in incoming {
        match current.get(id) {
            None => ops.extend(create_op_for(id, node)),
            Some(existing) => {
                if let (
                    SerializedNode::Object { data: old, .. },
                    SerializedNode::Object { data: new, .. },
                ) = (existing, node)
                {
                    let changed: JsonObject = new
                        .iter()
                        .filter(|(k, v)| old.get(*k) != Some(v))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    if !changed.is_empty() {
                        ops.push(Op::UpdateObject { op_id: None, id: id.clone(), data: changed });
                    }
                    for key in old.keys().filter(|k| !new.contains_key(*k)) {
                        ops.push(Op::DeleteObjectKey {
                            op_id: None,
                            id: id.clone(),
                            key: key.clone(),
                        });
                    }
                }
                // Registers are immutable: a changed value arrives under a
                // new id, so only the parent link can drift.
                let (_, old_key) = existing.parent();
                let (_, new_key) = node.parent();
                if let (Some(old_key), Some(new_key)) = (old_key, new_key) {
                    if old_key != new_key {
                        ops.push(Op::SetParentKey {
                            op_id: None,
                            id: id.clone(),
                            parent_key: new_key.to_owned(),
                        });
                    }
                }
            }
        }
    }

    ops
}

/// Create op recreating one serialized node. The root is never created by
/// an op, so a parentless node yields nothing.
fn create_op_for(id: &str, node: &SerializedNode) -> Option<Op> {
    let (parent_id, parent_key) = node.parent();
    parent_id?;
    let parent_id = parent_id.map(str::to_owned);
    let parent_key = parent_key.map(str::to_owned);
    Some(match node {
        SerializedNode::Object { data, .. } => Op::CreateObject {
            op_id: None,
            id: id.to_owned(),
            parent_id,
            parent_key,
            data: data.clone(),
        },
        SerializedNode::Map { .. } => {
            Op::CreateMap { op_id: None, id: id.to_owned(), parent_id, parent_key }
        }
        SerializedNode::List { .. } => {
            Op::CreateList { op_id: None, id: id.to_owned(), parent_id, parent_key }
        }
        SerializedNode::Register { data, .. } => Op::CreateRegister {
            op_id: None,
            id: id.to_owned(),
            parent_id,
            parent_key,
            data: data.clone(),
        },
    })
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
