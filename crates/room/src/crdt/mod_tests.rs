// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

use crate::test_support::obj;

const ROOT: &str = "0:0";

fn root_registry() -> Registry {
    let items = vec![(
        ROOT.to_owned(),
        SerializedNode::Object { parent_id: None, parent_key: None, data: JsonObject::new() },
    )];
    match Registry::from_items(&items) {
        Ok(registry) => registry,
        Err(e) => unreachable!("root registry must load: {e}"),
    }
}

fn create_object_op(id: &str, parent: &str, key: &str, data: JsonObject) -> Op {
    Op::CreateObject {
        op_id: Some(format!("op-{id}")),
        id: id.to_owned(),
        parent_id: Some(parent.to_owned()),
        parent_key: Some(key.to_owned()),
        data,
    }
}

// ── loading ───────────────────────────────────────────────────────────

#[test]
fn from_items_requires_exactly_one_root() {
    assert!(Registry::from_items(&[]).is_err());

    let two_roots = vec![
        (
            "0:0".to_owned(),
            SerializedNode::Object { parent_id: None, parent_key: None, data: JsonObject::new() },
        ),
        (
            "1:0".to_owned(),
            SerializedNode::Object { parent_id: None, parent_key: None, data: JsonObject::new() },
        ),
    ];
    assert!(Registry::from_items(&two_roots).is_err());
}

#[test]
fn from_items_builds_out_of_order_batches() -> anyhow::Result<()> {
    // Child listed before its parent.
    let items = vec![
        (
            "1:1".to_owned(),
            SerializedNode::Register {
                parent_id: Some("1:0".to_owned()),
                parent_key: Some("!".to_owned()),
                data: json!("x"),
            },
        ),
        (
            ROOT.to_owned(),
            SerializedNode::Object { parent_id: None, parent_key: None, data: JsonObject::new() },
        ),
        (
            "1:0".to_owned(),
            SerializedNode::List {
                parent_id: Some(ROOT.to_owned()),
                parent_key: Some("items".to_owned()),
            },
        ),
    ];
    let registry = Registry::from_items(&items)?;
    assert_eq!(registry.root_id(), Some(ROOT));
    assert_eq!(registry.snapshot(ROOT), Some(json!({"items": ["x"]})));
    Ok(())
}

#[test]
fn orphans_are_dropped() -> anyhow::Result<()> {
    let items = vec![
        (
            ROOT.to_owned(),
            SerializedNode::Object { parent_id: None, parent_key: None, data: JsonObject::new() },
        ),
        (
            "9:9".to_owned(),
            SerializedNode::Map {
                parent_id: Some("gone".to_owned()),
                parent_key: Some("m".to_owned()),
            },
        ),
    ];
    let registry = Registry::from_items(&items)?;
    assert!(!registry.contains("9:9"));
    Ok(())
}

// ── create ────────────────────────────────────────────────────────────

#[test]
fn create_object_attaches_and_reverses() {
    let mut registry = root_registry();
    let op = create_object_op("1:0", ROOT, "doc", obj(&[("title", json!("hi"))]));
    let result = registry.apply_op(&op, OpSource::UndoRedoReconnect);

    let modified = result.modified.unwrap();
    assert_eq!(modified.node_id, ROOT);
    assert_eq!(
        modified.update,
        NodeUpdate::Object {
            changes: [("doc".to_owned(), FieldChange::Update)].into_iter().collect()
        }
    );
    assert_eq!(result.reverse, vec![Op::DeleteCrdt { op_id: None, id: "1:0".to_owned() }]);
    assert_eq!(registry.snapshot(ROOT), Some(json!({"doc": {"title": "hi"}})));
}

#[test]
fn create_without_parent_is_ignored() {
    let mut registry = root_registry();
    let op = Op::CreateMap { op_id: None, id: "1:0".to_owned(), parent_id: None, parent_key: None };
    assert_eq!(registry.apply_op(&op, OpSource::Remote), ApplyResult::unmodified());
}

#[test]
fn create_under_unknown_parent_is_ignored() {
    let mut registry = root_registry();
    let op = create_object_op("1:0", "gone", "k", JsonObject::new());
    assert_eq!(registry.apply_op(&op, OpSource::Remote), ApplyResult::unmodified());
}

#[test]
fn ack_echo_of_existing_node_is_a_no_op() {
    let mut registry = root_registry();
    let op = create_object_op("1:0", ROOT, "doc", JsonObject::new());
    assert!(registry.apply_op(&op, OpSource::UndoRedoReconnect).modified.is_some());
    // The server echoes our own create back.
    assert_eq!(registry.apply_op(&op, OpSource::Ack), ApplyResult::unmodified());
}

#[test]
fn remote_create_displacing_a_child_restores_it_on_reverse() {
    let mut registry = root_registry();
    let ours = create_object_op("1:0", ROOT, "doc", obj(&[("mine", json!(1))]));
    registry.apply_op(&ours, OpSource::UndoRedoReconnect);

    let theirs = create_object_op("2:0", ROOT, "doc", obj(&[("theirs", json!(2))]));
    let result = registry.apply_op(&theirs, OpSource::Remote);

    assert!(!registry.contains("1:0"));
    assert_eq!(registry.snapshot(ROOT), Some(json!({"doc": {"theirs": 2}})));
    // Reverse deletes the winner and recreates the displaced subtree.
    assert_eq!(result.reverse[0], Op::DeleteCrdt { op_id: None, id: "2:0".to_owned() });
    assert!(matches!(&result.reverse[1], Op::CreateObject { id, .. } if id == "1:0"));
}

// ── object updates ────────────────────────────────────────────────────

#[test]
fn update_object_reverses_to_prior_state() {
    let mut registry = root_registry();
    registry.apply_op(
        &Op::UpdateObject { op_id: None, id: ROOT.to_owned(), data: obj(&[("a", json!(1))]) },
        OpSource::UndoRedoReconnect,
    );

    let patch = obj(&[("a", json!(2)), ("b", json!(3))]);
    let result = registry.apply_op(
        &Op::UpdateObject { op_id: None, id: ROOT.to_owned(), data: patch },
        OpSource::UndoRedoReconnect,
    );

    assert_eq!(registry.snapshot(ROOT), Some(json!({"a": 2, "b": 3})));
    // Existing key reverses to its old value, fresh key to a delete.
    assert_eq!(
        result.reverse,
        vec![
            Op::UpdateObject { op_id: None, id: ROOT.to_owned(), data: obj(&[("a", json!(1))]) },
            Op::DeleteObjectKey { op_id: None, id: ROOT.to_owned(), key: "b".to_owned() },
        ]
    );

    for op in result.reverse {
        registry.apply_op(&op, OpSource::UndoRedoReconnect);
    }
    assert_eq!(registry.snapshot(ROOT), Some(json!({"a": 1})));
}

#[test]
fn update_object_with_identical_values_is_unmodified() {
    let mut registry = root_registry();
    let patch = obj(&[("a", json!(1))]);
    registry.apply_op(
        &Op::UpdateObject { op_id: None, id: ROOT.to_owned(), data: patch.clone() },
        OpSource::UndoRedoReconnect,
    );
    let result = registry.apply_op(
        &Op::UpdateObject { op_id: None, id: ROOT.to_owned(), data: patch },
        OpSource::Remote,
    );
    assert_eq!(result, ApplyResult::unmodified());
}

#[test]
fn delete_object_key_only_touches_plain_fields() {
    let mut registry = root_registry();
    registry.apply_op(
        &Op::UpdateObject { op_id: None, id: ROOT.to_owned(), data: obj(&[("a", json!(1))]) },
        OpSource::UndoRedoReconnect,
    );
    registry.apply_op(&create_object_op("1:0", ROOT, "child", JsonObject::new()), OpSource::UndoRedoReconnect);

    let result = registry.apply_op(
        &Op::DeleteObjectKey { op_id: None, id: ROOT.to_owned(), key: "child".to_owned() },
        OpSource::Remote,
    );
    assert_eq!(result, ApplyResult::unmodified());
    assert!(registry.contains("1:0"));

    let result = registry.apply_op(
        &Op::DeleteObjectKey { op_id: None, id: ROOT.to_owned(), key: "a".to_owned() },
        OpSource::Remote,
    );
    assert_eq!(
        result.reverse,
        vec![Op::UpdateObject { op_id: None, id: ROOT.to_owned(), data: obj(&[("a", json!(1))]) }]
    );
    assert_eq!(registry.snapshot(ROOT), Some(json!({"child": {}})));
}

// ── delete ────────────────────────────────────────────────────────────

#[test]
fn delete_crdt_removes_subtree_and_reverses_to_creates() {
    let mut registry = root_registry();
    registry.apply_op(&create_object_op("1:0", ROOT, "doc", JsonObject::new()), OpSource::UndoRedoReconnect);
    registry.apply_op(
        &Op::CreateList {
            op_id: None,
            id: "1:1".to_owned(),
            parent_id: Some("1:0".to_owned()),
            parent_key: Some("items".to_owned()),
        },
        OpSource::UndoRedoReconnect,
    );
    registry.apply_op(
        &Op::CreateRegister {
            op_id: None,
            id: "1:2".to_owned(),
            parent_id: Some("1:1".to_owned()),
            parent_key: Some("!".to_owned()),
            data: json!(42),
        },
        OpSource::UndoRedoReconnect,
    );

    let result = registry.apply_op(
        &Op::DeleteCrdt { op_id: None, id: "1:0".to_owned() },
        OpSource::UndoRedoReconnect,
    );

    assert!(!registry.contains("1:0"));
    assert!(!registry.contains("1:1"));
    assert!(!registry.contains("1:2"));
    let modified = result.modified.unwrap();
    assert_eq!(modified.node_id, ROOT);

    // Replaying the reverse rebuilds the whole subtree.
    for op in result.reverse {
        registry.apply_op(&op, OpSource::UndoRedoReconnect);
    }
    assert_eq!(registry.snapshot(ROOT), Some(json!({"doc": {"items": [42]}})));
}

#[test]
fn delete_of_unknown_node_is_ignored() {
    let mut registry = root_registry();
    let result =
        registry.apply_op(&Op::DeleteCrdt { op_id: None, id: "9:9".to_owned() }, OpSource::Remote);
    assert_eq!(result, ApplyResult::unmodified());
}

// ── lists ─────────────────────────────────────────────────────────────

fn list_with_items(registry: &mut Registry) -> Vec<String> {
    registry.apply_op(
        &Op::CreateList {
            op_id: None,
            id: "1:0".to_owned(),
            parent_id: Some(ROOT.to_owned()),
            parent_key: Some("items".to_owned()),
        },
        OpSource::UndoRedoReconnect,
    );
    let mut positions = Vec::new();
    for (i, value) in ["a", "b", "c"].iter().enumerate() {
        let position = registry.position_for_insert("1:0", i).unwrap();
        registry.apply_op(
            &Op::CreateRegister {
                op_id: None,
                id: format!("1:{}", i + 1),
                parent_id: Some("1:0".to_owned()),
                parent_key: Some(position.clone()),
                data: json!(value),
            },
            OpSource::UndoRedoReconnect,
        );
        positions.push(position);
    }
    positions
}

#[test]
fn list_children_are_position_ordered() {
    let mut registry = root_registry();
    list_with_items(&mut registry);
    assert_eq!(registry.snapshot("1:0"), Some(json!(["a", "b", "c"])));
    assert_eq!(registry.list_len("1:0"), Some(3));
    assert_eq!(registry.list_child_at("1:0", 1), Some("1:2"));
}

#[test]
fn remote_insert_at_occupied_position_slots_after() {
    let mut registry = root_registry();
    let positions = list_with_items(&mut registry);

    let op = Op::CreateRegister {
        op_id: None,
        id: "2:0".to_owned(),
        parent_id: Some("1:0".to_owned()),
        parent_key: Some(positions[0].clone()),
        data: json!("x"),
    };
    registry.apply_op(&op, OpSource::Remote);

    // The concurrent insert lands right after the occupant.
    assert_eq!(registry.snapshot("1:0"), Some(json!(["a", "x", "b", "c"])));
}

#[test]
fn local_reapply_at_occupied_position_keeps_its_key() {
    let mut registry = root_registry();
    let positions = list_with_items(&mut registry);

    // An offline replay lands on a position a concurrent insert now holds.
    let op = Op::CreateRegister {
        op_id: None,
        id: "2:0".to_owned(),
        parent_id: Some("1:0".to_owned()),
        parent_key: Some(positions[0].clone()),
        data: json!("x"),
    };
    registry.apply_op(&op, OpSource::UndoRedoReconnect);

    // The replayed child keeps its recorded position; the occupant is
    // bumped one slot down.
    assert_eq!(registry.snapshot("1:0"), Some(json!(["x", "a", "b", "c"])));
    let replayed = registry.get("2:0").unwrap();
    assert_eq!(
        replayed.parent,
        ParentLink::HasParent { parent: "1:0".to_owned(), key: positions[0].clone() }
    );
}

#[test]
fn local_move_to_occupied_position_keeps_its_key() {
    let mut registry = root_registry();
    let positions = list_with_items(&mut registry);

    // Undo replays a move of "c" onto the position "a" holds.
    let result = registry.apply_op(
        &Op::SetParentKey {
            op_id: None,
            id: "1:3".to_owned(),
            parent_key: positions[0].clone(),
        },
        OpSource::UndoRedoReconnect,
    );

    assert_eq!(registry.snapshot("1:0"), Some(json!(["c", "a", "b"])));
    let moved = registry.get("1:3").unwrap();
    assert_eq!(
        moved.parent,
        ParentLink::HasParent { parent: "1:0".to_owned(), key: positions[0].clone() }
    );
    assert_eq!(
        result.reverse,
        vec![Op::SetParentKey { op_id: None, id: "1:3".to_owned(), parent_key: positions[2].clone() }]
    );
}

#[test]
fn set_parent_key_moves_and_reverses() {
    let mut registry = root_registry();
    let positions = list_with_items(&mut registry);

    // Move "c" before "a".
    let target = pos::before(&positions[0]);
    let result = registry.apply_op(
        &Op::SetParentKey { op_id: None, id: "1:3".to_owned(), parent_key: target },
        OpSource::UndoRedoReconnect,
    );
    assert_eq!(registry.snapshot("1:0"), Some(json!(["c", "a", "b"])));

    for op in result.reverse {
        registry.apply_op(&op, OpSource::UndoRedoReconnect);
    }
    assert_eq!(registry.snapshot("1:0"), Some(json!(["a", "b", "c"])));
}

#[test]
fn set_parent_key_requires_list_parent() {
    let mut registry = root_registry();
    registry.apply_op(&create_object_op("1:0", ROOT, "doc", JsonObject::new()), OpSource::UndoRedoReconnect);
    let result = registry.apply_op(
        &Op::SetParentKey { op_id: None, id: "1:0".to_owned(), parent_key: "!".to_owned() },
        OpSource::Remote,
    );
    assert_eq!(result, ApplyResult::unmodified());
}

// ── maps ──────────────────────────────────────────────────────────────

#[test]
fn map_attach_replaces_existing_entry() {
    let mut registry = root_registry();
    registry.apply_op(
        &Op::CreateMap {
            op_id: None,
            id: "1:0".to_owned(),
            parent_id: Some(ROOT.to_owned()),
            parent_key: Some("meta".to_owned()),
        },
        OpSource::UndoRedoReconnect,
    );
    for (node_id, value) in [("1:1", json!("old")), ("1:2", json!("new"))] {
        registry.apply_op(
            &Op::CreateRegister {
                op_id: None,
                id: node_id.to_owned(),
                parent_id: Some("1:0".to_owned()),
                parent_key: Some("color".to_owned()),
                data: value,
            },
            OpSource::UndoRedoReconnect,
        );
    }
    assert!(!registry.contains("1:1"));
    assert_eq!(registry.snapshot("1:0"), Some(json!({"color": "new"})));
}

// ── update merging ────────────────────────────────────────────────────

#[test]
fn later_delete_dominates_merge() {
    let update = NodeUpdate::Object {
        changes: [("a".to_owned(), FieldChange::Update)].into_iter().collect(),
    };
    assert_eq!(merge_node_updates(update, NodeUpdate::Deleted), NodeUpdate::Deleted);
}

#[test]
fn same_kind_merges_union_keys() {
    let first = NodeUpdate::Object {
        changes: [("a".to_owned(), FieldChange::Update)].into_iter().collect(),
    };
    let second = NodeUpdate::Object {
        changes: [("a".to_owned(), FieldChange::Delete), ("b".to_owned(), FieldChange::Update)]
            .into_iter()
            .collect(),
    };
    assert_eq!(
        merge_node_updates(first, second),
        NodeUpdate::Object {
            changes: [
                ("a".to_owned(), FieldChange::Delete),
                ("b".to_owned(), FieldChange::Update)
            ]
            .into_iter()
            .collect()
        }
    );
}

// ── ancestry ──────────────────────────────────────────────────────────

#[test]
fn descendant_walk_terminates_at_root() {
    let mut registry = root_registry();
    registry.apply_op(&create_object_op("1:0", ROOT, "doc", JsonObject::new()), OpSource::UndoRedoReconnect);
    registry.apply_op(&create_object_op("1:1", "1:0", "inner", JsonObject::new()), OpSource::UndoRedoReconnect);

    assert!(registry.is_self_or_descendant("1:1", ROOT));
    assert!(registry.is_self_or_descendant("1:1", "1:1"));
    assert!(!registry.is_self_or_descendant(ROOT, "1:1"));
    assert!(!registry.is_self_or_descendant("9:9", ROOT));
}
