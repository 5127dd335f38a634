// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn obj(pairs: &[(&str, Value)]) -> JsonObject {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}

// ── wire encoding ─────────────────────────────────────────────────────

#[test]
fn create_object_encodes_all_fields() {
    let op = Op::CreateObject {
        op_id: Some("1:4".to_owned()),
        id: "1:7".to_owned(),
        parent_id: Some("1:0".to_owned()),
        parent_key: Some("child".to_owned()),
        data: obj(&[("a", json!(1))]),
    };
    let v = op.to_value();
    assert_eq!(v["type"], 4);
    assert_eq!(v["opId"], "1:4");
    assert_eq!(v["id"], "1:7");
    assert_eq!(v["parentId"], "1:0");
    assert_eq!(v["parentKey"], "child");
    assert_eq!(v["data"]["a"], 1);
}

#[test]
fn op_id_omitted_when_absent() {
    let op = Op::DeleteCrdt { op_id: None, id: "1:3".to_owned() };
    let v = op.to_value();
    assert_eq!(v["type"], 5);
    assert!(v.get("opId").is_none());
}

#[test]
fn set_parent_key_requires_parent_key_on_decode() {
    let missing = json!({"type": 1, "id": "1:3"});
    assert!(Op::from_value(&missing).is_none());

    let ok = json!({"type": 1, "id": "1:3", "parentKey": "!"});
    assert_eq!(
        Op::from_value(&ok),
        Some(Op::SetParentKey { op_id: None, id: "1:3".to_owned(), parent_key: "!".to_owned() })
    );
}

#[test]
fn unknown_op_code_decodes_to_none() {
    assert!(Op::from_value(&json!({"type": 99, "id": "1:1"})).is_none());
}

#[test]
fn ops_array_skips_malformed_entries() {
    let ops = ops_from_value(&json!([
        {"type": 5, "id": "1:1"},
        {"type": 5}, // no id
        "garbage",
        {"type": 3, "id": "1:2", "data": {"x": 2}},
    ]));
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0].target_id(), "1:1");
    assert_eq!(ops[1].target_id(), "1:2");
}

#[test]
fn set_op_id_assigns() {
    let mut op = Op::UpdateObject { op_id: None, id: "1:0".to_owned(), data: JsonObject::new() };
    assert!(op.op_id().is_none());
    op.set_op_id("2:9".to_owned());
    assert_eq!(op.op_id(), Some("2:9"));
}

// ── round trips ───────────────────────────────────────────────────────

#[test]
fn all_variants_round_trip() -> anyhow::Result<()> {
    let ops = vec![
        Op::CreateObject {
            op_id: Some("1:0".to_owned()),
            id: "1:1".to_owned(),
            parent_id: Some("0:0".to_owned()),
            parent_key: Some("doc".to_owned()),
            data: obj(&[("title", json!("hi"))]),
        },
        Op::CreateList {
            op_id: Some("1:1".to_owned()),
            id: "1:2".to_owned(),
            parent_id: Some("0:0".to_owned()),
            parent_key: Some("items".to_owned()),
        },
        Op::CreateMap {
            op_id: Some("1:2".to_owned()),
            id: "1:3".to_owned(),
            parent_id: Some("0:0".to_owned()),
            parent_key: Some("meta".to_owned()),
        },
        Op::CreateRegister {
            op_id: Some("1:3".to_owned()),
            id: "1:4".to_owned(),
            parent_id: Some("1:2".to_owned()),
            parent_key: Some("!".to_owned()),
            data: json!({"x": 1}),
        },
        Op::UpdateObject {
            op_id: Some("1:4".to_owned()),
            id: "0:0".to_owned(),
            data: obj(&[("n", json!(2))]),
        },
        Op::DeleteObjectKey { op_id: Some("1:5".to_owned()), id: "0:0".to_owned(), key: "n".to_owned() },
        Op::DeleteCrdt { op_id: Some("1:6".to_owned()), id: "1:4".to_owned() },
        Op::SetParentKey {
            op_id: Some("1:7".to_owned()),
            id: "1:4".to_owned(),
            parent_key: "\"".to_owned(),
        },
    ];
    for op in ops {
        let decoded = Op::from_value(&op.to_value());
        assert_eq!(decoded.as_ref(), Some(&op), "round trip failed for {op:?}");
    }
    Ok(())
}
