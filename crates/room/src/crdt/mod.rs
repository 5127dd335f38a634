// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory CRDT tree: registry-owned nodes and the op engine.
//!
//! Nodes live in a flat table keyed by id; parents and children refer to
//! each other by id lookup, never by owning pointer, so the (potentially
//! cyclic-looking) parent/child graph has no ownership cycles and a node is
//! destroyed by removing its id from the table. Applying an op returns the
//! reverse ops that undo it plus a per-node delta summary for subscribers.

pub mod pos;

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tandem_protocol::{JsonObject, Op, SerializedNode};

// -- Op sources ---------------------------------------------------------------

/// How an op reached the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpSource {
    /// Local application: first apply, undo/redo replay, or offline resend.
    /// Accepted without additional conflict resolution.
    UndoRedoReconnect,
    /// Authored by a peer, relayed by the server.
    Remote,
    /// Echo of one of our own unacknowledged ops.
    Ack,
}

impl OpSource {
    pub fn is_local(self) -> bool {
        matches!(self, Self::UndoRedoReconnect)
    }
}

// -- Storage updates ----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldChange {
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListChange {
    Insert,
    Move,
    Delete,
}

/// Delta summary for one node, keyed by field (objects, maps) or by
/// position (lists).
#[derive(Debug, Clone, PartialEq)]
pub enum NodeUpdate {
    Object { changes: BTreeMap<String, FieldChange> },
    Map { changes: BTreeMap<String, FieldChange> },
    List { changes: BTreeMap<String, ListChange> },
    Deleted,
}

/// One entry of a storage notification batch.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageUpdate {
    pub node_id: String,
    pub update: NodeUpdate,
}

/// Merge two updates for the same node. A later delete dominates; same-kind
/// updates union their change maps with the later entry winning per key.
/// The merge is associative, so one notification per node per apply holds
/// regardless of grouping.
pub fn merge_node_updates(prev: NodeUpdate, next: NodeUpdate) -> NodeUpdate {
    match (prev, next) {
        (_, NodeUpdate::Deleted) => NodeUpdate::Deleted,
        (NodeUpdate::Deleted, next) => next,
        (NodeUpdate::Object { changes: mut a }, NodeUpdate::Object { changes: b }) => {
            a.extend(b);
            NodeUpdate::Object { changes: a }
        }
        (NodeUpdate::Map { changes: mut a }, NodeUpdate::Map { changes: b }) => {
            a.extend(b);
            NodeUpdate::Map { changes: a }
        }
        (NodeUpdate::List { changes: mut a }, NodeUpdate::List { changes: b }) => {
            a.extend(b);
            NodeUpdate::List { changes: a }
        }
        // Kind mismatch: the id was re-used for a different node shape; the
        // later summary is the truthful one.
        (_, next) => next,
    }
}

/// Result of applying one op.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyResult {
    pub modified: Option<StorageUpdate>,
    pub reverse: Vec<Op>,
}

impl ApplyResult {
    pub fn unmodified() -> Self {
        Self { modified: None, reverse: Vec::new() }
    }
}

// -- Nodes --------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ParentLink {
    Root,
    HasParent { parent: String, key: String },
}

/// An object field is either a plain JSON value or a nested node.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectEntry {
    Plain(Value),
    Child(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeBody {
    Object { entries: BTreeMap<String, ObjectEntry> },
    /// Entries are child node ids; plain values are child registers.
    Map { entries: BTreeMap<String, String> },
    /// Children ordered by fractional position key.
    List { children: BTreeMap<String, String> },
    /// Immutable value; replaced by attaching a new register.
    Register { data: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub parent: ParentLink,
    pub body: NodeBody,
}

impl Node {
    fn parent_id(&self) -> Option<&str> {
        match &self.parent {
            ParentLink::Root => None,
            ParentLink::HasParent { parent, .. } => Some(parent),
        }
    }
}

// -- Registry -----------------------------------------------------------------

/// Flat id → node table holding the whole storage tree.
#[derive(Debug, Default)]
pub struct Registry {
    nodes: HashMap<String, Node>,
    root_id: Option<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_id(&self) -> Option<&str> {
        self.root_id.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Whether `id` is `ancestor` or sits below it in the tree.
    pub fn is_self_or_descendant(&self, id: &str, ancestor: &str) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == ancestor {
                return true;
            }
            current = self.nodes.get(node_id).and_then(Node::parent_id);
        }
        false
    }

    /// Build a tree from wire items. There must be exactly one root; orphan
    /// entries (parent id absent from the batch) are dropped with a log.
    pub fn from_items(items: &[(String, SerializedNode)]) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        let mut roots = items.iter().filter(|(_, node)| node.is_root());
        let root = match (roots.next(), roots.next()) {
            (Some(root), None) => root,
            (None, _) => anyhow::bail!("storage items contain no root"),
            (Some(_), Some(_)) => anyhow::bail!("storage items contain multiple roots"),
        };

        registry.root_id = Some(root.0.clone());
        registry.nodes.insert(
            root.0.clone(),
            Node { id: root.0.clone(), parent: ParentLink::Root, body: body_of(&root.1) },
        );

        // Parents appear before children in server batches, but a second
        // pass keeps out-of-order batches working too.
        let mut pending: Vec<&(String, SerializedNode)> =
            items.iter().filter(|(id, _)| *id != root.0).collect();
        loop {
            let before = pending.len();
            pending.retain(|(id, serialized)| {
                let (Some(parent_id), Some(parent_key)) = serialized.parent() else {
                    tracing::debug!(id = %id, "dropping storage item with incomplete parent link");
                    return false;
                };
                if !registry.nodes.contains_key(parent_id) {
                    return true; // parent not built yet
                }
                let (parent_id, key) = (parent_id.to_owned(), parent_key.to_owned());
                registry.nodes.insert(
                    id.clone(),
                    Node {
                        id: id.clone(),
                        parent: ParentLink::HasParent { parent: parent_id.clone(), key: key.clone() },
                        body: body_of(serialized),
                    },
                );
                registry.link_into_parent(&parent_id, &key, id);
                false
            });
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }
        for (id, _) in pending {
            tracing::debug!(id = %id, "dropping orphan storage item");
        }
        Ok(registry)
    }

    fn link_into_parent(&mut self, parent_id: &str, key: &str, child_id: &str) {
        if let Some(parent) = self.nodes.get_mut(parent_id) {
            match &mut parent.body {
                NodeBody::Object { entries } => {
                    entries.insert(key.to_owned(), ObjectEntry::Child(child_id.to_owned()));
                }
                NodeBody::Map { entries } => {
                    entries.insert(key.to_owned(), child_id.to_owned());
                }
                NodeBody::List { children } => {
                    children.insert(key.to_owned(), child_id.to_owned());
                }
                NodeBody::Register { .. } => {
                    tracing::debug!(parent_id, child_id, "ignoring child of register node");
                }
            }
        }
    }

    // -- Serialization --------------------------------------------------------

    /// Wire form of a single node.
    pub fn serialize_node(&self, id: &str) -> Option<SerializedNode> {
        let node = self.nodes.get(id)?;
        let (parent_id, parent_key) = match &node.parent {
            ParentLink::Root => (None, None),
            ParentLink::HasParent { parent, key } => (Some(parent.clone()), Some(key.clone())),
        };
        Some(match &node.body {
            NodeBody::Object { entries } => SerializedNode::Object {
                parent_id,
                parent_key,
                data: plain_data(entries),
            },
            NodeBody::Map { .. } => SerializedNode::Map { parent_id, parent_key },
            NodeBody::List { .. } => SerializedNode::List { parent_id, parent_key },
            NodeBody::Register { data } => {
                SerializedNode::Register { parent_id, parent_key, data: data.clone() }
            }
        })
    }

    /// Wire form of the whole registry, keyed by id.
    pub fn serialize(&self) -> HashMap<String, SerializedNode> {
        self.nodes.keys().filter_map(|id| Some((id.clone(), self.serialize_node(id)?))).collect()
    }

    /// Ops that recreate the subtree rooted at `id`, parents first. Used as
    /// the reverse of a delete. Op ids are assigned on application.
    pub fn subtree_create_ops(&self, id: &str) -> Vec<Op> {
        let mut ops = Vec::new();
        self.collect_create_ops(id, &mut ops);
        ops
    }

    fn collect_create_ops(&self, id: &str, out: &mut Vec<Op>) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let (parent_id, parent_key) = match &node.parent {
            ParentLink::Root => (None, None),
            ParentLink::HasParent { parent, key } => (Some(parent.clone()), Some(key.clone())),
        };
        match &node.body {
            NodeBody::Object { entries } => {
                out.push(Op::CreateObject {
                    op_id: None,
                    id: id.to_owned(),
                    parent_id,
                    parent_key,
                    data: plain_data(entries),
                });
                for entry in entries.values() {
                    if let ObjectEntry::Child(child) = entry {
                        self.collect_create_ops(child, out);
                    }
                }
            }
            NodeBody::Map { entries } => {
                out.push(Op::CreateMap { op_id: None, id: id.to_owned(), parent_id, parent_key });
                for child in entries.values() {
                    self.collect_create_ops(child, out);
                }
            }
            NodeBody::List { children } => {
                out.push(Op::CreateList { op_id: None, id: id.to_owned(), parent_id, parent_key });
                for child in children.values() {
                    self.collect_create_ops(child, out);
                }
            }
            NodeBody::Register { data } => {
                out.push(Op::CreateRegister {
                    op_id: None,
                    id: id.to_owned(),
                    parent_id,
                    parent_key,
                    data: data.clone(),
                });
            }
        }
    }

    /// Plain JSON snapshot of the subtree rooted at `id`.
    pub fn snapshot(&self, id: &str) -> Option<Value> {
        let node = self.nodes.get(id)?;
        Some(match &node.body {
            NodeBody::Object { entries } => {
                let mut obj = JsonObject::new();
                for (key, entry) in entries {
                    let value = match entry {
                        ObjectEntry::Plain(value) => value.clone(),
                        ObjectEntry::Child(child) => self.snapshot(child).unwrap_or(Value::Null),
                    };
                    obj.insert(key.clone(), value);
                }
                Value::Object(obj)
            }
            NodeBody::Map { entries } => {
                let mut obj = JsonObject::new();
                for (key, child) in entries {
                    obj.insert(key.clone(), self.snapshot(child).unwrap_or(Value::Null));
                }
                Value::Object(obj)
            }
            NodeBody::List { children } => Value::Array(
                children.values().map(|c| self.snapshot(c).unwrap_or(Value::Null)).collect(),
            ),
            NodeBody::Register { data } => data.clone(),
        })
    }

    /// Whether an object node already has an entry (plain or nested) under
    /// `key`. Used when seeding default storage.
    pub fn object_entry_exists(&self, id: &str, key: &str) -> bool {
        matches!(
            self.nodes.get(id).map(|n| &n.body),
            Some(NodeBody::Object { entries }) if entries.contains_key(key)
        )
    }

    // -- List helpers ---------------------------------------------------------

    /// Number of children of a list node.
    pub fn list_len(&self, list_id: &str) -> Option<usize> {
        match &self.nodes.get(list_id)?.body {
            NodeBody::List { children } => Some(children.len()),
            _ => None,
        }
    }

    /// Child id at a list index, in position order.
    pub fn list_child_at(&self, list_id: &str, index: usize) -> Option<&str> {
        match &self.nodes.get(list_id)?.body {
            NodeBody::List { children } => children.values().nth(index).map(String::as_str),
            _ => None,
        }
    }

    /// Position key for inserting at `index` (clamped to the end).
    pub fn position_for_insert(&self, list_id: &str, index: usize) -> Option<String> {
        match &self.nodes.get(list_id)?.body {
            NodeBody::List { children } => {
                let keys: Vec<&String> = children.keys().collect();
                let lo = index.checked_sub(1).and_then(|i| keys.get(i)).map(|k| k.as_str());
                let hi = keys.get(index).map(|k| k.as_str());
                Some(pos::make_position(lo, hi))
            }
            _ => None,
        }
    }

    /// Position key for moving an existing child to `target_index`, as
    /// counted with the child removed.
    pub fn position_for_move(&self, child_id: &str, target_index: usize) -> Option<String> {
        let node = self.nodes.get(child_id)?;
        let ParentLink::HasParent { parent, key } = &node.parent else {
            return None;
        };
        let NodeBody::List { children } = &self.nodes.get(parent)?.body else {
            return None;
        };
        let keys: Vec<&String> = children.keys().filter(|k| *k != key).collect();
        let lo = target_index.checked_sub(1).and_then(|i| keys.get(i)).map(|k| k.as_str());
        let hi = keys.get(target_index).map(|k| k.as_str());
        Some(pos::make_position(lo, hi))
    }

    // -- Op engine ------------------------------------------------------------

    /// Apply one op to the tree. Unknown targets return unmodified: the
    /// server may have garbage-collected the node, and reapplication must be
    /// idempotent.
    pub fn apply_op(&mut self, op: &Op, source: OpSource) -> ApplyResult {
        match op {
            Op::UpdateObject { id, data, .. } => self.apply_update_object(id, data),
            Op::DeleteObjectKey { id, key, .. } => self.apply_delete_object_key(id, key),
            Op::DeleteCrdt { id, .. } => self.apply_delete_crdt(id),
            Op::SetParentKey { id, parent_key, .. } => {
                self.apply_set_parent_key(id, parent_key, source)
            }
            Op::CreateObject { id, parent_id, parent_key, data, .. } => self.apply_create(
                id,
                parent_id.as_deref(),
                parent_key.as_deref(),
                NodeBody::Object {
                    entries: data
                        .iter()
                        .map(|(k, v)| (k.clone(), ObjectEntry::Plain(v.clone())))
                        .collect(),
                },
                source,
            ),
            Op::CreateMap { id, parent_id, parent_key, .. } => self.apply_create(
                id,
                parent_id.as_deref(),
                parent_key.as_deref(),
                NodeBody::Map { entries: BTreeMap::new() },
                source,
            ),
            Op::CreateList { id, parent_id, parent_key, .. } => self.apply_create(
                id,
                parent_id.as_deref(),
                parent_key.as_deref(),
                NodeBody::List { children: BTreeMap::new() },
                source,
            ),
            Op::CreateRegister { id, parent_id, parent_key, data, .. } => self.apply_create(
                id,
                parent_id.as_deref(),
                parent_key.as_deref(),
                NodeBody::Register { data: data.clone() },
                source,
            ),
        }
    }

    fn apply_update_object(&mut self, id: &str, patch: &JsonObject) -> ApplyResult {
        if !matches!(self.nodes.get(id).map(|n| &n.body), Some(NodeBody::Object { .. })) {
            return ApplyResult::unmodified();
        }

        let mut changes = BTreeMap::new();
        let mut reverse_updates = JsonObject::new();
        let mut reverse_deletes = Vec::new();
        let mut child_restores = Vec::new();
        let mut displaced_children = Vec::new();

        if let Some(Node { body: NodeBody::Object { entries }, .. }) = self.nodes.get_mut(id) {
            for (key, value) in patch {
                match entries.get(key) {
                    Some(ObjectEntry::Plain(old)) if old == value => continue,
                    Some(ObjectEntry::Plain(old)) => {
                        reverse_updates.insert(key.clone(), old.clone());
                    }
                    Some(ObjectEntry::Child(child)) => {
                        displaced_children.push(child.clone());
                    }
                    None => reverse_deletes.push(key.clone()),
                }
                entries.insert(key.clone(), ObjectEntry::Plain(value.clone()));
                changes.insert(key.clone(), FieldChange::Update);
            }
        }
        if changes.is_empty() {
            return ApplyResult::unmodified();
        }

        // A plain value displacing a nested node deletes its subtree; the
        // reverse recreates it after restoring the plain fields.
        for child in displaced_children {
            child_restores.extend(self.subtree_create_ops(&child));
            self.remove_subtree(&child);
        }

        let mut reverse = Vec::new();
        if !reverse_updates.is_empty() {
            reverse.push(Op::UpdateObject { op_id: None, id: id.to_owned(), data: reverse_updates });
        }
        for key in reverse_deletes {
            reverse.push(Op::DeleteObjectKey { op_id: None, id: id.to_owned(), key });
        }
        reverse.extend(child_restores);

        ApplyResult {
            modified: Some(StorageUpdate {
                node_id: id.to_owned(),
                update: NodeUpdate::Object { changes },
            }),
            reverse,
        }
    }

    fn apply_delete_object_key(&mut self, id: &str, key: &str) -> ApplyResult {
        let Some(Node { body: NodeBody::Object { entries }, .. }) = self.nodes.get_mut(id) else {
            return ApplyResult::unmodified();
        };
        // Only plain fields; nested nodes are removed via DeleteCrdt.
        let Some(ObjectEntry::Plain(old)) = entries.get(key) else {
            return ApplyResult::unmodified();
        };
        let old = old.clone();
        entries.remove(key);

        let mut data = JsonObject::new();
        data.insert(key.to_owned(), old);
        ApplyResult {
            modified: Some(StorageUpdate {
                node_id: id.to_owned(),
                update: NodeUpdate::Object {
                    changes: [(key.to_owned(), FieldChange::Delete)].into_iter().collect(),
                },
            }),
            reverse: vec![Op::UpdateObject { op_id: None, id: id.to_owned(), data }],
        }
    }

    fn apply_delete_crdt(&mut self, id: &str) -> ApplyResult {
        let Some(node) = self.nodes.get(id) else {
            return ApplyResult::unmodified();
        };
        let ParentLink::HasParent { parent, key } = node.parent.clone() else {
            tracing::debug!(id, "ignoring delete of root node");
            return ApplyResult::unmodified();
        };

        let reverse = self.subtree_create_ops(id);
        self.remove_subtree(id);

        let update = match self.nodes.get_mut(&parent).map(|p| &mut p.body) {
            Some(NodeBody::Object { entries }) => {
                entries.remove(&key);
                NodeUpdate::Object {
                    changes: [(key, FieldChange::Delete)].into_iter().collect(),
                }
            }
            Some(NodeBody::Map { entries }) => {
                entries.remove(&key);
                NodeUpdate::Map { changes: [(key, FieldChange::Delete)].into_iter().collect() }
            }
            Some(NodeBody::List { children }) => {
                children.remove(&key);
                NodeUpdate::List { changes: [(key, ListChange::Delete)].into_iter().collect() }
            }
            _ => return ApplyResult { modified: None, reverse },
        };

        ApplyResult { modified: Some(StorageUpdate { node_id: parent, update }), reverse }
    }

    fn apply_set_parent_key(&mut self, id: &str, new_key: &str, source: OpSource) -> ApplyResult {
        let Some(node) = self.nodes.get(id) else {
            return ApplyResult::unmodified();
        };
        let ParentLink::HasParent { parent, key: old_key } = node.parent.clone() else {
            return ApplyResult::unmodified();
        };
        if old_key == new_key {
            return ApplyResult::unmodified();
        }
        let (occupied, next_key) = {
            let Some(NodeBody::List { children }) = self.nodes.get(&parent).map(|p| &p.body)
            else {
                return ApplyResult::unmodified();
            };
            let occupied = children.contains_key(new_key)
                && children.get(new_key).map(String::as_str) != Some(id);
            let next_key = children
                .range::<str, _>((
                    std::ops::Bound::Excluded(new_key),
                    std::ops::Bound::Unbounded,
                ))
                .next()
                .map(|(k, _)| k.clone());
            (occupied, next_key)
        };

        // A concurrent move may already hold the target position. A remote
        // move slots in right after the occupant; a local reapplication
        // (undo/redo, reconnect replay) keeps the position its history
        // entry recorded and the occupant is bumped aside instead.
        let final_key = if occupied && !source.is_local() {
            pos::make_position(Some(new_key), next_key.as_deref())
        } else {
            if occupied {
                self.bump_list_occupant(&parent, new_key);
            }
            new_key.to_owned()
        };

        if let Some(NodeBody::List { children }) = self.nodes.get_mut(&parent).map(|p| &mut p.body)
        {
            children.remove(&old_key);
            children.insert(final_key.clone(), id.to_owned());
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = ParentLink::HasParent { parent: parent.clone(), key: final_key.clone() };
        }

        ApplyResult {
            modified: Some(StorageUpdate {
                node_id: parent,
                update: NodeUpdate::List {
                    changes: [(final_key, ListChange::Move)].into_iter().collect(),
                },
            }),
            reverse: vec![Op::SetParentKey { op_id: None, id: id.to_owned(), parent_key: old_key }],
        }
    }

    fn apply_create(
        &mut self,
        id: &str,
        parent_id: Option<&str>,
        parent_key: Option<&str>,
        body: NodeBody,
        source: OpSource,
    ) -> ApplyResult {
        let (Some(parent_id), Some(parent_key)) = (parent_id, parent_key) else {
            // Root creation is not an op; it comes from the initial storage
            // state.
            return ApplyResult::unmodified();
        };
        if !self.nodes.contains_key(parent_id) {
            return ApplyResult::unmodified();
        }
        if self.nodes.contains_key(id) {
            if source == OpSource::Ack {
                // Our own echo; the local apply already attached it.
                return ApplyResult::unmodified();
            }
            self.detach_from_parent(id);
            self.remove_subtree(id);
        }

        let mut reverse = vec![Op::DeleteCrdt { op_id: None, id: id.to_owned() }];
        let parent_body = self.nodes.get(parent_id).map(|p| p.body.clone());
        let (final_key, update) = match parent_body {
            Some(NodeBody::Object { entries }) => {
                match entries.get(parent_key) {
                    Some(ObjectEntry::Plain(old)) => {
                        let mut data = JsonObject::new();
                        data.insert(parent_key.to_owned(), old.clone());
                        reverse.push(Op::UpdateObject {
                            op_id: None,
                            id: parent_id.to_owned(),
                            data,
                        });
                    }
                    Some(ObjectEntry::Child(displaced)) => {
                        let displaced = displaced.clone();
                        reverse.extend(self.subtree_create_ops(&displaced));
                        self.remove_subtree(&displaced);
                    }
                    None => {}
                }
                (
                    parent_key.to_owned(),
                    NodeUpdate::Object {
                        changes: [(parent_key.to_owned(), FieldChange::Update)]
                            .into_iter()
                            .collect(),
                    },
                )
            }
            Some(NodeBody::Map { entries }) => {
                if let Some(displaced) = entries.get(parent_key) {
                    let displaced = displaced.clone();
                    reverse.extend(self.subtree_create_ops(&displaced));
                    self.remove_subtree(&displaced);
                }
                (
                    parent_key.to_owned(),
                    NodeUpdate::Map {
                        changes: [(parent_key.to_owned(), FieldChange::Update)]
                            .into_iter()
                            .collect(),
                    },
                )
            }
            Some(NodeBody::List { children }) => {
                // Position collision with a concurrent insert. A remote
                // attach slots in right after the occupant; a local
                // reapplication keeps its recorded position and bumps the
                // occupant aside.
                let final_key = if children.contains_key(parent_key) {
                    if source.is_local() {
                        self.bump_list_occupant(parent_id, parent_key);
                        parent_key.to_owned()
                    } else {
                        let next = children
                            .range::<str, _>((
                                std::ops::Bound::Excluded(parent_key),
                                std::ops::Bound::Unbounded,
                            ))
                            .next()
                            .map(|(k, _)| k.clone());
                        pos::make_position(Some(parent_key), next.as_deref())
                    }
                } else {
                    parent_key.to_owned()
                };
                let update = NodeUpdate::List {
                    changes: [(final_key.clone(), ListChange::Insert)].into_iter().collect(),
                };
                (final_key, update)
            }
            Some(NodeBody::Register { .. }) | None => return ApplyResult::unmodified(),
        };

        self.nodes.insert(
            id.to_owned(),
            Node {
                id: id.to_owned(),
                parent: ParentLink::HasParent {
                    parent: parent_id.to_owned(),
                    key: final_key.clone(),
                },
                body,
            },
        );
        self.link_into_parent(parent_id, &final_key, id);

        ApplyResult {
            modified: Some(StorageUpdate { node_id: parent_id.to_owned(), update }),
            reverse,
        }
    }

    /// Move the child holding `key` in a list one slot down (to a position
    /// between `key` and its successor), freeing `key` for a local
    /// reapplication that must keep its recorded position.
    fn bump_list_occupant(&mut self, list_id: &str, key: &str) {
        let (occupant, new_key) = {
            let Some(NodeBody::List { children }) = self.nodes.get(list_id).map(|n| &n.body)
            else {
                return;
            };
            let Some(occupant) = children.get(key).cloned() else {
                return;
            };
            let next = children
                .range::<str, _>((std::ops::Bound::Excluded(key), std::ops::Bound::Unbounded))
                .next()
                .map(|(k, _)| k.clone());
            (occupant, pos::make_position(Some(key), next.as_deref()))
        };

        if let Some(NodeBody::List { children }) =
            self.nodes.get_mut(list_id).map(|n| &mut n.body)
        {
            children.remove(key);
            children.insert(new_key.clone(), occupant.clone());
        }
        if let Some(node) = self.nodes.get_mut(&occupant) {
            node.parent = ParentLink::HasParent { parent: list_id.to_owned(), key: new_key };
        }
    }

    /// Drop the parent's entry pointing at `id`, if any.
    fn detach_from_parent(&mut self, id: &str) {
        let Some(ParentLink::HasParent { parent, key }) =
            self.nodes.get(id).map(|n| n.parent.clone())
        else {
            return;
        };
        match self.nodes.get_mut(&parent).map(|p| &mut p.body) {
            Some(NodeBody::Object { entries }) => {
                entries.remove(&key);
            }
            Some(NodeBody::Map { entries }) => {
                entries.remove(&key);
            }
            Some(NodeBody::List { children }) => {
                children.remove(&key);
            }
            _ => {}
        }
    }

    /// Remove `id` and everything below it from the table. The parent's
    /// entry for `id` is left to the caller, which knows the context.
    fn remove_subtree(&mut self, id: &str) {
        let mut stack = vec![id.to_owned()];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.remove(&current) else {
                continue;
            };
            match node.body {
                NodeBody::Object { entries } => {
                    stack.extend(entries.into_values().filter_map(|entry| match entry {
                        ObjectEntry::Child(child) => Some(child),
                        ObjectEntry::Plain(_) => None,
                    }));
                }
                NodeBody::Map { entries } => stack.extend(entries.into_values()),
                NodeBody::List { children } => stack.extend(children.into_values()),
                NodeBody::Register { .. } => {}
            }
        }
        if self.root_id.as_deref() == Some(id) {
            self.root_id = None;
        }
    }
}

fn body_of(serialized: &SerializedNode) -> NodeBody {
    match serialized {
        SerializedNode::Object { data, .. } => NodeBody::Object {
            entries: data.iter().map(|(k, v)| (k.clone(), ObjectEntry::Plain(v.clone()))).collect(),
        },
        SerializedNode::Map { .. } => NodeBody::Map { entries: BTreeMap::new() },
        SerializedNode::List { .. } => NodeBody::List { children: BTreeMap::new() },
        SerializedNode::Register { data, .. } => NodeBody::Register { data: data.clone() },
    }
}

fn plain_data(entries: &BTreeMap<String, ObjectEntry>) -> JsonObject {
    entries
        .iter()
        .filter_map(|(k, entry)| match entry {
            ObjectEntry::Plain(value) => Some((k.clone(), value.clone())),
            ObjectEntry::Child(_) => None,
        })
        .collect()
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
