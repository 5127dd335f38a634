// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-room client state machine.
//!
//! `Room` is synchronous and single-threaded: socket events, timer
//! expirations, and public API calls are its only entry points, and every
//! call runs to completion before the next. All I/O goes through the
//! injected [`Effects`] surface, so the whole machine is drivable from
//! tests with a virtual clock.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::Value;
use tandem_protocol::{
    decode_frame, encode_frame, is_server_error_code, ClientMsg, InboundFrame, JsonObject, Op,
    SerializedNode, ServerMsg, CLOSE_WITHOUT_RETRY,
};
use tokio::sync::{broadcast, watch};

use crate::auth::AuthToken;
use crate::config::RoomConfig;
use crate::connection::{fast_backoff, slow_backoff, ConnectionStatus};
use crate::crdt::{OpSource, Registry, StorageUpdate};
use crate::effects::Effects;
use crate::error::RoomError;
use crate::flush::OutBuffer;
use crate::history::{History, HistoryItem};
use crate::presence::{self, OthersEvent, OthersState, OtherUser, PresenceBuffer};
use crate::storage::{self, OfflineOps};
use crate::subscription::{
    CustomEvent, HistoryNotification, OthersNotification, Subscriptions,
};

/// Storage diffs accumulated across one apply or one inbound frame, merged
/// per node so subscribers get a single coalesced notification.
#[derive(Debug, Default)]
struct Diffs {
    storage: IndexMap<String, StorageUpdate>,
    presence: bool,
}

impl Diffs {
    fn merge(&mut self, update: StorageUpdate) {
        match self.storage.entry(update.node_id.clone()) {
            indexmap::map::Entry::Occupied(mut entry) => {
                let prev = entry.get().update.clone();
                entry.get_mut().update = crate::crdt::merge_node_updates(prev, update.update);
            }
            indexmap::map::Entry::Vacant(entry) => {
                entry.insert(update);
            }
        }
    }

    fn absorb(&mut self, other: Diffs) {
        for (_, update) in other.storage {
            self.merge(update);
        }
        self.presence |= other.presence;
    }
}

/// Result of applying one entry of items.
#[derive(Debug, Default)]
struct ApplyOutcome {
    /// Reverse items, prepend-ordered: replaying them front to back undoes
    /// the entry.
    reverse: Vec<HistoryItem>,
    /// Ops as actually applied (op ids assigned), for outbound buffering.
    /// Populated for local applies only.
    applied_ops: Vec<Op>,
    diffs: Diffs,
}

/// Mutations accumulated inside an open batch.
#[derive(Debug, Default)]
struct BatchState {
    reverse: Vec<HistoryItem>,
    ops: Vec<Op>,
    diffs: Diffs,
}

pub struct Room {
    config: RoomConfig,
    effects: Box<dyn Effects + Send>,

    status: ConnectionStatus,
    /// Actor of the most recent `Open` transition; `Some` means at least one
    /// prior connection happened this session.
    last_connection_id: Option<u32>,
    retries: u32,
    actor: Option<u32>,
    user_id: Option<String>,
    user_info: Option<Value>,

    /// Per-connection counters: node ids and op ids.
    clock: u32,
    op_clock: u32,

    me: JsonObject,
    others: OthersState,

    registry: Registry,
    storage_requested: bool,
    offline_ops: OfflineOps,

    buffer: OutBuffer,
    last_flush_ms: u64,
    flush_armed: bool,

    history: History,
    batch: Option<BatchState>,

    subs: Subscriptions,
}

impl Room {
    pub fn new(config: RoomConfig, effects: Box<dyn Effects + Send>) -> Self {
        let me = config.initial_presence.clone();
        // The first flush after connecting announces the new participant.
        let buffer = OutBuffer {
            presence: Some(PresenceBuffer::Full(me.clone())),
            ..OutBuffer::default()
        };
        Self {
            config,
            effects,
            status: ConnectionStatus::Closed,
            last_connection_id: None,
            retries: 0,
            actor: None,
            user_id: None,
            user_info: None,
            clock: 0,
            op_clock: 0,
            me,
            others: OthersState::default(),
            registry: Registry::new(),
            storage_requested: false,
            offline_ops: OfflineOps::default(),
            buffer,
            last_flush_ms: 0,
            flush_armed: false,
            history: History::default(),
            batch: None,
            subs: Subscriptions::new(),
        }
    }

    // -- Connection lifecycle -------------------------------------------------

    /// Start connecting. A no-op unless closed or unavailable.
    pub fn connect(&mut self) {
        match self.status {
            ConnectionStatus::Closed | ConnectionStatus::Unavailable => {}
            _ => return,
        }
        self.set_status(ConnectionStatus::Authenticating);
        self.effects.authenticate();
    }

    /// Auth finished: record identity, reset the per-connection clocks, and
    /// wait for the socket to open.
    pub fn authentication_success(&mut self, token: &AuthToken) {
        self.actor = Some(token.actor);
        self.user_id = token.id.clone();
        self.user_info = token.info.clone();
        self.clock = 0;
        self.op_clock = 0;
        self.set_status(ConnectionStatus::Connecting {
            actor: token.actor,
            user_id: token.id.clone(),
            user_info: token.info.clone(),
        });
    }

    pub fn authentication_failure(&mut self, message: &str) {
        tracing::warn!(err = %message, room = %self.config.room_id, "authentication failed");
        self.set_status(ConnectionStatus::Unavailable);
        self.effects.schedule_reconnect(fast_backoff(self.retries));
        self.retries += 1;
    }

    /// The socket finished its handshake.
    pub fn socket_open(&mut self) {
        self.effects.start_heartbeat(self.config.heartbeat_interval());
        if let ConnectionStatus::Connecting { actor, user_id, user_info } = self.status.clone() {
            self.retries = 0;
            self.set_status(ConnectionStatus::Open { actor, user_id, user_info });
            if self.last_connection_id.is_some() {
                // Reconnection: peers lost our presence with the old socket,
                // and the tree may have moved on without us.
                self.buffer.presence = Some(PresenceBuffer::Full(self.me.clone()));
                if self.registry.root_id().is_some() {
                    self.buffer.messages.push(ClientMsg::FetchStorage);
                }
            }
            self.last_connection_id = Some(actor);
        }
        self.try_flush();
    }

    /// The socket closed. Doubles as the simulate-close hook in tests.
    pub fn socket_close(&mut self, code: u16, reason: &str) {
        tracing::debug!(code, reason, room = %self.config.room_id, "socket closed");
        self.clear_timers();

        self.others.clear();
        self.subs.notify_others(OthersEvent::Reset, Vec::new());

        if is_server_error_code(code) {
            self.set_status(ConnectionStatus::Failed);
            self.subs.notify_error(RoomError::Protocol { code, reason: reason.to_owned() });
            self.set_status(ConnectionStatus::Unavailable);
            self.effects.schedule_reconnect(slow_backoff(self.retries));
            self.retries += 1;
        } else if code == CLOSE_WITHOUT_RETRY {
            self.set_status(ConnectionStatus::Closed);
        } else {
            self.set_status(ConnectionStatus::Unavailable);
            self.effects.schedule_reconnect(fast_backoff(self.retries));
            self.retries += 1;
        }
    }

    pub fn socket_error(&mut self, message: &str) {
        tracing::debug!(err = %message, room = %self.config.room_id, "socket error");
    }

    /// Full socket teardown followed by a fresh connect.
    pub fn reconnect(&mut self) {
        self.effects.close_socket();
        self.clear_timers();
        self.set_status(ConnectionStatus::Unavailable);
        self.connect();
    }

    /// Tear everything down. Idempotent; terminal until the next `connect`.
    pub fn disconnect(&mut self) {
        self.effects.close_socket();
        self.clear_timers();
        self.others.clear();
        self.set_status(ConnectionStatus::Closed);
        self.subs.notify_others(OthersEvent::Reset, Vec::new());
        self.subs.reset();
    }

    fn clear_timers(&mut self) {
        self.effects.stop_heartbeat();
        self.effects.clear_pong_timeout();
        self.effects.clear_flush();
        self.flush_armed = false;
        self.effects.clear_reconnect();
    }

    // -- Timers ---------------------------------------------------------------

    /// Heartbeat interval fired (or was forced by a visibility change).
    pub fn heartbeat_tick(&mut self) {
        if self.status.is_open() {
            self.effects.send("ping".to_owned());
            self.effects.schedule_pong_timeout(self.config.pong_timeout());
        }
    }

    /// No pong arrived in time: assume a dead socket.
    pub fn pong_timeout(&mut self) {
        tracing::debug!(room = %self.config.room_id, "pong timeout, reconnecting");
        self.reconnect();
    }

    pub fn flush_due(&mut self) {
        self.flush_armed = false;
        self.try_flush();
    }

    pub fn reconnect_due(&mut self) {
        self.connect();
    }

    // -- Environment hooks ----------------------------------------------------

    /// Force an immediate heartbeat when the page becomes visible while
    /// open: early detection of sockets that died during suspend.
    pub fn on_visibility_change(&mut self, visibility: &str) {
        if visibility == "visible" && self.status.is_open() {
            self.heartbeat_tick();
        }
    }

    pub fn on_navigator_online(&mut self) {
        if self.status == ConnectionStatus::Unavailable {
            self.reconnect();
        }
    }

    // -- Inbound --------------------------------------------------------------

    /// One inbound text frame. Malformed frames are dropped without
    /// disturbing state.
    pub fn socket_message(&mut self, text: &str) {
        match decode_frame(text) {
            None => {
                tracing::debug!(room = %self.config.room_id, "dropping malformed frame");
            }
            Some(InboundFrame::Ping) => {}
            Some(InboundFrame::Pong) => self.effects.clear_pong_timeout(),
            Some(InboundFrame::Messages(msgs)) => {
                let mut diffs = Diffs::default();
                for msg in msgs {
                    self.handle_server_msg(msg, &mut diffs);
                }
                self.notify_diffs(diffs);
                self.try_flush();
            }
        }
    }

    fn handle_server_msg(&mut self, msg: ServerMsg, diffs: &mut Diffs) {
        match msg {
            ServerMsg::UserJoined { actor, id, info } => {
                self.others.join(actor, id, info);
                self.subs.notify_others(OthersEvent::Enter { actor }, self.others.view());
                // The newcomer has not seen our presence; send it targeted.
                self.buffer.messages.push(ClientMsg::UpdatePresence {
                    data: self.me.clone(),
                    target_actor: Some(actor as i64),
                });
            }
            ServerMsg::UpdatePresence { actor, data, target_actor } => {
                if self.others.apply_update(actor, &data, target_actor.is_some()) {
                    self.subs.notify_others(OthersEvent::Update { actor }, self.others.view());
                } else {
                    tracing::debug!(actor, "dropping presence diff before initial presence");
                }
            }
            ServerMsg::UserLeft { actor } => {
                if self.others.leave(actor) {
                    self.subs.notify_others(OthersEvent::Leave { actor }, self.others.view());
                }
            }
            ServerMsg::RoomState { users } => {
                self.others.reset(&users);
                self.subs.notify_others(OthersEvent::Reset, self.others.view());
            }
            ServerMsg::BroadcastedEvent { actor, event } => {
                self.subs.notify_event(actor, event);
            }
            ServerMsg::InitialStorageState { items } => {
                self.handle_initial_storage(items, diffs);
            }
            ServerMsg::UpdateStorage { ops } => {
                let items: Vec<HistoryItem> = ops.into_iter().map(HistoryItem::Op).collect();
                let outcome = self.apply_items(&items, false);
                diffs.absorb(outcome.diffs);
            }
        }
    }

    fn handle_initial_storage(&mut self, items: Vec<(String, SerializedNode)>, diffs: &mut Diffs) {
        if items.is_empty() {
            tracing::warn!(room = %self.config.room_id, "initial storage state carried no items");
            self.subs.notify_error(RoomError::EmptyStorageItems);
            return;
        }

        // Snapshot before reconciliation so ops produced below are not
        // mistaken for stale resends.
        let snapshot: Vec<Op> = self.offline_ops.drain(..).map(|(_, op)| op).collect();

        if self.registry.root_id().is_none() {
            match Registry::from_items(&items) {
                Ok(registry) => self.registry = registry,
                Err(e) => {
                    tracing::warn!(err = %e, room = %self.config.room_id, "failed to load storage");
                    return;
                }
            }
        } else {
            let current = self.registry.serialize();
            let ops = storage::tree_diff_ops(&current, &items);
            let items: Vec<HistoryItem> = ops.into_iter().map(HistoryItem::Op).collect();
            let outcome = self.apply_items(&items, false);
            diffs.absorb(outcome.diffs);
        }

        self.seed_default_storage(diffs);
        self.apply_and_send_offline_ops(snapshot, diffs);

        self.storage_requested = false;
        self.subs.mark_storage_loaded();
    }

    /// Populate a brand-new room: any default-storage key the root lacks is
    /// set with an ordinary local op.
    fn seed_default_storage(&mut self, diffs: &mut Diffs) {
        let Some(root) = self.registry.root_id().map(str::to_owned) else {
            return;
        };
        let missing: JsonObject = self
            .config
            .initial_storage
            .iter()
            .filter(|(key, _)| !self.registry.object_entry_exists(&root, key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if missing.is_empty() {
            return;
        }
        let items = vec![HistoryItem::Op(Op::UpdateObject { op_id: None, id: root, data: missing })];
        let outcome = self.apply_items(&items, true);
        self.buffer.storage_ops.extend(outcome.applied_ops);
        diffs.absorb(outcome.diffs);
    }

    /// Replay ops that were pending when the connection dropped: apply them
    /// as local against the reconciled tree and send them in one storage
    /// message, bypassing the throttle. They stay recorded until the server
    /// echoes them back.
    fn apply_and_send_offline_ops(&mut self, snapshot: Vec<Op>, diffs: &mut Diffs) {
        if snapshot.is_empty() {
            return;
        }
        let items: Vec<HistoryItem> = snapshot.into_iter().map(HistoryItem::Op).collect();
        let outcome = self.apply_items(&items, true);
        diffs.absorb(outcome.diffs);

        for op in &outcome.applied_ops {
            if let Some(op_id) = op.op_id() {
                self.offline_ops.insert(op_id.to_owned(), op.clone());
            }
        }
        if let Some(frame) = encode_frame(&[ClientMsg::UpdateStorage { ops: outcome.applied_ops }]) {
            self.effects.send(frame);
        }
    }

    // -- Apply loop -----------------------------------------------------------

    /// Apply a sequence of items. Local applies use the reapplication
    /// source; remote items matching a pending offline op acknowledge it.
    fn apply_items(&mut self, items: &[HistoryItem], is_local: bool) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        let mut created: HashSet<String> = HashSet::new();

        for item in items {
            match item {
                HistoryItem::Presence(patch) => {
                    let reverse = presence::reverse_patch(&self.me, patch);
                    presence::merge_presence(&mut self.me, patch);
                    PresenceBuffer::merge(
                        &mut self.buffer.presence,
                        PresenceBuffer::Partial(patch.clone()),
                    );
                    outcome.reverse.insert(0, HistoryItem::Presence(reverse));
                    outcome.diffs.presence = true;
                }
                HistoryItem::Op(op) => {
                    let mut op = op.clone();
                    if op.op_id().is_none() {
                        // Only ops synthesized by undo/redo lack one.
                        op.set_op_id(self.next_op_id());
                    }
                    let source = if is_local {
                        OpSource::UndoRedoReconnect
                    } else {
                        match op.op_id() {
                            Some(op_id) if self.offline_ops.shift_remove(op_id).is_some() => {
                                OpSource::Ack
                            }
                            _ => OpSource::Remote,
                        }
                    };

                    let result = self.registry.apply_op(&op, source);
                    if let Some(update) = result.modified {
                        if op.is_create() {
                            created.insert(op.target_id().to_owned());
                        }
                        // A child landing inside a node created earlier in
                        // this same apply is already covered by that node's
                        // own creation update.
                        if !created.contains(&update.node_id) {
                            outcome.diffs.merge(update);
                        }
                    }
                    let reversed: Vec<HistoryItem> =
                        result.reverse.into_iter().map(HistoryItem::Op).collect();
                    outcome.reverse.splice(0..0, reversed);

                    if is_local {
                        outcome.applied_ops.push(op);
                    }
                }
            }
        }

        outcome
    }

    fn notify_diffs(&mut self, diffs: Diffs) {
        if diffs.presence {
            self.subs.notify_my_presence(self.me.clone());
        }
        if !diffs.storage.is_empty() {
            let updates: Vec<StorageUpdate> = diffs.storage.into_values().collect();
            self.subs.notify_storage(&updates, &self.registry);
        }
    }

    // -- Presence -------------------------------------------------------------

    pub fn me(&self) -> &JsonObject {
        &self.me
    }

    pub fn others(&self) -> Vec<OtherUser> {
        self.others.view()
    }

    /// Merge a partial update into own presence. With `add_to_history`, the
    /// change is undoable.
    pub fn update_presence(&mut self, patch: JsonObject, add_to_history: bool) {
        let reverse = presence::reverse_patch(&self.me, &patch);
        presence::merge_presence(&mut self.me, &patch);
        PresenceBuffer::merge(&mut self.buffer.presence, PresenceBuffer::Partial(patch));

        if let Some(batch) = &mut self.batch {
            if add_to_history {
                batch.reverse.insert(0, HistoryItem::Presence(reverse));
            }
            batch.diffs.presence = true;
            return;
        }

        let mut history_changed = self.history.clear_redo();
        if add_to_history {
            self.history.record(vec![HistoryItem::Presence(reverse)]);
            history_changed = true;
        }
        if history_changed {
            self.notify_history();
        }
        self.subs.notify_my_presence(self.me.clone());
        self.try_flush();
    }

    /// Broadcast an application event to everyone in the room.
    pub fn broadcast_event(&mut self, event: Value) {
        self.buffer.messages.push(ClientMsg::BroadcastEvent { event });
        self.try_flush();
    }

    // -- Storage --------------------------------------------------------------

    /// Ask the server for the storage tree. No-op once loaded or while a
    /// fetch is pending; loading resolves the [`Self::storage_loaded`] watch.
    pub fn request_storage(&mut self) {
        if self.registry.root_id().is_some() || self.storage_requested {
            return;
        }
        self.storage_requested = true;
        self.buffer.messages.push(ClientMsg::FetchStorage);
        self.try_flush();
    }

    pub fn is_storage_loaded(&self) -> bool {
        self.registry.root_id().is_some()
    }

    pub fn storage_root(&self) -> Option<String> {
        self.registry.root_id().map(str::to_owned)
    }

    /// Plain JSON snapshot of the whole document.
    pub fn storage_snapshot(&self) -> Option<Value> {
        self.registry.root_id().and_then(|root| self.registry.snapshot(root))
    }

    /// Snapshot of one node's subtree.
    pub fn node_snapshot(&self, id: &str) -> Option<Value> {
        self.registry.snapshot(id)
    }

    pub fn create_object(
        &mut self,
        parent_id: &str,
        parent_key: &str,
        data: JsonObject,
    ) -> Result<String, RoomError> {
        let id = self.next_node_id()?;
        self.local_mutation(vec![Op::CreateObject {
            op_id: None,
            id: id.clone(),
            parent_id: Some(parent_id.to_owned()),
            parent_key: Some(parent_key.to_owned()),
            data,
        }])?;
        Ok(id)
    }

    pub fn create_map(&mut self, parent_id: &str, parent_key: &str) -> Result<String, RoomError> {
        let id = self.next_node_id()?;
        self.local_mutation(vec![Op::CreateMap {
            op_id: None,
            id: id.clone(),
            parent_id: Some(parent_id.to_owned()),
            parent_key: Some(parent_key.to_owned()),
        }])?;
        Ok(id)
    }

    pub fn create_list(&mut self, parent_id: &str, parent_key: &str) -> Result<String, RoomError> {
        let id = self.next_node_id()?;
        self.local_mutation(vec![Op::CreateList {
            op_id: None,
            id: id.clone(),
            parent_id: Some(parent_id.to_owned()),
            parent_key: Some(parent_key.to_owned()),
        }])?;
        Ok(id)
    }

    /// Attach a register under an object or map key.
    pub fn create_register(
        &mut self,
        parent_id: &str,
        parent_key: &str,
        data: Value,
    ) -> Result<String, RoomError> {
        let id = self.next_node_id()?;
        self.local_mutation(vec![Op::CreateRegister {
            op_id: None,
            id: id.clone(),
            parent_id: Some(parent_id.to_owned()),
            parent_key: Some(parent_key.to_owned()),
            data,
        }])?;
        Ok(id)
    }

    /// Insert a register into a list at `index` (clamped to the end).
    pub fn insert_at(
        &mut self,
        list_id: &str,
        index: usize,
        data: Value,
    ) -> Result<String, RoomError> {
        let position = self
            .registry
            .position_for_insert(list_id, index)
            .ok_or_else(|| RoomError::UnknownNode { id: list_id.to_owned() })?;
        self.create_register(list_id, &position, data)
    }

    /// Move a list child to `target_index`, counted with the child removed.
    pub fn move_list_item(&mut self, child_id: &str, target_index: usize) -> Result<(), RoomError> {
        let position = self
            .registry
            .position_for_move(child_id, target_index)
            .ok_or_else(|| RoomError::UnknownNode { id: child_id.to_owned() })?;
        self.local_mutation(vec![Op::SetParentKey {
            op_id: None,
            id: child_id.to_owned(),
            parent_key: position,
        }])
    }

    pub fn update_object(&mut self, id: &str, data: JsonObject) -> Result<(), RoomError> {
        self.local_mutation(vec![Op::UpdateObject { op_id: None, id: id.to_owned(), data }])
    }

    pub fn delete_key(&mut self, id: &str, key: &str) -> Result<(), RoomError> {
        self.local_mutation(vec![Op::DeleteObjectKey {
            op_id: None,
            id: id.to_owned(),
            key: key.to_owned(),
        }])
    }

    pub fn delete_node(&mut self, id: &str) -> Result<(), RoomError> {
        self.local_mutation(vec![Op::DeleteCrdt { op_id: None, id: id.to_owned() }])
    }

    fn local_mutation(&mut self, ops: Vec<Op>) -> Result<(), RoomError> {
        if self.actor.is_none() {
            return Err(RoomError::NotConnected);
        }
        let items: Vec<HistoryItem> = ops.into_iter().map(HistoryItem::Op).collect();
        let outcome = self.apply_items(&items, true);

        if let Some(batch) = &mut self.batch {
            batch.reverse.splice(0..0, outcome.reverse);
            batch.ops.extend(outcome.applied_ops);
            batch.diffs.absorb(outcome.diffs);
            return Ok(());
        }

        self.history.record(outcome.reverse);
        self.history.clear_redo();
        self.notify_history();
        self.buffer.storage_ops.extend(outcome.applied_ops);
        self.notify_diffs(outcome.diffs);
        self.try_flush();
        Ok(())
    }

    // -- Batch ----------------------------------------------------------------

    /// Group mutations into one history entry, one notification, and one
    /// flush. Nested batches are rejected.
    pub fn batch<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> Result<T, RoomError> {
        if self.batch.is_some() {
            return Err(RoomError::NestedBatch);
        }
        self.batch = Some(BatchState::default());
        let result = f(self);
        let Some(batch) = self.batch.take() else {
            return Ok(result);
        };

        let had_changes = !batch.reverse.is_empty() || !batch.ops.is_empty();
        if !batch.reverse.is_empty() {
            self.history.record(batch.reverse);
        }
        if had_changes {
            self.history.clear_redo();
            self.notify_history();
        }
        self.buffer.storage_ops.extend(batch.ops);
        self.notify_diffs(batch.diffs);
        self.try_flush();
        Ok(result)
    }

    // -- History --------------------------------------------------------------

    pub fn undo(&mut self) -> Result<(), RoomError> {
        if self.batch.is_some() {
            return Err(RoomError::HistoryInBatch);
        }
        let Some(entry) = self.history.pop_undo() else {
            return Ok(());
        };
        let outcome = self.apply_items(&entry, true);
        self.history.push_redo(outcome.reverse);
        self.notify_history();
        self.buffer.storage_ops.extend(outcome.applied_ops);
        self.notify_diffs(outcome.diffs);
        self.try_flush();
        Ok(())
    }

    pub fn redo(&mut self) -> Result<(), RoomError> {
        if self.batch.is_some() {
            return Err(RoomError::HistoryInBatch);
        }
        let Some(entry) = self.history.pop_redo() else {
            return Ok(());
        };
        let outcome = self.apply_items(&entry, true);
        self.history.push_undo(outcome.reverse);
        self.notify_history();
        self.buffer.storage_ops.extend(outcome.applied_ops);
        self.notify_diffs(outcome.diffs);
        self.try_flush();
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn pause_history(&mut self) {
        self.history.pause();
    }

    pub fn resume_history(&mut self) {
        if self.history.resume() {
            self.notify_history();
        }
    }

    fn notify_history(&self) {
        self.subs.notify_history(HistoryNotification {
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
        });
    }

    // -- Flush scheduler ------------------------------------------------------

    fn try_flush(&mut self) {
        if self.batch.is_some() {
            return;
        }

        // Record pending ops whether or not the socket is up: they are
        // resent after reconnection until acknowledged.
        for op in &self.buffer.storage_ops {
            match op.op_id() {
                Some(op_id) => {
                    self.offline_ops.insert(op_id.to_owned(), op.clone());
                }
                None => tracing::error!("storage op reached flush without an op id"),
            }
        }

        if !self.status.is_open() {
            self.buffer.storage_ops.clear();
            return;
        }

        let now = self.effects.now_ms();
        let elapsed = now.saturating_sub(self.last_flush_ms);
        if elapsed > self.config.throttle_ms {
            let Some(frame) = encode_frame(&self.buffer.compose()) else {
                return;
            };
            self.effects.send(frame);
            self.buffer.clear();
            self.last_flush_ms = now;
        } else if !self.flush_armed {
            self.effects
                .schedule_flush(std::time::Duration::from_millis(self.config.throttle_ms - elapsed));
            self.flush_armed = true;
        }
    }

    // -- Subscriptions --------------------------------------------------------

    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.subs.subscribe_connection()
    }

    pub fn subscribe_my_presence(&self) -> broadcast::Receiver<JsonObject> {
        self.subs.subscribe_my_presence()
    }

    pub fn subscribe_others(&self) -> broadcast::Receiver<OthersNotification> {
        self.subs.subscribe_others()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CustomEvent> {
        self.subs.subscribe_events()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<RoomError> {
        self.subs.subscribe_errors()
    }

    pub fn subscribe_storage(&self) -> broadcast::Receiver<Vec<StorageUpdate>> {
        self.subs.subscribe_storage()
    }

    pub fn subscribe_history(&self) -> broadcast::Receiver<HistoryNotification> {
        self.subs.subscribe_history()
    }

    /// Storage updates involving one node.
    pub fn subscribe_node(&mut self, node_id: &str) -> broadcast::Receiver<Vec<StorageUpdate>> {
        self.subs.subscribe_node(node_id, false)
    }

    /// Storage updates involving one node or any of its descendants.
    pub fn subscribe_node_deep(
        &mut self,
        node_id: &str,
    ) -> broadcast::Receiver<Vec<StorageUpdate>> {
        self.subs.subscribe_node(node_id, true)
    }

    /// Resolves to `true` once the initial storage state has been applied.
    pub fn storage_loaded(&self) -> watch::Receiver<bool> {
        self.subs.storage_loaded()
    }

    // -- Introspection --------------------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        self.status.clone()
    }

    /// Actor id of the current connection.
    pub fn connection_id(&self) -> Result<u32, RoomError> {
        self.actor.ok_or(RoomError::NotConnected)
    }

    pub fn room_id(&self) -> &str {
        &self.config.room_id
    }

    /// Ids of locally applied ops the server has not acknowledged yet.
    pub fn pending_op_ids(&self) -> Vec<String> {
        self.offline_ops.keys().cloned().collect()
    }

    // -- Internals ------------------------------------------------------------

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status == status {
            return;
        }
        tracing::debug!(
            room = %self.config.room_id,
            prev = self.status.as_str(),
            next = status.as_str(),
            "connection status"
        );
        self.status = status.clone();
        self.subs.notify_connection(status);
    }

    fn next_node_id(&mut self) -> Result<String, RoomError> {
        let actor = self.actor.ok_or(RoomError::NotConnected)?;
        let id = format!("{actor}:{}", self.clock);
        self.clock += 1;
        Ok(id)
    }

    fn next_op_id(&mut self) -> String {
        let actor = self.actor.unwrap_or_default();
        let id = format!("{actor}:{}", self.op_clock);
        self.op_clock += 1;
        id
    }
}

#[cfg(test)]
#[path = "room_tests.rs"]
mod tests;
