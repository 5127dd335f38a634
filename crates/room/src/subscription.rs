// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed subscription channels.
//!
//! Each event class fans out on its own broadcast channel; dropping the
//! receiver is the unsubscribe. Node-scoped storage subscriptions keep a
//! machine-side filter and are pruned once all their receivers are gone.
//! Storage readiness is a watch channel resolved by the initial storage
//! load.

use serde_json::Value;
use tandem_protocol::JsonObject;
use tokio::sync::{broadcast, watch};

use crate::connection::ConnectionStatus;
use crate::crdt::{Registry, StorageUpdate};
use crate::error::RoomError;
use crate::presence::{OtherUser, OthersEvent};

const CHANNEL_CAPACITY: usize = 256;

/// Others change with a self-contained snapshot of the peers map.
#[derive(Debug, Clone)]
pub struct OthersNotification {
    pub event: OthersEvent,
    pub others: Vec<OtherUser>,
}

/// A user broadcast event relayed by the server.
#[derive(Debug, Clone)]
pub struct CustomEvent {
    pub connection_id: u32,
    pub event: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryNotification {
    pub can_undo: bool,
    pub can_redo: bool,
}

struct NodeSub {
    node_id: String,
    deep: bool,
    tx: broadcast::Sender<Vec<StorageUpdate>>,
}

/// All listener registries of one room.
pub struct Subscriptions {
    connection: broadcast::Sender<ConnectionStatus>,
    my_presence: broadcast::Sender<JsonObject>,
    others: broadcast::Sender<OthersNotification>,
    events: broadcast::Sender<CustomEvent>,
    errors: broadcast::Sender<RoomError>,
    storage: broadcast::Sender<Vec<StorageUpdate>>,
    history: broadcast::Sender<HistoryNotification>,
    node_subs: Vec<NodeSub>,
    storage_loaded: watch::Sender<bool>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self {
            connection: broadcast::channel(CHANNEL_CAPACITY).0,
            my_presence: broadcast::channel(CHANNEL_CAPACITY).0,
            others: broadcast::channel(CHANNEL_CAPACITY).0,
            events: broadcast::channel(CHANNEL_CAPACITY).0,
            errors: broadcast::channel(CHANNEL_CAPACITY).0,
            storage: broadcast::channel(CHANNEL_CAPACITY).0,
            history: broadcast::channel(CHANNEL_CAPACITY).0,
            node_subs: Vec::new(),
            storage_loaded: watch::channel(false).0,
        }
    }

    /// Drop every registry. Outstanding receivers observe channel closure;
    /// storage readiness resets to unloaded.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    // -- Subscribe ------------------------------------------------------------

    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.connection.subscribe()
    }

    pub fn subscribe_my_presence(&self) -> broadcast::Receiver<JsonObject> {
        self.my_presence.subscribe()
    }

    pub fn subscribe_others(&self) -> broadcast::Receiver<OthersNotification> {
        self.others.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CustomEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<RoomError> {
        self.errors.subscribe()
    }

    pub fn subscribe_storage(&self) -> broadcast::Receiver<Vec<StorageUpdate>> {
        self.storage.subscribe()
    }

    pub fn subscribe_history(&self) -> broadcast::Receiver<HistoryNotification> {
        self.history.subscribe()
    }

    /// Storage updates scoped to one node; `deep` widens the filter to the
    /// node and its descendants.
    pub fn subscribe_node(
        &mut self,
        node_id: &str,
        deep: bool,
    ) -> broadcast::Receiver<Vec<StorageUpdate>> {
        let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
        self.node_subs.push(NodeSub { node_id: node_id.to_owned(), deep, tx });
        rx
    }

    pub fn storage_loaded(&self) -> watch::Receiver<bool> {
        self.storage_loaded.subscribe()
    }

    // -- Notify ---------------------------------------------------------------

    pub fn notify_connection(&self, status: ConnectionStatus) {
        let _ = self.connection.send(status);
    }

    pub fn notify_my_presence(&self, me: JsonObject) {
        let _ = self.my_presence.send(me);
    }

    pub fn notify_others(&self, event: OthersEvent, others: Vec<OtherUser>) {
        let _ = self.others.send(OthersNotification { event, others });
    }

    pub fn notify_event(&self, connection_id: u32, event: Value) {
        let _ = self.events.send(CustomEvent { connection_id, event });
    }

    pub fn notify_error(&self, error: RoomError) {
        let _ = self.errors.send(error);
    }

    pub fn notify_history(&self, notification: HistoryNotification) {
        let _ = self.history.send(notification);
    }

    /// One coalesced storage send per notification batch, fanned out to the
    /// global channel and every matching node subscription.
    pub fn notify_storage(&mut self, updates: &[StorageUpdate], registry: &Registry) {
        if updates.is_empty() {
            return;
        }
        let _ = self.storage.send(updates.to_vec());

        self.node_subs.retain(|sub| sub.tx.receiver_count() > 0);
        for sub in &self.node_subs {
            let matching: Vec<StorageUpdate> = updates
                .iter()
                .filter(|u| {
                    if sub.deep {
                        registry.is_self_or_descendant(&u.node_id, &sub.node_id)
                    } else {
                        u.node_id == sub.node_id
                    }
                })
                .cloned()
                .collect();
            if !matching.is_empty() {
                let _ = sub.tx.send(matching);
            }
        }
    }

    pub fn mark_storage_loaded(&self) {
        let _ = self.storage_loaded.send(true);
    }
}

impl Default for Subscriptions {
    fn default() -> Self {
        Self::new()
    }
}
