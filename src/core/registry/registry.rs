// src/core/registry/registry.rs

//! The Global Registry: owns the authoritative in-memory tables keyed by
//! stable ids, and the subscription/notification engine that watches them.
//! Grounded on the teacher's `ClusterState` (`core/cluster/state.rs`):
//! one `DashMap` per table, secondary indexes as separate maps keyed on
//! the alternative field.

use super::entities::{Interface, Location, Node, Process, Role};
use super::subscription::{Notification, NotificationType, SubsType, Subscriber, Subscription};
use crate::core::errors::{HmError, HmResult};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

pub struct Registry {
    pub locations: DashMap<u32, Location>,
    pub nodes: DashMap<u32, Node>,
    /// Keyed by (node_index, pid) — secondary invariant: exactly one
    /// Process row per (Node, pid).
    pub processes: DashMap<(u32, u32), Process>,
    /// Keyed by interface id, which is cluster-unique.
    pub interfaces: DashMap<u32, Interface>,

    pending: DashMap<u64, Subscription>,
    active: DashMap<u64, Subscription>,
    next_sub_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            locations: DashMap::new(),
            nodes: DashMap::new(),
            processes: DashMap::new(),
            interfaces: DashMap::new(),
            pending: DashMap::new(),
            active: DashMap::new(),
            next_sub_id: AtomicU64::new(1),
        }
    }

    // ----------------------------------------------------------------
    // Location
    // ----------------------------------------------------------------

    pub fn add_location(&self, loc: Location) -> Vec<Notification> {
        let index = loc.index;
        self.locations.insert(index, loc);
        self.activate_matching(SubsType::Location, index)
    }

    pub fn remove_location(&self, index: u32) -> Vec<Notification> {
        let mut notes = Vec::new();
        if let Some((_, loc)) = self.locations.remove(&index) {
            notes.push(Notification {
                kind: NotificationType::LocationInactive,
                row_id: index,
                group: None,
                target_kind: SubsType::Location,
                target_value: index,
            });
            for node_index in loc.node_tree.keys().copied().collect::<Vec<_>>() {
                notes.extend(self.remove_node(node_index));
            }
            notes.extend(self.deactivate_matching(SubsType::Location, index));
        }
        notes
    }

    // ----------------------------------------------------------------
    // Node
    // ----------------------------------------------------------------

    pub fn add_node(&self, node: Node) -> HmResult<Vec<Notification>> {
        let index = node.index;
        let location_index = node.location_index;
        let group = node.group;
        if self.nodes.contains_key(&index) {
            return Err(HmError::DuplicateIndex(index));
        }
        {
            let mut loc = self
                .locations
                .get_mut(&location_index)
                .ok_or(HmError::LocationNotFound(location_index))?;
            loc.node_tree.insert(index, ());
        }
        self.nodes.insert(index, node);

        // No subscriber could already be bound to this index/group before this
        // row existed, so activate_matching's own constructive notifications
        // are the only delivery needed — no separate push here.
        let mut notes = self.activate_matching(SubsType::Node, index);
        notes.extend(self.activate_matching(SubsType::Group, group));
        Ok(notes)
    }

    pub fn remove_node(&self, index: u32) -> Vec<Notification> {
        let mut notes = Vec::new();
        if let Some((_, node)) = self.nodes.remove(&index) {
            notes.push(Notification {
                kind: NotificationType::NodeInactive,
                row_id: index,
                group: Some(node.group),
                target_kind: SubsType::Node,
                target_value: index,
            });
            if let Some(mut loc) = self.locations.get_mut(&node.location_index) {
                loc.node_tree.remove(&index);
            }
            for pid in node.process_tree.keys().copied().collect::<Vec<_>>() {
                notes.extend(self.remove_process(index, pid));
            }
            if let Some(partner_index) = node.partner {
                if let Some(mut partner) = self.nodes.get_mut(&partner_index) {
                    partner.partner = None;
                }
            }
            notes.extend(self.deactivate_matching(SubsType::Node, index));
        }
        notes
    }

    pub fn update_node_role(&self, index: u32, role: Role) -> HmResult<Vec<Notification>> {
        let group = {
            let mut node = self.nodes.get_mut(&index).ok_or(HmError::NodeNotFound(index))?;
            node.current_role = role;
            node.group
        };
        trace!(node = index, ?role, "role updated");
        Ok(vec![Notification {
            kind: NotificationType::NodeActive,
            row_id: index,
            group: Some(group),
            target_kind: SubsType::Node,
            target_value: index,
        }])
    }

    // ----------------------------------------------------------------
    // Process / Interface
    // ----------------------------------------------------------------

    pub fn add_process(&self, proc: Process) -> HmResult<Vec<Notification>> {
        let key = (proc.node_index, proc.pid);
        if self.processes.contains_key(&key) {
            return Err(HmError::Protocol(format!(
                "duplicate process pid {} on node {}",
                proc.pid, proc.node_index
            )));
        }
        {
            let mut node = self
                .nodes
                .get_mut(&proc.node_index)
                .ok_or(HmError::NodeNotFound(proc.node_index))?;
            node.process_tree.insert(proc.pid, ());
        }
        self.processes.insert(key, proc);
        // Same reasoning as add_node: a brand-new row can't have a prior
        // active subscriber, so activate_matching's notification is enough.
        Ok(self.activate_matching(SubsType::Proc, key.1))
    }

    pub fn remove_process(&self, node_index: u32, pid: u32) -> Vec<Notification> {
        let mut notes = Vec::new();
        if let Some((_, proc)) = self.processes.remove(&(node_index, pid)) {
            notes.push(Notification {
                kind: NotificationType::ProcessDestroyed,
                row_id: pid,
                group: None,
                target_kind: SubsType::Proc,
                target_value: pid,
            });
            if let Some(mut node) = self.nodes.get_mut(&node_index) {
                node.process_tree.remove(&pid);
                for iface_id in &proc.interfaces {
                    node.interface_tree.remove(iface_id);
                }
            }
            for iface_id in proc.interfaces {
                self.interfaces.remove(&iface_id);
                notes.push(Notification {
                    kind: NotificationType::InterfaceDeleted,
                    row_id: iface_id,
                    group: None,
                    target_kind: SubsType::If,
                    target_value: iface_id,
                });
                notes.extend(self.deactivate_matching(SubsType::If, iface_id));
            }
            notes.extend(self.deactivate_matching(SubsType::Proc, pid));
        }
        notes
    }

    pub fn add_interface(&self, iface: Interface) -> HmResult<Vec<Notification>> {
        let id = iface.id;
        if self.interfaces.contains_key(&id) {
            return Err(HmError::Protocol(format!("duplicate interface id {id}")));
        }
        {
            let mut proc = self
                .processes
                .get_mut(&(iface.node_index, iface.process_pid))
                .ok_or_else(|| HmError::Protocol("owning process not found".into()))?;
            proc.interfaces.push(id);
        }
        if let Some(mut node) = self.nodes.get_mut(&iface.node_index) {
            node.interface_tree.insert(id, ());
        }
        self.interfaces.insert(id, iface);
        Ok(self.activate_matching(SubsType::If, id))
    }

    // ----------------------------------------------------------------
    // Subscription engine (§4.6)
    // ----------------------------------------------------------------

    /// `subscribe(type, value, subscriber) -> subscription id`, per §4.6:
    /// append to an existing matching Subscription, or allocate pending and
    /// immediately activate if the row already exists.
    pub fn subscribe(
        &self,
        kind: SubsType,
        value: u32,
        subscriber_pid: u32,
        sender: tokio::sync::mpsc::Sender<Notification>,
    ) -> (u64, Option<Notification>) {
        if let Some(mut existing) = self
            .pending
            .iter_mut()
            .chain(self.active.iter_mut())
            .find(|s| s.kind == kind && s.value == value)
        {
            existing.subscribers.push(Subscriber {
                subscriber_pid,
                sender,
            });
            return (existing.id, None);
        }

        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let mut sub = Subscription::new(id, kind, value);
        sub.subscribers.push(Subscriber {
            subscriber_pid,
            sender,
        });

        let existing_row = self.find_row_for(kind, value);
        let constructive = existing_row.map(|row_id| {
            sub.activate(row_id);
            constructive_notification(kind, row_id)
        });

        if sub.live {
            self.active.insert(id, sub);
        } else {
            self.pending.insert(id, sub);
        }
        debug!(subscription = id, ?kind, value, "subscription registered");
        (id, constructive)
    }

    /// `unsubscribe(subscription, subscriber)`: drop the subscriber; if the
    /// list empties, remove the Subscription entirely (the resolution
    /// adopted for Open Question 3 — see DESIGN.md).
    pub fn unsubscribe(&self, id: u64, subscriber_pid: u32) {
        for map in [&self.pending, &self.active] {
            if let Some(mut sub) = map.get_mut(&id) {
                sub.subscribers.retain(|s| s.subscriber_pid != subscriber_pid);
                if sub.subscribers.is_empty() {
                    drop(sub);
                    map.remove(&id);
                }
                return;
            }
        }
    }

    fn find_row_for(&self, kind: SubsType, value: u32) -> Option<u32> {
        match kind {
            SubsType::Node => self.nodes.contains_key(&value).then_some(value),
            SubsType::Location => self.locations.contains_key(&value).then_some(value),
            SubsType::If => self.interfaces.contains_key(&value).then_some(value),
            SubsType::Proc => self
                .processes
                .iter()
                .find(|e| e.key().1 == value)
                .map(|_| value),
            SubsType::Group => self.nodes.iter().find(|n| n.group == value).map(|_| value),
        }
    }

    /// §4.5 `add(row)`: scan pending subscriptions for keys matching this
    /// row and activate each match, enqueueing a constructive notification
    /// per subscription (not per subscriber — delivery fans out to every
    /// subscriber of an activated Subscription).
    fn activate_matching(&self, kind: SubsType, value: u32) -> Vec<Notification> {
        let mut notes = Vec::new();
        let matches: Vec<u64> = self
            .pending
            .iter()
            .filter(|s| s.kind == kind && s.value == value)
            .map(|s| s.id)
            .collect();
        for id in matches {
            if let Some((id, mut sub)) = self.pending.remove(&id) {
                sub.activate(value);
                notes.push(constructive_notification(kind, value));
                self.active.insert(id, sub);
            }
        }
        notes
    }

    /// §4.5 `remove(row)`: unbind subscriptions watching the row, moving
    /// them back to pending.
    fn deactivate_matching(&self, kind: SubsType, value: u32) -> Vec<Notification> {
        let matches: Vec<u64> = self
            .active
            .iter()
            .filter(|s| s.kind == kind && s.value == value)
            .map(|s| s.id)
            .collect();
        for id in matches {
            if let Some((id, mut sub)) = self.active.remove(&id) {
                sub.deactivate();
                self.pending.insert(id, sub);
            }
        }
        Vec::new()
    }

    /// Deliver a batch of notifications FIFO, at-most-once per subscriber.
    /// A full/closed subscriber channel is dropped silently, not retried
    /// here — the per-connection task owns its own retry/backpressure.
    /// Routes on `note.target_kind`/`note.target_value` directly, since a
    /// `NotificationType` like `NodeActive` is shared by more than one
    /// subscription flavour (a Node watcher and a Group watcher both care
    /// when a node comes up) and can't be inverted back to a single
    /// `SubsType`.
    pub fn dispatch(&self, notes: Vec<Notification>) {
        for note in notes {
            for map in [&self.pending, &self.active] {
                for sub in map
                    .iter()
                    .filter(|s| s.kind == note.target_kind && s.value == note.target_value)
                {
                    for sub_entry in &sub.subscribers {
                        let _ = sub_entry.sender.try_send(note.clone());
                    }
                }
            }
        }
    }
}

fn constructive_notification(kind: SubsType, row_id: u32) -> Notification {
    let note_kind = match kind {
        SubsType::Node => NotificationType::NodeActive,
        SubsType::Location => NotificationType::LocationActive,
        SubsType::Proc => NotificationType::ProcessCreated,
        SubsType::If => NotificationType::InterfaceAdded,
        SubsType::Group => NotificationType::NodeActive,
    };
    Notification {
        kind: note_kind,
        row_id,
        group: None,
        target_kind: kind,
        target_value: row_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::entities::Node;

    #[test]
    fn subscribe_before_birth_then_activates_on_add() {
        let reg = Registry::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let (_id, immediate) = reg.subscribe(SubsType::Group, 5, 99, tx);
        assert!(immediate.is_none());

        reg.add_location(Location::new(1, 1000));
        let notes = reg
            .add_node(Node::new(42, 5, Role::Active, 1, true))
            .unwrap();
        reg.dispatch(notes);

        let delivered = rx.try_recv().expect("subscriber should receive NODE_UP");
        assert_eq!(delivered.kind, NotificationType::NodeActive);
    }

    #[test]
    fn duplicate_node_index_rejected() {
        let reg = Registry::new();
        reg.add_location(Location::new(1, 1000));
        reg.add_node(Node::new(1, 1, Role::Active, 1, true)).unwrap();
        let err = reg.add_node(Node::new(1, 1, Role::Active, 1, true));
        assert!(matches!(err, Err(HmError::DuplicateIndex(1))));
    }

    #[test]
    fn group_subscription_does_not_leak_to_node_subscribers() {
        let reg = Registry::new();
        reg.add_location(Location::new(1, 1000));
        let (group_tx, mut group_rx) = tokio::sync::mpsc::channel(8);
        let (node_tx, mut node_rx) = tokio::sync::mpsc::channel(8);
        reg.subscribe(SubsType::Group, 5, 1, group_tx);
        reg.subscribe(SubsType::Node, 999, 2, node_tx);

        let notes = reg
            .add_node(Node::new(42, 5, Role::Active, 1, true))
            .unwrap();
        reg.dispatch(notes);

        assert!(group_rx.try_recv().is_ok(), "GROUP subscriber should be notified");
        assert!(
            node_rx.try_recv().is_err(),
            "unrelated NODE subscriber must not receive the GROUP event"
        );
    }

    #[test]
    fn removing_node_unbinds_subscription_back_to_pending() {
        let reg = Registry::new();
        reg.add_location(Location::new(1, 1000));
        reg.add_node(Node::new(7, 1, Role::Active, 1, true)).unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let (id, immediate) = reg.subscribe(SubsType::Node, 7, 1, tx);
        assert!(immediate.is_some());
        assert!(reg.active.contains_key(&id));

        reg.remove_node(7);
        assert!(reg.pending.contains_key(&id));
        assert!(!reg.active.contains_key(&id));
    }
}
