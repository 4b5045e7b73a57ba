// src/core/registry/subscription.rs

//! Subscription and Notification rows for the notification engine (§4.6).

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubsType {
    Group,
    Proc,
    If,
    Location,
    Node,
}

/// A registered interest in a table row, identified by `(kind, value)`.
/// `row_cb` is a weak reference (the watched row's stable id) bound only
/// while `live`; `live` and "in the active tree" are kept in lockstep by
/// construction (invariant 5 in spec §3/§8).
pub struct Subscription {
    pub id: u64,
    pub kind: SubsType,
    pub value: u32,
    pub row_cb: Option<u32>,
    pub live: bool,
    pub subscribers: Vec<Subscriber>,
}

impl Subscription {
    pub fn new(id: u64, kind: SubsType, value: u32) -> Self {
        Self {
            id,
            kind,
            value,
            row_cb: None,
            live: false,
            subscribers: Vec::new(),
        }
    }

    pub fn activate(&mut self, row_id: u32) {
        self.row_cb = Some(row_id);
        self.live = true;
    }

    pub fn deactivate(&mut self) {
        self.row_cb = None;
        self.live = false;
    }
}

/// Identity plus delivery transport for one subscriber of a Subscription.
#[derive(Clone)]
pub struct Subscriber {
    pub subscriber_pid: u32,
    pub sender: mpsc::Sender<Notification>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    NodeActive,
    NodeInactive,
    ProcessCreated,
    ProcessDestroyed,
    InterfaceAdded,
    InterfaceDeleted,
    LocationActive,
    LocationInactive,
}

/// A queued, not-yet-delivered event. Enqueued by a registry change,
/// drained FIFO at the end of each processing iteration, destroyed after
/// the delivery attempt regardless of outcome (§4.6: failed writes are a
/// transport-level retry, never re-enqueued here).
///
/// `target_kind`/`target_value` name the `(SubsType, value)` pair this
/// event should route to — carried explicitly rather than re-derived from
/// `kind`, since one `NotificationType` (e.g. `NodeActive`) can be the
/// right payload for more than one subscription flavour (a Node watcher
/// and a Group watcher both want to hear about a node coming up).
#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationType,
    pub row_id: u32,
    pub group: Option<u32>,
    pub target_kind: SubsType,
    pub target_value: u32,
}
