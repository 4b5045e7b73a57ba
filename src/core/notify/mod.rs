// src/core/notify/mod.rs

//! Per-subscriber front door onto the registry's subscription engine (§4.6).
//! Connection handlers hold one `NotifySink` each; it owns the receiving
//! half of the subscriber's notification channel and the bookkeeping needed
//! to unwind every subscription it opened when the connection closes.

use crate::core::registry::{Notification, Registry, SubsType};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const NOTIFY_CHANNEL_DEPTH: usize = 256;

/// Owns one end of the delivery channel for a single client/peer connection
/// and tracks every subscription id opened through it, so a dropped
/// connection can unwind them all without leaking pending/active rows.
pub struct NotifySink {
    registry: Arc<Registry>,
    subscriber_pid: u32,
    sender: mpsc::Sender<Notification>,
    pub receiver: mpsc::Receiver<Notification>,
    opened: Vec<u64>,
}

impl NotifySink {
    pub fn new(registry: Arc<Registry>, subscriber_pid: u32) -> Self {
        let (sender, receiver) = mpsc::channel(NOTIFY_CHANNEL_DEPTH);
        Self {
            registry,
            subscriber_pid,
            sender,
            receiver,
            opened: Vec::new(),
        }
    }

    /// Subscribe to `(kind, value)`; delivers a constructive notification
    /// immediately, through the same channel, if the row already exists.
    pub fn subscribe(&mut self, kind: SubsType, value: u32) -> u64 {
        let (id, immediate) =
            self.registry
                .subscribe(kind, value, self.subscriber_pid, self.sender.clone());
        self.opened.push(id);
        if let Some(note) = immediate {
            let _ = self.sender.try_send(note);
        }
        id
    }

    pub fn unsubscribe(&mut self, id: u64) {
        self.registry.unsubscribe(id, self.subscriber_pid);
        self.opened.retain(|&x| x != id);
    }
}

impl Drop for NotifySink {
    fn drop(&mut self) {
        for id in self.opened.drain(..) {
            self.registry.unsubscribe(id, self.subscriber_pid);
        }
    }
}
