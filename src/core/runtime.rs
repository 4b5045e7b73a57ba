// src/core/runtime.rs

//! The explicit Runtime context (§9: "the `LOCAL` singleton becomes an
//! explicit Runtime context value threaded through every handler"). Owns
//! the registry, the local instance's identity, and the live set of peer
//! sessions; grounded on the teacher's `ServerState`.

use crate::config::Config;
use crate::core::cluster::PeerSession;
use crate::core::registry::Registry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which owner a fired timer belongs to (§9: "Dynamic dispatch via `void *`
/// callback contexts becomes tagged variants").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerOwner {
    Node(u32),
    Location(u32),
    Ha(u32),
}

pub struct Runtime {
    pub config: Config,
    pub registry: Arc<Registry>,
    /// Outbound peer message senders, keyed by Location index, so a
    /// registry mutation can be fanned out to every ACTIVE peer (§4.7).
    pub peer_outbound: DashMap<u32, mpsc::Sender<crate::core::protocol::PeerMessage>>,
    next_msg_id: std::sync::atomic::AtomicU32,
}

impl Runtime {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            peer_outbound: DashMap::new(),
            next_msg_id: std::sync::atomic::AtomicU32::new(1),
        }
    }

    pub fn self_hw_id(&self) -> u32 {
        self.config.instance.index
    }

    pub fn next_msg_id(&self) -> u32 {
        self.next_msg_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// Milliseconds since the epoch, used as the `timestamp` field on
    /// outbound peer messages (§6.2).
    pub fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Send a peer message to every currently-ACTIVE Location other than
    /// the one it originated from, per the steady-state gossip rule.
    pub async fn gossip(&self, msg: crate::core::protocol::PeerMessage, exclude: Option<u32>) {
        for entry in self.peer_outbound.iter() {
            let location_index = *entry.key();
            if Some(location_index) == exclude {
                continue;
            }
            let _ = entry.value().send(msg.clone()).await;
        }
    }

    pub fn new_peer_session(
        self: &Arc<Self>,
        location_index: u32,
        outbound: mpsc::Sender<crate::core::protocol::PeerMessage>,
    ) -> PeerSession {
        self.peer_outbound.insert(location_index, outbound.clone());
        PeerSession::new(
            location_index,
            self.self_hw_id(),
            self.registry.clone(),
            outbound,
            self.config.cluster_heartbeat.threshold,
        )
    }
}
