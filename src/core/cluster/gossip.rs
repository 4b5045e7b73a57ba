// src/core/cluster/gossip.rs

//! Steady-state gossip and multicast discovery (§4.7, §6.3). Grounded on
//! the teacher's gossip tick loop: a periodic `tokio::time::interval`
//! driving outbound pings, paired with inbound message dispatch over a
//! bounded channel, structured as one task per Location plus one shared
//! multicast task.

use crate::core::cluster::ha;
use crate::core::cluster::replay::{apply_replay_message, build_replay_stream};
use crate::core::fsm::{peer_fsm, PeerAction, PeerSignal, PeerState};
use crate::core::protocol::PeerMessage;
use crate::core::registry::{Location, Registry, Role};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One instance per remote Location, driving its Peer FSM from inbound
/// messages and its own keepalive timer tick.
pub struct PeerSession {
    pub location_index: u32,
    pub self_hw_id: u32,
    pub registry: Arc<Registry>,
    pub outbound: mpsc::Sender<PeerMessage>,
    pub state: PeerState,
    pub kickout_threshold: u32,
}

impl PeerSession {
    pub fn new(
        location_index: u32,
        self_hw_id: u32,
        registry: Arc<Registry>,
        outbound: mpsc::Sender<PeerMessage>,
        kickout_threshold: u32,
    ) -> Self {
        Self {
            location_index,
            self_hw_id,
            registry,
            outbound,
            state: PeerState::Null,
            kickout_threshold,
        }
    }

    /// Drive one signal through the Peer FSM and perform the action it
    /// returns. State-violation cells are logged and dropped, never
    /// propagated, per the error-handling design.
    pub async fn feed(&mut self, signal: PeerSignal, now_ms: u64) {
        let (next, action) = match peer_fsm::transition(self.state, signal) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, location = self.location_index, "illegal peer signal, dropped");
                return;
            }
        };
        self.state = next;
        if let Some(mut loc) = self.registry.locations.get_mut(&self.location_index) {
            loc.fsm_state = next;
        }

        match action {
            PeerAction::Discovered => {
                debug!(location = self.location_index, "peer discovered, connecting");
            }
            PeerAction::FirstContact => {
                self.begin_contact(now_ms).await;
            }
            PeerAction::Loop => {}
            PeerAction::Disconnect => {
                self.on_disconnect();
            }
            PeerAction::Tick => {
                self.on_tick(now_ms).await;
            }
        }
    }

    async fn begin_contact(&mut self, now_ms: u64) {
        if let Some(mut loc) = self.registry.locations.get_mut(&self.location_index) {
            loc.keepalive_missed = 0;
            loc.replay_in_progress = true;
        } else {
            drop(self.registry.add_location(Location::new(
                self.location_index,
                crate::core::constants::DEFAULT_PEER_TICK_MS,
            )));
            if let Some(mut loc) = self.registry.locations.get_mut(&self.location_index) {
                loc.replay_in_progress = true;
            }
        }
        for msg in build_replay_stream(&self.registry, self.self_hw_id, now_ms, self.self_hw_id) {
            if self.outbound.send(msg).await.is_err() {
                warn!(location = self.location_index, "peer transport closed mid-replay");
                return;
            }
        }
    }

    fn on_disconnect(&self) {
        if let Some(loc) = self.registry.locations.get(&self.location_index) {
            let node_ids: Vec<u32> = loc.node_tree.keys().copied().collect();
            drop(loc);
            for node_index in node_ids {
                self.registry.dispatch(self.registry.remove_node(node_index));
            }
        }
    }

    async fn on_tick(&mut self, now_ms: u64) {
        let missed = {
            let mut loc = match self.registry.locations.get_mut(&self.location_index) {
                Some(l) => l,
                None => return,
            };
            loc.keepalive_missed += 1;
            loc.keepalive_missed
        };
        if missed >= self.kickout_threshold {
            self.feed(PeerSignal::Close, now_ms).await;
            return;
        }
        let _ = self
            .outbound
            .send(PeerMessage::Keepalive {
                hw_id: self.self_hw_id,
                timestamp: now_ms,
            })
            .await;
    }

    /// Apply an inbound peer message (§4.7 steady-state + §4.8 replay).
    /// Messages whose `hw_id` is our own are dropped without effect or
    /// re-gossip (loopback suppression, invariant 8).
    pub async fn handle_inbound(&mut self, msg: PeerMessage, now_ms: u64) {
        let hw_id = hw_id_of(&msg);
        if hw_id == self.self_hw_id {
            debug!("dropped loopback peer message");
            return;
        }

        if let Some(mut loc) = self.registry.locations.get_mut(&self.location_index) {
            loc.keepalive_missed = 0;
        }

        match msg {
            PeerMessage::Init { .. } => self.feed(PeerSignal::InitRcvd, now_ms).await,
            PeerMessage::Keepalive { .. } => self.feed(PeerSignal::Loop, now_ms).await,
            PeerMessage::Replay { .. } => {
                let finished = apply_replay_message(&self.registry, self.location_index, &msg);
                if finished {
                    if let Some(mut loc) = self.registry.locations.get_mut(&self.location_index) {
                        loc.replay_in_progress = false;
                    }
                    info!(location = self.location_index, "replay complete");
                }
                self.feed(PeerSignal::Loop, now_ms).await;
            }
            PeerMessage::NodeUpdate {
                node_id,
                group,
                role,
                active,
                ..
            } => {
                self.apply_node_update(node_id, group, role, active);
                self.feed(PeerSignal::Loop, now_ms).await;
            }
            PeerMessage::ProcessUpdate { node_id, pid, running, .. } => {
                self.apply_process_update(node_id, pid, running);
                self.feed(PeerSignal::Loop, now_ms).await;
            }
            PeerMessage::HaUpdate {
                group,
                master_node,
                slave_node,
                ..
            } => {
                self.apply_ha_update(group, master_node, slave_node);
                self.feed(PeerSignal::Loop, now_ms).await;
            }
        }
    }

    fn apply_node_update(&self, node_id: u32, group: u32, role: u32, active: bool) {
        let in_replay = self
            .registry
            .locations
            .get(&self.location_index)
            .map(|l| l.replay_in_progress)
            .unwrap_or(false);

        if !active {
            let notes = self.registry.remove_node(node_id);
            if !in_replay {
                self.registry.dispatch(notes);
            }
            return;
        }
        let role = match role {
            1 => Role::Active,
            2 => Role::Passive,
            _ => Role::None,
        };
        if !self.registry.nodes.contains_key(&node_id) {
            let mut node =
                crate::core::registry::Node::new(node_id, group, role, self.location_index, false);
            node.current_role = role;
            if let Ok(notes) = self.registry.add_node(node) {
                if !in_replay {
                    self.registry.dispatch(notes);
                }
            }
        } else if let Some(mut node) = self.registry.nodes.get_mut(&node_id) {
            node.current_role = role;
        }
    }

    fn apply_process_update(&self, node_index: u32, pid: u32, running: bool) {
        if !running {
            let notes = self.registry.remove_process(node_index, pid);
            self.registry.dispatch(notes);
            return;
        }
        if !self.registry.processes.contains_key(&(node_index, pid)) {
            use crate::core::registry::{Process, Role as R};
            let proc = Process {
                pid,
                proc_type: 0,
                name: String::new(),
                node_index,
                role: R::None,
                partner: None,
                running: true,
                interfaces: Vec::new(),
            };
            if let Ok(notes) = self.registry.add_process(proc) {
                self.registry.dispatch(notes);
            }
        }
    }

    fn apply_ha_update(&self, _group: u32, master_node: u32, _slave_node: u32) {
        if let Ok(outcome) = ha::resolve(&self.registry, master_node) {
            self.registry.dispatch(outcome.notifications);
        }
    }
}

/// Extracts the `hw_id` common to every peer message variant.
pub fn hw_id_of(msg: &PeerMessage) -> u32 {
    match msg {
        PeerMessage::Init { hw_id, .. }
        | PeerMessage::Keepalive { hw_id, .. }
        | PeerMessage::ProcessUpdate { hw_id, .. }
        | PeerMessage::NodeUpdate { hw_id, .. }
        | PeerMessage::HaUpdate { hw_id, .. }
        | PeerMessage::Replay { hw_id, .. } => *hw_id,
    }
}

/// Multicast discovery (§6.3): periodically emit KEEPALIVE on the
/// configured multicast group; a KEEPALIVE from an unknown `hw_id`
/// signals the caller (via the returned `hw_id`) to spin up a `PeerSession`
/// and feed it CONNECT.
pub async fn multicast_tick(
    socket: &tokio::net::UdpSocket,
    mcast_addr: std::net::SocketAddr,
    self_hw_id: u32,
    now_ms: u64,
) -> std::io::Result<()> {
    use crate::core::protocol::PeerCodec;
    use bytes::BytesMut;
    use tokio_util::codec::Encoder;

    let mut buf = BytesMut::new();
    let mut codec = PeerCodec;
    codec
        .encode(
            PeerMessage::Keepalive {
                hw_id: self_hw_id,
                timestamp: now_ms,
            },
            &mut buf,
        )
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    socket.send_to(&buf, mcast_addr).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::Registry;

    #[tokio::test]
    async fn tick_honors_configured_kickout_threshold_not_the_constant() {
        let registry = Arc::new(Registry::new());
        registry.add_location(Location::new(9, 1000));
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = PeerSession::new(9, 1, registry.clone(), tx, 1);

        session.feed(PeerSignal::Connect, 0).await;
        session
            .handle_inbound(PeerMessage::Init { hw_id: 9, timestamp: 0 }, 1)
            .await;
        while rx.try_recv().is_ok() {}

        // threshold of 1 kicks out on the very first missed tick, unlike the
        // shared DEFAULT_PEER_KICKOUT constant (3).
        session.feed(PeerSignal::TimerPop, 2).await;
        assert_eq!(session.state, PeerState::Failed);
    }
}
