// src/core/cluster/replay.rs

//! Cluster replay protocol (§4.8): on a Location reaching ACTIVE, both
//! sides dump their full local state as a stream of REPLAY messages and
//! apply the peer's stream idempotently.

use crate::core::protocol::{PeerMessage, ReplayTlv};
use crate::core::registry::{Location, Node, Registry, Role, TableType};

const NODE_UPDATE_TYPE: u32 = 1;
const PROC_UPDATE_TYPE: u32 = 2;

/// Enumerate every local Node and Process owned by `location_index` into
/// TLVs, batched 5 per message, terminated by an empty `last` message.
/// Step 2-3 of the protocol; step 1 (enumeration) happens inline since the
/// registry already indexes local rows by their owning Location.
pub fn build_replay_stream(
    registry: &Registry,
    hw_id: u32,
    timestamp: u64,
    location_index: u32,
) -> Vec<PeerMessage> {
    let mut tlvs = Vec::new();

    if let Some(loc) = registry.locations.get(&location_index) {
        for &node_index in loc.node_tree.keys() {
            let Some(node) = registry.nodes.get(&node_index) else {
                continue;
            };
            tlvs.push(ReplayTlv {
                update_type: NODE_UPDATE_TYPE,
                node_id: node.index,
                pid: 0,
                group: node.group,
                role: node.current_role as u32,
                running: 1,
            });
            for &pid in node.process_tree.keys() {
                if let Some(proc) = registry.processes.get(&(node.index, pid)) {
                    tlvs.push(ReplayTlv {
                        update_type: PROC_UPDATE_TYPE,
                        node_id: node.index,
                        pid: proc.pid,
                        group: node.group,
                        role: proc.role as u32,
                        running: proc.running as u32,
                    });
                }
            }
        }
    }

    let mut messages: Vec<PeerMessage> = tlvs
        .chunks(5)
        .map(|chunk| PeerMessage::Replay {
            hw_id,
            timestamp,
            last: false,
            tlvs: chunk.to_vec(),
        })
        .collect();

    messages.push(PeerMessage::Replay {
        hw_id,
        timestamp,
        last: true,
        tlvs: Vec::new(),
    });
    messages
}

/// Apply one REPLAY message from a remote peer (step 4): every TLV becomes
/// an idempotent `add` into the remote-owned tables for `location_index`.
/// Returns `true` once `last` is observed, signalling the caller to clear
/// `replay_in_progress` and resume forwarding steady-state updates (step 5).
pub fn apply_replay_message(
    registry: &Registry,
    location_index: u32,
    msg: &PeerMessage,
) -> bool {
    let PeerMessage::Replay { last, tlvs, .. } = msg else {
        return false;
    };

    for tlv in tlvs {
        match tlv.update_type {
            NODE_UPDATE_TYPE => apply_node_tlv(registry, location_index, tlv),
            PROC_UPDATE_TYPE => apply_proc_tlv(registry, tlv),
            other => tracing::warn!(update_type = other, "unknown replay TLV type, ignored"),
        }
    }
    *last
}

fn apply_node_tlv(registry: &Registry, location_index: u32, tlv: &ReplayTlv) {
    if registry.nodes.contains_key(&tlv.node_id) {
        // Idempotent: local rows are authoritative on self and never
        // overwritten by a peer's replay of the same id.
        if let Some(node) = registry.nodes.get(&tlv.node_id) {
            if node.table_type == TableType::NodesLocal {
                return;
            }
        }
        if let Some(mut node) = registry.nodes.get_mut(&tlv.node_id) {
            node.group = tlv.group;
            node.current_role = role_from_u32(tlv.role);
        }
        return;
    }
    if !registry.locations.contains_key(&location_index) {
        registry.add_location(Location::new(location_index, 0));
    }
    let mut node = Node::new(tlv.node_id, tlv.group, role_from_u32(tlv.role), location_index, false);
    node.current_role = role_from_u32(tlv.role);
    let _ = registry.add_node(node);
}

fn apply_proc_tlv(registry: &Registry, tlv: &ReplayTlv) {
    use crate::core::registry::Process;
    if registry.processes.contains_key(&(tlv.node_id, tlv.pid)) {
        return; // duplicate insert is a no-op
    }
    let proc = Process {
        pid: tlv.pid,
        proc_type: 0,
        name: String::new(),
        node_index: tlv.node_id,
        role: role_from_u32(tlv.role),
        partner: None,
        running: tlv.running != 0,
        interfaces: Vec::new(),
    };
    let _ = registry.add_process(proc);
}

fn role_from_u32(v: u32) -> Role {
    match v {
        1 => Role::Active,
        2 => Role::Passive,
        _ => Role::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::Location;

    #[test]
    fn replay_batches_at_most_five_tlvs_and_terminates() {
        let reg = Registry::new();
        reg.add_location(Location::new(1, 1000));
        for i in 0..12u32 {
            reg.add_node(Node::new(i, 1, Role::Active, 1, true)).unwrap();
        }
        let stream = build_replay_stream(&reg, 1, 0, 1);
        let last = stream.last().unwrap();
        assert!(matches!(last, PeerMessage::Replay { last: true, tlvs, .. } if tlvs.is_empty()));
        for msg in &stream[..stream.len() - 1] {
            if let PeerMessage::Replay { tlvs, .. } = msg {
                assert!(tlvs.len() <= 5);
            }
        }
    }

    #[test]
    fn applying_replay_twice_is_idempotent() {
        let reg = Registry::new();
        let tlv = ReplayTlv {
            update_type: NODE_UPDATE_TYPE,
            node_id: 99,
            pid: 0,
            group: 1,
            role: 1,
            running: 1,
        };
        let msg = PeerMessage::Replay {
            hw_id: 2,
            timestamp: 0,
            last: true,
            tlvs: vec![tlv],
        };
        apply_replay_message(&reg, 2, &msg);
        assert!(reg.nodes.contains_key(&99));
        apply_replay_message(&reg, 2, &msg);
        assert_eq!(reg.nodes.len(), 1);
    }
}
