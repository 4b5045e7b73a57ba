// src/core/registry/entities.rs

//! Registry row types: Location, Node, Process, Interface. Ownership is a
//! tree (Location owns Nodes, Node owns Processes/Interfaces); partner and
//! subscription references are *weak* — plain stable ids looked up through
//! the registry, never an owning handle, so a destroy can never leave a
//! dangling strong pointer.

use crate::core::fsm::{NodeState, PeerState};
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Desired or resolved HA role for a Node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    None,
    Active,
    Passive,
}

/// Which table a row currently lives in — cluster-wide vs local-only —
/// selecting which subscription keys trigger on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableType {
    NodesLocal,
    NodesRemote,
    ProcessLocal,
    ProcessRemote,
    InterfaceLocal,
    InterfaceRemote,
    LocationLocal,
    LocationRemote,
}

/// One HM instance, local or remote.
#[derive(Debug, Clone)]
pub struct Location {
    pub index: u32,
    pub fsm_state: PeerState,
    pub addr: Option<SocketAddr>,
    pub keepalive_period_ms: u64,
    pub keepalive_missed: u32,
    /// Node indices owned by this Location, in an ordered map per §9
    /// ("AVL trees become any ordered associative container").
    pub node_tree: BTreeMap<u32, ()>,
    pub replay_in_progress: bool,
}

impl Location {
    pub fn new(index: u32, keepalive_period_ms: u64) -> Self {
        Self {
            index,
            fsm_state: PeerState::Null,
            addr: None,
            keepalive_period_ms,
            keepalive_missed: 0,
            node_tree: BTreeMap::new(),
            replay_in_progress: false,
        }
    }
}

/// A monitored worker on some Location.
#[derive(Debug, Clone)]
pub struct Node {
    pub index: u32,
    pub group: u32,
    pub role: Role,
    pub current_role: Role,
    pub fsm_state: NodeState,
    pub keepalive_period_ms: u64,
    pub keepalive_missed: u32,
    pub location_index: u32,
    pub process_tree: BTreeMap<u32, ()>,
    pub interface_tree: BTreeMap<u32, ()>,
    /// Weak reference: the partner Node's stable id, looked up through the
    /// registry, not an owning handle.
    pub partner: Option<u32>,
    pub table_type: TableType,
    pub name: String,
}

impl Node {
    pub fn new(index: u32, group: u32, role: Role, location_index: u32, local: bool) -> Self {
        Self {
            index,
            group,
            role,
            current_role: Role::None,
            fsm_state: NodeState::Null,
            keepalive_period_ms: crate::core::constants::DEFAULT_NODE_TICK_MS,
            keepalive_missed: 0,
            location_index,
            process_tree: BTreeMap::new(),
            interface_tree: BTreeMap::new(),
            partner: None,
            table_type: if local {
                TableType::NodesLocal
            } else {
                TableType::NodesRemote
            },
            name: String::new(),
        }
    }
}

/// A single OS-level process reported by a Node. `name` mirrors the
/// wire-format's fixed buffer (<=24 usable chars).
#[derive(Debug, Clone)]
pub struct Process {
    pub pid: u32,
    pub proc_type: u32,
    pub name: String,
    pub node_index: u32,
    pub role: Role,
    pub partner: Option<u32>,
    pub running: bool,
    pub interfaces: Vec<u32>,
}

/// A slave endpoint advertised by a Process, cluster-unique by id.
#[derive(Debug, Clone)]
pub struct Interface {
    pub id: u32,
    pub process_pid: u32,
    pub node_index: u32,
}
