// src/core/fsm/mod.rs

//! Finite state machines for Nodes (local worker processes) and Locations
//! (peer HM instances). Each is a plain `(state, signal) -> (next_state,
//! action)` table, transcribed as a match expression rather than
//! approximated, per the design note that FSM tables should remain the
//! specification.

pub mod node_fsm;
pub mod peer_fsm;

pub use node_fsm::{NodeAction, NodeFsmError, NodeSignal, NodeState};
pub use peer_fsm::{PeerAction, PeerFsmError, PeerSignal, PeerState};
