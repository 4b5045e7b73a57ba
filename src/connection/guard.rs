// src/connection/guard.rs

//! RAII teardown for a client connection's Node row. Acquire/release
//! pairing per resource (§9: "Exceptions / `goto EXIT_LABEL` become
//! error-return with scoped cleanup"): whatever path ends the connection
//! task — clean TERM, protocol error, or the socket just dropping — this
//! guard's `Drop` guarantees the Node (and everything it owns) leaves the
//! registry exactly once.

use crate::core::registry::Registry;
use std::sync::Arc;
use tracing::debug;

pub struct ConnectionGuard {
    registry: Arc<Registry>,
    node_index: Option<u32>,
}

impl ConnectionGuard {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            node_index: None,
        }
    }

    /// Bind the guard to the Node created by a successful INIT. Before this
    /// is called, dropping the guard is a no-op — a connection that never
    /// completes INIT never enters the registry.
    pub fn bind(&mut self, node_index: u32) {
        self.node_index = Some(node_index);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(index) = self.node_index.take() {
            debug!(node = index, "connection guard tearing down node");
            let notes = self.registry.remove_node(index);
            self.registry.dispatch(notes);
        }
    }
}
