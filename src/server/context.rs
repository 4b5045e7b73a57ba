// src/server/context.rs

//! Shared server-wide state handed to every spawned task: the `Runtime`
//! plus a shutdown signal. Kept as a thin wrapper (most shared state now
//! lives in `Runtime` itself) rather than the teacher's larger
//! `ServerContext`, since this process has no database/replication layer
//! to coordinate.

use crate::core::runtime::Runtime;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct ServerContext {
    pub runtime: Arc<Runtime>,
    pub shutdown: watch::Receiver<bool>,
}

impl ServerContext {
    pub fn new(runtime: Arc<Runtime>, shutdown: watch::Receiver<bool>) -> Self {
        Self { runtime, shutdown }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
