// src/core/errors.rs

//! The primary error type for the HM process, covering the six error kinds
//! named in the error handling design: resource exhaustion, protocol
//! violation, state violation, transient I/O, keepalive kickout, and
//! configuration error.

use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HmError {
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("resource exhaustion: {0}")]
    Resource(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("state violation: signal {signal} invalid for state {state}")]
    StateViolation { state: String, signal: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("node {0} not found in registry")]
    NodeNotFound(u32),

    #[error("location {0} not found in registry")]
    LocationNotFound(u32),

    #[error("duplicate index {0}")]
    DuplicateIndex(u32),
}

// `std::io::Error` is not `Clone`; wrap in `Arc` so `HmError` can still be
// cloned when handed to multiple subscribers/log sites.
impl Clone for HmError {
    fn clone(&self) -> Self {
        match self {
            HmError::Io(e) => HmError::Io(Arc::clone(e)),
            HmError::Resource(s) => HmError::Resource(s.clone()),
            HmError::Protocol(s) => HmError::Protocol(s.clone()),
            HmError::StateViolation { state, signal } => HmError::StateViolation {
                state: state.clone(),
                signal: signal.clone(),
            },
            HmError::Config(s) => HmError::Config(s.clone()),
            HmError::NodeNotFound(i) => HmError::NodeNotFound(*i),
            HmError::LocationNotFound(i) => HmError::LocationNotFound(*i),
            HmError::DuplicateIndex(i) => HmError::DuplicateIndex(*i),
        }
    }
}

impl PartialEq for HmError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HmError::Io(a), HmError::Io(b)) => a.to_string() == b.to_string(),
            (HmError::Resource(a), HmError::Resource(b)) => a == b,
            (HmError::Protocol(a), HmError::Protocol(b)) => a == b,
            (
                HmError::StateViolation { state: s1, signal: g1 },
                HmError::StateViolation { state: s2, signal: g2 },
            ) => s1 == s2 && g1 == g2,
            (HmError::Config(a), HmError::Config(b)) => a == b,
            (HmError::NodeNotFound(a), HmError::NodeNotFound(b)) => a == b,
            (HmError::LocationNotFound(a), HmError::LocationNotFound(b)) => a == b,
            (HmError::DuplicateIndex(a), HmError::DuplicateIndex(b)) => a == b,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl From<std::io::Error> for HmError {
    fn from(e: std::io::Error) -> Self {
        HmError::Io(Arc::new(e))
    }
}

pub type HmResult<T> = Result<T, HmError>;
