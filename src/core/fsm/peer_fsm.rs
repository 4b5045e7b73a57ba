// src/core/fsm/peer_fsm.rs

//! Per-remote-Location state machine: NULL/INIT/ACTIVE/FAILED, driven by
//! multicast discovery, TCP connect completion, and the peer keepalive
//! timer. Named actions A-E mirror spec §4.4 so the table remains legible
//! against the specification.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    Null,
    Init,
    Active,
    Failed,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerState::Null => "NULL",
            PeerState::Init => "INIT",
            PeerState::Active => "ACTIVE",
            PeerState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerSignal {
    Connect,
    InitRcvd,
    Loop,
    Close,
    Closed,
    TimerPop,
}

impl fmt::Display for PeerSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Action tags A-E from spec §4.4, carried back to the caller so the
/// handler that owns the registry and timers can perform the corresponding
/// side effect; the FSM table itself stays pure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAction {
    /// A — Discovered: outbound connect issued, no registry mutation yet.
    Discovered,
    /// B — First contact/reconnect: zero missed count, start timer, publish
    /// Location as PENDING, set `replay_in_progress`, begin replay.
    FirstContact,
    /// C — Loop: update the registry status record and notify subscribers.
    Loop,
    /// D — Disconnect: stop timer; after the loop, TERM every owned Node.
    Disconnect,
    /// E — Tick: emit multicast KEEPALIVE (if local) or bump missed count
    /// and self-feed CLOSE past the kickout threshold.
    Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no legal Peer FSM transition from {state} on {signal}")]
pub struct PeerFsmError {
    pub state: PeerState,
    pub signal: PeerSignal,
}

pub fn transition(
    state: PeerState,
    signal: PeerSignal,
) -> Result<(PeerState, PeerAction), PeerFsmError> {
    use PeerAction as A;
    use PeerSignal as S;
    use PeerState as St;

    let result = match (state, signal) {
        (St::Null, S::Connect) => (St::Init, A::Discovered),
        (St::Null, S::InitRcvd) => (St::Active, A::FirstContact),

        (St::Init, S::InitRcvd) => (St::Active, A::FirstContact),
        (St::Init, S::Loop) => (St::Init, A::Loop),
        (St::Init, S::Close) => (St::Failed, A::Disconnect),

        (St::Active, S::Close) => (St::Failed, A::Disconnect),
        (St::Active, S::TimerPop) => (St::Active, A::Tick),
        (St::Active, S::Loop) => (St::Active, A::Loop),

        (St::Failed, S::InitRcvd) => (St::Active, A::FirstContact),
        (St::Failed, S::Loop) => (St::Failed, A::Loop),
        (St::Failed, S::Closed) => (St::Null, A::Loop),

        _ => return Err(PeerFsmError { state, signal }),
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_then_init_reaches_active() {
        let (s, a) = transition(PeerState::Null, PeerSignal::Connect).unwrap();
        assert_eq!(s, PeerState::Init);
        assert_eq!(a, PeerAction::Discovered);

        let (s, a) = transition(s, PeerSignal::InitRcvd).unwrap();
        assert_eq!(s, PeerState::Active);
        assert_eq!(a, PeerAction::FirstContact);
    }

    #[test]
    fn tick_stays_active() {
        let (s, a) = transition(PeerState::Active, PeerSignal::TimerPop).unwrap();
        assert_eq!(s, PeerState::Active);
        assert_eq!(a, PeerAction::Tick);
    }

    #[test]
    fn close_then_closed_cycles_back_to_null() {
        let (s, a) = transition(PeerState::Active, PeerSignal::Close).unwrap();
        assert_eq!(s, PeerState::Failed);
        assert_eq!(a, PeerAction::Disconnect);

        let (s, _) = transition(s, PeerSignal::Closed).unwrap();
        assert_eq!(s, PeerState::Null);
    }

    #[test]
    fn reconnect_from_failed_reaches_active() {
        let (s, a) = transition(PeerState::Failed, PeerSignal::InitRcvd).unwrap();
        assert_eq!(s, PeerState::Active);
        assert_eq!(a, PeerAction::FirstContact);
    }

    #[test]
    fn illegal_cells_are_rejected() {
        assert!(transition(PeerState::Null, PeerSignal::Close).is_err());
        assert!(transition(PeerState::Null, PeerSignal::TimerPop).is_err());
    }
}
