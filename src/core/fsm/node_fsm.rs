// src/core/fsm/node_fsm.rs

//! Per-local-Node state machine: NULL/WAITING/ACTIVE/FAILING/FAILED, driven
//! by client traffic and the keepalive timer.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Null,
    Waiting,
    Active,
    Failing,
    Failed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Null => "NULL",
            NodeState::Waiting => "WAITING",
            NodeState::Active => "ACTIVE",
            NodeState::Failing => "FAILING",
            NodeState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeSignal {
    Create,
    Init,
    Data,
    Term,
    Close,
    TimerPop,
    Timeout,
    FailedSig,
    ActiveSig,
}

impl fmt::Display for NodeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Side effect the caller must perform after a legal transition. The FSM
/// itself never touches the registry or timers directly; the handler that
/// drives it does, based on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    /// Allocate the Node record and arm its keepalive timer.
    ArmTimer,
    /// Publish to the registry, run the HA resolver, echo the INIT response.
    PublishAndResolveHa,
    /// Reset the missed-keepalive counter to zero.
    ResetMissed,
    /// Increment the missed-keepalive counter; feed TIMEOUT to self if over threshold.
    IncrementMissed,
    /// Mark transient failure (no registry change yet).
    MarkTransient,
    /// Remove Processes, stop/delete the timer, unpublish, close the transport.
    Teardown,
    /// No side effect beyond the state change itself.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no legal Node FSM transition from {state} on {signal}")]
pub struct NodeFsmError {
    pub state: NodeState,
    pub signal: NodeSignal,
}

/// Transcription of the Node FSM table (spec §4.3). Returns `Err` for any
/// cell not present in the table ("error cells"), which callers log and
/// drop per the State violation error-handling policy; they never panic.
pub fn transition(
    state: NodeState,
    signal: NodeSignal,
) -> Result<(NodeState, NodeAction), NodeFsmError> {
    use NodeAction as A;
    use NodeSignal as S;
    use NodeState as St;

    let result = match (state, signal) {
        (St::Null, S::Create) => (St::Waiting, A::ArmTimer),

        (St::Waiting, S::Init) => (St::Active, A::PublishAndResolveHa),
        (St::Waiting, S::Term) => (St::Failed, A::Teardown),
        (St::Waiting, S::Close) => (St::Failed, A::Teardown),
        (St::Waiting, S::TimerPop) => (St::Waiting, A::IncrementMissed),
        (St::Waiting, S::Timeout) => (St::Failing, A::MarkTransient),
        (St::Waiting, S::FailedSig) => (St::Failed, A::Teardown),
        (St::Waiting, S::ActiveSig) => (St::Active, A::None),

        (St::Active, S::Data) => (St::Active, A::ResetMissed),
        (St::Active, S::Term) => (St::Failed, A::Teardown),
        (St::Active, S::Close) => (St::Failed, A::Teardown),
        (St::Active, S::TimerPop) => (St::Active, A::IncrementMissed),
        (St::Active, S::Timeout) => (St::Failing, A::MarkTransient),
        (St::Active, S::FailedSig) => (St::Failed, A::Teardown),

        (St::Failing, S::Data) => (St::Active, A::ResetMissed),
        (St::Failing, S::Term) => (St::Failed, A::Teardown),
        (St::Failing, S::Close) => (St::Failed, A::Teardown),
        (St::Failing, S::TimerPop) => (St::Failing, A::IncrementMissed),
        (St::Failing, S::Timeout) => (St::Failed, A::Teardown),
        (St::Failing, S::FailedSig) => (St::Failed, A::Teardown),
        (St::Failing, S::ActiveSig) => (St::Active, A::None),

        (St::Failed, S::ActiveSig) => (St::Waiting, A::ArmTimer),

        _ => return Err(NodeFsmError { state, signal }),
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_from_null_arms_timer() {
        let (next, action) = transition(NodeState::Null, NodeSignal::Create).unwrap();
        assert_eq!(next, NodeState::Waiting);
        assert_eq!(action, NodeAction::ArmTimer);
    }

    #[test]
    fn init_publishes_and_resolves_ha() {
        let (next, action) = transition(NodeState::Waiting, NodeSignal::Init).unwrap();
        assert_eq!(next, NodeState::Active);
        assert_eq!(action, NodeAction::PublishAndResolveHa);
    }

    #[test]
    fn kickout_sequence_reaches_failed() {
        let (s, _) = transition(NodeState::Active, NodeSignal::Timeout).unwrap();
        assert_eq!(s, NodeState::Failing);
        let (s, a) = transition(s, NodeSignal::Timeout).unwrap();
        assert_eq!(s, NodeState::Failed);
        assert_eq!(a, NodeAction::Teardown);
    }

    #[test]
    fn data_in_failing_recovers_to_active() {
        let (s, a) = transition(NodeState::Failing, NodeSignal::Data).unwrap();
        assert_eq!(s, NodeState::Active);
        assert_eq!(a, NodeAction::ResetMissed);
    }

    #[test]
    fn illegal_cell_is_rejected_not_panicking() {
        assert!(transition(NodeState::Null, NodeSignal::Data).is_err());
        assert!(transition(NodeState::Failed, NodeSignal::Data).is_err());
    }

    #[test]
    fn failed_can_only_leave_via_active_sig() {
        assert!(transition(NodeState::Failed, NodeSignal::Create).is_err());
        let (s, a) = transition(NodeState::Failed, NodeSignal::ActiveSig).unwrap();
        assert_eq!(s, NodeState::Waiting);
        assert_eq!(a, NodeAction::ArmTimer);
    }
}
