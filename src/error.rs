//! Structured error types for Kairos.
//!
//! All fallible public APIs return `Result<T, SimError>`. Most variants are
//! protocol violations: model code called an operation from a process
//! state that forbids it. Those are never transient, so nothing in the
//! kernel retries; the run that observed one is aborted.

use crate::gate::GateId;
use crate::process::{ProcessId, ProcessState};
use crate::time::VirtualTime;

/// The top-level error type for the simulation kernel.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum SimError {
    // ── Process lookup ────────────────────────────────────

    /// A process ID was referenced but is not registered in the current run.
    #[error("process {0} not found")]
    ProcessNotFound(ProcessId),

    // ── Protocol violations ───────────────────────────────

    /// A suspending operation was called by a process that does not hold the baton.
    #[error("process {process} is not active (state {state})")]
    NotActive {
        process: ProcessId,
        state: ProcessState,
    },

    /// Remaining time was queried, or an interrupt attempted, on an unscheduled process.
    #[error("process {process} is not scheduled (state {state})")]
    NotScheduled {
        process: ProcessId,
        state: ProcessState,
    },

    /// Resume was called on a process that was never interrupted.
    #[error("process {process} is not interrupted (state {state})")]
    NotInterrupted {
        process: ProcessId,
        state: ProcessState,
    },

    /// A state change outside the edges of the process state machine.
    #[error("process {process} cannot go from {from} to {to}")]
    InvalidTransition {
        process: ProcessId,
        from: ProcessState,
        to: ProcessState,
    },

    /// A delay, compensation or timeout that is negative or not finite.
    #[error("invalid delay {0}")]
    InvalidDelay(f64),

    /// Attempted to schedule an activation before the current clock.
    #[error("cannot schedule at T={requested} when current time is {current}")]
    NonCausal {
        requested: f64,
        current: VirtualTime,
    },

    /// A gate handle from a different simulation was used.
    #[error("gate {0} does not belong to this simulation")]
    UnknownGate(GateId),

    // ── Structural misuse ─────────────────────────────────

    /// Head access on an empty FIFO queue.
    #[error("queue '{0}' is empty")]
    EmptyQueue(String),

    /// A second dispatcher was started while a run is in progress.
    #[error("a run is already in progress")]
    AlreadyRunning,

    // ── Run failures ──────────────────────────────────────

    /// The OS refused to create a thread.
    #[error("failed to spawn thread '{thread}': {reason}")]
    Spawn { thread: String, reason: String },

    /// A process body panicked.
    #[error("process {process} panicked: {message}")]
    ProcessPanicked { process: ProcessId, message: String },

    /// The run was torn down before this operation could complete.
    #[error("simulation run aborted")]
    Aborted,
}

impl SimError {
    /// Returns `true` for errors caused by calling an operation from a
    /// state that forbids it.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            SimError::NotActive { .. }
                | SimError::NotScheduled { .. }
                | SimError::NotInterrupted { .. }
                | SimError::InvalidTransition { .. }
                | SimError::InvalidDelay(_)
                | SimError::NonCausal { .. }
                | SimError::UnknownGate(_)
        )
    }
}

/// Convenience alias for `Result<T, SimError>`.
pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let e = SimError::ProcessNotFound(ProcessId::new(5));
        assert_eq!(e.to_string(), "process P5 not found");
    }

    #[test]
    fn test_error_display_non_causal() {
        let e = SimError::NonCausal {
            requested: 3.0,
            current: VirtualTime::new(10.0),
        };
        assert!(e.to_string().contains("T=3"));
        assert!(e.to_string().contains("T=10"));
    }

    #[test]
    fn test_error_display_not_scheduled() {
        let e = SimError::NotScheduled {
            process: ProcessId::new(2),
            state: ProcessState::Active,
        };
        assert_eq!(e.to_string(), "process P2 is not scheduled (state ACTIVE)");
    }

    #[test]
    fn test_protocol_violation_classification() {
        assert!(SimError::InvalidDelay(-1.0).is_protocol_violation());
        assert!(SimError::NotInterrupted {
            process: ProcessId::new(1),
            state: ProcessState::Scheduled,
        }
        .is_protocol_violation());
        assert!(!SimError::EmptyQueue("q".into()).is_protocol_violation());
        assert!(!SimError::Aborted.is_protocol_violation());
    }

    #[test]
    fn test_error_is_std_error() {
        let e: Box<dyn std::error::Error> = Box::new(SimError::AlreadyRunning);
        assert!(!e.to_string().is_empty());
    }
}
