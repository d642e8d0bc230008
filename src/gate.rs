//! Condition gates: a shared boolean with a waiter set.
//!
//! A process blocks on a gate until its value matches the one the process
//! asked for. Every [`Gate::set`] admits all matching waiters back into the
//! event queue at the current time, synchronously, before the caller
//! continues.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::process::ProcessId;
use crate::simulation::Shared;

/// Index of a gate in its simulation's gate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct GateId(usize);

impl GateId {
    pub(crate) fn new(index: usize) -> Self {
        GateId(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for GateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "G{}", self.0)
    }
}

/// Kernel-side state of one gate.
#[derive(Debug, Clone, Default)]
pub(crate) struct GateState {
    pub value: bool,
    /// Waiting process -> awaited value.
    pub waiters: BTreeMap<ProcessId, bool>,
}

impl GateState {
    pub fn new(value: bool) -> Self {
        GateState {
            value,
            waiters: BTreeMap::new(),
        }
    }

    /// Remove and return every waiter whose awaited value equals `value`,
    /// in process-ID order.
    pub fn take_matching(&mut self, value: bool) -> Vec<ProcessId> {
        let matched: Vec<ProcessId> = self
            .waiters
            .iter()
            .filter(|(_, want)| **want == value)
            .map(|(id, _)| *id)
            .collect();
        for id in &matched {
            self.waiters.remove(id);
        }
        matched
    }
}

/// Handle to a condition gate.
///
/// Created with [`Simulation::gate`](crate::Simulation::gate). Cloning
/// the handle shares the gate. Gates outlive [`Simulation::clear`]:
/// their value is kept and their waiters are discarded.
#[derive(Clone)]
pub struct Gate {
    id: GateId,
    shared: Arc<Shared>,
}

impl Gate {
    pub(crate) fn new(id: GateId, shared: Arc<Shared>) -> Self {
        Gate { id, shared }
    }

    pub fn id(&self) -> GateId {
        self.id
    }

    /// Set the value and admit every waiter that was waiting for it.
    ///
    /// Admitted processes are queued at the current time, in priority
    /// order. Any timeout racing an admitted wait becomes a no-op.
    /// Returns the number of processes admitted.
    pub fn set(&self, value: bool) -> usize {
        self.shared.kernel.lock().set_gate(self.id, value)
    }

    /// Current value.
    pub fn value(&self) -> bool {
        self.shared.kernel.lock().gate_value(self.id)
    }

    /// Number of processes currently blocked on this gate.
    pub fn waiting(&self) -> usize {
        self.shared.kernel.lock().gate_waiters(self.id)
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_matching_only_removes_matches() {
        let mut g = GateState::new(false);
        g.waiters.insert(ProcessId::new(3), true);
        g.waiters.insert(ProcessId::new(1), true);
        g.waiters.insert(ProcessId::new(2), false);

        let admitted = g.take_matching(true);
        assert_eq!(admitted, vec![ProcessId::new(1), ProcessId::new(3)]);
        assert_eq!(g.waiters.len(), 1);
        assert_eq!(g.waiters.get(&ProcessId::new(2)), Some(&false));
    }

    #[test]
    fn test_take_matching_empty() {
        let mut g = GateState::new(true);
        assert!(g.take_matching(true).is_empty());
    }
}
