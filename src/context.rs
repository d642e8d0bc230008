//! `ProcessContext`: the API a running process body talks to.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

use crossbeam::channel::Receiver;

use crate::baton::{self, Baton, Signal};
use crate::error::{SimError, SimResult};
use crate::gate::Gate;
use crate::process::{ProcessId, ProcessInfo, ProcessState, WaitOutcome};
use crate::simulation::{ProcessBuilder, Shared};
use crate::time::VirtualTime;

/// Handle given to a process body while it runs.
///
/// Suspending calls (`advance`, `yield_now`, `wait_for*`) hand the baton
/// back to the dispatcher and return once the process is dispatched
/// again. Every other call runs synchronously inside the caller's turn.
///
/// The context is bound to its process thread and is not `Sync`.
pub struct ProcessContext {
    id: ProcessId,
    shared: Arc<Shared>,
    go: Receiver<Signal>,
    _not_sync: PhantomData<Cell<()>>,
}

impl ProcessContext {
    pub(crate) fn new(id: ProcessId, shared: Arc<Shared>, go: Receiver<Signal>) -> Self {
        ProcessContext {
            id,
            shared,
            go,
            _not_sync: PhantomData,
        }
    }

    /// The calling process.
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Current virtual time.
    pub fn now(&self) -> VirtualTime {
        self.shared.kernel.lock().now()
    }

    /// Snapshot of the calling process.
    pub fn info(&self) -> SimResult<ProcessInfo> {
        self.shared.kernel.lock().info(self.id)
    }

    // ── Suspension ────────────────────────────────────────────

    /// A suspending call made on an aborted run never returns.
    fn ensure_live(&self) {
        let faulted = self.shared.kernel.lock().fault().is_some();
        if faulted {
            baton::unwind();
        }
    }

    /// Hand the baton back and park until the next `Go`.
    fn suspend(&self) {
        if self.shared.baton_tx.send(Baton::Suspended(self.id)).is_err() {
            baton::unwind();
        }
        match self.go.recv() {
            Ok(Signal::Go) => {}
            Err(_) => baton::unwind(),
        }
    }

    /// Schedule the caller `delay` time units from now and suspend until then.
    ///
    /// Fails without suspending on a negative or non-finite delay, which
    /// aborts the run.
    pub fn advance(&self, delay: f64) -> SimResult<()> {
        self.ensure_live();
        self.shared.kernel.lock().advance(self.id, delay)?;
        self.suspend();
        Ok(())
    }

    /// Re-queue the caller at the current time behind every other
    /// activation due now, and suspend.
    pub fn yield_now(&self) -> SimResult<()> {
        self.ensure_live();
        self.shared.kernel.lock().yield_now(self.id)?;
        self.suspend();
        Ok(())
    }

    /// Block until `gate` holds `value`. Returns at once if it already does.
    pub fn wait_for(&self, gate: &Gate, value: bool) -> SimResult<()> {
        self.begin_wait(gate, value, None).map(|_| ())
    }

    /// Block until `gate` holds `value` or `timeout` time units pass,
    /// whichever the dispatcher sees first.
    ///
    /// The timeout is a process of its own. When the gate wins, that
    /// process still fires at `now + timeout` and does nothing to the
    /// caller, but the dispatch can move the clock. A run whose last
    /// activation is such a timeout reports that time in
    /// [`RunSummary::finished_at`](crate::RunSummary::finished_at).
    pub fn wait_for_timeout(&self, gate: &Gate, value: bool, timeout: f64) -> SimResult<WaitOutcome> {
        self.begin_wait(gate, value, Some(timeout))
    }

    fn begin_wait(&self, gate: &Gate, value: bool, timeout: Option<f64>) -> SimResult<WaitOutcome> {
        self.ensure_live();
        if !gate.belongs_to(&self.shared) {
            let err = SimError::UnknownGate(gate.id());
            self.shared.kernel.lock().record_fault(err.clone());
            return Err(err);
        }
        let suspended = self
            .shared
            .kernel
            .lock()
            .begin_wait(self.id, gate.id(), value, timeout)?;
        if !suspended {
            return Ok(WaitOutcome::Signalled);
        }
        self.suspend();
        Ok(self
            .shared
            .kernel
            .lock()
            .last_wait(self.id)
            .unwrap_or(WaitOutcome::Signalled))
    }

    // ── Operations on other processes ─────────────────────────

    /// Pull a scheduled process out of the event queue.
    pub fn interrupt(&self, process: ProcessId) -> SimResult<()> {
        self.shared.kernel.lock().interrupt(process)
    }

    /// Put an interrupted process back at its original due time plus
    /// `compensation`. A negative compensation pulls the activation
    /// earlier, but never before the current time (`NonCausal`).
    pub fn resume(&self, process: ProcessId, compensation: f64) -> SimResult<VirtualTime> {
        self.shared.kernel.lock().resume(process, compensation)
    }

    /// Absolute due time of a scheduled process.
    pub fn scheduled_time(&self, process: ProcessId) -> SimResult<VirtualTime> {
        self.shared.kernel.lock().scheduled_time(process)
    }

    /// Time left until a scheduled process runs.
    pub fn remaining_time(&self, process: ProcessId) -> SimResult<f64> {
        let mut kernel = self.shared.kernel.lock();
        let due = kernel.scheduled_time(process)?;
        Ok(due.as_f64() - kernel.now().as_f64())
    }

    pub fn state(&self, process: ProcessId) -> SimResult<ProcessState> {
        self.shared.kernel.lock().state(process)
    }

    /// Register a new process from inside a running one.
    pub fn process(&self, name: impl Into<String>) -> ProcessBuilder<'_> {
        ProcessBuilder::new(&self.shared, name.into())
    }
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext").field("id", &self.id).finish()
    }
}
