//! The kernel: every piece of mutable run state behind one lock.
//!
//! The kernel owns the clock, the event queue, the process table, the gate
//! table and the identity counter. All state transitions of the process
//! state machine happen here, as plain methods with no threads involved.
//! The dispatcher and the process contexts call into it while holding the
//! simulation's mutex, which is what makes "exactly one active process"
//! hold by construction.
//!
//! Any protocol violation detected by an operation is also recorded as the
//! kernel *fault*. A faulted kernel refuses to dispatch again until it is
//! reset.

use std::collections::BTreeMap;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::channel::Sender;
use tracing::{debug, trace, warn};

use crate::baton::Signal;
use crate::error::{SimError, SimResult};
use crate::gate::{GateId, GateState};
use crate::process::{
    Priority, ProcessId, ProcessInfo, ProcessKind, ProcessRecord, ProcessState, WaitOutcome,
    WaitSlot,
};
use crate::scheduler::EventQueue;
use crate::simulation::RunSummary;
use crate::time::VirtualTime;
use crate::trace::DispatchRecord;

/// What the dispatcher must do with the activation it just popped.
#[derive(Debug)]
pub(crate) enum Dispatch {
    /// Hand the baton to a process body.
    Body { id: ProcessId, go: Sender<Signal> },
    /// A timeout process ran inline; `admitted` tells whether it won its race.
    Timeout { id: ProcessId, admitted: bool },
}

/// Everything left over by [`Kernel::reset`] that must be released
/// outside the lock.
pub(crate) struct Teardown {
    pub records: Vec<ProcessRecord>,
    pub threads: Vec<JoinHandle<()>>,
}

pub(crate) struct Kernel {
    now: VirtualTime,
    queue: EventQueue,
    processes: BTreeMap<ProcessId, ProcessRecord>,
    gates: Vec<GateState>,
    next_id: u64,
    active: Option<ProcessId>,
    fault: Option<SimError>,
    running: bool,
    dispatched: u64,
    terminated: usize,
    record_trace: bool,
    trace: Vec<DispatchRecord>,
    /// Handles of body threads that have not reported back yet.
    threads: BTreeMap<ProcessId, JoinHandle<()>>,
}

fn transition(rec: &mut ProcessRecord, to: ProcessState) -> SimResult<()> {
    if !rec.state.can_transition_to(to) {
        return Err(SimError::InvalidTransition {
            process: rec.id,
            from: rec.state,
            to,
        });
    }
    rec.state = to;
    rec.marked_at = Instant::now();
    Ok(())
}

impl Kernel {
    pub fn new(record_trace: bool) -> Self {
        Kernel {
            now: VirtualTime::ZERO,
            queue: EventQueue::new(),
            processes: BTreeMap::new(),
            gates: Vec::new(),
            next_id: 1,
            active: None,
            fault: None,
            running: false,
            dispatched: 0,
            terminated: 0,
            record_trace,
            trace: Vec::new(),
            threads: BTreeMap::new(),
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn now(&self) -> VirtualTime {
        self.now
    }

    pub fn active(&self) -> Option<ProcessId> {
        self.active
    }

    pub fn fault(&self) -> Option<&SimError> {
        self.fault.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn trace(&self) -> &[DispatchRecord] {
        &self.trace
    }

    pub fn state(&self, id: ProcessId) -> SimResult<ProcessState> {
        self.processes
            .get(&id)
            .map(|r| r.state)
            .ok_or(SimError::ProcessNotFound(id))
    }

    pub fn info(&self, id: ProcessId) -> SimResult<ProcessInfo> {
        self.processes
            .get(&id)
            .map(ProcessRecord::info)
            .ok_or(SimError::ProcessNotFound(id))
    }

    pub fn infos(&self) -> Vec<ProcessInfo> {
        self.processes.values().map(ProcessRecord::info).collect()
    }

    pub fn last_wait(&self, id: ProcessId) -> Option<WaitOutcome> {
        self.processes.get(&id).and_then(|r| r.last_wait)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            finished_at: self.now,
            dispatched: self.dispatched,
            terminated: self.terminated,
            pending: self.queue.len(),
        }
    }

    // ── Faults ────────────────────────────────────────────────

    /// Record `err` as the run's fault unless one is already recorded.
    pub fn record_fault(&mut self, err: SimError) {
        if self.fault.is_none() {
            warn!(time = %self.now, error = %err, "simulation run aborted");
            self.fault = Some(err);
        }
    }

    fn guard<T>(&mut self, result: SimResult<T>) -> SimResult<T> {
        if let Err(e) = &result {
            self.record_fault(e.clone());
        }
        result
    }

    fn record_mut(&mut self, id: ProcessId) -> SimResult<&mut ProcessRecord> {
        self.processes
            .get_mut(&id)
            .ok_or(SimError::ProcessNotFound(id))
    }

    fn due_after(&self, delay: f64) -> SimResult<VirtualTime> {
        self.now.advance(delay).ok_or(SimError::InvalidDelay(delay))
    }

    // ── Registration ──────────────────────────────────────────

    /// Add a process in the `Ready` state and assign its identity.
    pub(crate) fn register(
        &mut self,
        name: String,
        priority: Priority,
        kind: ProcessKind,
    ) -> ProcessId {
        let id = ProcessId::new(self.next_id);
        self.next_id += 1;
        trace!(process = %id, %name, "register");
        self.processes
            .insert(id, ProcessRecord::new(id, name, priority, kind));
        id
    }

    /// Forget a process that never got a thread.
    pub(crate) fn unregister(&mut self, id: ProcessId) {
        self.queue.remove(id);
        self.processes.remove(&id);
    }

    pub(crate) fn adopt_thread(&mut self, id: ProcessId, handle: JoinHandle<()>) {
        self.threads.insert(id, handle);
    }

    /// Hand over the thread of a body that has reported its exit, so the
    /// caller can join it outside the lock.
    pub(crate) fn take_thread(&mut self, id: ProcessId) -> Option<JoinHandle<()>> {
        self.threads.remove(&id)
    }

    /// Body threads still alive or not yet joined.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn add_gate(&mut self, value: bool) -> GateId {
        self.gates.push(GateState::new(value));
        GateId::new(self.gates.len() - 1)
    }

    /// Queue a `Ready` process at `now + delay`, or move an already
    /// scheduled one there.
    pub fn schedule(&mut self, id: ProcessId, delay: f64) -> SimResult<VirtualTime> {
        let result = self.schedule_inner(id, delay);
        self.guard(result)
    }

    fn schedule_inner(&mut self, id: ProcessId, delay: f64) -> SimResult<VirtualTime> {
        let due = self.due_after(delay)?;
        let rec = self.record_mut(id)?;
        if !matches!(rec.state, ProcessState::Ready | ProcessState::Scheduled) {
            return Err(SimError::InvalidTransition {
                process: id,
                from: rec.state,
                to: ProcessState::Scheduled,
            });
        }
        transition(rec, ProcessState::Scheduled)?;
        rec.due = due;
        let priority = rec.priority;
        self.queue.insert(id, due, priority);
        Ok(due)
    }

    // ── Dispatch ──────────────────────────────────────────────

    /// Pop the earliest activation and advance the clock to it.
    ///
    /// Returns `Ok(None)` once the queue is drained and the recorded fault
    /// if the run has been aborted.
    pub fn dispatch_next(&mut self) -> SimResult<Option<Dispatch>> {
        if let Some(err) = &self.fault {
            return Err(err.clone());
        }
        let Some((key, id)) = self.queue.pop_next() else {
            return Ok(None);
        };
        let result = self.dispatch_inner(key.due, id);
        self.guard(result).map(Some)
    }

    fn dispatch_inner(&mut self, due: VirtualTime, id: ProcessId) -> SimResult<Dispatch> {
        if due.is_before(self.now) {
            return Err(SimError::NonCausal {
                requested: due.as_f64(),
                current: self.now,
            });
        }
        self.now = due;
        self.dispatched += 1;

        let now = self.now;
        let index = self.dispatched;
        let record_trace = self.record_trace;
        let rec = self.record_mut(id)?;
        debug!(time = %now, process = %id, name = %rec.name, "dispatch");
        let entry = record_trace.then(|| DispatchRecord {
            index,
            time: now,
            process: id,
            name: rec.name.clone(),
            priority: rec.priority,
            timeout: rec.is_timeout(),
        });
        transition(rec, ProcessState::Active)?;

        let go = match &rec.kind {
            ProcessKind::Body { go } => Some(go.clone()),
            ProcessKind::Timeout { .. } => None,
        };
        if let Some(entry) = entry {
            self.trace.push(entry);
        }

        match go {
            Some(go) => {
                self.active = Some(id);
                Ok(Dispatch::Body { id, go })
            }
            None => {
                let admitted = self.fire_timeout(id);
                Ok(Dispatch::Timeout { id, admitted })
            }
        }
    }

    /// Run a timeout process: admit its original process if the wait it
    /// races is still the one it was created for. The timeout process is
    /// dropped either way.
    fn fire_timeout(&mut self, timeout_id: ProcessId) -> bool {
        let Some(rec) = self.processes.remove(&timeout_id) else {
            return false;
        };
        let ProcessKind::Timeout { original, period } = rec.kind else {
            return false;
        };
        let slot = match self.processes.get(&original) {
            Some(o) if o.state == ProcessState::WaitingCond => o.wait,
            _ => None,
        };
        let Some(slot) = slot.filter(|s| s.timeout == Some(timeout_id)) else {
            trace!(timeout = %timeout_id, %original, "timeout lost its race");
            return false;
        };
        if let Some(gate) = self.gates.get_mut(slot.gate.index()) {
            gate.waiters.remove(&original);
        }
        debug!(time = %self.now, process = %original, period, "wait timed out");
        self.admit(original, WaitOutcome::TimedOut);
        true
    }

    /// `WaitingCond -> Scheduled` at the current time.
    fn admit(&mut self, id: ProcessId, outcome: WaitOutcome) {
        let now = self.now;
        let Some(rec) = self.processes.get_mut(&id) else {
            return;
        };
        if transition(rec, ProcessState::Scheduled).is_err() {
            return;
        }
        rec.wait = None;
        rec.last_wait = Some(outcome);
        rec.due = now;
        let priority = rec.priority;
        self.queue.insert(id, now, priority);
    }

    /// The active body returned; `Active -> Terminated`.
    pub fn finish(&mut self, id: ProcessId) {
        if let Some(rec) = self.processes.get_mut(&id) {
            if transition(rec, ProcessState::Terminated).is_ok() {
                self.terminated += 1;
                debug!(time = %self.now, process = %id, "terminated");
            }
        }
        if self.active == Some(id) {
            self.active = None;
        }
    }

    pub fn begin_run(&mut self) -> SimResult<()> {
        if self.running {
            return Err(SimError::AlreadyRunning);
        }
        self.running = true;
        Ok(())
    }

    pub fn end_run(&mut self) {
        self.running = false;
        self.active = None;
    }

    // ── Operations of the active process ──────────────────────

    fn require_active(&self, id: ProcessId) -> SimResult<()> {
        let rec = self
            .processes
            .get(&id)
            .ok_or(SimError::ProcessNotFound(id))?;
        if self.active != Some(id) || rec.state != ProcessState::Active {
            return Err(SimError::NotActive {
                process: id,
                state: rec.state,
            });
        }
        Ok(())
    }

    /// `Active -> Scheduled` at `now + delay` with the process's own priority.
    pub fn advance(&mut self, id: ProcessId, delay: f64) -> SimResult<VirtualTime> {
        let result = self.requeue_active(id, delay, None);
        self.guard(result)
    }

    /// `Active -> Scheduled` at `now`, behind every other same-time entry.
    pub fn yield_now(&mut self, id: ProcessId) -> SimResult<VirtualTime> {
        let result = self.requeue_active(id, 0.0, Some(Priority::LOWEST));
        self.guard(result)
    }

    fn requeue_active(
        &mut self,
        id: ProcessId,
        delay: f64,
        priority: Option<Priority>,
    ) -> SimResult<VirtualTime> {
        self.require_active(id)?;
        let due = self.due_after(delay)?;
        let rec = self.record_mut(id)?;
        transition(rec, ProcessState::Scheduled)?;
        rec.due = due;
        let priority = priority.unwrap_or(rec.priority);
        self.queue.insert(id, due, priority);
        self.active = None;
        Ok(due)
    }

    /// Start a wait on `gate` for `value`.
    ///
    /// Returns `Ok(false)` when the gate already holds `value` and the
    /// caller keeps running, `Ok(true)` when the caller is now
    /// `WaitingCond` and must suspend. With `timeout`, a timeout process
    /// is queued at `now + timeout` to race the wait.
    pub fn begin_wait(
        &mut self,
        id: ProcessId,
        gate: GateId,
        value: bool,
        timeout: Option<f64>,
    ) -> SimResult<bool> {
        let result = self.begin_wait_inner(id, gate, value, timeout);
        self.guard(result)
    }

    fn begin_wait_inner(
        &mut self,
        id: ProcessId,
        gate: GateId,
        value: bool,
        timeout: Option<f64>,
    ) -> SimResult<bool> {
        self.require_active(id)?;
        let current = self
            .gates
            .get(gate.index())
            .map(|g| g.value)
            .ok_or(SimError::UnknownGate(gate))?;
        if current == value {
            self.record_mut(id)?.last_wait = Some(WaitOutcome::Signalled);
            return Ok(false);
        }
        let timeout_due = match timeout {
            Some(period) => Some((period, self.due_after(period)?)),
            None => None,
        };

        let priority = self.record_mut(id)?.priority;
        let timeout_id = match timeout_due {
            Some((period, due)) => {
                let tid = self.register(
                    format!("timeout:{}", id),
                    priority,
                    ProcessKind::Timeout {
                        original: id,
                        period,
                    },
                );
                let trec = self.record_mut(tid)?;
                transition(trec, ProcessState::Scheduled)?;
                trec.due = due;
                self.queue.insert(tid, due, priority);
                Some(tid)
            }
            None => None,
        };

        self.gates[gate.index()].waiters.insert(id, value);
        let rec = self.record_mut(id)?;
        transition(rec, ProcessState::WaitingCond)?;
        rec.wait = Some(WaitSlot {
            gate,
            value,
            timeout: timeout_id,
        });
        rec.last_wait = None;
        self.active = None;
        debug!(time = %self.now, process = %id, %gate, value, timeout = ?timeout_id, "waiting");
        Ok(true)
    }

    /// Set a gate and admit every matching waiter. Returns the number admitted.
    pub fn set_gate(&mut self, gate: GateId, value: bool) -> usize {
        let Some(state) = self.gates.get_mut(gate.index()) else {
            return 0;
        };
        state.value = value;
        let matched = state.take_matching(value);
        for id in &matched {
            self.admit(*id, WaitOutcome::Signalled);
        }
        debug!(time = %self.now, %gate, value, admitted = matched.len(), "gate set");
        matched.len()
    }

    pub fn gate_value(&self, gate: GateId) -> bool {
        self.gates.get(gate.index()).is_some_and(|g| g.value)
    }

    pub fn gate_waiters(&self, gate: GateId) -> usize {
        self.gates.get(gate.index()).map_or(0, |g| g.waiters.len())
    }

    // ── Interrupt / resume ────────────────────────────────────

    /// Pull a `Scheduled` process out of the queue, keeping its due time.
    pub fn interrupt(&mut self, id: ProcessId) -> SimResult<()> {
        let result = self.interrupt_inner(id);
        self.guard(result)
    }

    fn interrupt_inner(&mut self, id: ProcessId) -> SimResult<()> {
        let now = self.now;
        let rec = self.record_mut(id)?;
        if rec.is_timeout() {
            return Err(SimError::ProcessNotFound(id));
        }
        if rec.state != ProcessState::Scheduled {
            return Err(SimError::NotScheduled {
                process: id,
                state: rec.state,
            });
        }
        transition(rec, ProcessState::Interrupted)?;
        rec.interrupted_due = Some(rec.due);
        let due = rec.due;
        self.queue.remove(id);
        debug!(time = %now, process = %id, %due, "interrupted");
        Ok(())
    }

    /// Put an `Interrupted` process back at its original due time plus
    /// `compensation`.
    pub fn resume(&mut self, id: ProcessId, compensation: f64) -> SimResult<VirtualTime> {
        let result = self.resume_inner(id, compensation);
        self.guard(result)
    }

    fn resume_inner(&mut self, id: ProcessId, compensation: f64) -> SimResult<VirtualTime> {
        let now = self.now;
        let rec = self.record_mut(id)?;
        if rec.state != ProcessState::Interrupted {
            return Err(SimError::NotInterrupted {
                process: id,
                state: rec.state,
            });
        }
        // Compensation may be negative: resume can also rewind what is left.
        let original = rec.interrupted_due.unwrap_or(now);
        let requested = original.as_f64() + compensation;
        if !requested.is_finite() {
            return Err(SimError::InvalidDelay(compensation));
        }
        if requested < now.as_f64() {
            return Err(SimError::NonCausal { requested, current: now });
        }
        let due = VirtualTime::new(requested);
        transition(rec, ProcessState::Scheduled)?;
        rec.due = due;
        rec.interrupted_due = None;
        let priority = rec.priority;
        self.queue.insert(id, due, priority);
        debug!(time = %now, process = %id, %due, compensation, "resumed");
        Ok(due)
    }

    /// Absolute due time of a `Scheduled` process.
    ///
    /// Asking about a process that is not scheduled is a violation. An
    /// unknown ID is only a failed lookup, like [`state`](Self::state).
    pub fn scheduled_time(&mut self, id: ProcessId) -> SimResult<VirtualTime> {
        let rec = self
            .processes
            .get(&id)
            .ok_or(SimError::ProcessNotFound(id))?;
        if rec.state == ProcessState::Scheduled {
            return Ok(rec.due);
        }
        let err = SimError::NotScheduled {
            process: id,
            state: rec.state,
        };
        self.record_fault(err.clone());
        Err(err)
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Reset to time zero with no processes. Gate values survive, their
    /// waiters do not.
    pub fn reset(&mut self) -> Teardown {
        self.now = VirtualTime::ZERO;
        self.queue.clear();
        for gate in &mut self.gates {
            gate.waiters.clear();
        }
        self.next_id = 1;
        self.active = None;
        self.fault = None;
        self.dispatched = 0;
        self.terminated = 0;
        self.trace.clear();
        let records = std::mem::take(&mut self.processes).into_values().collect();
        Teardown {
            records,
            threads: std::mem::take(&mut self.threads).into_values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{bounded, Receiver};

    fn body(k: &mut Kernel, name: &str, priority: i32) -> (ProcessId, Receiver<Signal>) {
        let (tx, rx) = bounded(1);
        let id = k.register(name.into(), Priority::new(priority), ProcessKind::Body { go: tx });
        (id, rx)
    }

    /// Pop the next activation and expect it to be `id`'s body.
    fn activate(k: &mut Kernel, id: ProcessId) {
        match k.dispatch_next() {
            Ok(Some(Dispatch::Body { id: got, .. })) => assert_eq!(got, id),
            other => panic!("expected body {}, got {:?}", id, other),
        }
    }

    #[test]
    fn test_ids_are_sequential_from_one() {
        let mut k = Kernel::new(false);
        let (a, _ra) = body(&mut k, "a", 0);
        let (b, _rb) = body(&mut k, "b", 0);
        assert_eq!(a, ProcessId::new(1));
        assert_eq!(b, ProcessId::new(2));
        assert_eq!(k.state(a).unwrap(), ProcessState::Ready);
    }

    #[test]
    fn test_advance_moves_clock_exactly() {
        let mut k = Kernel::new(false);
        let (a, _ra) = body(&mut k, "a", 0);
        k.schedule(a, 0.0).unwrap();
        for i in 1..=5 {
            activate(&mut k, a);
            assert_eq!(k.active(), Some(a));
            let due = k.advance(a, 10.0).unwrap();
            assert_eq!(due, VirtualTime::new(10.0 * i as f64));
            assert_eq!(k.active(), None);
        }
        activate(&mut k, a);
        k.finish(a);
        assert_eq!(k.now(), VirtualTime::new(50.0));
        assert_eq!(k.state(a).unwrap(), ProcessState::Terminated);
        assert!(k.dispatch_next().unwrap().is_none());
    }

    #[test]
    fn test_advance_requires_active() {
        let mut k = Kernel::new(false);
        let (a, _ra) = body(&mut k, "a", 0);
        k.schedule(a, 5.0).unwrap();
        let err = k.advance(a, 1.0).unwrap_err();
        assert!(matches!(err, SimError::NotActive { .. }));
        assert_eq!(k.fault(), Some(&err));
        // A faulted kernel refuses to dispatch.
        assert_eq!(k.dispatch_next().unwrap_err(), err);
    }

    #[test]
    fn test_negative_delay_is_violation() {
        let mut k = Kernel::new(false);
        let (a, _ra) = body(&mut k, "a", 0);
        k.schedule(a, 0.0).unwrap();
        activate(&mut k, a);
        assert_eq!(k.advance(a, -1.0).unwrap_err(), SimError::InvalidDelay(-1.0));
        assert!(k.fault().is_some());
    }

    #[test]
    fn test_yield_goes_behind_same_time_entries() {
        let mut k = Kernel::new(false);
        let (a, _ra) = body(&mut k, "a", 0);
        let (b, _rb) = body(&mut k, "b", 5);
        k.schedule(a, 0.0).unwrap();
        k.schedule(b, 0.0).unwrap();
        activate(&mut k, a);
        k.yield_now(a).unwrap();
        activate(&mut k, b);
        k.finish(b);
        activate(&mut k, a);
        assert_eq!(k.now(), VirtualTime::ZERO);
    }

    #[test]
    fn test_schedule_rejects_terminated() {
        let mut k = Kernel::new(false);
        let (a, _ra) = body(&mut k, "a", 0);
        k.schedule(a, 0.0).unwrap();
        activate(&mut k, a);
        k.finish(a);
        assert!(matches!(
            k.schedule(a, 1.0),
            Err(SimError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_interrupt_then_resume_adds_compensation() {
        let mut k = Kernel::new(false);
        let (a, _ra) = body(&mut k, "a", 0);
        let (b, _rb) = body(&mut k, "b", 0);
        k.schedule(a, 0.0).unwrap();
        k.schedule(b, 0.0).unwrap();

        activate(&mut k, a);
        k.advance(a, 100.0).unwrap();
        activate(&mut k, b);
        k.advance(b, 40.0).unwrap();
        activate(&mut k, b);
        assert_eq!(k.now(), VirtualTime::new(40.0));

        k.interrupt(a).unwrap();
        assert_eq!(k.state(a).unwrap(), ProcessState::Interrupted);
        assert_eq!(k.info(a).unwrap().interrupted_due, Some(VirtualTime::new(100.0)));
        assert_eq!(k.resume(a, 5.0).unwrap(), VirtualTime::new(105.0));
        assert_eq!(k.scheduled_time(a).unwrap(), VirtualTime::new(105.0));
        k.finish(b);

        activate(&mut k, a);
        assert_eq!(k.now(), VirtualTime::new(105.0));
    }

    #[test]
    fn test_interrupt_requires_scheduled() {
        let mut k = Kernel::new(false);
        let (a, _ra) = body(&mut k, "a", 0);
        let err = k.interrupt(a).unwrap_err();
        assert_eq!(
            err,
            SimError::NotScheduled {
                process: a,
                state: ProcessState::Ready
            }
        );
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn test_resume_requires_interrupted() {
        let mut k = Kernel::new(false);
        let (a, _ra) = body(&mut k, "a", 0);
        k.schedule(a, 3.0).unwrap();
        assert!(matches!(
            k.resume(a, 1.0),
            Err(SimError::NotInterrupted { .. })
        ));
    }

    #[test]
    fn test_scheduled_time_requires_scheduled() {
        let mut k = Kernel::new(false);
        let (a, _ra) = body(&mut k, "a", 0);
        assert!(matches!(
            k.scheduled_time(a),
            Err(SimError::NotScheduled { .. })
        ));
        assert!(k.fault().is_some());
    }

    #[test]
    fn test_gate_admits_only_matching_waiters_by_priority() {
        let mut k = Kernel::new(false);
        let gate = k.add_gate(false);
        let (lo, _r1) = body(&mut k, "lo", 9);
        let (hi, _r2) = body(&mut k, "hi", 1);
        let (off, _r3) = body(&mut k, "off", 0);
        for id in [lo, hi, off] {
            k.schedule(id, 0.0).unwrap();
        }

        // `off` waits for false; the gate is false so it keeps running.
        activate(&mut k, off);
        assert!(!k.begin_wait(off, gate, false, None).unwrap());
        assert_eq!(k.state(off).unwrap(), ProcessState::Active);
        k.advance(off, 1.0).unwrap();

        activate(&mut k, hi);
        assert!(k.begin_wait(hi, gate, true, None).unwrap());
        activate(&mut k, lo);
        assert!(k.begin_wait(lo, gate, true, None).unwrap());
        assert_eq!(k.gate_waiters(gate), 2);
        activate(&mut k, off);

        assert_eq!(k.set_gate(gate, true), 2);
        assert_eq!(k.state(lo).unwrap(), ProcessState::Scheduled);
        assert_eq!(k.state(hi).unwrap(), ProcessState::Scheduled);
        assert_eq!(k.gate_waiters(gate), 0);
        k.finish(off);

        activate(&mut k, hi);
        assert_eq!(k.last_wait(hi), Some(WaitOutcome::Signalled));
        k.finish(hi);
        activate(&mut k, lo);
        assert_eq!(k.now(), VirtualTime::new(1.0));
    }

    #[test]
    fn test_timeout_wins_when_set_is_late() {
        let mut k = Kernel::new(true);
        let gate = k.add_gate(false);
        let (a, _ra) = body(&mut k, "a", 0);
        k.schedule(a, 0.0).unwrap();
        activate(&mut k, a);
        assert!(k.begin_wait(a, gate, true, Some(5.0)).unwrap());
        let tid = k.info(a).unwrap().timeout.unwrap();

        match k.dispatch_next() {
            Ok(Some(Dispatch::Timeout { id, admitted })) => {
                assert_eq!(id, tid);
                assert!(admitted);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(k.now(), VirtualTime::new(5.0));
        assert!(k.state(tid).is_err(), "timeout process is dropped");
        assert_eq!(k.gate_waiters(gate), 0);

        // A later set no longer concerns `a`.
        assert_eq!(k.set_gate(gate, true), 0);
        activate(&mut k, a);
        assert_eq!(k.last_wait(a), Some(WaitOutcome::TimedOut));
        assert!(k.trace().iter().any(|r| r.timeout));
    }

    #[test]
    fn test_set_before_timeout_makes_timeout_noop() {
        let mut k = Kernel::new(false);
        let gate = k.add_gate(false);
        let (a, _ra) = body(&mut k, "a", 0);
        k.schedule(a, 0.0).unwrap();
        activate(&mut k, a);
        k.begin_wait(a, gate, true, Some(5.0)).unwrap();

        assert_eq!(k.set_gate(gate, true), 1);
        activate(&mut k, a);
        assert_eq!(k.last_wait(a), Some(WaitOutcome::Signalled));
        k.advance(a, 10.0).unwrap();

        match k.dispatch_next() {
            Ok(Some(Dispatch::Timeout { admitted, .. })) => assert!(!admitted),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(k.state(a).unwrap(), ProcessState::Scheduled);
        assert_eq!(k.scheduled_time(a).unwrap(), VirtualTime::new(10.0));
    }

    #[test]
    fn test_resume_before_now_is_non_causal() {
        let mut k = Kernel::new(false);
        let (a, _ra) = body(&mut k, "a", 0);
        let (b, _rb) = body(&mut k, "b", 0);
        k.schedule(a, 10.0).unwrap();
        k.schedule(b, 0.0).unwrap();
        activate(&mut k, b);
        k.interrupt(a).unwrap();
        k.advance(b, 20.0).unwrap();
        activate(&mut k, b);
        assert!(matches!(
            k.resume(a, 1.0),
            Err(SimError::NonCausal { .. })
        ));
    }

    #[test]
    fn test_resume_with_negative_compensation_rewinds() {
        let mut k = Kernel::new(false);
        let (a, _ra) = body(&mut k, "a", 0);
        let (b, _rb) = body(&mut k, "b", 0);
        k.schedule(a, 100.0).unwrap();
        k.schedule(b, 40.0).unwrap();
        activate(&mut k, b);
        assert_eq!(k.now(), VirtualTime::new(40.0));

        k.interrupt(a).unwrap();
        assert_eq!(k.resume(a, -10.0).unwrap(), VirtualTime::new(90.0));
        assert_eq!(k.scheduled_time(a).unwrap(), VirtualTime::new(90.0));
        assert!(k.fault().is_none());
        k.finish(b);
        activate(&mut k, a);
        assert_eq!(k.now(), VirtualTime::new(90.0));
    }

    #[test]
    fn test_resume_rewound_before_now_is_non_causal() {
        let mut k = Kernel::new(false);
        let (a, _ra) = body(&mut k, "a", 0);
        let (b, _rb) = body(&mut k, "b", 0);
        k.schedule(a, 100.0).unwrap();
        k.schedule(b, 40.0).unwrap();
        activate(&mut k, b);
        k.interrupt(a).unwrap();
        assert_eq!(
            k.resume(a, -70.0).unwrap_err(),
            SimError::NonCausal {
                requested: 30.0,
                current: VirtualTime::new(40.0),
            }
        );
    }

    #[test]
    fn test_resume_rejects_non_finite_compensation() {
        let mut k = Kernel::new(false);
        let (a, _ra) = body(&mut k, "a", 0);
        k.schedule(a, 10.0).unwrap();
        k.interrupt(a).unwrap();
        assert!(matches!(
            k.resume(a, f64::NAN),
            Err(SimError::InvalidDelay(_))
        ));
        assert_eq!(
            k.resume(a, f64::INFINITY).unwrap_err(),
            SimError::InvalidDelay(f64::INFINITY)
        );
    }

    #[test]
    fn test_scheduled_time_of_unknown_process_is_not_a_fault() {
        let mut k = Kernel::new(false);
        assert_eq!(
            k.scheduled_time(ProcessId::new(99)).unwrap_err(),
            SimError::ProcessNotFound(ProcessId::new(99))
        );
        assert!(k.fault().is_none());
        assert!(k.dispatch_next().unwrap().is_none());
    }

    #[test]
    fn test_reset_keeps_gate_values() {
        let mut k = Kernel::new(false);
        let gate = k.add_gate(false);
        let (a, _ra) = body(&mut k, "a", 0);
        k.schedule(a, 0.0).unwrap();
        activate(&mut k, a);
        k.begin_wait(a, gate, true, None).unwrap();
        k.set_gate(gate, false);

        let teardown = k.reset();
        assert_eq!(teardown.records.len(), 1);
        assert_eq!(k.now(), VirtualTime::ZERO);
        assert_eq!(k.pending(), 0);
        assert_eq!(k.gate_waiters(gate), 0);
        assert!(!k.gate_value(gate));
        let (b, _rb) = body(&mut k, "b", 0);
        assert_eq!(b, ProcessId::new(1));
    }
}
