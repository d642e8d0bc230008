//! Simulation handle and dispatch loop.
//!
//! Pops activations, advances virtual time and hands the baton to the
//! owning process. The loop runs on the caller's thread (`run`) or on a
//! dedicated dispatcher thread (`start` + `wait_until_done`). Either way
//! exactly one process body executes at a time.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::baton::{self, Baton, Signal};
use crate::config::SimulationConfig;
use crate::error::{SimError, SimResult};
use crate::gate::Gate;
use crate::kernel::{Dispatch, Kernel, Teardown};
use crate::process::{Priority, ProcessId, ProcessInfo, ProcessKind, ProcessState, Runner};
use crate::time::VirtualTime;
use crate::trace::DispatchRecord;

// ── Shared state ──────────────────────────────────────────────────────

/// State shared by the simulation handle, gates, contexts and threads.
pub(crate) struct Shared {
    pub(crate) kernel: Mutex<Kernel>,
    pub(crate) config: SimulationConfig,
    pub(crate) baton_tx: Sender<Baton>,
    baton_rx: Receiver<Baton>,
}

// ── RunSummary ────────────────────────────────────────────────────────

/// Result of a run that drained the event queue.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct RunSummary {
    /// Clock value when the queue emptied.
    pub finished_at: VirtualTime,
    /// Activations dispatched since the last clear, timeouts included.
    pub dispatched: u64,
    /// Processes whose bodies returned.
    pub terminated: usize,
    /// Activations still queued. Zero for a completed run.
    pub pending: usize,
}

// ── ProcessBuilder ────────────────────────────────────────────────────

/// Builder for registering a process.
///
/// # Example
/// ```rust
/// use kairos::{Priority, Simulation};
///
/// let sim = Simulation::new();
/// let id = sim
///     .process("machine")
///     .priority(Priority::new(1))
///     .delay(5.0)
///     .spawn(|ctx: &kairos::ProcessContext| ctx.advance(10.0))
///     .unwrap();
/// let summary = sim.run().unwrap();
/// assert_eq!(summary.finished_at.as_f64(), 15.0);
/// assert!(sim.state(id).unwrap().is_terminal());
/// ```
pub struct ProcessBuilder<'a> {
    shared: &'a Arc<Shared>,
    name: String,
    priority: Option<Priority>,
    delay: f64,
}

impl<'a> ProcessBuilder<'a> {
    pub(crate) fn new(shared: &'a Arc<Shared>, name: String) -> Self {
        ProcessBuilder {
            shared,
            name,
            priority: None,
            delay: 0.0,
        }
    }

    /// Tie-break among same-time activations. Lower runs first.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Delay of the first activation, used by [`spawn`](Self::spawn).
    pub fn delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }

    /// Register the process in the `Ready` state without scheduling it.
    pub fn register(self, runner: impl Runner) -> SimResult<ProcessId> {
        let priority = self
            .priority
            .unwrap_or(self.shared.config.default_priority);
        let (go_tx, go_rx) = bounded(1);
        let id = self.shared.kernel.lock().register(
            self.name,
            priority,
            ProcessKind::Body { go: go_tx },
        );
        match baton::spawn_body(self.shared, id, Box::new(runner), go_rx) {
            Ok(handle) => {
                self.shared.kernel.lock().adopt_thread(id, handle);
                Ok(id)
            }
            Err(e) => {
                self.shared.kernel.lock().unregister(id);
                Err(e)
            }
        }
    }

    /// Register the process and schedule its first activation at
    /// `now + delay`.
    pub fn spawn(self, runner: impl Runner) -> SimResult<ProcessId> {
        let shared = self.shared;
        let delay = self.delay;
        let id = self.register(runner)?;
        shared.kernel.lock().schedule(id, delay)?;
        Ok(id)
    }
}

// ── Simulation ────────────────────────────────────────────────────────

/// Top-level simulation handle.
///
/// Owns the kernel (clock, event queue, processes, gates). Register
/// processes, then call [`run`](Self::run) to drain the event queue, or
/// [`start`](Self::start) to drain it on a dispatcher thread.
/// [`clear`](Self::clear) resets everything for an independent
/// replication. Dropping the simulation tears down every process thread.
pub struct Simulation {
    shared: Arc<Shared>,
}

impl Simulation {
    /// Create a new simulation starting at time zero.
    pub fn new() -> Self {
        Self::with_config(SimulationConfig::default())
    }

    pub fn with_config(config: SimulationConfig) -> Self {
        let (baton_tx, baton_rx) = unbounded();
        Simulation {
            shared: Arc::new(Shared {
                kernel: Mutex::new(Kernel::new(config.record_trace)),
                config,
                baton_tx,
                baton_rx,
            }),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.shared.config
    }

    /// Create a condition gate with the given initial value.
    pub fn gate(&self, initial: bool) -> Gate {
        let id = self.shared.kernel.lock().add_gate(initial);
        Gate::new(id, Arc::clone(&self.shared))
    }

    /// Start building a process.
    pub fn process(&self, name: impl Into<String>) -> ProcessBuilder<'_> {
        ProcessBuilder::new(&self.shared, name.into())
    }

    /// Register and schedule an unnamed process at the current time.
    pub fn spawn(&self, runner: impl Runner) -> SimResult<ProcessId> {
        self.process("process").spawn(runner)
    }

    /// Schedule a `Ready` process at `now + delay`, or reposition a
    /// scheduled one.
    pub fn schedule(&self, process: ProcessId, delay: f64) -> SimResult<VirtualTime> {
        self.shared.kernel.lock().schedule(process, delay)
    }

    // ── Queries ───────────────────────────────────────────────

    /// Current virtual time.
    pub fn now(&self) -> VirtualTime {
        self.shared.kernel.lock().now()
    }

    pub fn state(&self, process: ProcessId) -> SimResult<ProcessState> {
        self.shared.kernel.lock().state(process)
    }

    pub fn is_scheduled(&self, process: ProcessId) -> bool {
        matches!(self.state(process), Ok(ProcessState::Scheduled))
    }

    pub fn info(&self, process: ProcessId) -> SimResult<ProcessInfo> {
        self.shared.kernel.lock().info(process)
    }

    /// Snapshots of every process in the current run, in ID order.
    pub fn processes(&self) -> Vec<ProcessInfo> {
        self.shared.kernel.lock().infos()
    }

    /// Absolute due time of a scheduled process.
    ///
    /// Calling this on a process that is not `Scheduled` is a protocol
    /// violation and aborts the run.
    pub fn scheduled_time(&self, process: ProcessId) -> SimResult<VirtualTime> {
        self.shared.kernel.lock().scheduled_time(process)
    }

    /// Time left until a scheduled process runs.
    pub fn remaining_time(&self, process: ProcessId) -> SimResult<f64> {
        let mut kernel = self.shared.kernel.lock();
        let due = kernel.scheduled_time(process)?;
        Ok(due.as_f64() - kernel.now().as_f64())
    }

    /// Number of queued activations.
    pub fn pending(&self) -> usize {
        self.shared.kernel.lock().pending()
    }

    /// The protocol violation or failure that aborted the current run.
    pub fn fault(&self) -> Option<SimError> {
        self.shared.kernel.lock().fault().cloned()
    }

    /// Dispatch trace since the last clear. Empty unless
    /// [`SimulationConfig::record_trace`] is on.
    pub fn trace(&self) -> Vec<DispatchRecord> {
        self.shared.kernel.lock().trace().to_vec()
    }

    /// The dispatch trace as pretty-printed JSON.
    #[cfg(feature = "serialize")]
    pub fn trace_json(&self) -> String {
        serde_json::to_string_pretty(&self.trace()).unwrap_or_else(|_| "[]".into())
    }

    // ── Interrupt / resume ────────────────────────────────────

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

    // ── Run control ───────────────────────────────────────────

    /// Dispatch until the event queue is empty.
    ///
    /// Blocks the caller for the whole run. Returns the recorded fault if
    /// a protocol violation, a failing body or a panic aborted the run.
    pub fn run(&self) -> SimResult<RunSummary> {
        self.shared.kernel.lock().begin_run()?;
        drive(&self.shared)
    }

    /// Dispatch on a background thread. Use
    /// [`RunHandle::wait_until_done`] to block until the queue is empty.
    pub fn start(&self) -> SimResult<RunHandle<'_>> {
        self.shared.kernel.lock().begin_run()?;
        let shared = Arc::clone(&self.shared);
        let thread_name = format!("{}-dispatch", self.shared.config.thread_name_prefix);
        let spawned = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || drive(&shared));
        match spawned {
            Ok(handle) => Ok(RunHandle { _sim: self, handle }),
            Err(e) => {
                self.shared.kernel.lock().end_run();
                Err(SimError::Spawn {
                    thread: thread_name,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Reset the clock to zero and discard every process, queued
    /// activation and gate waiter. Gate values are kept.
    pub fn clear(&self) -> SimResult<()> {
        let teardown = {
            let mut kernel = self.shared.kernel.lock();
            if kernel.is_running() {
                return Err(SimError::AlreadyRunning);
            }
            kernel.reset()
        };
        release(&self.shared, teardown);
        info!("simulation cleared");
        Ok(())
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        let teardown = self.shared.kernel.lock().reset();
        release(&self.shared, teardown);
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kernel = self.shared.kernel.lock();
        f.debug_struct("Simulation")
            .field("now", &kernel.now())
            .field("active", &kernel.active())
            .field("pending", &kernel.pending())
            .field("threads", &kernel.thread_count())
            .field("running", &kernel.is_running())
            .finish()
    }
}

/// A run in progress on the dispatcher thread.
pub struct RunHandle<'a> {
    _sim: &'a Simulation,
    handle: JoinHandle<SimResult<RunSummary>>,
}

impl RunHandle<'_> {
    /// Block until the event queue is empty or the run aborts.
    pub fn wait_until_done(self) -> SimResult<RunSummary> {
        self.handle.join().unwrap_or(Err(SimError::Aborted))
    }

    /// Returns `true` once the dispatcher has stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

// ── Dispatch loop ─────────────────────────────────────────────────────

fn drive(shared: &Shared) -> SimResult<RunSummary> {
    info!(time = %shared.kernel.lock().now(), "run started");
    let result = dispatch_loop(shared);
    shared.kernel.lock().end_run();
    match &result {
        Ok(summary) => info!(
            time = %summary.finished_at,
            dispatched = summary.dispatched,
            terminated = summary.terminated,
            "run finished"
        ),
        Err(e) => warn!(error = %e, "run aborted"),
    }
    result
}

fn dispatch_loop(shared: &Shared) -> SimResult<RunSummary> {
    loop {
        let step = shared.kernel.lock().dispatch_next()?;
        let (id, go) = match step {
            None => return Ok(shared.kernel.lock().summary()),
            Some(Dispatch::Timeout { .. }) => continue,
            Some(Dispatch::Body { id, go }) => (id, go),
        };

        if go.send(Signal::Go).is_err() {
            shared.kernel.lock().record_fault(SimError::Aborted);
            continue;
        }
        let report = shared.baton_rx.recv().map_err(|_| SimError::Aborted)?;

        let mut kernel = shared.kernel.lock();
        let exited = match report {
            Baton::Suspended(p) => {
                debug_assert_eq!(p, id);
                None
            }
            Baton::Finished(p, Ok(())) => {
                kernel.finish(p);
                Some(p)
            }
            Baton::Finished(p, Err(e)) => {
                kernel.finish(p);
                kernel.record_fault(e);
                Some(p)
            }
            Baton::Panicked(process, message) => {
                kernel.record_fault(SimError::ProcessPanicked { process, message });
                Some(process)
            }
            Baton::TornDown(p) => {
                debug!(process = %p, "body unwound");
                kernel.record_fault(SimError::Aborted);
                Some(p)
            }
        };
        let handle = exited.and_then(|p| kernel.take_thread(p));
        drop(kernel);
        // The report is the thread's last act.
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// Close every process channel, join the threads and drop whatever they
/// reported on the way out.
fn release(shared: &Shared, teardown: Teardown) {
    let Teardown { records, threads } = teardown;
    drop(records);
    for handle in threads {
        let _ = handle.join();
    }
    while shared.baton_rx.try_recv().is_ok() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessContext;

    #[test]
    fn test_empty_simulation() {
        let sim = Simulation::new();
        let summary = sim.run().unwrap();
        assert_eq!(summary.dispatched, 0);
        assert_eq!(summary.finished_at, VirtualTime::ZERO);
    }

    #[test]
    fn test_single_process_runs_to_termination() {
        let sim = Simulation::new();
        let id = sim
            .spawn(|ctx: &ProcessContext| {
                ctx.advance(3.0)?;
                ctx.advance(4.0)
            })
            .unwrap();
        assert!(sim.is_scheduled(id));

        let summary = sim.run().unwrap();
        assert_eq!(summary.finished_at, VirtualTime::new(7.0));
        assert_eq!(summary.dispatched, 3);
        assert_eq!(summary.terminated, 1);
        assert_eq!(sim.state(id).unwrap(), ProcessState::Terminated);
    }

    #[test]
    fn test_register_leaves_process_ready() {
        let sim = Simulation::new();
        let id = sim
            .process("idle")
            .register(|_: &ProcessContext| -> SimResult<()> { Ok(()) })
            .unwrap();
        assert_eq!(sim.state(id).unwrap(), ProcessState::Ready);
        assert_eq!(sim.run().unwrap().dispatched, 0);

        assert_eq!(sim.schedule(id, 2.5).unwrap(), VirtualTime::new(2.5));
        let summary = sim.run().unwrap();
        assert_eq!(summary.finished_at, VirtualTime::new(2.5));
        assert!(sim.state(id).unwrap().is_terminal());
    }

    #[test]
    fn test_start_and_wait_until_done() {
        let sim = Simulation::new();
        sim.spawn(|ctx: &ProcessContext| ctx.advance(12.0)).unwrap();
        let handle = sim.start().unwrap();
        let summary = handle.wait_until_done().unwrap();
        assert_eq!(summary.finished_at, VirtualTime::new(12.0));
    }

    #[test]
    fn test_clear_resets_clock_and_ids() {
        let sim = Simulation::new();
        sim.spawn(|ctx: &ProcessContext| ctx.advance(5.0)).unwrap();
        sim.run().unwrap();
        assert_eq!(sim.now(), VirtualTime::new(5.0));

        sim.clear().unwrap();
        assert_eq!(sim.now(), VirtualTime::ZERO);
        assert!(sim.processes().is_empty());
        let id = sim.spawn(|_: &ProcessContext| -> SimResult<()> { Ok(()) }).unwrap();
        assert_eq!(id, ProcessId::new(1));
    }

    #[test]
    fn test_clear_releases_parked_processes() {
        let sim = Simulation::new();
        let gate = sim.gate(false);
        let g = gate.clone();
        sim.spawn(move |ctx: &ProcessContext| ctx.wait_for(&g, true))
            .unwrap();
        let summary = sim.run().unwrap();
        assert_eq!(summary.terminated, 0);
        assert_eq!(gate.waiting(), 1);

        sim.clear().unwrap();
        assert_eq!(gate.waiting(), 0);
        assert_eq!(sim.run().unwrap().dispatched, 0);
    }

    #[test]
    fn test_trace_recorded_when_enabled() {
        let sim = Simulation::with_config(SimulationConfig::new().with_trace(true));
        sim.process("a")
            .spawn(|ctx: &ProcessContext| ctx.advance(1.0))
            .unwrap();
        sim.run().unwrap();
        let trace = sim.trace();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[0].name, "a");
        assert_eq!(trace[1].time, VirtualTime::new(1.0));
    }

    #[test]
    fn test_finished_bodies_are_joined_during_the_run() {
        let sim = Simulation::new();
        sim.process("source")
            .spawn(|ctx: &ProcessContext| -> SimResult<()> {
                for _ in 0..500 {
                    ctx.process("job")
                        .spawn(|c: &ProcessContext| c.advance(0.5))?;
                    ctx.advance(1.0)?;
                }
                Ok(())
            })
            .unwrap();

        let summary = sim.run().unwrap();
        assert_eq!(summary.terminated, 501);
        assert_eq!(sim.shared.kernel.lock().thread_count(), 0);
    }

    #[cfg(feature = "serialize")]
    #[test]
    fn test_trace_json_lists_dispatches() {
        let sim = Simulation::with_config(SimulationConfig::new().with_trace(true));
        sim.process("clerk")
            .spawn(|ctx: &ProcessContext| ctx.advance(2.0))
            .unwrap();
        sim.run().unwrap();

        let parsed: Vec<DispatchRecord> = serde_json::from_str(&sim.trace_json()).unwrap();
        assert_eq!(parsed, sim.trace());
        assert_eq!(parsed[1].time, VirtualTime::new(2.0));
    }
}
