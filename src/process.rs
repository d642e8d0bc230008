//! Processes: identities, priorities, the state machine and the body trait.
//!
//! A process is one independently progressing body of model code. Its
//! bookkeeping lives in the kernel's process table; model code only ever
//! holds a [`ProcessId`].

use std::time::{Duration, Instant};

use crossbeam::channel::Sender;

use crate::baton::Signal;
use crate::context::ProcessContext;
use crate::error::SimResult;
use crate::gate::GateId;
use crate::time::VirtualTime;

// ── Process ID ────────────────────────────────────────────────────────

/// A unique identifier for a process within one run.
///
/// IDs are handed out sequentially from 1 at run initialization and
/// restart at 1 after [`Simulation::clear`](crate::Simulation::clear).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessId(u64);

impl ProcessId {
    /// Create a process ID from a raw integer.
    #[inline]
    pub fn new(id: u64) -> Self {
        ProcessId(id)
    }

    /// Return the underlying integer.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

// ── Priority ──────────────────────────────────────────────────────────

/// Tie-break among activations due at the same instant.
///
/// **Lower values dispatch first.** Equal priorities dispatch in the order
/// they were enqueued. `yield_now` enqueues at [`Priority::LOWEST`], which
/// places the yielding process behind every other same-time activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Priority(i32);

impl Priority {
    pub const HIGHEST: Priority = Priority(i32::MIN);
    pub const DEFAULT: Priority = Priority(0);
    pub const LOWEST: Priority = Priority(i32::MAX);

    #[inline]
    pub fn new(value: i32) -> Self {
        Priority(value)
    }

    #[inline]
    pub fn value(self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Process State ─────────────────────────────────────────────────────

/// Lifecycle state of a process.
///
/// ```text
/// Ready ──► Scheduled ──► Active ──► Terminated
///              ▲  │  ▲      │
///              │  │  └──────┤ advance / yield
///              │  ▼         ▼
///        Interrupted    WaitingCond ──► Scheduled (gate admits / timeout)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum ProcessState {
    Ready,
    Scheduled,
    Active,
    WaitingCond,
    Interrupted,
    Terminated,
}

impl ProcessState {
    /// Whether `self -> to` is an edge of the state machine.
    ///
    /// `Scheduled -> Scheduled` is the reposition edge used by
    /// `Simulation::schedule` on an already-queued process.
    pub fn can_transition_to(self, to: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, to),
            (Ready, Scheduled)
                | (Scheduled, Scheduled)
                | (Scheduled, Active)
                | (Scheduled, Interrupted)
                | (Active, Scheduled)
                | (Active, WaitingCond)
                | (Active, Terminated)
                | (WaitingCond, Scheduled)
                | (Interrupted, Scheduled)
        )
    }

    /// `Terminated` is absorbing.
    pub fn is_terminal(self) -> bool {
        self == ProcessState::Terminated
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessState::Ready => "READY",
            ProcessState::Scheduled => "SCHEDULED",
            ProcessState::Active => "ACTIVE",
            ProcessState::WaitingCond => "WAITING_COND",
            ProcessState::Interrupted => "INTERRUPTED",
            ProcessState::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

// ── Runner ────────────────────────────────────────────────────────────

/// Trait implemented by every process body.
///
/// The body runs on its own thread but only while it holds the baton:
/// every call into `ctx` that suspends (`advance`, `yield_now`,
/// `wait_for`) hands control back to the dispatcher. Returning ends the
/// process. Returning `Err` aborts the whole run.
///
/// # Example
///
/// ```rust
/// use kairos::{ProcessContext, Runner, SimResult};
///
/// struct Machine { parts: u32 }
///
/// impl Runner for Machine {
///     fn run(&mut self, ctx: &ProcessContext) -> SimResult<()> {
///         while ctx.now().as_f64() < 100.0 {
///             ctx.advance(10.0)?;
///             self.parts += 1;
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Runner: Send + 'static {
    fn run(&mut self, ctx: &ProcessContext) -> SimResult<()>;
}

/// A body backed by a closure.
impl<F> Runner for F
where
    F: FnMut(&ProcessContext) -> SimResult<()> + Send + 'static,
{
    fn run(&mut self, ctx: &ProcessContext) -> SimResult<()> {
        (self)(ctx)
    }
}

// ── Kernel-side bookkeeping ───────────────────────────────────────────

/// Outcome of a wait on a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum WaitOutcome {
    /// The gate reached the awaited value.
    Signalled,
    /// The timeout fired first.
    TimedOut,
}

/// An outstanding wait on a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaitSlot {
    pub gate: GateId,
    pub value: bool,
    /// The timeout process racing this wait, if bounded.
    pub timeout: Option<ProcessId>,
}

#[derive(Debug)]
pub(crate) enum ProcessKind {
    /// Model code on its own thread, woken through `go`.
    Body { go: Sender<Signal> },
    /// Synthetic process that ends a bounded wait of `original`.
    Timeout { original: ProcessId, period: f64 },
}

#[derive(Debug)]
pub(crate) struct ProcessRecord {
    pub id: ProcessId,
    pub name: String,
    pub state: ProcessState,
    pub priority: Priority,
    /// Meaningful while `Scheduled`.
    pub due: VirtualTime,
    /// Due time held across an interrupt.
    pub interrupted_due: Option<VirtualTime>,
    /// Wall-clock instant of the last state change.
    pub marked_at: Instant,
    pub wait: Option<WaitSlot>,
    pub last_wait: Option<WaitOutcome>,
    pub kind: ProcessKind,
}

impl ProcessRecord {
    pub fn new(id: ProcessId, name: String, priority: Priority, kind: ProcessKind) -> Self {
        ProcessRecord {
            id,
            name,
            state: ProcessState::Ready,
            priority,
            due: VirtualTime::ZERO,
            interrupted_due: None,
            marked_at: Instant::now(),
            wait: None,
            last_wait: None,
            kind,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ProcessKind::Timeout { .. })
    }

    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            priority: self.priority,
            due: (self.state == ProcessState::Scheduled).then_some(self.due),
            interrupted_due: self.interrupted_due,
            marked_at: self.marked_at,
            waiting_for: self.wait.map(|w| w.value),
            timeout: self.wait.and_then(|w| w.timeout),
            is_timeout: self.is_timeout(),
        }
    }
}

// ── ProcessInfo ───────────────────────────────────────────────────────

/// A point-in-time snapshot of one process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub id: ProcessId,
    pub name: String,
    pub state: ProcessState,
    pub priority: Priority,
    /// Due time, present only while `Scheduled`.
    pub due: Option<VirtualTime>,
    /// Original due time held by an interrupted process.
    pub interrupted_due: Option<VirtualTime>,
    /// Wall-clock instant of the last state change.
    pub marked_at: Instant,
    /// Awaited gate value while `WaitingCond`.
    pub waiting_for: Option<bool>,
    /// Timeout process racing the current wait.
    pub timeout: Option<ProcessId>,
    /// `true` for the synthetic processes behind bounded waits.
    pub is_timeout: bool,
}

impl ProcessInfo {
    /// Real time elapsed since the last state change.
    pub fn since_marked(&self) -> Duration {
        self.marked_at.elapsed()
    }
}

impl std::fmt::Display for ProcessInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}' st={} pr={}", self.id, self.name, self.state, self.priority)?;
        if let Some(due) = self.due {
            write!(f, " due={}", due)?;
        }
        Ok(())
    }
}
