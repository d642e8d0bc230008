//! # Kairos: Process-Oriented Discrete-Event Simulation
//!
//! A simulation kernel in which model code is written as ordinary
//! sequential *processes* that advance through a shared virtual clock.
//! Each process body runs on its own thread, but a baton-passing
//! dispatcher guarantees that exactly one of them executes at any moment.
//! Every other process is parked at a well-defined point: a time advance,
//! a yield, or a wait on a condition gate.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │          Simulation          │ ← run / start / clear, process builder
//! │  ┌────────────────────────┐  │
//! │  │   dispatch loop        │  │ ← pops, advances clock, passes baton
//! │  │  ┌──────────────────┐  │  │
//! │  │  │ Kernel (mutex)   │  │  │ ← clock, processes, gates, fault
//! │  │  │  ┌────────────┐  │  │  │
//! │  │  │  │ EventQueue │  │  │  │ ← (due, priority, seq) order
//! │  │  │  └────────────┘  │  │  │
//! │  │  └──────────────────┘  │  │
//! │  └────────────────────────┘  │
//! └──────────────────────────────┘
//!        ▲ Go          │ Baton
//!        │             ▼
//!   ProcessContext (one thread per process body)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use kairos::{ProcessContext, SimResult, Simulation};
//!
//! let sim = Simulation::new();
//! let open = sim.gate(false);
//!
//! let gate = open.clone();
//! sim.spawn(move |ctx: &ProcessContext| -> SimResult<()> {
//!     ctx.wait_for(&gate, true)?;
//!     ctx.advance(2.0)
//! })
//! .unwrap();
//!
//! let gate = open.clone();
//! sim.spawn(move |ctx: &ProcessContext| -> SimResult<()> {
//!     ctx.advance(10.0)?;
//!     gate.set(true);
//!     Ok(())
//! })
//! .unwrap();
//!
//! let summary = sim.run().unwrap();
//! assert_eq!(summary.finished_at.as_f64(), 12.0);
//! ```

mod baton;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
mod kernel;
pub mod process;
pub mod queue;
pub mod scheduler;
pub mod simulation;
pub mod time;
pub mod trace;

// Re-exports for convenience.
pub use config::SimulationConfig;
pub use context::ProcessContext;
pub use error::{SimError, SimResult};
pub use gate::{Gate, GateId};
pub use process::{Priority, ProcessId, ProcessInfo, ProcessState, Runner, WaitOutcome};
pub use queue::FifoQueue;
pub use scheduler::{EventQueue, QueueKey};
pub use simulation::{ProcessBuilder, RunHandle, RunSummary, Simulation};
pub use time::{InvalidTime, VirtualTime};
pub use trace::DispatchRecord;
