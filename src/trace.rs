//! DispatchRecord: one entry of the dispatch trace.

use crate::process::{Priority, ProcessId};
use crate::time::VirtualTime;

/// A record of a single dispatch.
///
/// Appended by the kernel on every dispatch when
/// [`SimulationConfig::record_trace`](crate::SimulationConfig::record_trace)
/// is on. Useful for test assertions and post-mortem debugging. Cleared by
/// [`Simulation::clear`](crate::Simulation::clear).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DispatchRecord {
    /// 1-based position in the run's dispatch sequence.
    pub index: u64,
    /// Clock value set by this dispatch.
    pub time: VirtualTime,
    pub process: ProcessId,
    pub name: String,
    pub priority: Priority,
    /// `true` when a timeout process was dispatched.
    pub timeout: bool,
}

impl std::fmt::Display for DispatchRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} #{} {} pr={}] {}",
            self.time, self.index, self.process, self.priority, self.name
        )?;
        if self.timeout {
            f.write_str(" (timeout)")?;
        }
        Ok(())
    }
}
