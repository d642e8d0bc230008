//! Run configuration.

use crate::process::Priority;

/// Knobs for a [`Simulation`](crate::Simulation).
///
/// The defaults suit tests and small models: no dispatch trace, the
/// platform's default thread stack and priority 0 for new processes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SimulationConfig {
    /// Capture a [`DispatchRecord`](crate::DispatchRecord) for every dispatch.
    pub record_trace: bool,
    /// Stack size for process threads. `None` keeps the platform default.
    pub thread_stack_size: Option<usize>,
    /// Process threads are named `{prefix}-{id}`.
    pub thread_name_prefix: String,
    /// Priority given to processes whose builder does not set one.
    pub default_priority: Priority,
}

impl SimulationConfig {
    pub fn new() -> Self {
        SimulationConfig {
            record_trace: false,
            thread_stack_size: None,
            thread_name_prefix: "kairos".into(),
            default_priority: Priority::DEFAULT,
        }
    }

    /// Enable or disable the dispatch trace.
    pub fn with_trace(mut self, on: bool) -> Self {
        self.record_trace = on;
        self
    }

    /// Set the stack size of process threads.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Set the thread name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the priority used when a builder does not choose one.
    pub fn with_default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = priority;
        self
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SimulationConfig::default();
        assert!(!cfg.record_trace);
        assert_eq!(cfg.thread_stack_size, None);
        assert_eq!(cfg.default_priority, Priority::DEFAULT);
    }

    #[test]
    fn test_builder_methods() {
        let cfg = SimulationConfig::new()
            .with_trace(true)
            .with_stack_size(256 * 1024)
            .with_thread_name_prefix("bank")
            .with_default_priority(Priority::new(3));
        assert!(cfg.record_trace);
        assert_eq!(cfg.thread_stack_size, Some(256 * 1024));
        assert_eq!(cfg.thread_name_prefix, "bank");
        assert_eq!(cfg.default_priority, Priority::new(3));
    }
}
