//! The event queue ("moving list").
//!
//! Holds at most one pending activation per process, ordered by
//! `(due, priority, seq)`. `seq` is a monotonically increasing insertion
//! counter, so equal `(due, priority)` pairs dispatch FIFO and two runs
//! with the same insertion order always produce the same dispatch order.
//!
//! Unlike a plain `BinaryHeap`, the queue supports removing or
//! repositioning an arbitrary process, which interrupts and reschedules
//! need. A side index maps each queued process to its current key.

use std::collections::BTreeMap;

use tracing::trace;

use crate::process::{Priority, ProcessId};
use crate::time::VirtualTime;

/// Ordering key of one queued activation.
///
/// The derived `Ord` compares fields in declaration order, which is
/// exactly the dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueueKey {
    pub due: VirtualTime,
    pub priority: Priority,
    pub seq: u64,
}

/// Deterministic queue of pending process activations.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    entries: BTreeMap<QueueKey, ProcessId>,
    index: BTreeMap<ProcessId, QueueKey>,
    next_seq: u64,
}

impl EventQueue {
    /// Create a new, empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `process` at `due`. A process that is already queued is
    /// moved to its new position.
    pub fn insert(&mut self, process: ProcessId, due: VirtualTime, priority: Priority) -> QueueKey {
        self.remove(process);
        let key = QueueKey {
            due,
            priority,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, process);
        self.index.insert(process, key);
        trace!(%process, %due, %priority, seq = key.seq, "enqueue");
        key
    }

    /// Remove `process` from the queue, returning the key it held.
    pub fn remove(&mut self, process: ProcessId) -> Option<QueueKey> {
        let key = self.index.remove(&process)?;
        self.entries.remove(&key);
        Some(key)
    }

    /// Pop the earliest activation.
    ///
    /// Returns `None` when the queue is empty.
    pub fn pop_next(&mut self) -> Option<(QueueKey, ProcessId)> {
        let (key, process) = self.entries.pop_first()?;
        self.index.remove(&process);
        Some((key, process))
    }

    /// Peek at the earliest activation without removing it.
    pub fn peek_next(&self) -> Option<(QueueKey, ProcessId)> {
        self.entries.first_key_value().map(|(k, p)| (*k, *p))
    }

    /// The key `process` is currently queued under.
    pub fn key_of(&self, process: ProcessId) -> Option<QueueKey> {
        self.index.get(&process).copied()
    }

    pub fn contains(&self, process: ProcessId) -> bool {
        self.index.contains_key(&process)
    }

    /// Returns `true` if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of pending activations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drop every pending activation and restart the sequence counter.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.next_seq = 0;
    }

    /// Drain all activations in dispatch order into a `Vec`.
    /// Useful for testing and snapshotting.
    pub fn drain_ordered(&mut self) -> Vec<(QueueKey, ProcessId)> {
        let mut out = Vec::with_capacity(self.entries.len());
        while let Some(e) = self.pop_next() {
            out.push(e);
        }
        out
    }
}
