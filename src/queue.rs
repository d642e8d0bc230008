//! FIFO queue for modelling waiting lines.
//!
//! Purely structural: it has no tie to the clock or the scheduler. Models
//! share one between processes behind a mutex.

use std::collections::VecDeque;

use crate::error::{SimError, SimResult};

/// A named first-in, first-out queue of model items.
#[derive(Debug, Clone)]
pub struct FifoQueue<T> {
    name: String,
    items: VecDeque<T>,
}

impl<T> FifoQueue<T> {
    pub fn new() -> Self {
        Self::named("fifo")
    }

    pub fn named(name: impl Into<String>) -> Self {
        FifoQueue {
            name: name.into(),
            items: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append at the tail.
    pub fn place(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Remove and return the head.
    pub fn get(&mut self) -> SimResult<T> {
        self.items
            .pop_front()
            .ok_or_else(|| SimError::EmptyQueue(self.name.clone()))
    }

    /// Peek at the head without removing it.
    pub fn head(&self) -> SimResult<&T> {
        self.items
            .front()
            .ok_or_else(|| SimError::EmptyQueue(self.name.clone()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: PartialEq> FifoQueue<T> {
    /// Whether `item` is at the head. `false` on an empty queue.
    pub fn is_head(&self, item: &T) -> bool {
        self.items.front() == Some(item)
    }
}

impl<T> Default for FifoQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
