//! Baton passing between the dispatcher and process threads.
//!
//! Every process body runs on its own OS thread, parked on a single-slot
//! channel. The dispatcher sends exactly one [`Signal::Go`] and then blocks
//! on the shared baton channel until the body reports back with a
//! [`Baton`]. Only the thread holding the baton ever runs model code.
//!
//! Tearing a parked thread down is done by dropping its `Go` sender. The
//! thread wakes with a disconnected channel and unwinds out of the body
//! with an [`Unwind`] payload, which the thread entry swallows.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::Receiver;
use tracing::trace;

use crate::context::ProcessContext;
use crate::error::{SimError, SimResult};
use crate::process::{ProcessId, Runner};
use crate::simulation::Shared;

/// Dispatcher -> process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Go,
}

/// Process -> dispatcher. Each `Go` is answered by exactly one of these.
#[derive(Debug)]
pub(crate) enum Baton {
    /// The body is parked again (advance, yield or an unsatisfied wait).
    Suspended(ProcessId),
    /// The body returned.
    Finished(ProcessId, SimResult<()>),
    /// The body panicked.
    Panicked(ProcessId, String),
    /// The body was unwound because the run is being torn down.
    TornDown(ProcessId),
}

/// Panic payload used to unwind a body out of a dead run.
pub(crate) struct Unwind;

/// Leave the body immediately. Never returns.
pub(crate) fn unwind() -> ! {
    panic::resume_unwind(Box::new(Unwind))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Start the thread for process `id`. The thread stays parked until its
/// first `Go`.
pub(crate) fn spawn_body(
    shared: &Arc<Shared>,
    id: ProcessId,
    runner: Box<dyn Runner>,
    go: Receiver<Signal>,
) -> SimResult<JoinHandle<()>> {
    let thread_name = format!("{}-{}", shared.config.thread_name_prefix, id);
    let mut builder = thread::Builder::new().name(thread_name.clone());
    if let Some(size) = shared.config.thread_stack_size {
        builder = builder.stack_size(size);
    }
    let shared = Arc::clone(shared);
    let baton = shared.baton_tx.clone();

    builder
        .spawn(move || {
            if go.recv().is_err() {
                trace!(process = %id, "released before first dispatch");
                return;
            }
            // Runner and context are dropped inside the closure, before the
            // baton goes back, so no model code runs after `Finished`.
            let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
                let mut runner = runner;
                let ctx = ProcessContext::new(id, shared, go);
                runner.run(&ctx)
            }));
            let report = match outcome {
                Ok(result) => Baton::Finished(id, result),
                Err(payload) if payload.is::<Unwind>() => Baton::TornDown(id),
                Err(payload) => Baton::Panicked(id, panic_message(payload.as_ref())),
            };
            let _ = baton.send(report);
        })
        .map_err(|e| SimError::Spawn {
            thread: thread_name,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let p: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(p.as_ref()), "boom");
        let p: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(p.as_ref()), "bang");
        let p: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(p.as_ref()), "non-string panic payload");
    }
}
