//! Ordered per-device task queues.
//!
//! This module defines:
//!   - `QueueKey`, the identifier of one queue (a source and a sink, the sink
//!     being the bus path of the device the queue serves),
//!   - the `QueueTask` trait, the only thing the engine knows about a task,
//!   - `TaskProcessor`, the engine draining every queue in FIFO order with
//!     exactly one task in flight per queue,
//!   - `ActionTask`, the adapter turning a chain of remote actions into a
//!     `QueueTask`.

mod action_task;
mod processor;

use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use action_task::{ActionTask, DisposeFn, Flow, ResultFn, StateFn, Step};
pub use processor::TaskProcessor;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub source: String,
    pub sink: String,
}

impl QueueKey {
    pub fn new(source: impl Into<String>, sink: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            sink: sink.into(),
        }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.sink)
    }
}

/// How a task's processing ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    /// The task is done; the queue moves on to the next one.
    Completed,
    /// The task hit a condition that invalidates the whole queue; every
    /// task queued behind it is cancelled without running.
    Fatal,
}

/// Lifecycle hooks the engine drives.
///
/// `process` is called once, when the task reaches the head of its queue.
/// If processing is interrupted (task token, queue cancellation, queue
/// removal) the engine drops the `process` future and calls `cancel`.
/// `dispose` is called exactly once, last, whatever happened before.
#[async_trait]
pub trait QueueTask: Send {
    async fn process(&mut self) -> TaskStatus;

    fn cancel(&mut self);

    fn dispose(self: Box<Self>);

    /// Token cancelling this task alone.
    fn cancellation(&self) -> CancellationToken {
        CancellationToken::new()
    }
}
