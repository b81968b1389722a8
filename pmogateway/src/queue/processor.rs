use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{QueueKey, QueueTask, TaskStatus};
use crate::errors::GatewayError;

struct Envelope {
    seq: u64,
    task: Box<dyn QueueTask>,
}

/// Shared between the processor handle and the queue worker.
///
/// Every task gets a sequence number when it is enqueued. Cancelling the
/// queue records the next sequence number as a watermark: tasks below it
/// are retired without running, tasks enqueued afterwards run normally.
struct QueueControl {
    next_seq: AtomicU64,
    cancel_below: AtomicU64,
    epoch: Mutex<CancellationToken>,
    shutdown: CancellationToken,
}

impl QueueControl {
    fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(0),
            cancel_below: AtomicU64::new(0),
            epoch: Mutex::new(CancellationToken::new()),
            shutdown: CancellationToken::new(),
        }
    }

    fn cancel_pending(&self) {
        self.cancel_below
            .store(self.next_seq.load(Ordering::SeqCst), Ordering::SeqCst);
        let previous = std::mem::replace(&mut *self.epoch.lock(), CancellationToken::new());
        previous.cancel();
    }

    fn is_discarded(&self, seq: u64) -> bool {
        seq < self.cancel_below.load(Ordering::SeqCst)
    }
}

struct QueueEntry {
    tx: mpsc::UnboundedSender<Envelope>,
    control: Arc<QueueControl>,
}

/// Engine owning every task queue.
///
/// Each queue is drained by its own tokio task, one task at a time, in the
/// order tasks were added. The processor must be used from within a tokio
/// runtime.
#[derive(Clone, Default)]
pub struct TaskProcessor {
    queues: Arc<Mutex<HashMap<QueueKey, QueueEntry>>>,
    sources: Arc<AtomicU64>,
}

impl fmt::Debug for TaskProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskProcessor")
            .field("queues", &self.queue_count())
            .finish()
    }
}

impl TaskProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh queue source identifier (`source-1`, `source-2`, …).
    pub fn create_source(&self) -> String {
        let n = self.sources.fetch_add(1, Ordering::Relaxed) + 1;
        format!("source-{}", n)
    }

    pub fn add_queue(&self, key: &QueueKey) {
        let mut queues = self.queues.lock();
        if queues.contains_key(key) {
            debug!(queue = %key, "Task queue already exists");
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let control = Arc::new(QueueControl::new());
        tokio::spawn(run_queue(key.clone(), rx, Arc::clone(&control)));
        queues.insert(key.clone(), QueueEntry { tx, control });
        debug!(queue = %key, "Task queue created");
    }

    pub fn has_queue(&self, key: &QueueKey) -> bool {
        self.queues.lock().contains_key(key)
    }

    pub fn queue_count(&self) -> usize {
        self.queues.lock().len()
    }

    /// Appends `task` to the queue. If the queue does not exist the task is
    /// cancelled and disposed on a later loop iteration.
    pub fn add_task(&self, key: &QueueKey, task: Box<dyn QueueTask>) -> Result<(), GatewayError> {
        let sent = {
            let queues = self.queues.lock();
            match queues.get(key) {
                Some(entry) => {
                    let seq = entry.control.next_seq.fetch_add(1, Ordering::SeqCst);
                    entry
                        .tx
                        .send(Envelope { seq, task })
                        .map_err(|err| err.0.task)
                }
                None => Err(task),
            }
        };

        match sent {
            Ok(()) => Ok(()),
            Err(task) => {
                warn!(queue = %key, "Task added to a missing queue");
                tokio::spawn(async move { retire(task) });
                Err(GatewayError::QueueNotFound(key.to_string()))
            }
        }
    }

    /// Cancels the running task and every task queued so far.
    pub fn cancel_queue(&self, key: &QueueKey) {
        match self.queues.lock().get(key) {
            Some(entry) => {
                debug!(queue = %key, "Cancelling task queue");
                entry.control.cancel_pending();
            }
            None => debug!(queue = %key, "Cannot cancel missing task queue"),
        }
    }

    /// Removes the queue, cancelling everything it still holds.
    pub fn remove_queue(&self, key: &QueueKey) {
        if let Some(entry) = self.queues.lock().remove(key) {
            debug!(queue = %key, "Removing task queue");
            entry.control.shutdown.cancel();
        }
    }
}

fn retire(mut task: Box<dyn QueueTask>) {
    task.cancel();
    task.dispose();
}

async fn run_queue(
    key: QueueKey,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    control: Arc<QueueControl>,
) {
    loop {
        let Envelope { seq, mut task } = tokio::select! {
            biased;
            _ = control.shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        // Snapshot before the watermark check: a cancellation racing with
        // this dequeue is seen by one or the other.
        let epoch = control.epoch.lock().clone();
        let token = task.cancellation();

        if control.is_discarded(seq) || token.is_cancelled() {
            debug!(queue = %key, seq, "Task cancelled before it started");
            retire(task);
            continue;
        }

        let status = tokio::select! {
            biased;
            _ = control.shutdown.cancelled() => None,
            _ = epoch.cancelled() => None,
            _ = token.cancelled() => None,
            status = task.process() => Some(status),
        };

        match status {
            Some(TaskStatus::Completed) => debug!(queue = %key, seq, "Task completed"),
            Some(TaskStatus::Fatal) => {
                warn!(queue = %key, seq, "Task failed fatally, cancelling its queue");
                control.cancel_pending();
            }
            None => {
                debug!(queue = %key, seq, "Task cancelled while running");
                task.cancel();
            }
        }

        task.dispose();
    }

    rx.close();
    while let Ok(envelope) = rx.try_recv() {
        retire(envelope.task);
    }
    debug!(queue = %key, "Task queue stopped");
}
