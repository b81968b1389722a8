mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{drain, settle};
use parking_lot::Mutex;
use pmogateway::{GatewayError, QueueKey, QueueTask, TaskProcessor, TaskStatus};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

type Log = Arc<Mutex<Vec<String>>>;

/// A task that logs its lifecycle and optionally waits on a gate before
/// finishing.
struct Probe {
    name: &'static str,
    log: Log,
    running: Arc<AtomicBool>,
    gate: Option<Arc<Notify>>,
    status: TaskStatus,
    token: CancellationToken,
}

impl Probe {
    fn new(name: &'static str, log: &Log, running: &Arc<AtomicBool>) -> Self {
        Self {
            name,
            log: Arc::clone(log),
            running: Arc::clone(running),
            gate: None,
            status: TaskStatus::Completed,
            token: CancellationToken::new(),
        }
    }

    fn gated(mut self, gate: &Arc<Notify>) -> Self {
        self.gate = Some(Arc::clone(gate));
        self
    }

    fn fatal(mut self) -> Self {
        self.status = TaskStatus::Fatal;
        self
    }

    fn with_token(mut self, token: &CancellationToken) -> Self {
        self.token = token.clone();
        self
    }

    fn boxed(self) -> Box<dyn QueueTask> {
        Box::new(self)
    }
}

#[async_trait]
impl QueueTask for Probe {
    async fn process(&mut self) -> TaskStatus {
        assert!(
            !self.running.swap(true, Ordering::SeqCst),
            "two tasks in flight on one queue"
        );
        self.log.lock().push(format!("start {}", self.name));

        tokio::task::yield_now().await;
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        self.log.lock().push(format!("end {}", self.name));
        self.running.store(false, Ordering::SeqCst);
        self.status
    }

    fn cancel(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.log.lock().push(format!("cancel {}", self.name));
    }

    fn dispose(self: Box<Self>) {
        self.log.lock().push(format!("dispose {}", self.name));
    }

    fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }
}

fn setup() -> (TaskProcessor, QueueKey, Log, Arc<AtomicBool>) {
    let processor = TaskProcessor::new();
    let key = QueueKey::new(processor.create_source(), "/dev/1");
    processor.add_queue(&key);
    (processor, key, Log::default(), Arc::new(AtomicBool::new(false)))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

fn has(log: &Log, entry: &str) -> bool {
    log.lock().iter().any(|e| e == entry)
}

#[tokio::test]
async fn test_tasks_run_in_order_one_at_a_time() {
    let (processor, key, log, running) = setup();

    for name in ["a", "b", "c"] {
        processor
            .add_task(&key, Probe::new(name, &log, &running).boxed())
            .unwrap();
    }

    settle(|| has(&log, "dispose c")).await;
    assert_eq!(
        entries(&log),
        vec![
            "start a", "end a", "dispose a", "start b", "end b", "dispose b", "start c", "end c",
            "dispose c",
        ]
    );
}

#[tokio::test]
async fn test_fatal_task_cancels_the_rest_of_the_queue() {
    let (processor, key, log, running) = setup();

    processor
        .add_task(&key, Probe::new("a", &log, &running).fatal().boxed())
        .unwrap();
    processor
        .add_task(&key, Probe::new("b", &log, &running).boxed())
        .unwrap();
    processor
        .add_task(&key, Probe::new("c", &log, &running).boxed())
        .unwrap();

    settle(|| has(&log, "dispose c")).await;
    assert_eq!(
        entries(&log),
        vec![
            "start a", "end a", "dispose a", "cancel b", "dispose b", "cancel c", "dispose c",
        ]
    );

    // The queue keeps working for tasks added afterwards.
    processor
        .add_task(&key, Probe::new("d", &log, &running).boxed())
        .unwrap();
    settle(|| has(&log, "dispose d")).await;
    assert!(has(&log, "end d"));
}

#[tokio::test]
async fn test_cancel_queue_cancels_running_and_pending_tasks() {
    let (processor, key, log, running) = setup();
    let gate = Arc::new(Notify::new());

    processor
        .add_task(&key, Probe::new("a", &log, &running).gated(&gate).boxed())
        .unwrap();
    processor
        .add_task(&key, Probe::new("b", &log, &running).boxed())
        .unwrap();

    settle(|| has(&log, "start a")).await;
    processor.cancel_queue(&key);
    processor
        .add_task(&key, Probe::new("c", &log, &running).boxed())
        .unwrap();

    settle(|| has(&log, "dispose c")).await;
    assert_eq!(
        entries(&log),
        vec![
            "start a", "cancel a", "dispose a", "cancel b", "dispose b", "start c", "end c",
            "dispose c",
        ]
    );
}

#[tokio::test]
async fn test_task_token_cancels_only_that_task() {
    let (processor, key, log, running) = setup();
    let gate = Arc::new(Notify::new());
    let token = CancellationToken::new();

    processor
        .add_task(
            &key,
            Probe::new("a", &log, &running)
                .gated(&gate)
                .with_token(&token)
                .boxed(),
        )
        .unwrap();
    processor
        .add_task(&key, Probe::new("b", &log, &running).boxed())
        .unwrap();

    settle(|| has(&log, "start a")).await;
    token.cancel();

    settle(|| has(&log, "dispose b")).await;
    assert_eq!(
        entries(&log),
        vec!["start a", "cancel a", "dispose a", "start b", "end b", "dispose b"]
    );
}

#[tokio::test]
async fn test_task_cancelled_before_it_starts_never_runs() {
    let (processor, key, log, running) = setup();
    let gate = Arc::new(Notify::new());
    let token = CancellationToken::new();

    processor
        .add_task(&key, Probe::new("a", &log, &running).gated(&gate).boxed())
        .unwrap();
    processor
        .add_task(&key, Probe::new("b", &log, &running).with_token(&token).boxed())
        .unwrap();

    settle(|| has(&log, "start a")).await;
    token.cancel();
    gate.notify_one();

    settle(|| has(&log, "dispose b")).await;
    assert!(!has(&log, "start b"));
    assert!(has(&log, "cancel b"));
    assert!(has(&log, "end a"));
}

#[tokio::test]
async fn test_add_to_missing_queue_disposes_later() {
    let processor = TaskProcessor::new();
    let key = QueueKey::new("source-x", "/nowhere");
    let log = Log::default();
    let running = Arc::new(AtomicBool::new(false));

    let result = processor.add_task(&key, Probe::new("a", &log, &running).boxed());

    assert!(matches!(result, Err(GatewayError::QueueNotFound(_))));
    assert!(entries(&log).is_empty());
    settle(|| has(&log, "dispose a")).await;
    assert_eq!(entries(&log), vec!["cancel a", "dispose a"]);
}

#[tokio::test]
async fn test_remove_queue_retires_everything() {
    let (processor, key, log, running) = setup();
    let gate = Arc::new(Notify::new());

    processor
        .add_task(&key, Probe::new("a", &log, &running).gated(&gate).boxed())
        .unwrap();
    processor
        .add_task(&key, Probe::new("b", &log, &running).boxed())
        .unwrap();
    settle(|| has(&log, "start a")).await;

    processor.remove_queue(&key);
    assert!(!processor.has_queue(&key));

    settle(|| has(&log, "dispose b")).await;
    drain().await;
    assert_eq!(
        entries(&log),
        vec!["start a", "cancel a", "dispose a", "cancel b", "dispose b"]
    );
}

#[tokio::test]
async fn test_queues_are_independent() {
    let processor = TaskProcessor::new();
    let one = QueueKey::new(processor.create_source(), "/dev/1");
    let two = QueueKey::new(processor.create_source(), "/dev/2");
    processor.add_queue(&one);
    processor.add_queue(&two);
    assert_ne!(one.source, two.source);
    assert_eq!(processor.queue_count(), 2);

    let log = Log::default();
    let gate = Arc::new(Notify::new());
    let running_one = Arc::new(AtomicBool::new(false));
    let running_two = Arc::new(AtomicBool::new(false));

    processor
        .add_task(&one, Probe::new("slow", &log, &running_one).gated(&gate).boxed())
        .unwrap();
    processor
        .add_task(&two, Probe::new("fast", &log, &running_two).boxed())
        .unwrap();

    settle(|| has(&log, "dispose fast")).await;
    assert!(!has(&log, "end slow"));

    processor.cancel_queue(&one);
    settle(|| has(&log, "dispose slow")).await;
}
