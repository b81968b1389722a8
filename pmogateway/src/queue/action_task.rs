use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{QueueKey, QueueTask, TaskProcessor, TaskStatus};
use crate::errors::GatewayError;
use crate::proxy::{ActionId, ActionResponse, PendingAction, ServiceProxy, WeakProxy};

/// What the state function decided to do next.
pub enum Step {
    /// A remote action was issued; wait for its reply.
    Call(PendingAction),
    /// Nothing (more) to do.
    Done,
    /// A precondition of the whole queue is broken (typically the proxy is
    /// gone). The result function receives the error, then the queue is
    /// cancelled.
    Fatal(GatewayError),
}

/// What the result function decided after a remote reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Call the state function again to issue the next action.
    Continue,
    Done,
}

pub type StateFn<C> = Box<dyn FnMut(&mut C, Option<&dyn ServiceProxy>) -> Step + Send>;
pub type ResultFn<C> = Box<dyn FnMut(&mut C, Result<ActionResponse, GatewayError>) -> Flow + Send>;
pub type DisposeFn<C> = Box<dyn FnOnce(C) + Send>;

/// A queued operation made of zero or more chained remote actions.
///
/// The context `C` is owned by the task for its whole life and handed to
/// the dispose function exactly once when the engine retires the task.
pub struct ActionTask<C: Send + 'static> {
    queue: QueueKey,
    state: StateFn<C>,
    on_result: ResultFn<C>,
    on_dispose: Option<DisposeFn<C>>,
    context: Option<C>,
    proxy: Option<WeakProxy>,
    pending: Option<ActionId>,
    cancel: CancellationToken,
}

impl<C: Send + 'static> ActionTask<C> {
    pub fn new(
        queue: QueueKey,
        proxy: Option<WeakProxy>,
        context: C,
        state: StateFn<C>,
        on_result: ResultFn<C>,
    ) -> Self {
        Self {
            queue,
            state,
            on_result,
            on_dispose: None,
            context: Some(context),
            proxy,
            pending: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_dispose(mut self, on_dispose: DisposeFn<C>) -> Self {
        self.on_dispose = Some(on_dispose);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn queue(&self) -> &QueueKey {
        &self.queue
    }

    /// Enqueues the task on its queue.
    pub fn submit(self, processor: &TaskProcessor) -> Result<(), GatewayError> {
        let key = self.queue.clone();
        processor.add_task(&key, Box::new(self))
    }
}

#[async_trait]
impl<C: Send + 'static> QueueTask for ActionTask<C> {
    async fn process(&mut self) -> TaskStatus {
        loop {
            let Some(context) = self.context.as_mut() else {
                return TaskStatus::Completed;
            };

            let proxy = self.proxy.as_ref().and_then(WeakProxy::upgrade);
            let step = (self.state)(context, proxy.as_deref());
            drop(proxy);

            let pending = match step {
                Step::Done => return TaskStatus::Completed,
                Step::Fatal(err) => {
                    debug!(queue = %self.queue, error = %err, "Action task failed fatally");
                    (self.on_result)(context, Err(err));
                    return TaskStatus::Fatal;
                }
                Step::Call(pending) => pending,
            };

            self.pending = Some(pending.id());
            let result = pending.wait().await;
            self.pending = None;

            let Some(context) = self.context.as_mut() else {
                return TaskStatus::Completed;
            };
            if (self.on_result)(context, result) == Flow::Done {
                return TaskStatus::Completed;
            }
        }
    }

    fn cancel(&mut self) {
        let Some(id) = self.pending.take() else {
            return;
        };

        match self.proxy.as_ref().and_then(WeakProxy::upgrade) {
            Some(proxy) => {
                debug!(queue = %self.queue, action = ?id, "Cancelling remote action");
                proxy.cancel_action(id);
            }
            None => debug!(queue = %self.queue, action = ?id, "Proxy already gone, nothing to cancel"),
        }
    }

    fn dispose(mut self: Box<Self>) {
        if let Some(context) = self.context.take() {
            match self.on_dispose.take() {
                Some(on_dispose) => on_dispose(context),
                None => drop(context),
            }
        }
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
