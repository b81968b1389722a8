mod common;

use std::sync::Arc;

use common::{ScriptedProxy, drain, settle};
use parking_lot::Mutex;
use pmogateway::{
    ActionRequest, ActionResponse, ActionTask, Flow, GatewayError, ProxyTable, QueueKey,
    ServiceProxy, Step, TaskProcessor,
};
use tokio_util::sync::CancellationToken;

type Log = Arc<Mutex<Vec<String>>>;

/// Context of a task issuing `calls` consecutive `Ping` actions.
struct Pinger {
    calls: u32,
    issued: u32,
    log: Log,
}

fn pinger(calls: u32, log: &Log) -> Pinger {
    Pinger {
        calls,
        issued: 0,
        log: Arc::clone(log),
    }
}

fn ping_step(ctx: &mut Pinger, proxy: Option<&dyn ServiceProxy>) -> Step {
    if ctx.issued == ctx.calls {
        return Step::Done;
    }
    let Some(proxy) = proxy else {
        return Step::Fatal(GatewayError::ObjectNotFound("proxy gone".into()));
    };
    ctx.issued += 1;
    Step::Call(proxy.begin_action(
        ActionRequest::new("urn:test", "Ping").arg("N", ctx.issued.to_string()),
    ))
}

fn ping_result(ctx: &mut Pinger, result: Result<ActionResponse, GatewayError>) -> Flow {
    match result {
        Ok(response) => {
            ctx.log
                .lock()
                .push(format!("reply {}", response.get("N").unwrap_or("?")));
            Flow::Continue
        }
        Err(err) => {
            ctx.log.lock().push(format!("error {}", err));
            Flow::Done
        }
    }
}

fn echo() -> Arc<ScriptedProxy> {
    ScriptedProxy::new(|request| {
        Some(Ok(ActionResponse::new().with("N", request.get_arg("N").unwrap_or_default())))
    })
}

struct Setup {
    processor: TaskProcessor,
    key: QueueKey,
    table: ProxyTable,
    log: Log,
}

fn setup() -> Setup {
    let processor = TaskProcessor::new();
    let key = QueueKey::new(processor.create_source(), "/dev/1");
    processor.add_queue(&key);
    Setup {
        processor,
        key,
        table: ProxyTable::new(),
        log: Log::default(),
    }
}

fn task(s: &Setup, proxy: &Arc<ScriptedProxy>, calls: u32) -> (ActionTask<Pinger>, pmogateway::proxy::ProxyHandle) {
    let handle = s.table.insert(Arc::clone(proxy) as Arc<dyn ServiceProxy>);
    let log = Arc::clone(&s.log);
    let task = ActionTask::new(
        s.key.clone(),
        Some(s.table.downgrade(handle)),
        pinger(calls, &s.log),
        Box::new(ping_step),
        Box::new(ping_result),
    )
    .with_dispose(Box::new(move |ctx: Pinger| {
        log.lock().push(format!("dispose after {}", ctx.issued));
    }));
    (task, handle)
}

fn has(log: &Log, entry: &str) -> bool {
    log.lock().iter().any(|e| e == entry)
}

#[tokio::test]
async fn test_chained_actions_run_in_sequence() {
    let s = setup();
    let proxy = echo();
    let (task, _) = task(&s, &proxy, 3);

    task.submit(&s.processor).unwrap();
    settle(|| has(&s.log, "dispose after 3")).await;

    assert_eq!(
        *s.log.lock(),
        vec!["reply 1", "reply 2", "reply 3", "dispose after 3"]
    );
    let args: Vec<_> = proxy
        .requests()
        .iter()
        .map(|r| r.get_arg("N").unwrap().to_string())
        .collect();
    assert_eq!(args, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_cancel_reaches_live_proxy() {
    let s = setup();
    let proxy = ScriptedProxy::holding();
    let token = CancellationToken::new();
    let (task, _) = task(&s, &proxy, 1);

    task.with_cancellation(token.clone())
        .submit(&s.processor)
        .unwrap();
    settle(|| proxy.held_count() == 1).await;

    token.cancel();
    settle(|| has(&s.log, "dispose after 1")).await;

    assert_eq!(proxy.cancelled().len(), 1);
    assert_eq!(proxy.held_count(), 0);
    assert_eq!(*s.log.lock(), vec!["dispose after 1"]);
}

#[tokio::test]
async fn test_cancel_after_proxy_destroyed_skips_remote_cancel() {
    let s = setup();
    let proxy = ScriptedProxy::holding();
    let token = CancellationToken::new();
    let (task, handle) = task(&s, &proxy, 1);

    task.with_cancellation(token.clone())
        .submit(&s.processor)
        .unwrap();
    settle(|| proxy.held_count() == 1).await;

    s.table.remove(handle);
    token.cancel();
    settle(|| has(&s.log, "dispose after 1")).await;
    drain().await;

    assert!(proxy.cancelled().is_empty());
    assert_eq!(
        s.log.lock().iter().filter(|e| e.starts_with("dispose")).count(),
        1
    );
}

#[tokio::test]
async fn test_missing_proxy_is_fatal_for_the_queue() {
    let s = setup();
    let proxy = echo();
    let (first, handle) = task(&s, &proxy, 1);
    let (second, _) = task(&s, &proxy, 1);

    s.table.remove(handle);
    first.submit(&s.processor).unwrap();
    second.submit(&s.processor).unwrap();

    settle(|| s.log.lock().iter().filter(|e| e.starts_with("dispose")).count() == 2).await;

    let log = s.log.lock().clone();
    assert_eq!(log[0], "error Object not found: proxy gone");
    assert_eq!(log[1], "dispose after 0");
    // The second task never ran: no reply, no error.
    assert_eq!(log[2], "dispose after 0");
    assert!(proxy.requests().is_empty());
}

#[tokio::test]
async fn test_reply_dropped_by_proxy_is_a_backend_failure() {
    let s = setup();
    let proxy = ScriptedProxy::holding();
    let (task, _) = task(&s, &proxy, 1);

    task.submit(&s.processor).unwrap();
    settle(|| proxy.held_count() == 1).await;

    // Forgetting the pending reply drops its sender.
    proxy.cancel_action(pmogateway::ActionId(1));
    settle(|| has(&s.log, "dispose after 1")).await;

    let log = s.log.lock().clone();
    assert!(log[0].starts_with("error Backend action failed"));
}

#[tokio::test]
async fn test_remote_fault_is_relayed() {
    let s = setup();
    let proxy = ScriptedProxy::new(|_| Some(Err("720 Cannot process the request".into())));
    let (task, _) = task(&s, &proxy, 2);

    task.submit(&s.processor).unwrap();
    settle(|| has(&s.log, "dispose after 1")).await;

    assert_eq!(
        *s.log.lock(),
        vec![
            "error Backend action failed: 720 Cannot process the request",
            "dispose after 1"
        ]
    );
}
