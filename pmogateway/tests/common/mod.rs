#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pmogateway::{ActionId, ActionReply, ActionRequest, ActionResponse, PendingAction, ServiceProxy};
use tokio::sync::oneshot;

type Handler = Box<dyn Fn(&ActionRequest) -> Option<ActionReply> + Send + Sync>;

/// A proxy answering from a script. Requests the script returns `None` for
/// stay pending until [`ScriptedProxy::release`] is called.
pub struct ScriptedProxy {
    next: AtomicU64,
    handler: Handler,
    held: Mutex<Vec<(ActionId, oneshot::Sender<ActionReply>)>>,
    requests: Mutex<Vec<ActionRequest>>,
    cancelled: Mutex<Vec<ActionId>>,
}

impl ScriptedProxy {
    pub fn new(handler: impl Fn(&ActionRequest) -> Option<ActionReply> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            next: AtomicU64::new(1),
            handler: Box::new(handler),
            held: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        })
    }

    /// Never answers on its own.
    pub fn holding() -> Arc<Self> {
        Self::new(|_| None)
    }

    /// Answers every request with the same DIDL-Lite payload.
    pub fn serving(didl: &str, total: u32) -> Arc<Self> {
        let didl = didl.to_string();
        Self::new(move |_| {
            let returned = didl.matches("<item").count() + didl.matches("<container").count();
            Some(Ok(ActionResponse::new()
                .with("Result", didl.clone())
                .with("NumberReturned", returned.to_string())
                .with("TotalMatches", total.to_string())
                .with("UpdateID", "1")))
        })
    }

    pub fn requests(&self) -> Vec<ActionRequest> {
        self.requests.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<ActionId> {
        self.cancelled.lock().clone()
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    /// Answers the oldest pending request.
    pub fn release(&self, reply: ActionReply) -> bool {
        let mut held = self.held.lock();
        if held.is_empty() {
            return false;
        }
        let (_, tx) = held.remove(0);
        tx.send(reply).is_ok()
    }
}

impl ServiceProxy for ScriptedProxy {
    fn begin_action(&self, request: ActionRequest) -> PendingAction {
        let id = ActionId(self.next.fetch_add(1, Ordering::SeqCst));
        let (pending, tx) = PendingAction::new(id);
        let reply = (self.handler)(&request);
        self.requests.lock().push(request);

        match reply {
            Some(reply) => {
                let _ = tx.send(reply);
            }
            None => self.held.lock().push((id, tx)),
        }
        pending
    }

    fn cancel_action(&self, id: ActionId) {
        self.cancelled.lock().push(id);
        self.held.lock().retain(|(held, _)| *held != id);
    }
}

/// Lets spawned tasks run until `cond` holds, or panics after a second.
pub async fn settle(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition never reached");
        tokio::task::yield_now().await;
    }
}

/// Lets every spawned task that can make progress do so.
pub async fn drain() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub const TRACKS: &str = r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/">
<item id="7" parentID="3"><dc:title>Naima</dc:title><upnp:class>object.item.audioItem.musicTrack</upnp:class><upnp:artist>John Coltrane</upnp:artist><res protocolInfo="http-get:*:audio/flac:DLNA.ORG_PN=FLAC" size="2048" duration="0:04:21">http://srv/7.flac</res><res protocolInfo="http-get:*:audio/mpeg:DLNA.ORG_PN=MP3" size="512" duration="0:04:21">http://srv/7.mp3</res></item>
</DIDL-Lite>"#;

pub const ROOT: &str = r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/">
<container id="0" parentID="-1" childCount="2" searchable="1"><dc:title>Root</dc:title><upnp:class>object.container</upnp:class></container>
</DIDL-Lite>"#;
