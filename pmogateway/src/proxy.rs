//! Remote proxies and the table through which everybody else reaches them.
//!
//! A [`ServiceProxy`] is the live handle on one device service as seen
//! through one network context. Its lifetime belongs to the device registry:
//! the registry inserts proxies into a [`ProxyTable`] and removes them when
//! the context goes away. Queued tasks only keep a [`WeakProxy`] and resolve
//! it at the moment they need the proxy, so a context torn down mid-call is
//! observed as "gone" rather than dereferenced.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::oneshot;

use crate::errors::GatewayError;

/// Identifier of one remote action in flight on a proxy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ActionId(pub u64);

/// A remote action invocation: service type, action name and input arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionRequest {
    pub service_type: String,
    pub action: String,
    pub args: Vec<(String, String)>,
}

impl ActionRequest {
    pub fn new(service_type: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            action: action.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((name.into(), value.into()));
        self
    }

    pub fn get_arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Output arguments of a completed remote action.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionResponse {
    values: HashMap<String, String>,
}

impl ActionResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn get_u32(&self, name: &str) -> Option<u32> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }
}

/// What a proxy eventually sends back: the output arguments, or the fault
/// text reported by the device.
pub type ActionReply = Result<ActionResponse, String>;

/// A remote action that has been issued and not yet answered.
#[derive(Debug)]
pub struct PendingAction {
    id: ActionId,
    reply: oneshot::Receiver<ActionReply>,
}

impl PendingAction {
    /// Creates the pending side of an action together with the sender the
    /// proxy implementation answers through.
    pub fn new(id: ActionId) -> (Self, oneshot::Sender<ActionReply>) {
        let (tx, rx) = oneshot::channel();
        (Self { id, reply: rx }, tx)
    }

    pub fn id(&self) -> ActionId {
        self.id
    }

    /// Waits for the reply. A proxy that drops the sender without answering
    /// yields a backend failure, never a hang.
    pub async fn wait(self) -> Result<ActionResponse, GatewayError> {
        match self.reply.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(fault)) => Err(GatewayError::BackendActionFailed(fault)),
            Err(_) => Err(GatewayError::backend(format!(
                "Action {:?} was dropped without a reply",
                self.id
            ))),
        }
    }
}

/// The remote-call boundary of one device service.
pub trait ServiceProxy: Send + Sync {
    fn begin_action(&self, request: ActionRequest) -> PendingAction;
    fn cancel_action(&self, id: ActionId);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProxyHandle(u64);

#[derive(Default)]
struct ProxySlots {
    slots: RwLock<HashMap<ProxyHandle, Arc<dyn ServiceProxy>>>,
    next: AtomicU64,
}

/// Indirection table from handles to live proxies.
#[derive(Clone, Default)]
pub struct ProxyTable {
    inner: Arc<ProxySlots>,
}

impl fmt::Debug for ProxyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyTable")
            .field("live", &self.len())
            .finish()
    }
}

impl ProxyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, proxy: Arc<dyn ServiceProxy>) -> ProxyHandle {
        let handle = ProxyHandle(self.inner.next.fetch_add(1, Ordering::Relaxed));
        self.inner.slots.write().insert(handle, proxy);
        handle
    }

    pub fn remove(&self, handle: ProxyHandle) -> Option<Arc<dyn ServiceProxy>> {
        self.inner.slots.write().remove(&handle)
    }

    pub fn resolve(&self, handle: ProxyHandle) -> Option<Arc<dyn ServiceProxy>> {
        self.inner.slots.read().get(&handle).cloned()
    }

    pub fn downgrade(&self, handle: ProxyHandle) -> WeakProxy {
        WeakProxy {
            handle,
            table: self.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A handle on a proxy that does not keep it alive.
#[derive(Clone, Debug)]
pub struct WeakProxy {
    handle: ProxyHandle,
    table: ProxyTable,
}

impl WeakProxy {
    pub fn handle(&self) -> ProxyHandle {
        self.handle
    }

    /// The proxy, if its context still exists.
    pub fn upgrade(&self) -> Option<Arc<dyn ServiceProxy>> {
        self.table.resolve(self.handle)
    }

    pub fn is_live(&self) -> bool {
        self.upgrade().is_some()
    }
}
