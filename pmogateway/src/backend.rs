//! What the router hands work to.
//!
//! A [`MediaBackend`] turns a resolved request into a [`QueueTask`] for the
//! target device's queue. The task owns a [`Completion`] and fires it exactly
//! once: with the reply, with the error, or with `Canceled` when the task is
//! dropped before finishing.

use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::capabilities::BusInterface;
use crate::errors::GatewayError;
use crate::path::ROOT_OBJECT_ID;
use crate::props::{Filter, PropertyDescriptor};
use crate::queue::QueueTask;
use crate::registry::DeviceRef;

/// Bus properties of one object, keyed by bus property name.
pub type PropertyMap = Map<String, Value>;

#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// Children or search hits, one property map each.
    Objects(Vec<PropertyMap>),
    Properties(PropertyMap),
    Property(Value),
    /// The selected playable resource.
    Resource(PropertyMap),
}

pub type ReplyResult = Result<Reply, GatewayError>;

/// One-shot completion of a client request.
///
/// Dropping a completion that was never fired delivers `Err(Canceled)`, so a
/// waiting client always gets an answer.
#[derive(Debug)]
pub struct Completion {
    tx: Option<oneshot::Sender<ReplyResult>>,
}

impl Completion {
    pub fn channel() -> (Self, oneshot::Receiver<ReplyResult>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn complete(mut self, result: ReplyResult) {
        if let Some(tx) = self.tx.take() {
            // The client may have stopped waiting.
            let _ = tx.send(result);
        }
    }

    /// Delivers `result` on a later event-loop iteration.
    pub fn complete_later(self, result: ReplyResult) {
        tokio::spawn(async move { self.complete(result) });
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(GatewayError::Canceled));
        }
    }
}

/// The object a request is about.
#[derive(Clone, Debug)]
pub struct Target {
    pub device: DeviceRef,
    pub item_id: String,
    pub cancel: CancellationToken,
}

impl Target {
    pub fn is_root(&self) -> bool {
        self.item_id == ROOT_OBJECT_ID
    }
}

#[derive(Clone, Debug)]
pub struct ListChildrenArgs {
    pub start: u32,
    pub count: u32,
    pub filter: Filter,
    pub sort_by: String,
    pub protocol_info: String,
}

#[derive(Clone, Debug)]
pub struct SearchArgs {
    pub query: String,
    pub start: u32,
    pub count: u32,
    pub filter: Filter,
    pub sort_by: String,
    pub protocol_info: String,
}

#[derive(Clone, Debug)]
pub struct GetAllArgs {
    /// `None` asks for every interface.
    pub interface: Option<BusInterface>,
    pub protocol_info: String,
}

#[derive(Clone, Debug)]
pub struct GetPropArgs {
    pub interface: Option<BusInterface>,
    pub name: String,
    /// `None` when the name is not a known property.
    pub prop: Option<&'static PropertyDescriptor>,
    pub protocol_info: String,
}

#[derive(Clone, Debug)]
pub struct GetResourceArgs {
    pub protocol_info: String,
    pub filter: Filter,
}

/// Builds device tasks for the router.
pub trait MediaBackend: Send + Sync {
    fn list_children(
        &self,
        target: Target,
        args: ListChildrenArgs,
        completion: Completion,
    ) -> Box<dyn QueueTask>;

    fn get_all_properties(
        &self,
        target: Target,
        args: GetAllArgs,
        completion: Completion,
    ) -> Box<dyn QueueTask>;

    fn get_property(
        &self,
        target: Target,
        args: GetPropArgs,
        completion: Completion,
    ) -> Box<dyn QueueTask>;

    fn search(&self, target: Target, args: SearchArgs, completion: Completion) -> Box<dyn QueueTask>;

    fn get_resource(
        &self,
        target: Target,
        args: GetResourceArgs,
        completion: Completion,
    ) -> Box<dyn QueueTask>;
}
