//! Object path router.
//!
//! Every client request names a bus object path. The router resolves it to
//! a device and an item, normalizes the query arguments, asks the backend
//! for a task and queues that task on the device. Whatever goes wrong before
//! the task is queued is reported through the completion on a later
//! event-loop iteration, never from inside the call.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{
    Completion, GetAllArgs, GetPropArgs, GetResourceArgs, ListChildrenArgs, MediaBackend,
    SearchArgs, Target,
};
use crate::capabilities::BusInterface;
use crate::errors::GatewayError;
use crate::path::PathScheme;
use crate::queue::{QueueTask, TaskProcessor};
use crate::registry::DeviceRegistry;
use crate::translate::QueryTranslator;

#[derive(Clone, Debug, Default)]
pub struct BrowseRequest {
    pub start: u32,
    /// 0 for "as many as there are".
    pub count: u32,
    pub filter: String,
    pub sort_by: String,
    pub protocol_info: String,
}

#[derive(Clone, Debug, Default)]
pub struct SearchRequest {
    pub query: String,
    pub start: u32,
    pub count: u32,
    pub filter: String,
    pub sort_by: String,
    pub protocol_info: String,
}

#[derive(Clone, Debug, Default)]
pub struct PropertiesRequest {
    /// Empty for every interface.
    pub interface: String,
    pub protocol_info: String,
}

#[derive(Clone, Debug, Default)]
pub struct PropertyRequest {
    pub interface: String,
    pub name: String,
    pub protocol_info: String,
}

#[derive(Clone, Debug, Default)]
pub struct ResourceRequest {
    pub protocol_info: String,
    pub filter: String,
}

fn parse_interface(name: &str) -> Result<Option<BusInterface>, GatewayError> {
    if name.is_empty() {
        return Ok(None);
    }
    BusInterface::from_name(name)
        .map(Some)
        .ok_or_else(|| GatewayError::UnknownProperty(format!("Unknown interface {}", name)))
}

#[derive(Clone)]
pub struct ObjectRouter {
    scheme: PathScheme,
    registry: Arc<Mutex<DeviceRegistry>>,
    processor: TaskProcessor,
    translator: Arc<dyn QueryTranslator>,
    backend: Arc<dyn MediaBackend>,
}

impl ObjectRouter {
    pub fn new(
        registry: Arc<Mutex<DeviceRegistry>>,
        translator: Arc<dyn QueryTranslator>,
        backend: Arc<dyn MediaBackend>,
    ) -> Self {
        let (scheme, processor) = {
            let registry = registry.lock();
            (registry.scheme().clone(), registry.processor().clone())
        };
        Self {
            scheme,
            registry,
            processor,
            translator,
            backend,
        }
    }

    fn resolve(&self, path: &str, cancel: &CancellationToken) -> Result<Target, GatewayError> {
        let object = self.scheme.split(path)?;
        let device = self
            .registry
            .lock()
            .device_ref(&object.root_path)
            .ok_or_else(|| GatewayError::device_not_found(&object.root_path))?;

        Ok(Target {
            device,
            item_id: object.item_id,
            cancel: cancel.clone(),
        })
    }

    fn dispatch<A>(
        &self,
        path: &str,
        prepared: Result<(Target, A), GatewayError>,
        completion: Completion,
        build: impl FnOnce(&dyn MediaBackend, Target, A, Completion) -> Box<dyn QueueTask>,
    ) {
        match prepared {
            Err(err) => {
                debug!(path = %path, error = %err, "Request rejected");
                completion.complete_later(Err(err));
            }
            Ok((target, args)) => {
                let queue = target.device.queue.clone();
                let task = build(self.backend.as_ref(), target, args, completion);
                if let Err(err) = self.processor.add_task(&queue, task) {
                    warn!(path = %path, error = %err, "Device queue vanished");
                }
            }
        }
    }

    pub fn get_children(
        &self,
        path: &str,
        request: BrowseRequest,
        cancel: &CancellationToken,
        completion: Completion,
    ) {
        let prepared = self.resolve(path, cancel).and_then(|target| {
            let filter = self.translator.filter(&request.filter);
            let sort_by = self.translator.sort(&request.sort_by)?;
            Ok((
                target,
                ListChildrenArgs {
                    start: request.start,
                    count: request.count,
                    filter,
                    sort_by,
                    protocol_info: request.protocol_info,
                },
            ))
        });
        self.dispatch(path, prepared, completion, |backend, target, args, completion| {
            backend.list_children(target, args, completion)
        });
    }

    pub fn search(
        &self,
        path: &str,
        request: SearchRequest,
        cancel: &CancellationToken,
        completion: Completion,
    ) {
        let prepared = self.resolve(path, cancel).and_then(|target| {
            let filter = self.translator.filter(&request.filter);
            let query = self.translator.search(&request.query)?;
            let sort_by = self.translator.sort(&request.sort_by)?;
            Ok((
                target,
                SearchArgs {
                    query,
                    start: request.start,
                    count: request.count,
                    filter,
                    sort_by,
                    protocol_info: request.protocol_info,
                },
            ))
        });
        self.dispatch(path, prepared, completion, |backend, target, args, completion| {
            backend.search(target, args, completion)
        });
    }

    pub fn get_all_props(
        &self,
        path: &str,
        request: PropertiesRequest,
        cancel: &CancellationToken,
        completion: Completion,
    ) {
        let prepared = self.resolve(path, cancel).and_then(|target| {
            let interface = parse_interface(&request.interface)?;
            Ok((
                target,
                GetAllArgs {
                    interface,
                    protocol_info: request.protocol_info,
                },
            ))
        });
        self.dispatch(path, prepared, completion, |backend, target, args, completion| {
            backend.get_all_properties(target, args, completion)
        });
    }

    pub fn get_prop(
        &self,
        path: &str,
        request: PropertyRequest,
        cancel: &CancellationToken,
        completion: Completion,
    ) {
        let prepared = self.resolve(path, cancel).and_then(|target| {
            let interface = parse_interface(&request.interface)?;
            let prop = self.translator.property(&request.name);
            Ok((
                target,
                GetPropArgs {
                    interface,
                    name: request.name,
                    prop,
                    protocol_info: request.protocol_info,
                },
            ))
        });
        self.dispatch(path, prepared, completion, |backend, target, args, completion| {
            backend.get_property(target, args, completion)
        });
    }

    pub fn get_resource(
        &self,
        path: &str,
        request: ResourceRequest,
        cancel: &CancellationToken,
        completion: Completion,
    ) {
        let prepared = self.resolve(path, cancel).map(|target| {
            let filter = self.translator.filter(&request.filter);
            (
                target,
                GetResourceArgs {
                    protocol_info: request.protocol_info,
                    filter,
                },
            )
        });
        self.dispatch(path, prepared, completion, |backend, target, args, completion| {
            backend.get_resource(target, args, completion)
        });
    }
}
