use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backend::{Completion, MediaBackend, ReplyResult};
use crate::capabilities::CapabilityDispatcher;
use crate::config_ext::GatewaySettings;
use crate::content_directory::ContentDirectoryBackend;
use crate::discovery::{self, DiscoveryEvent};
use crate::errors::GatewayError;
use crate::events::{GatewayEvent, GatewayEventBus};
use crate::path::PathScheme;
use crate::queue::TaskProcessor;
use crate::registry::DeviceRegistry;
use crate::router::{
    BrowseRequest, ObjectRouter, PropertiesRequest, PropertyRequest, ResourceRequest,
    SearchRequest,
};
use crate::translate::{QueryTranslator, UpnpQueryTranslator};

/// Everything the gateway is made of, wired together.
///
/// Must be created and used from within a tokio runtime: device queues are
/// tokio tasks.
pub struct Gateway {
    settings: GatewaySettings,
    registry: Arc<Mutex<DeviceRegistry>>,
    processor: TaskProcessor,
    router: ObjectRouter,
    capabilities: CapabilityDispatcher,
    events: GatewayEventBus,
}

impl Gateway {
    /// A gateway speaking ContentDirectory to the devices.
    pub fn new(settings: GatewaySettings) -> Self {
        let backend = ContentDirectoryBackend::new(
            PathScheme::new(settings.path_prefix.clone()),
            settings.browse_page_size,
        );
        Self::with_backend(settings, Arc::new(UpnpQueryTranslator::new()), Arc::new(backend))
    }

    pub fn with_backend(
        settings: GatewaySettings,
        translator: Arc<dyn QueryTranslator>,
        backend: Arc<dyn MediaBackend>,
    ) -> Self {
        let scheme = PathScheme::new(settings.path_prefix.clone());
        let processor = TaskProcessor::new();
        let registry = Arc::new(Mutex::new(DeviceRegistry::new(
            scheme.clone(),
            processor.clone(),
        )));
        let router = ObjectRouter::new(Arc::clone(&registry), translator, backend);

        info!(prefix = %scheme.prefix(), "Media gateway ready");

        Self {
            settings,
            registry,
            processor,
            router,
            capabilities: CapabilityDispatcher::new(scheme),
            events: GatewayEventBus::new(),
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn router(&self) -> &ObjectRouter {
        &self.router
    }

    pub fn capabilities(&self) -> &CapabilityDispatcher {
        &self.capabilities
    }

    pub fn processor(&self) -> &TaskProcessor {
        &self.processor
    }

    pub fn subscribe(&self) -> Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    /// Feeds one discovery announcement to the registry and publishes the
    /// resulting device appearances/disappearances.
    pub fn handle_discovery(&self, event: DiscoveryEvent) {
        let events = {
            let mut registry = self.registry.lock();
            discovery::apply_event(&mut registry, &self.settings.device_type, event)
        };
        for event in events {
            self.events.broadcast(event);
        }
    }

    pub fn list_device_paths(&self) -> Vec<String> {
        self.registry.lock().list_paths()
    }

    pub fn device_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Cancels every queued and running task of the device at `path`.
    pub fn cancel_device(&self, path: &str) -> Result<(), GatewayError> {
        let queue = self
            .registry
            .lock()
            .lookup_by_path(path)
            .map(|device| device.queue().clone())
            .ok_or_else(|| GatewayError::device_not_found(path))?;
        self.processor.cancel_queue(&queue);
        Ok(())
    }

    async fn wait(request: impl FnOnce(Completion)) -> ReplyResult {
        let (completion, rx) = Completion::channel();
        request(completion);
        rx.await.unwrap_or(Err(GatewayError::Canceled))
    }

    pub async fn get_children(
        &self,
        path: &str,
        request: BrowseRequest,
        cancel: &CancellationToken,
    ) -> ReplyResult {
        Self::wait(|c| self.router.get_children(path, request, cancel, c)).await
    }

    pub async fn search(
        &self,
        path: &str,
        request: SearchRequest,
        cancel: &CancellationToken,
    ) -> ReplyResult {
        Self::wait(|c| self.router.search(path, request, cancel, c)).await
    }

    pub async fn get_all_props(
        &self,
        path: &str,
        request: PropertiesRequest,
        cancel: &CancellationToken,
    ) -> ReplyResult {
        Self::wait(|c| self.router.get_all_props(path, request, cancel, c)).await
    }

    pub async fn get_prop(
        &self,
        path: &str,
        request: PropertyRequest,
        cancel: &CancellationToken,
    ) -> ReplyResult {
        Self::wait(|c| self.router.get_prop(path, request, cancel, c)).await
    }

    pub async fn get_resource(
        &self,
        path: &str,
        request: ResourceRequest,
        cancel: &CancellationToken,
    ) -> ReplyResult {
        Self::wait(|c| self.router.get_resource(path, request, cancel, c)).await
    }
}
