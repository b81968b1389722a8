use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::path::PathScheme;
use crate::proxy::{ProxyHandle, ProxyTable, ServiceProxy, WeakProxy};
use crate::queue::{QueueKey, TaskProcessor};

/// Identity and description of a media server, as announced the first time
/// it was seen.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeviceDescription {
    pub udn: String,
    pub device_type: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub model_name: String,
    pub location: String,
}

/// One network path to a device.
#[derive(Clone, Debug)]
pub struct Context {
    address: String,
    proxy: ProxyHandle,
}

impl Context {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn proxy(&self) -> ProxyHandle {
        self.proxy
    }
}

#[derive(Debug)]
pub struct Device {
    udn: String,
    path: String,
    serial: u64,
    contexts: Vec<Context>,
    queue: QueueKey,
    description: DeviceDescription,
}

impl Device {
    pub fn udn(&self) -> &str {
        &self.udn
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn contexts(&self) -> &[Context] {
        &self.contexts
    }

    pub fn queue(&self) -> &QueueKey {
        &self.queue
    }

    pub fn description(&self) -> &DeviceDescription {
        &self.description
    }

    pub fn has_context(&self, address: &str) -> bool {
        self.context_index(address).is_some()
    }

    fn context_index(&self, address: &str) -> Option<usize> {
        self.contexts.iter().position(|c| c.address == address)
    }
}

/// Everything a request needs to know about its target device, detached
/// from the registry.
#[derive(Clone, Debug)]
pub struct DeviceRef {
    pub path: String,
    pub udn: String,
    pub queue: QueueKey,
    pub proxy: Option<WeakProxy>,
    pub description: DeviceDescription,
}

/// UDN-keyed table of the media servers currently reachable.
///
/// A device stays registered as long as at least one context reaches it.
/// The registry owns the proxies of every context (through its
/// [`ProxyTable`]) and the task queue of every device.
#[derive(Debug)]
pub struct DeviceRegistry {
    scheme: PathScheme,
    devices: HashMap<String, Device>,
    by_path: HashMap<String, String>,
    next_serial: u64,
    proxies: ProxyTable,
    processor: TaskProcessor,
}

impl DeviceRegistry {
    pub fn new(scheme: PathScheme, processor: TaskProcessor) -> Self {
        Self {
            scheme,
            devices: HashMap::new(),
            by_path: HashMap::new(),
            next_serial: 1,
            proxies: ProxyTable::new(),
            processor,
        }
    }

    pub fn scheme(&self) -> &PathScheme {
        &self.scheme
    }

    pub fn proxies(&self) -> &ProxyTable {
        &self.proxies
    }

    pub fn processor(&self) -> &TaskProcessor {
        &self.processor
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Records that `udn` is reachable through `address`.
    ///
    /// The first context of an unknown UDN creates the device, its bus path
    /// and its queue, then calls `on_created` with the new path. Further
    /// contexts are appended; a context already known for that address is
    /// left untouched and `proxy` is dropped.
    pub fn register_context<F>(
        &mut self,
        udn: &str,
        address: &str,
        proxy: Arc<dyn ServiceProxy>,
        description: DeviceDescription,
        on_created: F,
    ) -> &Device
    where
        F: FnOnce(&str),
    {
        match self.devices.entry(udn.to_ascii_lowercase()) {
            Entry::Occupied(entry) => {
                let device = entry.into_mut();
                if device.has_context(address) {
                    debug!(udn = %udn, address = %address, "Context already known");
                } else {
                    let handle = self.proxies.insert(proxy);
                    device.contexts.push(Context {
                        address: address.to_string(),
                        proxy: handle,
                    });
                    debug!(
                        udn = %udn,
                        address = %address,
                        contexts = device.contexts.len(),
                        "New context for known device"
                    );
                }
                device
            }
            Entry::Vacant(entry) => {
                let serial = self.next_serial;
                self.next_serial += 1;

                let path = self.scheme.device_path(serial);
                let queue = QueueKey::new(self.processor.create_source(), path.clone());
                self.processor.add_queue(&queue);

                let handle = self.proxies.insert(proxy);
                self.by_path.insert(path.clone(), entry.key().clone());

                let device = entry.insert(Device {
                    udn: udn.to_string(),
                    path,
                    serial,
                    contexts: vec![Context {
                        address: address.to_string(),
                        proxy: handle,
                    }],
                    queue,
                    description,
                });

                info!(udn = %udn, path = %device.path, address = %address, "Media server found");
                on_created(&device.path);
                device
            }
        }
    }

    /// Forgets the context of `udn` reached through `address`.
    ///
    /// Removing the last context calls `on_removed` with the device path and
    /// destroys the device together with its queue. Returns true when the
    /// device was destroyed.
    pub fn unregister_context<F>(&mut self, udn: &str, address: &str, on_removed: F) -> bool
    where
        F: FnOnce(&str),
    {
        let key = udn.to_ascii_lowercase();
        let Some(device) = self.devices.get_mut(&key) else {
            debug!(udn = %udn, "Unavailable notification for unknown device");
            return false;
        };
        let Some(index) = device.context_index(address) else {
            debug!(udn = %udn, address = %address, "Unavailable notification for unknown context");
            return false;
        };

        let context = device.contexts.remove(index);
        self.proxies.remove(context.proxy);

        if !device.contexts.is_empty() {
            debug!(
                udn = %udn,
                address = %address,
                contexts = device.contexts.len(),
                "Context lost, device still reachable"
            );
            return false;
        }

        let path = device.path.clone();
        on_removed(&path);
        self.remove_device(&key);
        true
    }

    /// Forgets every context reached through `address`, e.g. when a network
    /// interface goes down. Returns the number of devices destroyed.
    pub fn unregister_address<F>(&mut self, address: &str, mut on_removed: F) -> usize
    where
        F: FnMut(&str),
    {
        let udns: Vec<String> = self
            .devices
            .values()
            .filter(|device| device.has_context(address))
            .map(|device| device.udn.clone())
            .collect();

        udns.iter()
            .filter(|udn| self.unregister_context(udn, address, &mut on_removed))
            .count()
    }

    fn remove_device(&mut self, key: &str) {
        if let Some(device) = self.devices.remove(key) {
            self.by_path.remove(&device.path);
            for context in &device.contexts {
                self.proxies.remove(context.proxy);
            }
            self.processor.remove_queue(&device.queue);
            info!(udn = %device.udn, path = %device.path, "Media server lost");
        }
    }

    pub fn lookup_by_path(&self, root_path: &str) -> Option<&Device> {
        self.by_path
            .get(root_path)
            .and_then(|udn| self.devices.get(udn))
    }

    pub fn lookup_by_udn(&self, udn: &str) -> Option<&Device> {
        self.devices.get(&udn.to_ascii_lowercase())
    }

    /// Detached view of the device at `root_path`, bound to the proxy of its
    /// oldest context.
    pub fn device_ref(&self, root_path: &str) -> Option<DeviceRef> {
        let device = self.lookup_by_path(root_path)?;
        Some(DeviceRef {
            path: device.path.clone(),
            udn: device.udn.clone(),
            queue: device.queue.clone(),
            proxy: device
                .contexts
                .first()
                .map(|context| self.proxies.downgrade(context.proxy)),
            description: device.description.clone(),
        })
    }

    /// Paths of every registered device, in discovery order.
    pub fn list_paths(&self) -> Vec<String> {
        let mut devices: Vec<&Device> = self.devices.values().collect();
        devices.sort_by_key(|device| device.serial);
        devices.into_iter().map(|device| device.path.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ActionId, ActionRequest, PendingAction};

    struct NullProxy;

    impl ServiceProxy for NullProxy {
        fn begin_action(&self, _request: ActionRequest) -> PendingAction {
            PendingAction::new(ActionId(0)).0
        }

        fn cancel_action(&self, _id: ActionId) {}
    }

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(PathScheme::new("/dev"), TaskProcessor::new())
    }

    fn register(reg: &mut DeviceRegistry, udn: &str, address: &str, found: &mut Vec<String>) {
        reg.register_context(
            udn,
            address,
            Arc::new(NullProxy),
            DeviceDescription::default(),
            |path| found.push(path.to_string()),
        );
    }

    fn check_invariants(reg: &DeviceRegistry) {
        for device in reg.devices.values() {
            assert!(!device.contexts.is_empty());
            assert_eq!(reg.by_path.get(&device.path), Some(&device.udn.to_ascii_lowercase()));
            assert!(reg.processor.has_queue(&device.queue));
        }
        assert_eq!(reg.by_path.len(), reg.devices.len());
        let live: usize = reg.devices.values().map(|d| d.contexts.len()).sum();
        assert_eq!(reg.proxies.len(), live);
    }

    #[tokio::test]
    async fn test_multi_homed_device_lifecycle() {
        let mut reg = registry();
        let mut found = Vec::new();
        let mut lost = Vec::new();

        register(&mut reg, "uuid:U1", "A", &mut found);
        check_invariants(&reg);
        assert_eq!(found, vec!["/dev/1"]);

        register(&mut reg, "uuid:U1", "B", &mut found);
        check_invariants(&reg);
        assert_eq!(found, vec!["/dev/1"]);
        assert_eq!(reg.list_paths(), vec!["/dev/1"]);

        assert!(!reg.unregister_context("uuid:U1", "A", |p| lost.push(p.to_string())));
        check_invariants(&reg);
        assert!(lost.is_empty());
        assert_eq!(reg.lookup_by_path("/dev/1").unwrap().contexts().len(), 1);

        assert!(reg.unregister_context("uuid:U1", "B", |p| lost.push(p.to_string())));
        check_invariants(&reg);
        assert_eq!(lost, vec!["/dev/1"]);
        assert!(reg.list_paths().is_empty());
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn test_reannouncement_is_a_noop() {
        let mut reg = registry();
        let mut found = Vec::new();

        register(&mut reg, "uuid:U1", "A", &mut found);
        register(&mut reg, "uuid:U1", "A", &mut found);
        check_invariants(&reg);

        assert_eq!(found.len(), 1);
        assert_eq!(reg.lookup_by_udn("uuid:U1").unwrap().contexts().len(), 1);
        assert_eq!(reg.proxies().len(), 1);
    }

    #[tokio::test]
    async fn test_serials_are_never_reused() {
        let mut reg = registry();
        let mut found = Vec::new();

        register(&mut reg, "uuid:U1", "A", &mut found);
        register(&mut reg, "uuid:U2", "A", &mut found);
        reg.unregister_context("uuid:U1", "A", |_| {});
        register(&mut reg, "uuid:U1", "A", &mut found);
        check_invariants(&reg);

        assert_eq!(found, vec!["/dev/1", "/dev/2", "/dev/3"]);
        assert_eq!(reg.list_paths(), vec!["/dev/2", "/dev/3"]);
        assert!(reg.lookup_by_path("/dev/1").is_none());
    }

    #[tokio::test]
    async fn test_udn_lookup_is_case_insensitive() {
        let mut reg = registry();
        let mut found = Vec::new();

        register(&mut reg, "uuid:ABC", "A", &mut found);
        register(&mut reg, "uuid:abc", "B", &mut found);
        check_invariants(&reg);

        assert_eq!(found.len(), 1);
        assert_eq!(reg.lookup_by_udn("UUID:ABC").unwrap().contexts().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_context_removal_is_ignored() {
        let mut reg = registry();
        let mut found = Vec::new();
        register(&mut reg, "uuid:U1", "A", &mut found);

        assert!(!reg.unregister_context("uuid:U1", "Z", |_| panic!("not lost")));
        assert!(!reg.unregister_context("uuid:nope", "A", |_| panic!("not lost")));
        check_invariants(&reg);
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn test_interface_withdrawal() {
        let mut reg = registry();
        let mut found = Vec::new();
        let mut lost = Vec::new();

        register(&mut reg, "uuid:U1", "A", &mut found);
        register(&mut reg, "uuid:U1", "B", &mut found);
        register(&mut reg, "uuid:U2", "A", &mut found);

        let removed = reg.unregister_address("A", |p| lost.push(p.to_string()));
        check_invariants(&reg);

        assert_eq!(removed, 1);
        assert_eq!(lost, vec!["/dev/2"]);
        assert_eq!(reg.list_paths(), vec!["/dev/1"]);
    }

    #[tokio::test]
    async fn test_removal_drops_proxies_and_queue() {
        let mut reg = registry();
        let mut found = Vec::new();
        register(&mut reg, "uuid:U1", "A", &mut found);

        let device = reg.device_ref("/dev/1").unwrap();
        let weak = device.proxy.clone().unwrap();
        assert!(weak.is_live());

        reg.unregister_context("uuid:U1", "A", |_| {});
        assert!(!weak.is_live());
        assert!(!reg.processor().has_queue(&device.queue));
    }
}
