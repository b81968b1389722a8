//! Turns discovery announcements into registry mutations.
//!
//! The SSDP/description-fetching layer is outside this crate: whatever
//! implements it feeds [`DiscoveryEvent`]s to the gateway, one per network
//! context becoming (un)available or per server (dis)appearing on a context.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::events::GatewayEvent;
use crate::proxy::ServiceProxy;
use crate::registry::{DeviceDescription, DeviceRegistry};

pub enum DiscoveryEvent {
    /// A network interface came up.
    ContextAvailable { address: String },
    /// A network interface went away, with every device reached through it.
    ContextUnavailable { address: String },
    ServerAvailable {
        usn: String,
        device_type: String,
        address: String,
        description: DeviceDescription,
        proxy: Arc<dyn ServiceProxy>,
    },
    ServerUnavailable {
        usn: String,
        device_type: String,
        address: String,
    },
}

impl fmt::Debug for DiscoveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryEvent::ContextAvailable { address } => f
                .debug_struct("ContextAvailable")
                .field("address", address)
                .finish(),
            DiscoveryEvent::ContextUnavailable { address } => f
                .debug_struct("ContextUnavailable")
                .field("address", address)
                .finish(),
            DiscoveryEvent::ServerAvailable {
                usn,
                device_type,
                address,
                ..
            } => f
                .debug_struct("ServerAvailable")
                .field("usn", usn)
                .field("device_type", device_type)
                .field("address", address)
                .finish_non_exhaustive(),
            DiscoveryEvent::ServerUnavailable {
                usn,
                device_type,
                address,
            } => f
                .debug_struct("ServerUnavailable")
                .field("usn", usn)
                .field("device_type", device_type)
                .field("address", address)
                .finish(),
        }
    }
}

/// `uuid:…` part of a USN, lower-cased.
pub fn extract_udn_from_usn(usn: &str) -> Option<String> {
    let lower = usn.trim().to_ascii_lowercase();
    let idx = lower.find("uuid:")?;
    let sub = &lower[idx..];
    let udn = match sub.find("::") {
        Some(end) => &sub[..end],
        None => sub,
    };
    Some(udn.to_string())
}

/// Whether `device_type` announces the same device kind as `wanted`, any
/// version: `urn:schemas-upnp-org:device:MediaServer:4` matches a wanted
/// `...:MediaServer:1`.
pub fn is_server_type(device_type: &str, wanted: &str) -> bool {
    fn kind(urn: &str) -> &str {
        let urn = urn.trim();
        match urn.rsplit_once(':') {
            Some((kind, version)) if version.chars().all(|c| c.is_ascii_digit()) => kind,
            _ => urn,
        }
    }
    kind(device_type).eq_ignore_ascii_case(kind(wanted))
}

/// Applies `event` to `registry`, keeping only servers of type `wanted`.
/// Device appearances and disappearances are returned in the order they
/// happened.
pub fn apply_event(
    registry: &mut DeviceRegistry,
    wanted: &str,
    event: DiscoveryEvent,
) -> Vec<GatewayEvent> {
    let mut events = Vec::new();

    match event {
        DiscoveryEvent::ContextAvailable { address } => {
            debug!(address = %address, "Network context available");
        }
        DiscoveryEvent::ContextUnavailable { address } => {
            debug!(address = %address, "Network context unavailable");
            registry.unregister_address(&address, |path| {
                events.push(GatewayEvent::DeviceLost {
                    path: path.to_string(),
                })
            });
        }
        DiscoveryEvent::ServerAvailable {
            usn,
            device_type,
            address,
            description,
            proxy,
        } => {
            if !is_server_type(&device_type, wanted) {
                debug!(usn = %usn, device_type = %device_type, "Ignoring non media server");
                return events;
            }
            let Some(udn) = extract_udn_from_usn(&usn) else {
                debug!(usn = %usn, "Ignoring announcement without UDN");
                return events;
            };
            registry.register_context(&udn, &address, proxy, description, |path| {
                events.push(GatewayEvent::DeviceFound {
                    path: path.to_string(),
                })
            });
        }
        DiscoveryEvent::ServerUnavailable {
            usn,
            device_type,
            address,
        } => {
            if !is_server_type(&device_type, wanted) {
                return events;
            }
            let Some(udn) = extract_udn_from_usn(&usn) else {
                return events;
            };
            registry.unregister_context(&udn, &address, |path| {
                events.push(GatewayEvent::DeviceLost {
                    path: path.to_string(),
                })
            });
        }
    }

    events
}
