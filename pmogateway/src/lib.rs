//! # pmogateway
//!
//! Republishes the UPnP MediaServers found on the local network as a tree of
//! containers and items on a local bus.
//!
//! The crate is the engine behind the bus surface:
//!
//! - [`registry`] tracks devices, each reachable through one or more network
//!   contexts, and gives each a stable bus path;
//! - [`queue`] runs the requests of each device one after the other, with
//!   cancellation of a single request or of the whole queue;
//! - [`router`] maps object paths onto devices and items and normalizes
//!   filters, sort keys and search expressions;
//! - [`content_directory`] turns requests into ContentDirectory actions.
//!
//! Discovery announcements come in through [`Gateway::handle_discovery`];
//! remote calls go out through the [`ServiceProxy`] the announcer supplied.

pub mod backend;
pub mod capabilities;
pub mod config_ext;
pub mod content_directory;
pub mod didl;
pub mod discovery;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod path;
pub mod props;
pub mod proxy;
pub mod queue;
pub mod registry;
pub mod router;
pub mod search;
pub mod sort;
pub mod translate;

pub use backend::{Completion, MediaBackend, PropertyMap, Reply, ReplyResult, Target};
pub use capabilities::{BusInterface, CapabilityDispatcher};
pub use config_ext::{GatewayConfigExt, GatewaySettings, LogSettings};
pub use content_directory::ContentDirectoryBackend;
pub use discovery::DiscoveryEvent;
pub use errors::GatewayError;
pub use events::{GatewayEvent, GatewayEventBus};
pub use gateway::Gateway;
pub use path::PathScheme;
pub use proxy::{
    ActionId, ActionReply, ActionRequest, ActionResponse, PendingAction, ProxyTable, ServiceProxy,
    WeakProxy,
};
pub use queue::{ActionTask, Flow, QueueKey, QueueTask, Step, TaskProcessor, TaskStatus};
pub use registry::{DeviceDescription, DeviceRegistry};
pub use router::{
    BrowseRequest, ObjectRouter, PropertiesRequest, PropertyRequest, ResourceRequest,
    SearchRequest,
};
pub use translate::{QueryTranslator, UpnpQueryTranslator};
