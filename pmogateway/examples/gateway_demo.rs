//! Announces an in-memory media server to a gateway and walks its tree.
//!
//! ```text
//! RUST_LOG=debug cargo run -p pmogateway --example gateway_demo
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use pmogateway::{
    ActionId, ActionRequest, ActionResponse, BrowseRequest, DeviceDescription, DiscoveryEvent,
    Gateway, GatewaySettings, LogSettings, PendingAction, PropertiesRequest, Reply, ResourceRequest,
    SearchRequest, ServiceProxy,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

const DIDL_HEADER: &str = r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/">"#;

/// Answers ContentDirectory calls from a fixed two-level library.
struct DemoLibrary {
    next: AtomicU64,
}

impl DemoLibrary {
    fn didl(&self, body: &str) -> String {
        format!("{}{}</DIDL-Lite>", DIDL_HEADER, body)
    }

    fn album(&self) -> &'static str {
        r#"<container id="1" parentID="0" childCount="2" searchable="1"><dc:title>A Love Supreme</dc:title><upnp:class>object.container.album.musicAlbum</upnp:class></container>"#
    }

    fn track(&self, n: u32) -> String {
        format!(
            r#"<item id="1${n}" parentID="1"><dc:title>Part {n}</dc:title><upnp:class>object.item.audioItem.musicTrack</upnp:class><upnp:artist>John Coltrane</upnp:artist><upnp:originalTrackNumber>{n}</upnp:originalTrackNumber><res protocolInfo="http-get:*:audio/flac:DLNA.ORG_PN=FLAC" size="40000000" duration="0:07:4{n}">http://demo.local/1/{n}.flac</res></item>"#
        )
    }

    fn answer(&self, request: &ActionRequest) -> Result<ActionResponse, String> {
        let id = request
            .get_arg("ObjectID")
            .or_else(|| request.get_arg("ContainerID"))
            .unwrap_or("0");
        let metadata = request.get_arg("BrowseFlag") == Some("BrowseMetadata");

        let (body, count) = match (id, metadata) {
            ("0", true) => (
                r#"<container id="0" parentID="-1" childCount="1" searchable="1"><dc:title>Demo</dc:title><upnp:class>object.container</upnp:class></container>"#.to_string(),
                1,
            ),
            ("0", false) if request.action == "Search" => (self.track(1) + &self.track(2), 2),
            ("0", false) => (self.album().to_string(), 1),
            ("1", true) => (self.album().to_string(), 1),
            ("1", false) => (self.track(1) + &self.track(2), 2),
            (track, true) if track.starts_with("1$") => {
                let n = track[2..].parse().map_err(|_| "701 No such object".to_string())?;
                (self.track(n), 1)
            }
            _ => return Err("701 No such object".to_string()),
        };

        Ok(ActionResponse::new()
            .with("Result", self.didl(&body))
            .with("NumberReturned", count.to_string())
            .with("TotalMatches", count.to_string())
            .with("UpdateID", "1"))
    }
}

impl ServiceProxy for DemoLibrary {
    fn begin_action(&self, request: ActionRequest) -> PendingAction {
        let (pending, tx) = PendingAction::new(ActionId(self.next.fetch_add(1, Ordering::Relaxed)));
        let _ = tx.send(self.answer(&request));
        pending
    }

    fn cancel_action(&self, _id: ActionId) {}
}

fn print_reply(label: &str, reply: pmogateway::ReplyResult) {
    println!("\n== {}", label);
    match reply {
        Ok(Reply::Objects(objects)) => {
            for object in objects {
                println!(
                    "  {} [{}] {}",
                    object.get("Path").and_then(|v| v.as_str()).unwrap_or("?"),
                    object.get("Type").and_then(|v| v.as_str()).unwrap_or("?"),
                    object
                        .get("DisplayName")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                );
            }
        }
        Ok(Reply::Properties(props)) | Ok(Reply::Resource(props)) => {
            for (name, value) in props {
                println!("  {} = {}", name, value);
            }
        }
        Ok(Reply::Property(value)) => println!("  {}", value),
        Err(err) => println!("  error: {}", err),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = pmoconfig::get_config();
    let logs = LogSettings::from_config(&config).unwrap_or(LogSettings {
        min_level: "INFO".into(),
        enable_console: true,
    });
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logs.filter_directive()));
    let console = logs
        .enable_console
        .then(|| fmt::layer().with_target(true).with_level(true).with_ansi(true));
    Registry::default().with(filter).with(console).init();

    let settings = match GatewaySettings::from_config(&config) {
        Ok(settings) => settings,
        Err(err) => {
            tracing::warn!(error = %err, "Falling back to default gateway settings");
            GatewaySettings::default()
        }
    };

    let gateway = Gateway::new(settings.clone());
    let events = gateway.subscribe();

    gateway.handle_discovery(DiscoveryEvent::ContextAvailable {
        address: "127.0.0.1".into(),
    });
    gateway.handle_discovery(DiscoveryEvent::ServerAvailable {
        usn: format!("uuid:demo-library::{}", settings.device_type),
        device_type: settings.device_type.clone(),
        address: "127.0.0.1".into(),
        description: DeviceDescription {
            udn: "uuid:demo-library".into(),
            device_type: settings.device_type.clone(),
            friendly_name: "Demo Library".into(),
            manufacturer: "PMOMusic".into(),
            model_name: "In-memory".into(),
            location: "http://127.0.0.1/description.xml".into(),
        },
        proxy: Arc::new(DemoLibrary {
            next: AtomicU64::new(1),
        }),
    });

    let Some(root) = events.try_iter().next().map(|event| event.path().to_string()) else {
        anyhow::bail!("the demo server was not registered");
    };
    println!("Device published at {}", root);

    let cancel = CancellationToken::new();
    let album = format!("{}/1", root);

    print_reply(
        "root properties",
        gateway
            .get_all_props(&root, PropertiesRequest::default(), &cancel)
            .await,
    );
    print_reply(
        "root children",
        gateway
            .get_children(&root, BrowseRequest::default(), &cancel)
            .await,
    );
    print_reply(
        "album children",
        gateway
            .get_children(
                &album,
                BrowseRequest {
                    filter: "Path,Type,DisplayName".into(),
                    sort_by: "+TrackNumber".into(),
                    ..Default::default()
                },
                &cancel,
            )
            .await,
    );
    print_reply(
        "search",
        gateway
            .search(
                &root,
                SearchRequest {
                    query: r#"Artist contains "Coltrane""#.into(),
                    filter: "Path,Type,DisplayName".into(),
                    ..Default::default()
                },
                &cancel,
            )
            .await,
    );
    print_reply(
        "playable resource of part 1",
        gateway
            .get_resource(
                &format!("{}/1_241", root),
                ResourceRequest {
                    protocol_info: "http-get:*:audio/*:*".into(),
                    filter: "*".into(),
                },
                &cancel,
            )
            .await,
    );

    Ok(())
}
