use std::fmt;

use crate::path::PathScheme;

/// Bus interfaces exposed on gateway objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BusInterface {
    Properties,
    MediaObject,
    MediaContainer,
    MediaItem,
    MediaDevice,
}

impl BusInterface {
    pub const ALL: [BusInterface; 5] = [
        BusInterface::Properties,
        BusInterface::MediaObject,
        BusInterface::MediaContainer,
        BusInterface::MediaItem,
        BusInterface::MediaDevice,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BusInterface::Properties => "org.freedesktop.DBus.Properties",
            BusInterface::MediaObject => "org.gnome.UPnP.MediaObject2",
            BusInterface::MediaContainer => "org.gnome.UPnP.MediaContainer2",
            BusInterface::MediaItem => "org.gnome.UPnP.MediaItem2",
            BusInterface::MediaDevice => "com.pmomusic.UPnP.MediaDevice",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|iface| iface.name() == name)
    }
}

impl fmt::Display for BusInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tells the bus which interfaces an object path implements.
///
/// Objects are materialised lazily: whether a non-root path is a container
/// or an item is only known once the device answers, so every non-root path
/// advertises both.
#[derive(Clone, Debug)]
pub struct CapabilityDispatcher {
    scheme: PathScheme,
}

impl CapabilityDispatcher {
    pub fn new(scheme: PathScheme) -> Self {
        Self { scheme }
    }

    pub fn introspect(&self, path: &str) -> Vec<BusInterface> {
        let last = if self.scheme.is_root_object(path) {
            BusInterface::MediaDevice
        } else {
            BusInterface::MediaItem
        };

        vec![
            BusInterface::Properties,
            BusInterface::MediaObject,
            BusInterface::MediaContainer,
            last,
        ]
    }

    /// Interface handling calls made on `interface_name`, if the gateway
    /// answers method calls on it at all.
    pub fn dispatch(&self, interface_name: &str) -> Option<BusInterface> {
        match BusInterface::from_name(interface_name)? {
            iface @ (BusInterface::MediaContainer
            | BusInterface::Properties
            | BusInterface::MediaItem) => Some(iface),
            _ => None,
        }
    }

    /// Child nodes known without asking the device: none.
    pub fn enumerate(&self, _path: &str) -> Vec<String> {
        Vec::new()
    }
}
