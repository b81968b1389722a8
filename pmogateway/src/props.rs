//! Bus property names and how they map onto ContentDirectory fields.
//!
//! Each property the gateway knows gets one bit in a [`PropertyMask`]. A
//! client filter (a list of bus property names) is normalized into the mask
//! of properties to return plus the ContentDirectory `Filter` string asking
//! the device for just the fields needed.

use std::collections::HashMap;

use tracing::debug;

use crate::capabilities::BusInterface;

/// How a property value is represented on the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    Str,
    Int,
    UInt,
    Bool,
    ObjectPath,
    StrList,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropertyDescriptor {
    /// Bus name, e.g. `DisplayName`.
    pub name: &'static str,
    /// ContentDirectory field, e.g. `dc:title`. `None` for properties that
    /// never come from a Browse result.
    pub upnp: Option<&'static str>,
    pub interface: BusInterface,
    pub kind: PropertyKind,
    pub bit: u32,
}

impl PropertyDescriptor {
    pub fn mask(&self) -> PropertyMask {
        PropertyMask(1 << self.bit)
    }

    /// Whether the property can appear in a sort or search expression.
    pub fn is_queryable(&self) -> bool {
        self.upnp.is_some_and(|key| !key.starts_with("res"))
    }
}

macro_rules! props {
    ($( $bit:literal => $name:literal, $upnp:expr, $iface:ident, $kind:ident; )*) => {
        &[$(
            PropertyDescriptor {
                name: $name,
                upnp: $upnp,
                interface: BusInterface::$iface,
                kind: PropertyKind::$kind,
                bit: $bit,
            },
        )*]
    };
}

pub const PROPERTIES: &[PropertyDescriptor] = props! {
    0 => "Parent", Some("@parentID"), MediaObject, ObjectPath;
    1 => "Type", Some("upnp:class"), MediaObject, Str;
    2 => "Path", Some("@id"), MediaObject, ObjectPath;
    3 => "DisplayName", Some("dc:title"), MediaObject, Str;

    4 => "ChildCount", Some("@childCount"), MediaContainer, UInt;
    5 => "Searchable", Some("@searchable"), MediaContainer, Bool;

    6 => "Creator", Some("dc:creator"), MediaItem, Str;
    7 => "Artist", Some("upnp:artist"), MediaItem, Str;
    8 => "Album", Some("upnp:album"), MediaItem, Str;
    9 => "Date", Some("dc:date"), MediaItem, Str;
    10 => "Genre", Some("upnp:genre"), MediaItem, Str;
    11 => "TrackNumber", Some("upnp:originalTrackNumber"), MediaItem, Int;
    12 => "AlbumArtURL", Some("upnp:albumArtURI"), MediaItem, Str;
    13 => "URLs", Some("res"), MediaItem, StrList;
    14 => "MIMEType", Some("res@protocolInfo"), MediaItem, Str;
    15 => "Size", Some("res@size"), MediaItem, Int;
    16 => "Duration", Some("res@duration"), MediaItem, Int;
    17 => "Bitrate", Some("res@bitrate"), MediaItem, Int;
    18 => "SampleRate", Some("res@sampleFrequency"), MediaItem, Int;
    19 => "BitsPerSample", Some("res@bitsPerSample"), MediaItem, Int;
    20 => "Width", Some("res@resolution"), MediaItem, Int;
    21 => "Height", Some("res@resolution"), MediaItem, Int;
    22 => "DLNAProfile", Some("res@protocolInfo"), MediaItem, Str;

    23 => "UDN", None, MediaDevice, Str;
    24 => "DeviceType", None, MediaDevice, Str;
    25 => "FriendlyName", None, MediaDevice, Str;
    26 => "Manufacturer", None, MediaDevice, Str;
    27 => "ModelName", None, MediaDevice, Str;
    28 => "Location", None, MediaDevice, Str;
};

/// Set of properties, one bit per [`PropertyDescriptor`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PropertyMask(u64);

impl PropertyMask {
    pub const EMPTY: PropertyMask = PropertyMask(0);
    pub const ALL: PropertyMask = PropertyMask(u64::MAX);

    pub fn contains(self, prop: &PropertyDescriptor) -> bool {
        self.0 & prop.mask().0 != 0
    }

    pub fn insert(&mut self, prop: &PropertyDescriptor) {
        self.0 |= prop.mask().0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u64 {
        self.0
    }
}

/// A normalized client filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    pub mask: PropertyMask,
    /// Value for the ContentDirectory `Filter` argument.
    pub upnp: String,
}

impl Filter {
    pub fn all() -> Self {
        Self {
            mask: PropertyMask::ALL,
            upnp: "*".to_string(),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::all()
    }
}

/// Name index over [`PROPERTIES`].
#[derive(Clone, Debug)]
pub struct PropertyTable {
    by_name: HashMap<&'static str, &'static PropertyDescriptor>,
}

impl Default for PropertyTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyTable {
    pub fn new() -> Self {
        let by_name = PROPERTIES.iter().map(|p| (p.name, p)).collect();
        Self { by_name }
    }

    pub fn lookup(&self, name: &str) -> Option<&'static PropertyDescriptor> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static PropertyDescriptor> {
        PROPERTIES.iter()
    }

    /// Properties belonging to `interface`, in declaration order.
    pub fn for_interface(
        &self,
        interface: BusInterface,
    ) -> impl Iterator<Item = &'static PropertyDescriptor> {
        PROPERTIES.iter().filter(move |p| p.interface == interface)
    }

    /// Normalizes a comma-separated list of bus property names.
    ///
    /// `*` or an empty filter select everything. Unknown names are dropped.
    pub fn parse_filter(&self, filter: &str) -> Filter {
        let filter = filter.trim();
        if filter.is_empty() || filter == "*" {
            return Filter::all();
        }

        let mut mask = PropertyMask::EMPTY;
        let mut upnp: Vec<&str> = Vec::new();

        for name in filter.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if name == "*" {
                return Filter::all();
            }

            let Some(prop) = self.lookup(name) else {
                debug!(property = %name, "Dropping unknown property from filter");
                continue;
            };

            mask.insert(prop);
            if let Some(key) = prop.upnp {
                if key.starts_with("res@") && !upnp.contains(&"res") {
                    upnp.push("res");
                }
                if !upnp.contains(&key) {
                    upnp.push(key);
                }
            }
        }

        Filter {
            mask,
            upnp: upnp.join(","),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_are_unique() {
        let mut seen = PropertyMask::EMPTY;
        for prop in PROPERTIES {
            assert!(!seen.contains(prop), "duplicate bit for {}", prop.name);
            seen.insert(prop);
        }
    }

    #[test]
    fn test_star_selects_everything() {
        let table = PropertyTable::new();
        assert_eq!(table.parse_filter("*"), Filter::all());
        assert_eq!(table.parse_filter(""), Filter::all());
        assert_eq!(table.parse_filter("DisplayName,*"), Filter::all());
    }

    #[test]
    fn test_unknown_names_are_dropped() {
        let table = PropertyTable::new();
        let filter = table.parse_filter("DisplayName, Bogus ,Artist");

        let title = table.lookup("DisplayName").unwrap();
        let artist = table.lookup("Artist").unwrap();
        assert!(filter.mask.contains(title));
        assert!(filter.mask.contains(artist));
        assert!(!filter.mask.contains(table.lookup("Album").unwrap()));
        assert_eq!(filter.upnp, "dc:title,upnp:artist");
    }

    #[test]
    fn test_resource_attributes_pull_in_res() {
        let table = PropertyTable::new();
        let filter = table.parse_filter("Size,Duration,URLs");
        assert_eq!(filter.upnp, "res,res@size,res@duration");
    }

    #[test]
    fn test_device_properties_have_no_upnp_key() {
        let table = PropertyTable::new();
        let filter = table.parse_filter("FriendlyName");
        assert!(filter.mask.contains(table.lookup("FriendlyName").unwrap()));
        assert_eq!(filter.upnp, "");
    }

    #[test]
    fn test_for_interface() {
        let table = PropertyTable::new();
        let names: Vec<_> = table
            .for_interface(BusInterface::MediaContainer)
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["ChildCount", "Searchable"]);
    }
}
