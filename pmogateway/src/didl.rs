//! DIDL-Lite payloads returned by `Browse`/`Search`, and their mapping to
//! bus property maps.

use serde_json::Value;
use xmltree::{Element, XMLNode};

use crate::backend::PropertyMap;
use crate::capabilities::BusInterface;
use crate::errors::GatewayError;
use crate::path::PathScheme;
use crate::props::{PROPERTIES, PropertyDescriptor, PropertyMask};
use crate::registry::DeviceDescription;
use crate::search::TYPE_CLASSES;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DidlResource {
    pub uri: String,
    pub protocol_info: String,
    pub size: Option<i64>,
    pub duration: Option<String>,
    pub bitrate: Option<i64>,
    pub sample_frequency: Option<i64>,
    pub bits_per_sample: Option<i64>,
    pub resolution: Option<String>,
}

impl DidlResource {
    fn protocol_field(&self, index: usize) -> Option<&str> {
        self.protocol_info.split(':').nth(index)
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.protocol_field(2).filter(|m| !m.is_empty() && *m != "*")
    }

    pub fn dlna_profile(&self) -> Option<&str> {
        self.protocol_field(3)?
            .split(';')
            .find_map(|param| param.strip_prefix("DLNA.ORG_PN="))
    }

    /// Duration in whole seconds, from `H+:MM:SS[.F+]`.
    pub fn duration_seconds(&self) -> Option<i64> {
        let duration = self.duration.as_deref()?;
        let mut parts = duration.split(':');
        let hours: i64 = parts.next()?.trim().parse().ok()?;
        let minutes: i64 = parts.next()?.trim().parse().ok()?;
        let seconds: f64 = parts.next()?.trim().parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        if !seconds.is_finite() || seconds < 0.0 {
            return None;
        }
        hours
            .checked_mul(3600)?
            .checked_add(minutes.checked_mul(60)?)?
            .checked_add(seconds as i64)
    }

    /// `(width, height)` from `WxH`.
    pub fn dimensions(&self) -> Option<(i64, i64)> {
        let (w, h) = self.resolution.as_deref()?.split_once('x')?;
        Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
    }

    /// Whether this resource matches one of the comma-separated
    /// `protocol:network:mime:extra` entries a client accepts. An empty list
    /// accepts everything.
    pub fn is_compatible(&self, accepted: &str) -> bool {
        let accepted = accepted.trim();
        if accepted.is_empty() || accepted == "*" {
            return true;
        }

        let mine: Vec<&str> = self.protocol_info.split(':').collect();
        accepted.split(',').map(str::trim).any(|entry| {
            let theirs: Vec<&str> = entry.split(':').collect();
            (0..3).all(|i| {
                let want = theirs.get(i).copied().unwrap_or("*");
                let have = mine.get(i).copied().unwrap_or("");
                field_matches(want, have, i == 2)
            })
        })
    }
}

fn field_matches(want: &str, have: &str, is_mime: bool) -> bool {
    if want == "*" || want.eq_ignore_ascii_case(have) {
        return true;
    }
    if is_mime {
        if let Some(major) = want.strip_suffix("/*") {
            return have
                .split_once('/')
                .is_some_and(|(m, _)| m.eq_ignore_ascii_case(major));
        }
    }
    false
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DidlObject {
    pub id: String,
    pub parent_id: String,
    pub is_container: bool,
    pub title: String,
    pub class: String,
    pub child_count: Option<i64>,
    pub searchable: bool,
    pub creator: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub date: Option<String>,
    pub genre: Option<String>,
    pub track_number: Option<i64>,
    pub album_art: Option<String>,
    pub resources: Vec<DidlResource>,
}

fn children<'a>(elem: &'a Element) -> impl Iterator<Item = &'a Element> {
    elem.children.iter().filter_map(|node| match node {
        XMLNode::Element(child) => Some(child),
        _ => None,
    })
}

fn child_text(elem: &Element, name: &str) -> Option<String> {
    children(elem)
        .find(|child| child.name == name)
        .and_then(|child| child.get_text())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn attr_i64(elem: &Element, name: &str) -> Option<i64> {
    elem.attributes.get(name).and_then(|v| v.trim().parse().ok())
}

fn parse_resource(elem: &Element) -> DidlResource {
    DidlResource {
        uri: elem
            .get_text()
            .map(|t| t.trim().to_string())
            .unwrap_or_default(),
        protocol_info: elem.attributes.get("protocolInfo").cloned().unwrap_or_default(),
        size: attr_i64(elem, "size"),
        duration: elem.attributes.get("duration").cloned(),
        bitrate: attr_i64(elem, "bitrate"),
        sample_frequency: attr_i64(elem, "sampleFrequency"),
        bits_per_sample: attr_i64(elem, "bitsPerSample"),
        resolution: elem.attributes.get("resolution").cloned(),
    }
}

fn parse_object(elem: &Element, is_container: bool) -> Result<DidlObject, GatewayError> {
    let id = elem
        .attributes
        .get("id")
        .cloned()
        .ok_or_else(|| GatewayError::Didl(format!("<{}> without id", elem.name)))?;

    Ok(DidlObject {
        id,
        parent_id: elem.attributes.get("parentID").cloned().unwrap_or_default(),
        is_container,
        title: child_text(elem, "title").unwrap_or_default(),
        class: child_text(elem, "class").unwrap_or_default(),
        child_count: attr_i64(elem, "childCount"),
        searchable: elem
            .attributes
            .get("searchable")
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
        creator: child_text(elem, "creator"),
        artist: child_text(elem, "artist"),
        album: child_text(elem, "album"),
        date: child_text(elem, "date"),
        genre: child_text(elem, "genre"),
        track_number: child_text(elem, "originalTrackNumber").and_then(|n| n.parse().ok()),
        album_art: child_text(elem, "albumArtURI"),
        resources: children(elem)
            .filter(|child| child.name == "res")
            .map(parse_resource)
            .filter(|res| !res.uri.is_empty())
            .collect(),
    })
}

/// Parses a DIDL-Lite document into its containers and items, in document
/// order.
pub fn parse_didl(xml: &str) -> Result<Vec<DidlObject>, GatewayError> {
    let trimmed = xml.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = std::io::Cursor::new(trimmed.as_bytes());
    let root = Element::parse(&mut reader)
        .map_err(|err| GatewayError::Didl(format!("Failed to parse DIDL-Lite payload: {}", err)))?;

    children(&root)
        .filter_map(|elem| match elem.name.as_str() {
            "container" => Some(parse_object(elem, true)),
            "item" => Some(parse_object(elem, false)),
            _ => None,
        })
        .collect()
}

/// Bus `Type` of a UPnP class: the most specific known class it derives
/// from.
pub fn bus_type(class: &str, is_container: bool) -> &'static str {
    TYPE_CLASSES
        .iter()
        .filter(|(_, upnp)| class == *upnp || class.starts_with(&format!("{}.", upnp)))
        .max_by_key(|(_, upnp)| upnp.len())
        .map(|(ty, _)| *ty)
        .unwrap_or(if is_container { "container" } else { "item" })
}

/// Where an object sits on the bus.
#[derive(Clone, Copy, Debug)]
pub struct ObjectLocation<'a> {
    pub scheme: &'a PathScheme,
    pub root_path: &'a str,
}

impl ObjectLocation<'_> {
    fn path_of(&self, id: &str) -> String {
        // The root container reports a parent of "-1".
        if id == "-1" || id.is_empty() {
            self.root_path.to_string()
        } else {
            self.scheme.object_path(self.root_path, id)
        }
    }
}

impl DidlObject {
    /// First resource the client can play, if any.
    pub fn select_resource(&self, protocol_info: &str) -> Option<&DidlResource> {
        self.resources.iter().find(|res| res.is_compatible(protocol_info))
    }

    fn exposes(&self, prop: &PropertyDescriptor) -> bool {
        match prop.interface {
            BusInterface::MediaObject => true,
            BusInterface::MediaContainer => self.is_container,
            BusInterface::MediaItem => !self.is_container,
            _ => false,
        }
    }

    fn value_of(
        &self,
        prop: &PropertyDescriptor,
        location: ObjectLocation<'_>,
        protocol_info: &str,
    ) -> Option<Value> {
        let res = self.select_resource(protocol_info);
        let text = |s: &Option<String>| s.clone().map(Value::from);

        match prop.name {
            "Parent" => Some(location.path_of(&self.parent_id).into()),
            "Path" => Some(location.path_of(&self.id).into()),
            "Type" => Some(bus_type(&self.class, self.is_container).into()),
            "DisplayName" => Some(self.title.clone().into()),
            "ChildCount" => self.child_count.map(Value::from),
            "Searchable" => Some(self.searchable.into()),
            "Creator" => text(&self.creator),
            "Artist" => text(&self.artist),
            "Album" => text(&self.album),
            "Date" => text(&self.date),
            "Genre" => text(&self.genre),
            "TrackNumber" => self.track_number.map(Value::from),
            "AlbumArtURL" => text(&self.album_art),
            "URLs" => {
                let urls: Vec<Value> = self
                    .resources
                    .iter()
                    .filter(|r| r.is_compatible(protocol_info))
                    .map(|r| Value::from(r.uri.clone()))
                    .collect();
                (!urls.is_empty()).then_some(Value::Array(urls))
            }
            _ => resource_value(prop, res?),
        }
    }

    /// Bus properties of this object selected by `mask`. Properties the
    /// device did not report are left out.
    pub fn to_properties(
        &self,
        location: ObjectLocation<'_>,
        mask: PropertyMask,
        protocol_info: &str,
    ) -> PropertyMap {
        let mut map = PropertyMap::new();
        for prop in PROPERTIES {
            if !mask.contains(prop) || !self.exposes(prop) {
                continue;
            }
            if let Some(value) = self.value_of(prop, location, protocol_info) {
                map.insert(prop.name.to_string(), value);
            }
        }
        map
    }

    /// One bus property, or `None` if the object does not carry it.
    pub fn property(
        &self,
        prop: &PropertyDescriptor,
        location: ObjectLocation<'_>,
        protocol_info: &str,
    ) -> Option<Value> {
        if !self.exposes(prop) {
            return None;
        }
        self.value_of(prop, location, protocol_info)
    }

    /// Description of the selected resource, restricted to `mask`.
    pub fn resource_properties(&self, res: &DidlResource, mask: PropertyMask) -> PropertyMap {
        let mut map = PropertyMap::new();
        for prop in PROPERTIES.iter().filter(|p| p.upnp.is_some_and(|k| k.starts_with("res"))) {
            if !mask.contains(prop) {
                continue;
            }
            let value = match prop.name {
                "URLs" => Some(Value::from(res.uri.clone())),
                _ => resource_value(prop, res),
            };
            if let Some(value) = value {
                map.insert(prop.name.to_string(), value);
            }
        }
        map
    }
}

fn resource_value(prop: &PropertyDescriptor, res: &DidlResource) -> Option<Value> {
    match prop.name {
        "MIMEType" => res.mime_type().map(Value::from),
        "DLNAProfile" => res.dlna_profile().map(Value::from),
        "Size" => res.size.map(Value::from),
        "Duration" => res.duration_seconds().map(Value::from),
        "Bitrate" => res.bitrate.map(Value::from),
        "SampleRate" => res.sample_frequency.map(Value::from),
        "BitsPerSample" => res.bits_per_sample.map(Value::from),
        "Width" => res.dimensions().map(|(w, _)| Value::from(w)),
        "Height" => res.dimensions().map(|(_, h)| Value::from(h)),
        _ => None,
    }
}

/// MediaDevice properties of a device, restricted to `mask`.
pub fn device_properties(description: &DeviceDescription, mask: PropertyMask) -> PropertyMap {
    let mut map = PropertyMap::new();
    for prop in PROPERTIES.iter().filter(|p| p.interface == BusInterface::MediaDevice) {
        if mask.contains(prop) {
            if let Some(value) = device_property(description, prop) {
                map.insert(prop.name.to_string(), value);
            }
        }
    }
    map
}

pub fn device_property(description: &DeviceDescription, prop: &PropertyDescriptor) -> Option<Value> {
    let value = match prop.name {
        "UDN" => &description.udn,
        "DeviceType" => &description.device_type,
        "FriendlyName" => &description.friendly_name,
        "Manufacturer" => &description.manufacturer,
        "ModelName" => &description.model_name,
        "Location" => &description.location,
        _ => return None,
    };
    Some(Value::from(value.clone()))
}
