//! Bus object path scheme.
//!
//! Devices live at `<prefix>/<serial>`; their objects at
//! `<prefix>/<serial>/<escaped item id>`. The device path itself stands for
//! the root container, whose ContentDirectory id is [`ROOT_OBJECT_ID`].
//!
//! Bus paths only allow `[A-Za-z0-9_]` in an element, so item ids are
//! escaped byte-wise: every byte outside `[A-Za-z0-9]` becomes `_xx`.

use crate::errors::GatewayError;

/// ContentDirectory id of a device's top-level container.
pub const ROOT_OBJECT_ID: &str = "0";

/// An object path split into its device part and its item part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectRef {
    pub root_path: String,
    pub item_id: String,
}

impl ObjectRef {
    pub fn is_root(&self) -> bool {
        self.item_id == ROOT_OBJECT_ID
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathScheme {
    prefix: String,
}

impl PathScheme {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_end_matches('/').to_string();
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Path of the `serial`-th device ever discovered.
    pub fn device_path(&self, serial: u64) -> String {
        format!("{}/{}", self.prefix, serial)
    }

    /// Path exposing `item_id` under the device rooted at `root_path`.
    pub fn object_path(&self, root_path: &str, item_id: &str) -> String {
        if item_id == ROOT_OBJECT_ID {
            root_path.to_string()
        } else {
            format!("{}/{}", root_path, escape_id(item_id))
        }
    }

    /// Returns the part of `path` below the prefix, if `path` is under it.
    fn relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        path.strip_prefix(self.prefix.as_str())?
            .strip_prefix('/')
            .filter(|rest| !rest.is_empty())
    }

    /// Splits `path` into the device root path and the item id.
    pub fn split(&self, path: &str) -> Result<ObjectRef, GatewayError> {
        let not_found = || GatewayError::ObjectNotFound(format!("Invalid object path {}", path));

        let relative = self.relative(path).ok_or_else(not_found)?;
        let (device, item) = match relative.split_once('/') {
            Some((device, item)) => (device, Some(item)),
            None => (relative, None),
        };

        if device.is_empty() {
            return Err(not_found());
        }

        let root_path = format!("{}/{}", self.prefix, device);
        let item_id = match item {
            None => ROOT_OBJECT_ID.to_string(),
            Some(item) if item.is_empty() || item.contains('/') => return Err(not_found()),
            Some(item) => unescape_id(item).ok_or_else(not_found)?,
        };

        Ok(ObjectRef { root_path, item_id })
    }

    /// True when `path` names a device (root container) rather than one of
    /// its descendants. Paths outside the prefix are not roots.
    pub fn is_root_object(&self, path: &str) -> bool {
        match self.relative(path) {
            Some(relative) => !relative.contains('/'),
            None => false,
        }
    }
}

/// Escapes a ContentDirectory id into a single bus path element.
pub fn escape_id(id: &str) -> String {
    let mut escaped = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("_{:02x}", byte));
        }
    }
    escaped
}

/// Reverses [`escape_id`]. Returns `None` on malformed escapes.
pub fn unescape_id(element: &str) -> Option<String> {
    let bytes = element.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                let hex = element.get(i + 1..i + 3)?;
                decoded.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b if b.is_ascii_alphanumeric() => {
                decoded.push(b);
                i += 1;
            }
            _ => return None,
        }
    }

    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme() -> PathScheme {
        PathScheme::new("/dev")
    }

    #[test]
    fn test_split_item_path() {
        let obj = scheme().split("/dev/1/7").unwrap();
        assert_eq!(obj.root_path, "/dev/1");
        assert_eq!(obj.item_id, "7");
        assert!(!obj.is_root());
    }

    #[test]
    fn test_split_device_path_is_root_container() {
        let obj = scheme().split("/dev/1").unwrap();
        assert_eq!(obj.root_path, "/dev/1");
        assert_eq!(obj.item_id, ROOT_OBJECT_ID);
        assert!(obj.is_root());
    }

    #[test]
    fn test_split_rejects_foreign_and_malformed_paths() {
        let s = scheme();
        assert!(matches!(s.split("/other/1"), Err(GatewayError::ObjectNotFound(_))));
        assert!(s.split("/dev").is_err());
        assert!(s.split("/dev/").is_err());
        assert!(s.split("/dev/1/").is_err());
        assert!(s.split("/dev/1/7/8").is_err());
        assert!(s.split("/dev/1/_zz").is_err());
        assert!(s.split("/device/1").is_err());
    }

    #[test]
    fn test_escape_roundtrip_for_awkward_ids() {
        let id = "64$1/2 é";
        let escaped = escape_id(id);
        assert!(escaped.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'));
        assert_eq!(unescape_id(&escaped).as_deref(), Some(id));

        let path = scheme().object_path("/dev/3", id);
        assert_eq!(scheme().split(&path).unwrap().item_id, id);
    }

    #[test]
    fn test_object_path_of_root_is_device_path() {
        assert_eq!(scheme().object_path("/dev/2", "0"), "/dev/2");
        assert_eq!(scheme().object_path("/dev/2", "7"), "/dev/2/7");
    }

    #[test]
    fn test_is_root_object() {
        let s = scheme();
        assert!(s.is_root_object("/dev/1"));
        assert!(!s.is_root_object("/dev/1/7"));
        assert!(!s.is_root_object("/elsewhere"));
    }

    #[test]
    fn test_trailing_slash_in_prefix_is_ignored() {
        let s = PathScheme::new("/dev/");
        assert_eq!(s.device_path(4), "/dev/4");
    }
}
