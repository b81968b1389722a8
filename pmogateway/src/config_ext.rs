//! Gateway settings stored in pmoconfig.
//!
//! Follows the extension-trait pattern used by the other pmo crates: the
//! getters never fail on a missing or malformed value, they fall back to the
//! defaults below.

use anyhow::Result;
use pmoconfig::Config;
use serde_yaml::Value;

pub const DEFAULT_PATH_PREFIX: &str = "/com/pmomusic/MediaGateway/server";
pub const DEFAULT_DEVICE_TYPE: &str = "urn:schemas-upnp-org:device:MediaServer:1";
pub const DEFAULT_BROWSE_PAGE_SIZE: u32 = 0;

pub trait GatewayConfigExt {
    /// Bus path under which devices are published
    /// (default: `/com/pmomusic/MediaGateway/server`).
    fn get_gateway_path_prefix(&self) -> Result<String>;
    fn set_gateway_path_prefix(&self, prefix: String) -> Result<()>;

    /// Device type searched for on the network.
    fn get_gateway_device_type(&self) -> Result<String>;
    fn set_gateway_device_type(&self, device_type: String) -> Result<()>;

    /// Objects requested per `Browse`/`Search` call, 0 for no paging.
    fn get_gateway_browse_page_size(&self) -> Result<u32>;
    fn set_gateway_browse_page_size(&self, size: u32) -> Result<()>;
}

impl GatewayConfigExt for Config {
    fn get_gateway_path_prefix(&self) -> Result<String> {
        match self.get_value(&["gateway", "path_prefix"]) {
            Ok(Value::String(s)) if s.starts_with('/') => Ok(s.trim_end_matches('/').to_string()),
            _ => Ok(DEFAULT_PATH_PREFIX.to_string()),
        }
    }

    fn set_gateway_path_prefix(&self, prefix: String) -> Result<()> {
        self.set_value(&["gateway", "path_prefix"], Value::String(prefix))
    }

    fn get_gateway_device_type(&self) -> Result<String> {
        match self.get_value(&["gateway", "device_type"]) {
            Ok(Value::String(s)) if !s.is_empty() => Ok(s),
            _ => Ok(DEFAULT_DEVICE_TYPE.to_string()),
        }
    }

    fn set_gateway_device_type(&self, device_type: String) -> Result<()> {
        self.set_value(&["gateway", "device_type"], Value::String(device_type))
    }

    fn get_gateway_browse_page_size(&self) -> Result<u32> {
        match self.get_value(&["gateway", "browse_page_size"]) {
            Ok(Value::Number(n)) => Ok(n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(DEFAULT_BROWSE_PAGE_SIZE)),
            _ => Ok(DEFAULT_BROWSE_PAGE_SIZE),
        }
    }

    fn set_gateway_browse_page_size(&self, size: u32) -> Result<()> {
        self.set_value(
            &["gateway", "browse_page_size"],
            Value::Number(serde_yaml::Number::from(size)),
        )
    }
}

/// Gateway settings resolved once at start-up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewaySettings {
    pub path_prefix: String,
    pub device_type: String,
    pub browse_page_size: u32,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            path_prefix: DEFAULT_PATH_PREFIX.to_string(),
            device_type: DEFAULT_DEVICE_TYPE.to_string(),
            browse_page_size: DEFAULT_BROWSE_PAGE_SIZE,
        }
    }
}

impl GatewaySettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            path_prefix: config.get_gateway_path_prefix()?,
            device_type: config.get_gateway_device_type()?,
            browse_page_size: config.get_gateway_browse_page_size()?,
        })
    }
}

/// Logger settings of the `host.logger` section, for binaries installing a
/// subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub min_level: String,
    pub enable_console: bool,
}

impl LogSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            min_level: config.get_log_min_level()?,
            enable_console: config.get_log_enable_console()?,
        })
    }

    /// `EnvFilter` directive for `min_level`. Unknown levels let everything
    /// through.
    pub fn filter_directive(&self) -> &'static str {
        match self.min_level.trim().to_uppercase().as_str() {
            "ERROR" => "error",
            "WARN" => "warn",
            "INFO" => "info",
            "DEBUG" => "debug",
            _ => "trace",
        }
    }
}
