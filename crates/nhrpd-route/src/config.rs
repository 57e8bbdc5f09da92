//! Configuration file support for nhrp-routed
//!
//! Loads and validates the daemon configuration from TOML.
//! Default location: /etc/frr/nhrp-routed.toml

use crate::error::{NhrpRouteError, Result};
use crate::interface::{Interface, InterfaceTable};
use crate::types::{IfIndex, IFINDEX_INTERNAL};
use nhrp_types::{AddressFamily, IpPrefix};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/frr/nhrp-routed.toml";

/// Connection to the RIB manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZebraConfig {
    /// zserv unix socket
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Delay before reconnecting after the session drops, in seconds
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,

    /// Protocol instance announced in the hello
    #[serde(default)]
    pub instance: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter level, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// One NHRP interface seeded into the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    pub ifindex: IfIndex,

    /// Connected addresses with prefix length, e.g. "2001:db8::1/64"
    #[serde(default)]
    pub addresses: Vec<String>,

    #[serde(default)]
    pub ipv4_network_id: u32,

    #[serde(default)]
    pub ipv6_network_id: u32,

    /// Whether the NBMA address slots are administratively configured
    #[serde(default)]
    pub nbma_configured: bool,
}

impl InterfaceConfig {
    fn parse_addresses(&self) -> Result<Vec<IpPrefix>> {
        self.addresses
            .iter()
            .map(|a| {
                a.parse().map_err(|e| {
                    NhrpRouteError::Config(format!("interface {}: bad address {a}: {e}", self.name))
                })
            })
            .collect()
    }

    /// Registry entry for this interface.
    pub fn to_interface(&self) -> Result<Interface> {
        let mut iface = Interface::new(self.name.clone(), self.ifindex)
            .with_network_id(AddressFamily::Ipv4, self.ipv4_network_id)
            .with_network_id(AddressFamily::Ipv6, self.ipv6_network_id);
        iface.connected = self.parse_addresses()?;
        for family in AddressFamily::ALL {
            iface.afi_mut(family).configured = self.nbma_configured;
        }
        Ok(iface)
    }
}

/// Complete nhrp-routed configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedConfig {
    #[serde(default)]
    pub zebra: ZebraConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default, rename = "interface")]
    pub interfaces: Vec<InterfaceConfig>,
}

fn default_socket_path() -> String {
    "/var/run/frr/zserv.api".to_string()
}

fn default_reconnect_interval() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ZebraConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            reconnect_interval_secs: default_reconnect_interval(),
            instance: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RoutedConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| {
                NhrpRouteError::Config(format!("Failed to parse {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(NhrpRouteError::Io(e)),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| NhrpRouteError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| NhrpRouteError::Config(format!("Failed to serialize config: {e}")))
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.zebra.reconnect_interval_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.zebra.socket_path.is_empty() {
            return Err(NhrpRouteError::Config(
                "socket_path must not be empty".to_string(),
            ));
        }

        if self.zebra.reconnect_interval_secs == 0 {
            return Err(NhrpRouteError::Config(
                "reconnect_interval_secs must be > 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for iface in &self.interfaces {
            if iface.ifindex == IFINDEX_INTERNAL {
                return Err(NhrpRouteError::Config(format!(
                    "interface {}: ifindex must be > 0",
                    iface.name
                )));
            }
            if !seen.insert(iface.ifindex) {
                return Err(NhrpRouteError::Config(format!(
                    "interface {}: duplicate ifindex {}",
                    iface.name, iface.ifindex
                )));
            }
            iface.parse_addresses()?;
        }

        Ok(())
    }

    /// Interface registry seeded from the `[[interface]]` entries.
    pub fn interface_table(&self) -> Result<InterfaceTable> {
        let mut table = InterfaceTable::new();
        for iface in &self.interfaces {
            table.insert(iface.to_interface()?);
        }
        Ok(table)
    }
}
