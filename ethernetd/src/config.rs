//! Daemon configuration, read from a KDL file.
//!
//! ```kdl
//! socket "/var/run/ethernetd.sock"
//! state-dir "/var/lib/ethernetd"
//! interface-regex "^(eth|en)\\d+$"
//! scan-interval 5
//!
//! feature "network-management"
//!
//! interface "eth0" {
//!     address "192.0.2.10/24" kind="static" gateway="192.0.2.1" {
//!         nameserver "192.0.2.53"
//!     }
//!     capability "internet"
//!     capability "trusted"
//! }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use knus;
use regex::Regex;
use thiserror::Error;

use crate::ipconfig::{
    IpConfiguration, NetworkCapabilities, StaticIpConfiguration,
};

pub const DEFAULT_INTERFACE_REGEX: &str = "^eth\\d+$";
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] knus::Error),
    #[error("invalid interface-regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("interface {iface}: invalid address {address:?}: {source}")]
    InvalidAddress {
        iface: String,
        address: String,
        #[source]
        source: ipnet::AddrParseError,
    },
    #[error("interface {iface}: invalid {field} {value:?}: {source}")]
    InvalidIpAddr {
        iface: String,
        field: &'static str,
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("interface {iface}: static address requires an address argument")]
    MissingStaticAddress { iface: String },
    #[error("interface {iface}: {message}")]
    InvalidCapability { iface: String, message: String },
    #[error("unknown feature {0:?}")]
    UnknownFeature(String),
    #[error("interface block without a name")]
    UnnamedInterface,
}

// Define types for knus parsing
#[derive(Debug, Default, knus::Decode)]
pub struct EthernetdConfig {
    #[knus(child, unwrap(argument))]
    pub socket: Option<String>,

    #[knus(child, unwrap(argument))]
    pub state_dir: Option<String>,

    #[knus(child, unwrap(argument))]
    pub interface_regex: Option<String>,

    /// Seconds between interface discovery scans.
    #[knus(child, unwrap(argument))]
    pub scan_interval: Option<u64>,

    #[knus(children(name = "feature"), unwrap(argument))]
    pub features: Vec<String>,

    #[knus(children(name = "interface"))]
    pub interfaces: Vec<Interface>,
}

#[derive(Debug, Default, knus::Decode)]
pub struct Interface {
    #[knus(argument)]
    pub name: Option<String>,

    #[knus(child)]
    pub address: Option<AddressObject>,

    #[knus(children(name = "capability"), unwrap(argument))]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Default, knus::Decode)]
pub struct AddressObject {
    #[knus(property)]
    pub kind: AddressKind,

    #[knus(argument)]
    pub address: Option<String>,

    #[knus(property)]
    pub gateway: Option<String>,

    #[knus(children(name = "nameserver"), unwrap(argument))]
    pub nameservers: Vec<String>,

    #[knus(property)]
    pub domain: Option<String>,
}

#[derive(knus::DecodeScalar, Debug, Default, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum AddressKind {
    #[default]
    Dhcp,
    Static,
}

// Parse config using knus
pub fn parse_config(path: &str, content: &str) -> Result<EthernetdConfig, knus::Error> {
    knus::parse(path, content)
}

/// A feature toggle the daemon can be built out with. Operations that
/// mutate interface networks are gated on [`Feature::NetworkManagement`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Feature {
    NetworkManagement,
}

/// The set of features enabled in the daemon configuration.
#[derive(Debug, Clone, Default)]
pub struct SystemFeatures(BTreeSet<Feature>);

impl SystemFeatures {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, feature: Feature) -> Self {
        self.0.insert(feature);
        self
    }

    pub fn has(&self, feature: Feature) -> bool {
        self.0.contains(&feature)
    }

    pub fn parse_names<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for name in names {
            let name = name.as_ref();
            let feature = name
                .parse::<Feature>()
                .map_err(|_| ConfigError::UnknownFeature(name.to_string()))?;
            set.insert(feature);
        }
        Ok(Self(set))
    }
}

/// Per-interface defaults from the configuration file, used for interfaces
/// that have no persisted state yet.
#[derive(Debug, Clone)]
pub struct InterfaceSeed {
    pub config: IpConfiguration,
    pub capabilities: NetworkCapabilities,
}

/// Fully resolved daemon settings: file values merged with defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub socket: String,
    pub state_dir: PathBuf,
    pub interface_regex: Regex,
    pub scan_interval: Duration,
    pub features: SystemFeatures,
    pub seeds: HashMap<String, InterfaceSeed>,
}

impl Settings {
    /// Reads and resolves the configuration file, or produces defaults when
    /// no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| {
                    ConfigError::Read {
                        path: path.to_path_buf(),
                        source,
                    }
                })?;
                parse_config(&path.display().to_string(), &content)?
            }
            None => EthernetdConfig::default(),
        };
        Self::from_config(config)
    }

    pub fn from_config(config: EthernetdConfig) -> Result<Self, ConfigError> {
        let pattern = config
            .interface_regex
            .unwrap_or_else(|| DEFAULT_INTERFACE_REGEX.to_string());
        let interface_regex =
            Regex::new(&pattern).map_err(|source| ConfigError::InvalidRegex {
                pattern: pattern.clone(),
                source,
            })?;

        let scan_interval = Duration::from_secs(
            config.scan_interval.unwrap_or(DEFAULT_SCAN_INTERVAL_SECS),
        );

        let features = SystemFeatures::parse_names(&config.features)?;

        let mut seeds = HashMap::new();
        for interface in config.interfaces {
            let name = interface.name.clone().ok_or(ConfigError::UnnamedInterface)?;
            let seed = interface_seed(&name, interface)?;
            seeds.insert(name, seed);
        }

        Ok(Self {
            socket: config.socket.unwrap_or_else(default_socket_path),
            state_dir: config
                .state_dir
                .map(PathBuf::from)
                .unwrap_or_else(default_state_dir),
            interface_regex,
            scan_interval,
            features,
            seeds,
        })
    }
}

fn interface_seed(name: &str, interface: Interface) -> Result<InterfaceSeed, ConfigError> {
    let config = match interface.address {
        None => IpConfiguration::dhcp(),
        Some(address) => match address.kind {
            AddressKind::Dhcp => IpConfiguration::dhcp(),
            AddressKind::Static => {
                let text = address.address.ok_or_else(|| {
                    ConfigError::MissingStaticAddress {
                        iface: name.to_string(),
                    }
                })?;
                let parsed = text.parse().map_err(|source| ConfigError::InvalidAddress {
                    iface: name.to_string(),
                    address: text.clone(),
                    source,
                })?;
                let mut static_config = StaticIpConfiguration::new(parsed);
                if let Some(gateway) = address.gateway {
                    static_config.gateway =
                        Some(gateway.parse().map_err(|source| ConfigError::InvalidIpAddr {
                            iface: name.to_string(),
                            field: "gateway",
                            value: gateway.clone(),
                            source,
                        })?);
                }
                for nameserver in address.nameservers {
                    static_config.dns_servers.push(nameserver.parse().map_err(
                        |source| ConfigError::InvalidIpAddr {
                            iface: name.to_string(),
                            field: "nameserver",
                            value: nameserver.clone(),
                            source,
                        },
                    )?);
                }
                static_config.domain = address.domain;
                IpConfiguration::statically_assigned(static_config)
            }
        },
    };

    let capabilities = NetworkCapabilities::parse_names(&interface.capabilities)
        .map_err(|message| ConfigError::InvalidCapability {
            iface: name.to_string(),
            message,
        })?;

    Ok(InterfaceSeed {
        config,
        capabilities,
    })
}

pub fn default_socket_path() -> String {
    #[cfg(target_os = "linux")]
    {
        // Prefer XDG_RUNTIME_DIR if set (usually /run/user/$UID)
        if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
            return format!("{}/ethernetd.sock", dir);
        }
        // Fallback to /run/user/$EUID
        let euid = unsafe { libc::geteuid() as u32 };
        if euid == 0 {
            "/var/run/ethernetd.sock".to_string()
        } else {
            format!("/run/user/{}/ethernetd.sock", euid)
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        "/var/run/ethernetd.sock".to_string()
    }
}

pub fn default_state_dir() -> PathBuf {
    let euid = unsafe { libc::geteuid() as u32 };
    if euid == 0 {
        // Root: store under /var
        PathBuf::from("/var/lib/ethernetd")
    } else {
        // Non-root: prefer XDG_STATE_HOME, then XDG_DATA_HOME, then ~/.local/state
        if let Ok(dir) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(dir).join("ethernetd");
        }
        if let Ok(dir) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(dir).join("ethernetd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/ethernetd");
        }
        // Last resort
        PathBuf::from("/tmp/ethernetd-state")
    }
}
