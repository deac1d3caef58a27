//! Access to the host's network links.
//!
//! [`LinkManager`] is the seam between the tracker and the operating
//! system. [`system::SystemLinkManager`] drives real links; tests use
//! [`mock::MockLinkManager`].

pub mod mock;
pub mod system;

use async_trait::async_trait;
use thiserror::Error;

use crate::ipconfig::IpConfiguration;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("listing network links: {0}")]
    ListLinks(#[source] nix::Error),
    #[error("spawning {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("link {0} does not exist")]
    NoSuchLink(String),
}

/// A snapshot of one network link as reported by the operating system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub name: String,
    pub mac: Option<String>,
    /// Carrier state.
    pub up: bool,
    pub loopback: bool,
}

impl LinkInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mac: None,
            up: false,
            loopback: false,
        }
    }
}

/// Operations the tracker needs from the platform.
#[async_trait]
pub trait LinkManager: Send + Sync {
    /// Lists the links currently present, loopbacks included.
    fn list_links(&self) -> Result<Vec<LinkInfo>, PlatformError>;

    /// Applies an IP configuration to a link, replacing whatever
    /// addressing it had.
    async fn apply_configuration(
        &self,
        link: &str,
        config: &IpConfiguration,
    ) -> Result<(), PlatformError>;

    /// Removes all addresses from a link.
    async fn clear_configuration(&self, link: &str) -> Result<(), PlatformError>;

    /// Changes the administrative state of a link.
    async fn set_link_up(&self, link: &str, up: bool) -> Result<(), PlatformError>;
}
