//! [`LinkManager`] backed by the running kernel: link enumeration via
//! getifaddrs(3) and mutation via ip(8).

use std::collections::BTreeMap;

use async_trait::async_trait;
use nix::net::if_::InterfaceFlags;
use tokio::process::Command;
use tracing::debug;

use super::{LinkInfo, LinkManager, PlatformError};
use crate::ipconfig::{IpAssignment, IpConfiguration};

#[derive(Debug, Default)]
pub struct SystemLinkManager;

impl SystemLinkManager {
    pub fn new() -> Self {
        Self
    }

    async fn run_ip(&self, args: &[&str]) -> Result<(), PlatformError> {
        let command = format!("ip {}", args.join(" "));
        debug!("exec: {}", command);
        let mut cmd = Command::new("ip");
        cmd.env_remove("LANG");
        cmd.env_remove("LC_ALL");
        cmd.env_remove("LC_MESSAGES");
        cmd.args(args);
        let output = cmd.output().await.map_err(|source| PlatformError::Spawn {
            command: command.clone(),
            source,
        })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(PlatformError::CommandFailed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl LinkManager for SystemLinkManager {
    fn list_links(&self) -> Result<Vec<LinkInfo>, PlatformError> {
        let addrs = nix::ifaddrs::getifaddrs().map_err(PlatformError::ListLinks)?;
        // getifaddrs reports one entry per address family; fold them into
        // one LinkInfo per interface.
        let mut links: BTreeMap<String, LinkInfo> = BTreeMap::new();
        for ifaddr in addrs {
            let entry = links
                .entry(ifaddr.interface_name.clone())
                .or_insert_with(|| LinkInfo::new(&ifaddr.interface_name));
            entry.up = ifaddr.flags.contains(InterfaceFlags::IFF_RUNNING);
            entry.loopback = ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK);
            if entry.mac.is_none() {
                if let Some(mac) = ifaddr
                    .address
                    .as_ref()
                    .and_then(|addr| addr.as_link_addr())
                    .and_then(|link| link.addr())
                {
                    entry.mac = Some(format_mac(&mac));
                }
            }
        }
        Ok(links.into_values().collect())
    }

    async fn apply_configuration(
        &self,
        link: &str,
        config: &IpConfiguration,
    ) -> Result<(), PlatformError> {
        self.run_ip(&["addr", "flush", "dev", link]).await?;
        match config.assignment {
            // Flushing is enough for DHCP; addressing is handed over to
            // the host's DHCP agent.
            IpAssignment::Dhcp => Ok(()),
            IpAssignment::Static => {
                let static_config = config
                    .static_config
                    .as_ref()
                    .ok_or_else(|| PlatformError::CommandFailed {
                        command: format!("ip addr add dev {}", link),
                        stderr: "static assignment without a static block".to_string(),
                    })?;
                let address = static_config.address.to_string();
                self.run_ip(&["addr", "add", &address, "dev", link]).await?;
                if let Some(gateway) = &static_config.gateway {
                    let gateway = gateway.to_string();
                    self.run_ip(&["route", "replace", "default", "via", &gateway, "dev", link])
                        .await?;
                }
                Ok(())
            }
        }
    }

    async fn clear_configuration(&self, link: &str) -> Result<(), PlatformError> {
        self.run_ip(&["addr", "flush", "dev", link]).await
    }

    async fn set_link_up(&self, link: &str, up: bool) -> Result<(), PlatformError> {
        let state = if up { "up" } else { "down" };
        self.run_ip(&["link", "set", "dev", link, state]).await
    }
}

fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_formats_as_colon_separated_hex() {
        assert_eq!(
            format_mac(&[0x52, 0x54, 0x00, 0x12, 0x34, 0x56]),
            "52:54:00:12:34:56"
        );
    }

    #[test]
    fn mac_pads_low_bytes() {
        assert_eq!(format_mac(&[0, 1, 2, 3, 4, 5]), "00:01:02:03:04:05");
    }
}
