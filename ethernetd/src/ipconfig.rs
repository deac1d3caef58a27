//! Value types describing how an ethernet interface is addressed and what
//! it offers to the rest of the system.

use std::collections::BTreeSet;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IpConfigError {
    #[error("static assignment requires a static configuration block")]
    MissingStaticBlock,
    #[error("dhcp assignment must not carry a static configuration block")]
    UnexpectedStaticBlock,
}

/// How an interface obtains its address.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum IpAssignment {
    #[default]
    Dhcp,
    Static,
}

/// Addressing used when an interface is statically assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticIpConfiguration {
    /// Interface address with prefix length.
    pub address: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl StaticIpConfiguration {
    pub fn new(address: IpNet) -> Self {
        Self {
            address,
            gateway: None,
            dns_servers: Vec::new(),
            domain: None,
        }
    }
}

/// Complete IP configuration of one interface.
///
/// A DHCP configuration carries no static block; a static configuration
/// must carry one. [`IpConfiguration::validate`] checks that pairing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpConfiguration {
    pub assignment: IpAssignment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_config: Option<StaticIpConfiguration>,
}

impl IpConfiguration {
    pub fn dhcp() -> Self {
        Self {
            assignment: IpAssignment::Dhcp,
            static_config: None,
        }
    }

    pub fn statically_assigned(static_config: StaticIpConfiguration) -> Self {
        Self {
            assignment: IpAssignment::Static,
            static_config: Some(static_config),
        }
    }

    pub fn validate(&self) -> Result<(), IpConfigError> {
        match (self.assignment, &self.static_config) {
            (IpAssignment::Static, None) => Err(IpConfigError::MissingStaticBlock),
            (IpAssignment::Dhcp, Some(_)) => Err(IpConfigError::UnexpectedStaticBlock),
            _ => Ok(()),
        }
    }
}

/// A property an interface network offers, such as internet reachability.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Internet,
    NotMetered,
    Trusted,
    LowLatency,
}

/// Set of capabilities advertised for an interface network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkCapabilities(BTreeSet<Capability>);

impl NetworkCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses capability names as they appear in configuration files and
    /// on the wire, e.g. "internet" or "not-metered".
    pub fn parse_names<I, S>(names: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for name in names {
            let name = name.as_ref();
            let capability = name
                .parse::<Capability>()
                .map_err(|_| format!("unknown capability {:?}", name))?;
            set.insert(capability);
        }
        Ok(Self(set))
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|c| c.to_string()).collect()
    }
}

impl FromIterator<Capability> for NetworkCapabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// An interface update as submitted by a management client: the new IP
/// configuration together with the capabilities the resulting network
/// should advertise. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    ip_config: IpConfiguration,
    capabilities: NetworkCapabilities,
}

impl UpdateRequest {
    pub fn new(
        ip_config: IpConfiguration,
        capabilities: NetworkCapabilities,
    ) -> Result<Self, IpConfigError> {
        ip_config.validate()?;
        Ok(Self {
            ip_config,
            capabilities,
        })
    }

    pub fn ip_config(&self) -> &IpConfiguration {
        &self.ip_config
    }

    pub fn capabilities(&self) -> &NetworkCapabilities {
        &self.capabilities
    }

    pub fn into_parts(self) -> (IpConfiguration, NetworkCapabilities) {
        (self.ip_config, self.capabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sample_static() -> StaticIpConfiguration {
        StaticIpConfiguration {
            address: "192.0.2.10/24".parse().unwrap(),
            gateway: Some("192.0.2.1".parse().unwrap()),
            dns_servers: vec!["192.0.2.53".parse().unwrap()],
            domain: Some("example.org".to_string()),
        }
    }

    #[test]
    fn dhcp_configuration_validates() {
        assert!(IpConfiguration::dhcp().validate().is_ok());
    }

    #[test]
    fn static_without_block_is_rejected() {
        let config = IpConfiguration {
            assignment: IpAssignment::Static,
            static_config: None,
        };
        assert_matches!(config.validate(), Err(IpConfigError::MissingStaticBlock));
    }

    #[test]
    fn dhcp_with_static_block_is_rejected() {
        let config = IpConfiguration {
            assignment: IpAssignment::Dhcp,
            static_config: Some(sample_static()),
        };
        assert_matches!(config.validate(), Err(IpConfigError::UnexpectedStaticBlock));
    }

    #[test]
    fn update_request_rejects_invalid_config() {
        let config = IpConfiguration {
            assignment: IpAssignment::Static,
            static_config: None,
        };
        assert!(UpdateRequest::new(config, NetworkCapabilities::new()).is_err());
    }

    #[test]
    fn update_request_exposes_its_parts() {
        let config = IpConfiguration::statically_assigned(sample_static());
        let capabilities = NetworkCapabilities::parse_names(["internet", "trusted"]).unwrap();
        let request = UpdateRequest::new(config.clone(), capabilities.clone()).unwrap();
        assert_eq!(request.ip_config(), &config);
        assert_eq!(request.capabilities(), &capabilities);
    }

    #[test]
    fn capability_names_round_trip() {
        let capabilities =
            NetworkCapabilities::parse_names(["not-metered", "internet", "low-latency"]).unwrap();
        assert_eq!(
            capabilities.names(),
            vec!["internet", "not-metered", "low-latency"]
        );
    }

    #[test]
    fn unknown_capability_name_is_an_error() {
        let result = NetworkCapabilities::parse_names(["bogus"]);
        assert!(result.is_err());
    }

    #[test]
    fn configuration_survives_json() {
        let config = IpConfiguration::statically_assigned(sample_static());
        let text = serde_json::to_string(&config).unwrap();
        let back: IpConfiguration = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
