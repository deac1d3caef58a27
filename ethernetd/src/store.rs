//! Durable storage for per-interface IP configurations.
//!
//! Configurations survive daemon restarts and interface departures: an
//! interface that disappears keeps its saved entry and picks it up again
//! when it returns.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ipconfig::{IpConfiguration, NetworkCapabilities};
use crate::Result;

const STORE_FILE: &str = "interfaces.json";

/// One saved interface entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredInterface {
    pub ip_config: IpConfiguration,
    #[serde(default)]
    pub capabilities: NetworkCapabilities,
    pub updated_at: DateTime<Utc>,
}

impl StoredInterface {
    pub fn new(ip_config: IpConfiguration, capabilities: NetworkCapabilities) -> Self {
        Self {
            ip_config,
            capabilities,
            updated_at: Utc::now(),
        }
    }
}

/// JSON-backed store, one file for all interfaces.
#[derive(Debug)]
pub struct IpConfigStore {
    path: PathBuf,
}

impl IpConfigStore {
    /// Opens the store rooted at `state_dir`, creating the directory if
    /// needed.
    pub fn new(state_dir: impl AsRef<Path>) -> Result<Self> {
        let state_dir = state_dir.as_ref();
        std::fs::create_dir_all(state_dir)?;
        Ok(Self {
            path: state_dir.join(STORE_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads all saved entries. A missing file is an empty store; a file
    /// that exists but cannot be read or parsed is an error.
    pub fn load(&self) -> Result<HashMap<String, StoredInterface>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let entries = serde_json::from_str(&content)?;
        Ok(entries)
    }

    /// Replaces the store contents. The new file is written to a temporary
    /// path and renamed into place so readers never observe a partial file.
    pub fn save(&self, entries: &HashMap<String, StoredInterface>) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            use std::io::Write as _;
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), entries = entries.len(), "saved interface store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipconfig::{Capability, StaticIpConfiguration};
    use tempfile::TempDir;

    fn sample_entry() -> StoredInterface {
        let static_config = StaticIpConfiguration {
            address: "192.0.2.10/24".parse().unwrap(),
            gateway: Some("192.0.2.1".parse().unwrap()),
            dns_servers: vec![],
            domain: None,
        };
        StoredInterface::new(
            IpConfiguration::statically_assigned(static_config),
            [Capability::Internet].into_iter().collect(),
        )
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = IpConfigStore::new(dir.path()).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = IpConfigStore::new(dir.path()).unwrap();

        let mut entries = HashMap::new();
        entries.insert("eth0".to_string(), sample_entry());
        store.save(&entries).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, entries);
    }

    #[test]
    fn save_replaces_previous_contents() {
        let dir = TempDir::new().unwrap();
        let store = IpConfigStore::new(dir.path()).unwrap();

        let mut entries = HashMap::new();
        entries.insert("eth0".to_string(), sample_entry());
        store.save(&entries).unwrap();

        entries.remove("eth0");
        entries.insert(
            "eth1".to_string(),
            StoredInterface::new(IpConfiguration::dhcp(), NetworkCapabilities::new()),
        );
        store.save(&entries).unwrap();

        let loaded = store.load().unwrap();
        assert!(!loaded.contains_key("eth0"));
        assert_eq!(loaded.get("eth1").unwrap().ip_config, IpConfiguration::dhcp());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = IpConfigStore::new(dir.path()).unwrap();
        std::fs::write(store.path(), "not json").unwrap();
        assert!(store.load().is_err());
    }

    #[test]
    fn store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = IpConfigStore::new(dir.path()).unwrap();
            let mut entries = HashMap::new();
            entries.insert("eth3".to_string(), sample_entry());
            store.save(&entries).unwrap();
        }
        let store = IpConfigStore::new(dir.path()).unwrap();
        let loaded = store.load().unwrap();
        assert!(loaded.contains_key("eth3"));
    }
}
