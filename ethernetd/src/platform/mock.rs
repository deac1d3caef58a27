//! In-memory [`LinkManager`] for tests. Links are added and removed by
//! hand, and every mutation is recorded for later inspection.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{LinkInfo, LinkManager, PlatformError};
use crate::ipconfig::IpConfiguration;

/// A single recorded platform mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockAction {
    Apply {
        link: String,
        config: IpConfiguration,
    },
    Clear {
        link: String,
    },
    SetLink {
        link: String,
        up: bool,
    },
}

#[derive(Debug, Default)]
struct MockState {
    links: Vec<LinkInfo>,
    actions: Vec<MockAction>,
    failing: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MockLinkManager {
    state: Arc<Mutex<MockState>>,
}

impl MockLinkManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_link(&self, name: &str, mac: &str, up: bool) {
        let mut state = self.state.lock().unwrap();
        state.links.push(LinkInfo {
            name: name.to_string(),
            mac: Some(mac.to_string()),
            up,
            loopback: false,
        });
    }

    pub fn add_loopback(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.links.push(LinkInfo {
            name: name.to_string(),
            mac: None,
            up: true,
            loopback: true,
        });
    }

    pub fn remove_link(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.links.retain(|link| link.name != name);
    }

    pub fn set_carrier(&self, name: &str, up: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(link) = state.links.iter_mut().find(|link| link.name == name) {
            link.up = up;
        }
    }

    /// Makes every subsequent mutation of `name` fail.
    pub fn fail_operations_on(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.failing.insert(name.to_string());
    }

    pub fn actions(&self) -> Vec<MockAction> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn clear_actions(&self) {
        self.state.lock().unwrap().actions.clear();
    }

    /// Configurations applied to `name`, oldest first.
    pub fn applied_configs(&self, name: &str) -> Vec<IpConfiguration> {
        self.state
            .lock()
            .unwrap()
            .actions
            .iter()
            .filter_map(|action| match action {
                MockAction::Apply { link, config } if link == name => Some(config.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn cleared_links(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .actions
            .iter()
            .filter_map(|action| match action {
                MockAction::Clear { link } => Some(link.clone()),
                _ => None,
            })
            .collect()
    }

    fn check(&self, link: &str) -> Result<(), PlatformError> {
        let state = self.state.lock().unwrap();
        if state.failing.contains(link) {
            return Err(PlatformError::CommandFailed {
                command: format!("mock {}", link),
                stderr: "injected failure".to_string(),
            });
        }
        if !state.links.iter().any(|l| l.name == link) {
            return Err(PlatformError::NoSuchLink(link.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LinkManager for MockLinkManager {
    fn list_links(&self) -> Result<Vec<LinkInfo>, PlatformError> {
        Ok(self.state.lock().unwrap().links.clone())
    }

    async fn apply_configuration(
        &self,
        link: &str,
        config: &IpConfiguration,
    ) -> Result<(), PlatformError> {
        self.check(link)?;
        let mut state = self.state.lock().unwrap();
        state.actions.push(MockAction::Apply {
            link: link.to_string(),
            config: config.clone(),
        });
        Ok(())
    }

    async fn clear_configuration(&self, link: &str) -> Result<(), PlatformError> {
        self.check(link)?;
        let mut state = self.state.lock().unwrap();
        state.actions.push(MockAction::Clear {
            link: link.to_string(),
        });
        Ok(())
    }

    async fn set_link_up(&self, link: &str, up: bool) -> Result<(), PlatformError> {
        self.check(link)?;
        let mut state = self.state.lock().unwrap();
        state.actions.push(MockAction::SetLink {
            link: link.to_string(),
            up,
        });
        Ok(())
    }
}
