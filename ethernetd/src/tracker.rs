//! Interface tracking and provisioning.
//!
//! The tracker discovers ethernet links matching the configured name
//! pattern, remembers an IP configuration and capability set for each,
//! and applies or clears that configuration through a [`LinkManager`].
//!
//! Mutations never touch the platform inline. Each operation gets a
//! fresh id, is queued to a single worker task and reported back twice:
//! through the per-call completion listener, when the caller passed one,
//! and as an [`InterfaceEvent::OperationCompleted`] on the event bus.
//! One worker means platform mutations are applied strictly in the
//! order they were accepted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::InterfaceSeed;
use crate::ipconfig::{IpConfiguration, NetworkCapabilities};
use crate::platform::{LinkInfo, LinkManager};
use crate::store::{IpConfigStore, StoredInterface};

/// Where an interface stands in its provisioning lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ProvisioningState {
    /// Tracked, nothing applied.
    Idle,
    /// A queued operation is currently touching the link.
    Applying,
    /// The stored configuration is applied.
    Active,
    /// The most recent operation failed.
    Failed,
}

/// The kind of queued operation, as reported in outcomes and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum OperationKind {
    UpdateConfiguration,
    SetConfiguration,
    Connect,
    Disconnect,
}

/// Terminal report for one queued operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub id: Uuid,
    pub iface: String,
    pub kind: OperationKind,
    pub result: Result<(), String>,
}

/// One-shot channel handed in by callers that want to observe the
/// outcome of a single operation.
pub type CompletionListener = oneshot::Sender<OperationOutcome>;

/// Broadcast notification about a tracked interface.
#[derive(Debug, Clone)]
pub enum InterfaceEvent {
    Added {
        iface: String,
        mac: Option<String>,
    },
    Removed {
        iface: String,
    },
    LinkChanged {
        iface: String,
        up: bool,
    },
    ConfigurationChanged {
        iface: String,
        config: IpConfiguration,
    },
    OperationCompleted(OperationOutcome),
}

impl InterfaceEvent {
    pub fn iface(&self) -> &str {
        match self {
            InterfaceEvent::Added { iface, .. } => iface,
            InterfaceEvent::Removed { iface } => iface,
            InterfaceEvent::LinkChanged { iface, .. } => iface,
            InterfaceEvent::ConfigurationChanged { iface, .. } => iface,
            InterfaceEvent::OperationCompleted(outcome) => &outcome.iface,
        }
    }
}

/// Snapshot of one tracked interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceStatus {
    pub name: String,
    pub mac: Option<String>,
    pub link_up: bool,
    pub enabled: bool,
    pub provisioning: ProvisioningState,
    pub config: IpConfiguration,
    pub capabilities: NetworkCapabilities,
}

/// The tracking subsystem as the service layer sees it.
pub trait InterfaceTracker: Send + Sync {
    fn is_tracking_interface(&self, iface: &str) -> bool;

    fn list_interfaces(&self) -> Vec<String>;

    fn interface_status(&self, iface: &str) -> Option<InterfaceStatus>;

    /// Stores a new configuration and capability set for a tracked
    /// interface and reapplies it if the interface is connected.
    fn update_configuration(
        &self,
        iface: &str,
        config: IpConfiguration,
        capabilities: NetworkCapabilities,
        listener: Option<CompletionListener>,
    ) -> Uuid;

    /// Legacy configuration write: stores the configuration whether or
    /// not the interface is currently tracked, and reapplies it only when
    /// the interface is tracked and connected.
    fn update_ip_configuration(&self, iface: &str, config: IpConfiguration) -> Uuid;

    /// Brings an interface up with its stored configuration.
    fn connect_network(&self, iface: &str, listener: Option<CompletionListener>) -> Uuid;

    /// Takes an interface down and clears its addressing.
    fn disconnect_network(&self, iface: &str, listener: Option<CompletionListener>) -> Uuid;

    fn subscribe(&self) -> broadcast::Receiver<InterfaceEvent>;
}

#[derive(Debug, Clone)]
struct TrackedInterface {
    mac: Option<String>,
    link_up: bool,
    enabled: bool,
    provisioning: ProvisioningState,
    config: IpConfiguration,
    capabilities: NetworkCapabilities,
}

enum JobAction {
    Apply(IpConfiguration),
    Clear,
}

struct ApplyJob {
    id: Uuid,
    iface: String,
    kind: OperationKind,
    action: JobAction,
    listener: Option<CompletionListener>,
}

/// Production [`InterfaceTracker`].
pub struct EthernetTracker {
    platform: Arc<dyn LinkManager>,
    store: IpConfigStore,
    pattern: Regex,
    seeds: HashMap<String, InterfaceSeed>,
    interfaces: Mutex<HashMap<String, TrackedInterface>>,
    saved: Mutex<HashMap<String, StoredInterface>>,
    events: broadcast::Sender<InterfaceEvent>,
    jobs: mpsc::UnboundedSender<ApplyJob>,
    jobs_rx: Mutex<Option<mpsc::UnboundedReceiver<ApplyJob>>>,
}

impl EthernetTracker {
    /// Creates a tracker and loads previously saved configurations.
    pub fn new(
        platform: Arc<dyn LinkManager>,
        store: IpConfigStore,
        pattern: Regex,
        seeds: HashMap<String, InterfaceSeed>,
    ) -> crate::Result<Self> {
        let saved = store.load()?;
        if !saved.is_empty() {
            info!("loaded {} saved interface configurations", saved.len());
        }
        let (events, _) = broadcast::channel(100);
        let (jobs, jobs_rx) = mpsc::unbounded_channel();
        Ok(Self {
            platform,
            store,
            pattern,
            seeds,
            interfaces: Mutex::new(HashMap::new()),
            saved: Mutex::new(saved),
            events,
            jobs,
            jobs_rx: Mutex::new(Some(jobs_rx)),
        })
    }

    /// Spawns the apply worker and the periodic discovery scan. Call once.
    pub fn start(self: Arc<Self>, scan_interval: Duration) {
        if let Some(mut jobs_rx) = self.jobs_rx.lock().unwrap().take() {
            let tracker = self.clone();
            tokio::spawn(async move {
                while let Some(job) = jobs_rx.recv().await {
                    tracker.execute(job).await;
                }
            });
        }

        let tracker = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scan_interval);
            loop {
                interval.tick().await;
                if let Err(err) = tracker.refresh() {
                    warn!("interface scan failed: {}", err);
                }
            }
        });
    }

    /// Runs one discovery pass against the platform.
    pub fn refresh(&self) -> crate::Result<()> {
        let links = self.platform.list_links()?;
        self.sync_links(links);
        Ok(())
    }

    fn sync_links(&self, links: Vec<LinkInfo>) {
        let mut interfaces = self.interfaces.lock().unwrap();
        let mut seen = HashSet::new();

        for link in links {
            if link.loopback || !self.pattern.is_match(&link.name) {
                continue;
            }
            seen.insert(link.name.clone());
            match interfaces.get_mut(&link.name) {
                Some(entry) => {
                    if entry.link_up != link.up {
                        entry.link_up = link.up;
                        debug!(iface = %link.name, up = link.up, "link state changed");
                        let _ = self.events.send(InterfaceEvent::LinkChanged {
                            iface: link.name.clone(),
                            up: link.up,
                        });
                    }
                    if entry.mac.is_none() {
                        entry.mac = link.mac.clone();
                    }
                }
                None => {
                    let (config, capabilities) = self.initial_settings(&link.name);
                    interfaces.insert(
                        link.name.clone(),
                        TrackedInterface {
                            mac: link.mac.clone(),
                            link_up: link.up,
                            enabled: false,
                            provisioning: ProvisioningState::Idle,
                            config,
                            capabilities,
                        },
                    );
                    info!(iface = %link.name, "tracking new interface");
                    let _ = self.events.send(InterfaceEvent::Added {
                        iface: link.name.clone(),
                        mac: link.mac.clone(),
                    });
                }
            }
        }

        let gone: Vec<String> = interfaces
            .keys()
            .filter(|name| !seen.contains(*name))
            .cloned()
            .collect();
        for name in gone {
            interfaces.remove(&name);
            info!(iface = %name, "interface disappeared");
            let _ = self.events.send(InterfaceEvent::Removed { iface: name });
        }
    }

    /// Initial configuration for a newly discovered interface: the saved
    /// entry wins, then the configuration file seed, then plain DHCP.
    fn initial_settings(&self, iface: &str) -> (IpConfiguration, NetworkCapabilities) {
        if let Some(stored) = self.saved.lock().unwrap().get(iface) {
            return (stored.ip_config.clone(), stored.capabilities.clone());
        }
        if let Some(seed) = self.seeds.get(iface) {
            return (seed.config.clone(), seed.capabilities.clone());
        }
        (IpConfiguration::dhcp(), NetworkCapabilities::new())
    }

    fn persist(&self, iface: &str, config: &IpConfiguration, capabilities: &NetworkCapabilities) {
        let mut saved = self.saved.lock().unwrap();
        saved.insert(
            iface.to_string(),
            StoredInterface::new(config.clone(), capabilities.clone()),
        );
        if let Err(err) = self.store.save(&saved) {
            warn!(iface = %iface, "failed to persist interface configuration: {}", err);
        }
    }

    fn saved_capabilities(&self, iface: &str) -> NetworkCapabilities {
        self.saved
            .lock()
            .unwrap()
            .get(iface)
            .map(|stored| stored.capabilities.clone())
            .unwrap_or_default()
    }

    fn enqueue(
        &self,
        id: Uuid,
        iface: &str,
        kind: OperationKind,
        action: JobAction,
        listener: Option<CompletionListener>,
    ) {
        let job = ApplyJob {
            id,
            iface: iface.to_string(),
            kind,
            action,
            listener,
        };
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(job) {
            self.finish(
                job.id,
                &job.iface,
                job.kind,
                Err("tracker worker is not running".to_string()),
                job.listener,
            );
        }
    }

    /// Completes an operation that needs no platform work.
    fn finish(
        &self,
        id: Uuid,
        iface: &str,
        kind: OperationKind,
        result: Result<(), String>,
        listener: Option<CompletionListener>,
    ) {
        let outcome = OperationOutcome {
            id,
            iface: iface.to_string(),
            kind,
            result,
        };
        if let Some(listener) = listener {
            let _ = listener.send(outcome.clone());
        }
        let _ = self
            .events
            .send(InterfaceEvent::OperationCompleted(outcome));
    }

    fn set_provisioning(&self, iface: &str, state: ProvisioningState) {
        if let Some(entry) = self.interfaces.lock().unwrap().get_mut(iface) {
            entry.provisioning = state;
        }
    }

    async fn execute(&self, job: ApplyJob) {
        if !self.is_tracking_interface(&job.iface) {
            self.finish(
                job.id,
                &job.iface,
                job.kind,
                Err("interface is no longer tracked".to_string()),
                job.listener,
            );
            return;
        }

        self.set_provisioning(&job.iface, ProvisioningState::Applying);
        let result = match &job.action {
            JobAction::Apply(config) => {
                let up = self.platform.set_link_up(&job.iface, true).await;
                match up {
                    Ok(()) => self.platform.apply_configuration(&job.iface, config).await,
                    Err(err) => Err(err),
                }
            }
            JobAction::Clear => {
                let cleared = self.platform.clear_configuration(&job.iface).await;
                match cleared {
                    Ok(()) => self.platform.set_link_up(&job.iface, false).await,
                    Err(err) => Err(err),
                }
            }
        };

        let result = result.map_err(|err| err.to_string());
        let next_state = match (&job.action, &result) {
            (JobAction::Apply(_), Ok(())) => ProvisioningState::Active,
            (JobAction::Clear, Ok(())) => ProvisioningState::Idle,
            (_, Err(_)) => ProvisioningState::Failed,
        };
        self.set_provisioning(&job.iface, next_state);

        match &result {
            Ok(()) => debug!(iface = %job.iface, kind = %job.kind, id = %job.id, "operation applied"),
            Err(err) => warn!(iface = %job.iface, kind = %job.kind, id = %job.id, "operation failed: {}", err),
        }
        self.finish(job.id, &job.iface, job.kind, result, job.listener);
    }
}

impl InterfaceTracker for EthernetTracker {
    fn is_tracking_interface(&self, iface: &str) -> bool {
        self.interfaces.lock().unwrap().contains_key(iface)
    }

    fn list_interfaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.interfaces.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    fn interface_status(&self, iface: &str) -> Option<InterfaceStatus> {
        self.interfaces
            .lock()
            .unwrap()
            .get(iface)
            .map(|entry| InterfaceStatus {
                name: iface.to_string(),
                mac: entry.mac.clone(),
                link_up: entry.link_up,
                enabled: entry.enabled,
                provisioning: entry.provisioning,
                config: entry.config.clone(),
                capabilities: entry.capabilities.clone(),
            })
    }

    fn update_configuration(
        &self,
        iface: &str,
        config: IpConfiguration,
        capabilities: NetworkCapabilities,
        listener: Option<CompletionListener>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let enabled = {
            let mut interfaces = self.interfaces.lock().unwrap();
            match interfaces.get_mut(iface) {
                Some(entry) => {
                    entry.config = config.clone();
                    entry.capabilities = capabilities.clone();
                    Some(entry.enabled)
                }
                None => None,
            }
        };

        match enabled {
            None => {
                self.finish(
                    id,
                    iface,
                    OperationKind::UpdateConfiguration,
                    Err("interface is no longer tracked".to_string()),
                    listener,
                );
            }
            Some(enabled) => {
                self.persist(iface, &config, &capabilities);
                let _ = self.events.send(InterfaceEvent::ConfigurationChanged {
                    iface: iface.to_string(),
                    config: config.clone(),
                });
                if enabled {
                    self.enqueue(
                        id,
                        iface,
                        OperationKind::UpdateConfiguration,
                        JobAction::Apply(config),
                        listener,
                    );
                } else {
                    self.finish(id, iface, OperationKind::UpdateConfiguration, Ok(()), listener);
                }
            }
        }
        id
    }

    fn update_ip_configuration(&self, iface: &str, config: IpConfiguration) -> Uuid {
        let id = Uuid::new_v4();
        let capabilities = self.saved_capabilities(iface);
        self.persist(iface, &config, &capabilities);

        let enabled = {
            let mut interfaces = self.interfaces.lock().unwrap();
            match interfaces.get_mut(iface) {
                Some(entry) => {
                    entry.config = config.clone();
                    Some(entry.enabled)
                }
                None => None,
            }
        };
        let _ = self.events.send(InterfaceEvent::ConfigurationChanged {
            iface: iface.to_string(),
            config: config.clone(),
        });

        if enabled == Some(true) {
            self.enqueue(
                id,
                iface,
                OperationKind::SetConfiguration,
                JobAction::Apply(config),
                None,
            );
        } else {
            self.finish(id, iface, OperationKind::SetConfiguration, Ok(()), None);
        }
        id
    }

    fn connect_network(&self, iface: &str, listener: Option<CompletionListener>) -> Uuid {
        let id = Uuid::new_v4();
        let config = {
            let mut interfaces = self.interfaces.lock().unwrap();
            match interfaces.get_mut(iface) {
                Some(entry) => {
                    entry.enabled = true;
                    Some(entry.config.clone())
                }
                None => None,
            }
        };
        match config {
            Some(config) => {
                self.enqueue(id, iface, OperationKind::Connect, JobAction::Apply(config), listener);
            }
            None => {
                self.finish(
                    id,
                    iface,
                    OperationKind::Connect,
                    Err("interface is no longer tracked".to_string()),
                    listener,
                );
            }
        }
        id
    }

    fn disconnect_network(&self, iface: &str, listener: Option<CompletionListener>) -> Uuid {
        let id = Uuid::new_v4();
        let tracked = {
            let mut interfaces = self.interfaces.lock().unwrap();
            match interfaces.get_mut(iface) {
                Some(entry) => {
                    entry.enabled = false;
                    true
                }
                None => false,
            }
        };
        if tracked {
            self.enqueue(id, iface, OperationKind::Disconnect, JobAction::Clear, listener);
        } else {
            self.finish(
                id,
                iface,
                OperationKind::Disconnect,
                Err("interface is no longer tracked".to_string()),
                listener,
            );
        }
        id
    }

    fn subscribe(&self) -> broadcast::Receiver<InterfaceEvent> {
        self.events.subscribe()
    }
}
