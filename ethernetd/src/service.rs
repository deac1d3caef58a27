//! The ethernet management service: validates requests and forwards them
//! to the interface tracker, and exposes the whole thing over gRPC on a
//! Unix domain socket.

use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::net::UnixListener;
use tokio::sync::{broadcast, oneshot};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, UnixListenerStream};
use tokio_stream::Stream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::info;
use uuid::Uuid;

use crate::config::SystemFeatures;
use crate::ipconfig::{
    IpAssignment, IpConfiguration, NetworkCapabilities, StaticIpConfiguration, UpdateRequest,
};
use crate::proto;
use crate::proto::ethernet_service_server::EthernetServiceServer;
use crate::tracker::{
    CompletionListener, InterfaceEvent, InterfaceStatus, InterfaceTracker, OperationOutcome,
    ProvisioningState,
};
use crate::validate::{RequestValidator, ServiceError};

const OP_UPDATE_CONFIGURATION: &str = "update-configuration";
const OP_CONNECT_NETWORK: &str = "connect-network";
const OP_DISCONNECT_NETWORK: &str = "disconnect-network";

impl From<ServiceError> for Status {
    fn from(err: ServiceError) -> Self {
        match &err {
            ServiceError::NotStarted => Status::failed_precondition(err.to_string()),
            ServiceError::EmptyInterfaceName => Status::invalid_argument(err.to_string()),
            ServiceError::FeatureNotEnabled { .. } | ServiceError::UntrackedInterface(_) => {
                Status::unimplemented(err.to_string())
            }
        }
    }
}

/// Service facade over an [`InterfaceTracker`].
///
/// The service starts out stopped and rejects every request until
/// [`EthernetService::start`] is called. All clones share the started
/// flag and the tracker.
#[derive(Clone)]
pub struct EthernetService {
    started: Arc<AtomicBool>,
    validator: RequestValidator,
    tracker: Arc<dyn InterfaceTracker>,
}

impl EthernetService {
    pub fn new(tracker: Arc<dyn InterfaceTracker>, features: SystemFeatures) -> Self {
        let started = Arc::new(AtomicBool::new(false));
        let validator =
            RequestValidator::new(Arc::clone(&started), features, Arc::clone(&tracker));
        Self {
            started,
            validator,
            tracker,
        }
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
        info!("ethernet service started");
    }

    pub fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        info!("ethernet service stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn list_interfaces(&self) -> Result<Vec<String>, ServiceError> {
        self.validator.ensure_started()?;
        Ok(self.tracker.list_interfaces())
    }

    pub fn get_configuration(&self, iface: &str) -> Result<InterfaceStatus, ServiceError> {
        self.validator.ensure_started()?;
        self.validator.ensure_iface_given(iface)?;
        self.tracker
            .interface_status(iface)
            .ok_or_else(|| ServiceError::UntrackedInterface(iface.to_string()))
    }

    pub fn is_tracked(&self, iface: &str) -> Result<bool, ServiceError> {
        self.validator.ensure_started()?;
        self.validator.ensure_iface_given(iface)?;
        Ok(self.tracker.is_tracking_interface(iface))
    }

    /// Legacy configuration write. Only requires the service to be
    /// started; the tracker stores the configuration even for interfaces
    /// it is not currently tracking.
    pub fn set_configuration(
        &self,
        iface: &str,
        config: IpConfiguration,
    ) -> Result<Uuid, ServiceError> {
        self.validator.ensure_started()?;
        Ok(self.tracker.update_ip_configuration(iface, config))
    }

    pub fn update_configuration(
        &self,
        iface: &str,
        request: UpdateRequest,
        listener: Option<CompletionListener>,
    ) -> Result<Uuid, ServiceError> {
        self.validator
            .ensure_network_mutation_allowed(iface, OP_UPDATE_CONFIGURATION)?;
        let (config, capabilities) = request.into_parts();
        Ok(self
            .tracker
            .update_configuration(iface, config, capabilities, listener))
    }

    pub fn connect_network(
        &self,
        iface: &str,
        listener: Option<CompletionListener>,
    ) -> Result<Uuid, ServiceError> {
        self.validator
            .ensure_network_mutation_allowed(iface, OP_CONNECT_NETWORK)?;
        Ok(self.tracker.connect_network(iface, listener))
    }

    pub fn disconnect_network(
        &self,
        iface: &str,
        listener: Option<CompletionListener>,
    ) -> Result<Uuid, ServiceError> {
        self.validator
            .ensure_network_mutation_allowed(iface, OP_DISCONNECT_NETWORK)?;
        Ok(self.tracker.disconnect_network(iface, listener))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InterfaceEvent> {
        self.tracker.subscribe()
    }

    /// Binds the Unix socket and serves requests until the server exits.
    pub async fn serve(&self, socket_path: impl AsRef<Path>) -> crate::Result<()> {
        let socket_path = socket_path.as_ref();
        if socket_path.exists() {
            // Remove stale socket from a previous run
            let _ = std::fs::remove_file(socket_path);
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        let incoming = UnixListenerStream::new(listener);
        info!(socket = %socket_path.display(), "ethernetd listening");

        Server::builder()
            .add_service(EthernetServiceServer::new(self.clone()))
            .serve_with_incoming(incoming)
            .await?;
        Ok(())
    }
}

/// Server-streaming adapter from the tracker's broadcast bus to wire
/// events, optionally filtered down to one interface.
pub struct EventStream {
    inner: BroadcastStream<InterfaceEvent>,
    iface: Option<String>,
}

impl EventStream {
    pub fn new(receiver: broadcast::Receiver<InterfaceEvent>, iface: Option<String>) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
            iface,
        }
    }
}

impl Stream for EventStream {
    type Item = Result<proto::InterfaceEvent, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if let Some(iface) = &self.iface {
                        if event.iface() != iface {
                            continue;
                        }
                    }
                    return Poll::Ready(Some(Ok(event_to_proto(event))));
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    return Poll::Ready(Some(Err(Status::internal(format!(
                        "event stream lagged, {} events dropped",
                        skipped
                    )))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[tonic::async_trait]
impl proto::ethernet_service_server::EthernetService for EthernetService {
    async fn list_interfaces(
        &self,
        _request: Request<proto::ListInterfacesRequest>,
    ) -> Result<Response<proto::ListInterfacesResponse>, Status> {
        let names = self.list_interfaces()?;
        let interfaces = names
            .iter()
            .filter_map(|name| self.tracker.interface_status(name))
            .map(|status| status_to_proto(&status))
            .collect();
        Ok(Response::new(proto::ListInterfacesResponse { interfaces }))
    }

    async fn get_configuration(
        &self,
        request: Request<proto::GetConfigurationRequest>,
    ) -> Result<Response<proto::GetConfigurationResponse>, Status> {
        let req = request.into_inner();
        let status = self.get_configuration(&req.iface).map_err(|err| match err {
            ServiceError::UntrackedInterface(_) => Status::not_found(err.to_string()),
            other => Status::from(other),
        })?;
        Ok(Response::new(proto::GetConfigurationResponse {
            status: Some(status_to_proto(&status)),
        }))
    }

    async fn set_configuration(
        &self,
        request: Request<proto::SetConfigurationRequest>,
    ) -> Result<Response<proto::SetConfigurationResponse>, Status> {
        let req = request.into_inner();
        let config = ip_configuration_from_proto(
            req.config
                .ok_or_else(|| Status::invalid_argument("missing ip configuration"))?,
        )?;
        let id = self.set_configuration(&req.iface, config)?;
        Ok(Response::new(proto::SetConfigurationResponse {
            operation_id: id.to_string(),
        }))
    }

    async fn update_configuration(
        &self,
        request: Request<proto::UpdateConfigurationRequest>,
    ) -> Result<Response<proto::MutationResponse>, Status> {
        let req = request.into_inner();
        let config = ip_configuration_from_proto(
            req.config
                .ok_or_else(|| Status::invalid_argument("missing ip configuration"))?,
        )?;
        let capabilities =
            NetworkCapabilities::parse_names(&req.capabilities).map_err(Status::invalid_argument)?;
        let update = UpdateRequest::new(config, capabilities)
            .map_err(|err| Status::invalid_argument(err.to_string()))?;

        let (tx, rx) = oneshot::channel();
        let listener = req.wait_for_completion.then_some(tx);
        let id = self.update_configuration(&req.iface, update, listener)?;
        let response = mutation_response(id, req.wait_for_completion, rx).await?;
        Ok(Response::new(response))
    }

    async fn connect_network(
        &self,
        request: Request<proto::ConnectNetworkRequest>,
    ) -> Result<Response<proto::MutationResponse>, Status> {
        let req = request.into_inner();
        let (tx, rx) = oneshot::channel();
        let listener = req.wait_for_completion.then_some(tx);
        let id = self.connect_network(&req.iface, listener)?;
        let response = mutation_response(id, req.wait_for_completion, rx).await?;
        Ok(Response::new(response))
    }

    async fn disconnect_network(
        &self,
        request: Request<proto::DisconnectNetworkRequest>,
    ) -> Result<Response<proto::MutationResponse>, Status> {
        let req = request.into_inner();
        let (tx, rx) = oneshot::channel();
        let listener = req.wait_for_completion.then_some(tx);
        let id = self.disconnect_network(&req.iface, listener)?;
        let response = mutation_response(id, req.wait_for_completion, rx).await?;
        Ok(Response::new(response))
    }

    type WatchEventsStream = EventStream;

    async fn watch_events(
        &self,
        request: Request<proto::WatchEventsRequest>,
    ) -> Result<Response<Self::WatchEventsStream>, Status> {
        self.validator.ensure_started().map_err(Status::from)?;
        let req = request.into_inner();
        let iface = (!req.iface.is_empty()).then_some(req.iface);
        Ok(Response::new(EventStream::new(
            self.tracker.subscribe(),
            iface,
        )))
    }
}

/// Builds the shared response for the mutating calls, waiting for the
/// operation outcome when the caller asked for it.
async fn mutation_response(
    id: Uuid,
    wait: bool,
    rx: oneshot::Receiver<OperationOutcome>,
) -> Result<proto::MutationResponse, Status> {
    let mut response = proto::MutationResponse {
        operation_id: id.to_string(),
        completed: false,
        success: false,
        error: String::new(),
    };
    if wait {
        match rx.await {
            Ok(outcome) => {
                response.completed = true;
                match outcome.result {
                    Ok(()) => response.success = true,
                    Err(message) => response.error = message,
                }
            }
            Err(_) => return Err(Status::internal("operation outcome was dropped")),
        }
    }
    Ok(response)
}

fn ip_configuration_to_proto(config: &IpConfiguration) -> proto::IpConfiguration {
    proto::IpConfiguration {
        assignment: match config.assignment {
            IpAssignment::Dhcp => proto::IpAssignment::Dhcp as i32,
            IpAssignment::Static => proto::IpAssignment::Static as i32,
        },
        static_config: config.static_config.as_ref().map(|static_config| {
            proto::StaticIpConfiguration {
                address: static_config.address.to_string(),
                gateway: static_config
                    .gateway
                    .map(|gateway| gateway.to_string())
                    .unwrap_or_default(),
                dns_servers: static_config
                    .dns_servers
                    .iter()
                    .map(|server| server.to_string())
                    .collect(),
                domain: static_config.domain.clone().unwrap_or_default(),
            }
        }),
    }
}

fn ip_configuration_from_proto(msg: proto::IpConfiguration) -> Result<IpConfiguration, Status> {
    let assignment = match msg.assignment() {
        proto::IpAssignment::Dhcp => IpAssignment::Dhcp,
        proto::IpAssignment::Static => IpAssignment::Static,
        proto::IpAssignment::Unspecified => {
            return Err(Status::invalid_argument("ip assignment not specified"))
        }
    };
    let static_config = msg
        .static_config
        .map(static_ip_configuration_from_proto)
        .transpose()?;
    let config = IpConfiguration {
        assignment,
        static_config,
    };
    config
        .validate()
        .map_err(|err| Status::invalid_argument(err.to_string()))?;
    Ok(config)
}

fn static_ip_configuration_from_proto(
    msg: proto::StaticIpConfiguration,
) -> Result<StaticIpConfiguration, Status> {
    let address = msg.address.parse().map_err(|_| {
        Status::invalid_argument(format!("invalid interface address {:?}", msg.address))
    })?;
    let mut config = StaticIpConfiguration::new(address);
    if !msg.gateway.is_empty() {
        config.gateway = Some(msg.gateway.parse().map_err(|_| {
            Status::invalid_argument(format!("invalid gateway address {:?}", msg.gateway))
        })?);
    }
    for server in &msg.dns_servers {
        config.dns_servers.push(server.parse().map_err(|_| {
            Status::invalid_argument(format!("invalid dns server address {:?}", server))
        })?);
    }
    if !msg.domain.is_empty() {
        config.domain = Some(msg.domain);
    }
    Ok(config)
}

fn status_to_proto(status: &InterfaceStatus) -> proto::InterfaceStatus {
    proto::InterfaceStatus {
        name: status.name.clone(),
        mac: status.mac.clone().unwrap_or_default(),
        link_up: status.link_up,
        enabled: status.enabled,
        provisioning: provisioning_to_proto(status.provisioning) as i32,
        config: Some(ip_configuration_to_proto(&status.config)),
        capabilities: status.capabilities.names(),
    }
}

fn provisioning_to_proto(state: ProvisioningState) -> proto::ProvisioningState {
    match state {
        ProvisioningState::Idle => proto::ProvisioningState::Idle,
        ProvisioningState::Applying => proto::ProvisioningState::Applying,
        ProvisioningState::Active => proto::ProvisioningState::Active,
        ProvisioningState::Failed => proto::ProvisioningState::Failed,
    }
}

fn event_to_proto(event: InterfaceEvent) -> proto::InterfaceEvent {
    let iface = event.iface().to_string();
    let detail = match event {
        InterfaceEvent::Added { mac, .. } => proto::interface_event::Event::Added(
            proto::InterfaceAdded {
                mac: mac.unwrap_or_default(),
            },
        ),
        InterfaceEvent::Removed { .. } => {
            proto::interface_event::Event::Removed(proto::InterfaceRemoved {})
        }
        InterfaceEvent::LinkChanged { up, .. } => {
            proto::interface_event::Event::Link(proto::LinkChanged { up })
        }
        InterfaceEvent::ConfigurationChanged { config, .. } => {
            proto::interface_event::Event::Config(proto::ConfigurationChanged {
                config: Some(ip_configuration_to_proto(&config)),
            })
        }
        InterfaceEvent::OperationCompleted(outcome) => {
            proto::interface_event::Event::Operation(proto::OperationCompleted {
                operation_id: outcome.id.to_string(),
                kind: outcome.kind.to_string(),
                success: outcome.result.is_ok(),
                error: outcome.result.err().unwrap_or_default(),
            })
        }
    };
    proto::InterfaceEvent {
        iface,
        timestamp: chrono::Utc::now().timestamp(),
        event: Some(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Feature, SystemFeatures};
    use crate::tracker::OperationKind;
    use assert_matches::assert_matches;
    use std::sync::Mutex;
    use tokio_stream::StreamExt;
    use tonic::Code;

    const TEST_IFACE: &str = "test123";

    #[derive(Debug, Clone, PartialEq)]
    enum ForwardedCall {
        UpdateConfiguration {
            iface: String,
            config: IpConfiguration,
            capabilities: NetworkCapabilities,
            listener: bool,
        },
        UpdateIpConfiguration {
            iface: String,
            config: IpConfiguration,
        },
        Connect {
            iface: String,
            listener: bool,
        },
        Disconnect {
            iface: String,
            listener: bool,
        },
    }

    struct RecordingTracker {
        tracking: bool,
        calls: Mutex<Vec<ForwardedCall>>,
        events: broadcast::Sender<InterfaceEvent>,
    }

    impl RecordingTracker {
        fn new(tracking: bool) -> Arc<Self> {
            let (events, _) = broadcast::channel(8);
            Arc::new(Self {
                tracking,
                calls: Mutex::new(Vec::new()),
                events,
            })
        }

        fn calls(&self) -> Vec<ForwardedCall> {
            self.calls.lock().unwrap().clone()
        }

        fn complete(&self, id: Uuid, iface: &str, kind: OperationKind, listener: Option<CompletionListener>) {
            if let Some(listener) = listener {
                let _ = listener.send(OperationOutcome {
                    id,
                    iface: iface.to_string(),
                    kind,
                    result: Ok(()),
                });
            }
        }
    }

    impl InterfaceTracker for RecordingTracker {
        fn is_tracking_interface(&self, _iface: &str) -> bool {
            self.tracking
        }

        fn list_interfaces(&self) -> Vec<String> {
            vec![TEST_IFACE.to_string()]
        }

        fn interface_status(&self, iface: &str) -> Option<InterfaceStatus> {
            self.tracking.then(|| InterfaceStatus {
                name: iface.to_string(),
                mac: Some("52:54:00:12:34:56".to_string()),
                link_up: true,
                enabled: false,
                provisioning: ProvisioningState::Idle,
                config: IpConfiguration::dhcp(),
                capabilities: NetworkCapabilities::new(),
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
            self.calls.lock().unwrap().push(ForwardedCall::UpdateConfiguration {
                iface: iface.to_string(),
                config,
                capabilities,
                listener: listener.is_some(),
            });
            self.complete(id, iface, OperationKind::UpdateConfiguration, listener);
            id
        }

        fn update_ip_configuration(&self, iface: &str, config: IpConfiguration) -> Uuid {
            self.calls
                .lock()
                .unwrap()
                .push(ForwardedCall::UpdateIpConfiguration {
                    iface: iface.to_string(),
                    config,
                });
            Uuid::new_v4()
        }

        fn connect_network(&self, iface: &str, listener: Option<CompletionListener>) -> Uuid {
            let id = Uuid::new_v4();
            self.calls.lock().unwrap().push(ForwardedCall::Connect {
                iface: iface.to_string(),
                listener: listener.is_some(),
            });
            self.complete(id, iface, OperationKind::Connect, listener);
            id
        }

        fn disconnect_network(&self, iface: &str, listener: Option<CompletionListener>) -> Uuid {
            let id = Uuid::new_v4();
            self.calls.lock().unwrap().push(ForwardedCall::Disconnect {
                iface: iface.to_string(),
                listener: listener.is_some(),
            });
            self.complete(id, iface, OperationKind::Disconnect, listener);
            id
        }

        fn subscribe(&self) -> broadcast::Receiver<InterfaceEvent> {
            self.events.subscribe()
        }
    }

    fn network_management() -> SystemFeatures {
        SystemFeatures::none().with(Feature::NetworkManagement)
    }

    fn started_service(tracker: &Arc<RecordingTracker>, features: SystemFeatures) -> EthernetService {
        let service = EthernetService::new(
            Arc::clone(tracker) as Arc<dyn InterfaceTracker>,
            features,
        );
        service.start();
        service
    }

    fn sample_update_request() -> UpdateRequest {
        let static_config = StaticIpConfiguration {
            address: "192.0.2.200/25".parse().unwrap(),
            gateway: Some("192.0.2.129".parse().unwrap()),
            dns_servers: vec!["192.0.2.129".parse().unwrap()],
            domain: None,
        };
        UpdateRequest::new(
            IpConfiguration::statically_assigned(static_config),
            NetworkCapabilities::parse_names(["internet"]).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn set_configuration_rejected_when_not_started() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, network_management());
        service.stop();

        let result = service.set_configuration(TEST_IFACE, IpConfiguration::dhcp());
        assert_matches!(result, Err(ServiceError::NotStarted));
        assert!(tracker.calls().is_empty());
    }

    #[test]
    fn update_configuration_rejected_when_not_started() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, network_management());
        service.stop();

        let result = service.update_configuration(TEST_IFACE, sample_update_request(), None);
        assert_matches!(result, Err(ServiceError::NotStarted));
        assert!(tracker.calls().is_empty());
    }

    #[test]
    fn connect_network_rejected_when_not_started() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, network_management());
        service.stop();

        assert_matches!(
            service.connect_network(TEST_IFACE, None),
            Err(ServiceError::NotStarted)
        );
        assert!(tracker.calls().is_empty());
    }

    #[test]
    fn disconnect_network_rejected_when_not_started() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, network_management());
        service.stop();

        assert_matches!(
            service.disconnect_network(TEST_IFACE, None),
            Err(ServiceError::NotStarted)
        );
        assert!(tracker.calls().is_empty());
    }

    #[test]
    fn update_configuration_rejects_empty_iface() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, network_management());

        let result = service.update_configuration("", sample_update_request(), None);
        assert_matches!(result, Err(ServiceError::EmptyInterfaceName));
        assert!(tracker.calls().is_empty());
    }

    #[test]
    fn connect_network_rejects_empty_iface() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, network_management());

        assert_matches!(
            service.connect_network("", None),
            Err(ServiceError::EmptyInterfaceName)
        );
    }

    #[test]
    fn disconnect_network_rejects_empty_iface() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, network_management());

        assert_matches!(
            service.disconnect_network("", None),
            Err(ServiceError::EmptyInterfaceName)
        );
    }

    #[test]
    fn update_configuration_rejects_without_network_management() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, SystemFeatures::none());

        let result = service.update_configuration(TEST_IFACE, sample_update_request(), None);
        assert_matches!(result, Err(ServiceError::FeatureNotEnabled { .. }));
        assert!(tracker.calls().is_empty());
    }

    #[test]
    fn connect_network_rejects_without_network_management() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, SystemFeatures::none());

        assert_matches!(
            service.connect_network(TEST_IFACE, None),
            Err(ServiceError::FeatureNotEnabled { .. })
        );
    }

    #[test]
    fn disconnect_network_rejects_without_network_management() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, SystemFeatures::none());

        assert_matches!(
            service.disconnect_network(TEST_IFACE, None),
            Err(ServiceError::FeatureNotEnabled { .. })
        );
    }

    #[test]
    fn feature_check_is_independent_of_tracking_state() {
        // Also untracked; the feature failure must win.
        let tracker = RecordingTracker::new(false);
        let service = started_service(&tracker, SystemFeatures::none());

        assert_matches!(
            service.connect_network(TEST_IFACE, None),
            Err(ServiceError::FeatureNotEnabled { .. })
        );
    }

    #[test]
    fn update_configuration_rejects_untracked_iface() {
        let tracker = RecordingTracker::new(false);
        let service = started_service(&tracker, network_management());

        let result = service.update_configuration(TEST_IFACE, sample_update_request(), None);
        assert_matches!(
            result,
            Err(ServiceError::UntrackedInterface(iface)) if iface == TEST_IFACE
        );
        assert!(tracker.calls().is_empty());
    }

    #[test]
    fn connect_network_rejects_untracked_iface() {
        let tracker = RecordingTracker::new(false);
        let service = started_service(&tracker, network_management());

        assert_matches!(
            service.connect_network(TEST_IFACE, None),
            Err(ServiceError::UntrackedInterface(_))
        );
    }

    #[test]
    fn disconnect_network_rejects_untracked_iface() {
        let tracker = RecordingTracker::new(false);
        let service = started_service(&tracker, network_management());

        assert_matches!(
            service.disconnect_network(TEST_IFACE, None),
            Err(ServiceError::UntrackedInterface(_))
        );
    }

    #[test]
    fn update_configuration_forwards_arguments_unchanged() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, network_management());
        let request = sample_update_request();

        service
            .update_configuration(TEST_IFACE, request.clone(), None)
            .unwrap();

        assert_eq!(
            tracker.calls(),
            vec![ForwardedCall::UpdateConfiguration {
                iface: TEST_IFACE.to_string(),
                config: request.ip_config().clone(),
                capabilities: request.capabilities().clone(),
                listener: false,
            }]
        );
    }

    #[test]
    fn connect_network_forwards_to_tracker() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, network_management());

        service.connect_network(TEST_IFACE, None).unwrap();

        assert_eq!(
            tracker.calls(),
            vec![ForwardedCall::Connect {
                iface: TEST_IFACE.to_string(),
                listener: false,
            }]
        );
    }

    #[test]
    fn disconnect_network_forwards_to_tracker() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, network_management());

        service.disconnect_network(TEST_IFACE, None).unwrap();

        assert_eq!(
            tracker.calls(),
            vec![ForwardedCall::Disconnect {
                iface: TEST_IFACE.to_string(),
                listener: false,
            }]
        );
    }

    #[test]
    fn set_configuration_forwards_with_only_started_check() {
        // Feature disabled and interface untracked: the legacy write path
        // must still go through.
        let tracker = RecordingTracker::new(false);
        let service = started_service(&tracker, SystemFeatures::none());
        let config = sample_update_request().ip_config().clone();

        service.set_configuration(TEST_IFACE, config.clone()).unwrap();

        assert_eq!(
            tracker.calls(),
            vec![ForwardedCall::UpdateIpConfiguration {
                iface: TEST_IFACE.to_string(),
                config,
            }]
        );
    }

    #[test]
    fn listener_is_handed_to_the_tracker() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, network_management());

        let (tx, mut rx) = oneshot::channel();
        let id = service
            .update_configuration(TEST_IFACE, sample_update_request(), Some(tx))
            .unwrap();

        // The recording tracker completes through the same channel the
        // caller handed in.
        let outcome = rx.try_recv().unwrap();
        assert_eq!(outcome.id, id);
        assert_eq!(outcome.result, Ok(()));
        assert_matches!(
            tracker.calls().as_slice(),
            [ForwardedCall::UpdateConfiguration { listener: true, .. }]
        );
    }

    #[test]
    fn rejected_call_is_idempotent() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, network_management());
        service.stop();

        let first = service.connect_network(TEST_IFACE, None);
        let second = service.connect_network(TEST_IFACE, None);
        assert_eq!(first.unwrap_err(), second.unwrap_err());
        assert!(tracker.calls().is_empty());
    }

    #[test]
    fn get_configuration_requires_started() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, network_management());
        service.stop();

        assert_matches!(
            service.get_configuration(TEST_IFACE),
            Err(ServiceError::NotStarted)
        );
    }

    #[test]
    fn get_configuration_reports_untracked() {
        let tracker = RecordingTracker::new(false);
        let service = started_service(&tracker, network_management());

        assert_matches!(
            service.get_configuration(TEST_IFACE),
            Err(ServiceError::UntrackedInterface(_))
        );
    }

    #[test]
    fn is_tracked_reflects_the_tracker() {
        let tracker = RecordingTracker::new(true);
        let service = started_service(&tracker, network_management());
        assert!(service.is_tracked(TEST_IFACE).unwrap());

        service.stop();
        assert_matches!(service.is_tracked(TEST_IFACE), Err(ServiceError::NotStarted));
    }

    #[test]
    fn service_errors_map_to_grpc_codes() {
        assert_eq!(
            Status::from(ServiceError::NotStarted).code(),
            Code::FailedPrecondition
        );
        assert_eq!(
            Status::from(ServiceError::EmptyInterfaceName).code(),
            Code::InvalidArgument
        );
        assert_eq!(
            Status::from(ServiceError::FeatureNotEnabled {
                op: "connect-network",
                feature: Feature::NetworkManagement,
            })
            .code(),
            Code::Unimplemented
        );
        assert_eq!(
            Status::from(ServiceError::UntrackedInterface("eth0".to_string())).code(),
            Code::Unimplemented
        );
    }

    #[test]
    fn ip_configuration_round_trips_through_proto() {
        let config = sample_update_request().ip_config().clone();
        let wire = ip_configuration_to_proto(&config);
        let back = ip_configuration_from_proto(wire).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn unspecified_assignment_is_invalid_argument() {
        let wire = proto::IpConfiguration {
            assignment: proto::IpAssignment::Unspecified as i32,
            static_config: None,
        };
        let err = ip_configuration_from_proto(wire).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn bad_address_is_invalid_argument() {
        let wire = proto::IpConfiguration {
            assignment: proto::IpAssignment::Static as i32,
            static_config: Some(proto::StaticIpConfiguration {
                address: "not-an-address".to_string(),
                gateway: String::new(),
                dns_servers: vec![],
                domain: String::new(),
            }),
        };
        let err = ip_configuration_from_proto(wire).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn event_stream_converts_events() {
        let (tx, _keep) = broadcast::channel(8);
        let mut stream = EventStream::new(tx.subscribe(), None);

        tx.send(InterfaceEvent::Added {
            iface: "eth0".to_string(),
            mac: Some("52:54:00:12:34:56".to_string()),
        })
        .unwrap();

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.iface, "eth0");
        assert_matches!(
            event.event,
            Some(proto::interface_event::Event::Added(added)) if added.mac == "52:54:00:12:34:56"
        );
    }

    #[tokio::test]
    async fn event_stream_filters_by_interface() {
        let (tx, _keep) = broadcast::channel(8);
        let mut stream = EventStream::new(tx.subscribe(), Some("eth1".to_string()));

        tx.send(InterfaceEvent::Removed {
            iface: "eth0".to_string(),
        })
        .unwrap();
        tx.send(InterfaceEvent::Removed {
            iface: "eth1".to_string(),
        })
        .unwrap();

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.iface, "eth1");
    }
}
