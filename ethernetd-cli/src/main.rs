use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;

use serde_json::{json, Value};
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

// Include the generated proto code
pub mod proto {
    tonic::include_proto!("ethernetd");
}

use proto::interface_event::Event;
use proto::{
    ethernet_service_client::EthernetServiceClient, ConnectNetworkRequest,
    DisconnectNetworkRequest, GetConfigurationRequest, ListInterfacesRequest,
    SetConfigurationRequest, UpdateConfigurationRequest, WatchEventsRequest,
};

/// Get the default socket path based on user permissions
fn default_socket_path() -> String {
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

/// CLI tool for interacting with the ethernet management daemon
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the Unix socket of the ethernet management daemon
    #[arg(short, long)]
    socket: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show configuration information including detected socket path
    Info,

    /// List every tracked interface
    List {
        /// Output format: json or pretty
        #[arg(short, long, default_value = "pretty")]
        format: String,
    },

    /// Show the tracked state and configuration of one interface
    Get {
        /// Interface name, e.g. eth0
        iface: String,

        /// Output format: json or pretty
        #[arg(short, long, default_value = "pretty")]
        format: String,
    },

    /// Store an IP configuration for an interface without applying it
    Set {
        /// Interface name, e.g. eth0
        iface: String,

        /// Static address in CIDR notation. Omit to use DHCP.
        #[arg(short, long)]
        address: Option<String>,

        /// Default gateway for a static address
        #[arg(short, long)]
        gateway: Option<String>,

        /// DNS server for a static address (repeatable)
        #[arg(short, long)]
        dns: Vec<String>,

        /// DNS search domain for a static address
        #[arg(long)]
        domain: Option<String>,
    },

    /// Replace the configuration and capabilities of a tracked interface
    Update {
        /// Interface name, e.g. eth0
        iface: String,

        /// Static address in CIDR notation. Omit to use DHCP.
        #[arg(short, long)]
        address: Option<String>,

        /// Default gateway for a static address
        #[arg(short, long)]
        gateway: Option<String>,

        /// DNS server for a static address (repeatable)
        #[arg(short, long)]
        dns: Vec<String>,

        /// DNS search domain for a static address
        #[arg(long)]
        domain: Option<String>,

        /// Capability to advertise for the interface (repeatable)
        #[arg(long)]
        capability: Vec<String>,

        /// Block until the configuration has been applied
        #[arg(short, long)]
        wait: bool,
    },

    /// Bring a tracked interface up and apply its stored configuration
    Connect {
        /// Interface name, e.g. eth0
        iface: String,

        /// Block until the interface has been provisioned
        #[arg(short, long)]
        wait: bool,
    },

    /// Take a tracked interface down and clear its addresses
    Disconnect {
        /// Interface name, e.g. eth0
        iface: String,

        /// Block until the interface has been cleared
        #[arg(short, long)]
        wait: bool,
    },

    /// Watch for interface events
    Watch {
        /// Restrict the stream to a single interface
        #[arg(short, long)]
        iface: Option<String>,

        /// Output format: json or pretty
        #[arg(short, long, default_value = "pretty")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Use provided socket or compute default at runtime
    let socket_path = cli.socket.unwrap_or_else(default_socket_path);

    // Handle info command before connecting (it doesn't need a connection)
    if matches!(cli.command, Commands::Info) {
        return cmd_info(&socket_path);
    }

    // Connect to the daemon for other commands
    let mut client = connect_to_service(&socket_path).await?;

    match cli.command {
        Commands::Info => unreachable!(), // Already handled above
        Commands::List { format } => cmd_list(&mut client, &format).await?,
        Commands::Get { iface, format } => cmd_get(&mut client, &iface, &format).await?,
        Commands::Set {
            iface,
            address,
            gateway,
            dns,
            domain,
        } => {
            let config = build_ip_configuration(address, gateway, dns, domain)?;
            cmd_set(&mut client, &iface, config).await?;
        }
        Commands::Update {
            iface,
            address,
            gateway,
            dns,
            domain,
            capability,
            wait,
        } => {
            let config = build_ip_configuration(address, gateway, dns, domain)?;
            cmd_update(&mut client, &iface, config, capability, wait).await?;
        }
        Commands::Connect { iface, wait } => cmd_connect(&mut client, &iface, wait).await?,
        Commands::Disconnect { iface, wait } => cmd_disconnect(&mut client, &iface, wait).await?,
        Commands::Watch { iface, format } => {
            cmd_watch(&mut client, iface.as_deref(), &format).await?
        }
    }

    Ok(())
}

async fn connect_to_service(socket_path: &str) -> Result<EthernetServiceClient<Channel>> {
    debug!("Connecting to ethernetd at {}", socket_path);

    let socket_path = socket_path.to_string();
    let channel = Endpoint::try_from("http://[::]:50051")?
        .connect_with_connector(service_fn(move |_: Uri| {
            let socket_path = socket_path.clone();
            async move {
                let stream = UnixStream::connect(&socket_path).await?;
                Ok::<_, std::io::Error>(hyper_util::rt::TokioIo::new(stream))
            }
        }))
        .await
        .context("Failed to connect to ethernetd")?;

    Ok(EthernetServiceClient::new(channel))
}

fn cmd_info(socket_path: &str) -> Result<()> {
    println!("{}", "ethernetd-cli".cyan().bold());
    println!();
    println!("{}: {}", "Socket".yellow(), socket_path.green());

    let euid = unsafe { libc::geteuid() as u32 };
    let source = if std::env::var("XDG_RUNTIME_DIR").is_ok() {
        "XDG_RUNTIME_DIR"
    } else if euid == 0 {
        "root default"
    } else {
        "per-user runtime directory"
    };
    println!("{}: {}", "Socket source".yellow(), source);
    println!("{}: {}", "Effective UID".yellow(), euid);
    println!(
        "{}: {} {}",
        "Platform".yellow(),
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    println!();
    println!(
        "Override the socket with {}; verify the daemon with {}.",
        "--socket /custom/path.sock".green(),
        "ethernetd-cli list".green()
    );

    Ok(())
}

async fn cmd_list(client: &mut EthernetServiceClient<Channel>, format: &str) -> Result<()> {
    let response = client
        .list_interfaces(ListInterfacesRequest {})
        .await
        .context("Failed to list interfaces")?;
    let interfaces = response.into_inner().interfaces;

    match format {
        "json" => {
            let entries: Vec<Value> = interfaces.iter().map(status_json).collect();
            println!("{}", serde_json::to_string(&entries)?);
        }
        "pretty" => {
            if interfaces.is_empty() {
                println!("{}", "No tracked interfaces".yellow());
            }
            for status in &interfaces {
                print_status(status);
            }
        }
        _ => anyhow::bail!("Invalid format: {}", format),
    }

    Ok(())
}

async fn cmd_get(
    client: &mut EthernetServiceClient<Channel>,
    iface: &str,
    format: &str,
) -> Result<()> {
    let response = client
        .get_configuration(GetConfigurationRequest {
            iface: iface.to_string(),
        })
        .await
        .context("Failed to get configuration")?;

    let status = response
        .into_inner()
        .status
        .context("Daemon returned an empty status")?;

    match format {
        "json" => println!("{}", serde_json::to_string(&status_json(&status))?),
        "pretty" => print_status(&status),
        _ => anyhow::bail!("Invalid format: {}", format),
    }

    Ok(())
}

async fn cmd_set(
    client: &mut EthernetServiceClient<Channel>,
    iface: &str,
    config: proto::IpConfiguration,
) -> Result<()> {
    let response = client
        .set_configuration(SetConfigurationRequest {
            iface: iface.to_string(),
            config: Some(config),
        })
        .await
        .context("Failed to set configuration")?
        .into_inner();

    println!(
        "{} (operation {})",
        "Configuration stored".green(),
        response.operation_id.dimmed()
    );

    Ok(())
}

async fn cmd_update(
    client: &mut EthernetServiceClient<Channel>,
    iface: &str,
    config: proto::IpConfiguration,
    capabilities: Vec<String>,
    wait: bool,
) -> Result<()> {
    let response = client
        .update_configuration(UpdateConfigurationRequest {
            iface: iface.to_string(),
            config: Some(config),
            capabilities,
            wait_for_completion: wait,
        })
        .await
        .context("Failed to update configuration")?
        .into_inner();

    report_outcome("Configuration updated", &response)
}

async fn cmd_connect(
    client: &mut EthernetServiceClient<Channel>,
    iface: &str,
    wait: bool,
) -> Result<()> {
    let response = client
        .connect_network(ConnectNetworkRequest {
            iface: iface.to_string(),
            wait_for_completion: wait,
        })
        .await
        .context("Failed to connect interface")?
        .into_inner();

    report_outcome("Interface connected", &response)
}

async fn cmd_disconnect(
    client: &mut EthernetServiceClient<Channel>,
    iface: &str,
    wait: bool,
) -> Result<()> {
    let response = client
        .disconnect_network(DisconnectNetworkRequest {
            iface: iface.to_string(),
            wait_for_completion: wait,
        })
        .await
        .context("Failed to disconnect interface")?
        .into_inner();

    report_outcome("Interface disconnected", &response)
}

async fn cmd_watch(
    client: &mut EthernetServiceClient<Channel>,
    iface: Option<&str>,
    format: &str,
) -> Result<()> {
    let request = WatchEventsRequest {
        iface: iface.unwrap_or("").to_string(),
    };

    println!("{}", "Watching for interface events...".cyan());
    if let Some(name) = iface {
        println!("Interface filter: {}", name.yellow());
    }
    println!("{}", "Press Ctrl+C to stop".dimmed());
    println!();

    let mut stream = client
        .watch_events(request)
        .await
        .context("Failed to watch events")?
        .into_inner();

    while let Some(event) = stream
        .message()
        .await
        .context("Error receiving interface event")?
    {
        let timestamp =
            chrono::DateTime::from_timestamp(event.timestamp, 0).unwrap_or_else(chrono::Utc::now);

        match format {
            "json" => println!("{}", serde_json::to_string(&event_json(&event, &timestamp))?),
            "pretty" => print_event(&event, &timestamp),
            _ => anyhow::bail!("Invalid format: {}", format),
        }
    }

    Ok(())
}

/// Build the wire configuration from the addressing flags. A present
/// address selects static assignment, an absent one selects DHCP.
fn build_ip_configuration(
    address: Option<String>,
    gateway: Option<String>,
    dns: Vec<String>,
    domain: Option<String>,
) -> Result<proto::IpConfiguration> {
    match address {
        Some(address) => Ok(proto::IpConfiguration {
            assignment: proto::IpAssignment::Static as i32,
            static_config: Some(proto::StaticIpConfiguration {
                address,
                gateway: gateway.unwrap_or_default(),
                dns_servers: dns,
                domain: domain.unwrap_or_default(),
            }),
        }),
        None => {
            if gateway.is_some() || !dns.is_empty() || domain.is_some() {
                anyhow::bail!("--gateway, --dns and --domain require --address");
            }
            Ok(proto::IpConfiguration {
                assignment: proto::IpAssignment::Dhcp as i32,
                static_config: None,
            })
        }
    }
}

fn report_outcome(success_msg: &str, response: &proto::MutationResponse) -> Result<()> {
    if !response.completed {
        println!(
            "{} (operation {})",
            "Queued".cyan(),
            response.operation_id.dimmed()
        );
        return Ok(());
    }

    if response.success {
        println!(
            "{} (operation {})",
            success_msg.green(),
            response.operation_id.dimmed()
        );
        return Ok(());
    }

    error!(
        "Operation {} failed: {}",
        response.operation_id, response.error
    );
    Err(anyhow::anyhow!(response.error.clone()))
}

fn provisioning_label(state: i32) -> &'static str {
    match proto::ProvisioningState::try_from(state) {
        Ok(proto::ProvisioningState::Idle) => "idle",
        Ok(proto::ProvisioningState::Applying) => "applying",
        Ok(proto::ProvisioningState::Active) => "active",
        Ok(proto::ProvisioningState::Failed) => "failed",
        _ => "unknown",
    }
}

fn config_json(config: &proto::IpConfiguration) -> Value {
    let assignment = match proto::IpAssignment::try_from(config.assignment) {
        Ok(proto::IpAssignment::Dhcp) => "dhcp",
        Ok(proto::IpAssignment::Static) => "static",
        _ => "unspecified",
    };

    match &config.static_config {
        Some(s) => json!({
            "assignment": assignment,
            "address": s.address,
            "gateway": s.gateway,
            "dns_servers": s.dns_servers,
            "domain": s.domain,
        }),
        None => json!({ "assignment": assignment }),
    }
}

fn status_json(status: &proto::InterfaceStatus) -> Value {
    json!({
        "name": status.name,
        "mac": status.mac,
        "link_up": status.link_up,
        "enabled": status.enabled,
        "provisioning": provisioning_label(status.provisioning),
        "config": status.config.as_ref().map(config_json),
        "capabilities": status.capabilities,
    })
}

fn print_status(status: &proto::InterfaceStatus) {
    let link = if status.link_up {
        "up".green()
    } else {
        "down".red()
    };
    let enabled = if status.enabled {
        "enabled".green()
    } else {
        "disabled".yellow()
    };

    println!(
        "{} link {}, {}, {}",
        status.name.cyan().bold(),
        link,
        enabled,
        provisioning_label(status.provisioning).magenta()
    );
    if !status.mac.is_empty() {
        println!("  {}: {}", "MAC".yellow(), status.mac);
    }
    if let Some(config) = &status.config {
        match proto::IpAssignment::try_from(config.assignment) {
            Ok(proto::IpAssignment::Static) => {
                println!("  {}: static", "Addressing".yellow());
                if let Some(s) = &config.static_config {
                    println!("  {}: {}", "Address".yellow(), s.address);
                    if !s.gateway.is_empty() {
                        println!("  {}: {}", "Gateway".yellow(), s.gateway);
                    }
                    if !s.dns_servers.is_empty() {
                        println!("  {}: {}", "DNS".yellow(), s.dns_servers.join(", "));
                    }
                    if !s.domain.is_empty() {
                        println!("  {}: {}", "Domain".yellow(), s.domain);
                    }
                }
            }
            _ => println!("  {}: dhcp", "Addressing".yellow()),
        }
    }
    if !status.capabilities.is_empty() {
        println!(
            "  {}: {}",
            "Capabilities".yellow(),
            status.capabilities.join(", ")
        );
    }
}

fn event_json(event: &proto::InterfaceEvent, timestamp: &chrono::DateTime<chrono::Utc>) -> Value {
    let (kind, detail) = match &event.event {
        Some(Event::Added(added)) => ("added", json!({ "mac": added.mac })),
        Some(Event::Removed(_)) => ("removed", json!({})),
        Some(Event::Link(link)) => ("link-changed", json!({ "up": link.up })),
        Some(Event::Config(change)) => (
            "configuration-changed",
            json!({ "config": change.config.as_ref().map(config_json) }),
        ),
        Some(Event::Operation(op)) => (
            "operation-completed",
            json!({
                "operation_id": op.operation_id,
                "kind": op.kind,
                "success": op.success,
                "error": op.error,
            }),
        ),
        None => ("unknown", json!({})),
    };

    json!({
        "timestamp": timestamp.to_rfc3339(),
        "iface": event.iface,
        "event": kind,
        "detail": detail,
    })
}

fn print_event(event: &proto::InterfaceEvent, timestamp: &chrono::DateTime<chrono::Utc>) {
    let stamp = format!("[{}]", timestamp.format("%H:%M:%S")).dimmed();

    match &event.event {
        Some(Event::Added(added)) => {
            if added.mac.is_empty() {
                println!("{} {} added", stamp, event.iface.cyan());
            } else {
                println!("{} {} added ({})", stamp, event.iface.cyan(), added.mac);
            }
        }
        Some(Event::Removed(_)) => println!("{} {} removed", stamp, event.iface.cyan()),
        Some(Event::Link(link)) => {
            let state = if link.up { "up".green() } else { "down".red() };
            println!("{} {} link {}", stamp, event.iface.cyan(), state);
        }
        Some(Event::Config(change)) => {
            println!("{} {} configuration changed", stamp, event.iface.cyan());
            if let Some(s) = change.config.as_ref().and_then(|c| c.static_config.as_ref()) {
                println!("  {}: {}", "Address".yellow(), s.address);
            }
        }
        Some(Event::Operation(op)) => {
            let result = if op.success {
                "succeeded".green()
            } else {
                "failed".red()
            };
            println!(
                "{} {} {} {} ({})",
                stamp,
                event.iface.cyan(),
                op.kind.yellow(),
                result,
                op.operation_id.dimmed()
            );
            if !op.error.is_empty() {
                println!("  {}", op.error.red());
            }
        }
        None => println!("{} {} unknown event", stamp, event.iface.cyan()),
    }
}
