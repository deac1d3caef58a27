use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use ethernetd::config::Settings;
use ethernetd::platform::system::SystemLinkManager;
use ethernetd::store::IpConfigStore;
use ethernetd::tracker::InterfaceTracker;
use ethernetd::{EthernetService, EthernetTracker, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command line arguments for the ethernetd daemon
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to the Unix socket to listen on
    #[clap(short, long)]
    socket: Option<String>,

    /// Path to a KDL configuration file to load on startup
    #[clap(short = 'c', long = "config")]
    config_file: Option<String>,

    /// Directory for persisted interface configurations
    #[clap(long = "state-dir")]
    state_dir: Option<String>,

    /// Validate configuration file only (dry run)
    #[clap(short = 'n', long = "dry-run")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut settings = Settings::load(args.config_file.as_deref().map(Path::new))?;
    if let Some(socket) = args.socket {
        settings.socket = socket;
    }
    if let Some(state_dir) = args.state_dir {
        settings.state_dir = state_dir.into();
    }

    if args.dry_run {
        println!("Configuration validation successful");
        println!("\nConfiguration Summary:");
        println!("  socket:          {}", settings.socket);
        println!("  state dir:       {}", settings.state_dir.display());
        println!("  interface regex: {}", settings.interface_regex.as_str());
        println!("  scan interval:   {:?}", settings.scan_interval);
        println!("  seeded ifaces:   {}", settings.seeds.len());
        return Ok(());
    }

    let store = IpConfigStore::new(&settings.state_dir)?;
    let platform = Arc::new(SystemLinkManager::new());
    let tracker = Arc::new(EthernetTracker::new(
        platform,
        store,
        settings.interface_regex.clone(),
        settings.seeds.clone(),
    )?);

    // Discover interfaces before accepting requests
    tracker.refresh()?;
    info!(
        "tracking {} interface(s) at startup",
        tracker.list_interfaces().len()
    );
    tracker.clone().start(settings.scan_interval);

    let service = EthernetService::new(
        Arc::clone(&tracker) as Arc<dyn InterfaceTracker>,
        settings.features.clone(),
    );
    service.start();

    info!("starting ethernetd on socket: {}", settings.socket);
    service.serve(&settings.socket).await?;

    Ok(())
}
