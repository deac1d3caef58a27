//! ethernetd manages the ethernet interfaces of a host: it tracks the
//! links matching a configurable name pattern, persists an IP
//! configuration per interface, and applies or clears those
//! configurations on request. Clients talk to it over gRPC on a Unix
//! domain socket.

use miette::Diagnostic;
use thiserror::Error;

pub mod config;
pub mod ipconfig;
pub mod platform;
pub mod service;
pub mod store;
pub mod tracker;
pub mod validate;

// Generated from proto/ethernetd.proto
pub mod proto {
    tonic::include_proto!("ethernetd");
}

#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Platform(#[from] platform::PlatformError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub use service::EthernetService;
pub use tracker::{EthernetTracker, InterfaceTracker};
