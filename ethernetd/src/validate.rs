//! Admission checks run before any request reaches the tracker.
//!
//! The checks have a fixed order: service started, interface name given,
//! required feature enabled, interface tracked. Callers relying on a
//! specific rejection see the same one every time; repeating a rejected
//! call yields the identical error and no side effects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::config::{Feature, SystemFeatures};
use crate::tracker::InterfaceTracker;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("ethernet service is not started")]
    NotStarted,
    #[error("no interface name given")]
    EmptyInterfaceName,
    #[error("{op} is only available with the {feature} feature")]
    FeatureNotEnabled { op: &'static str, feature: Feature },
    #[error("interface {0} is not tracked")]
    UntrackedInterface(String),
}

#[derive(Clone)]
pub struct RequestValidator {
    started: Arc<AtomicBool>,
    features: SystemFeatures,
    tracker: Arc<dyn InterfaceTracker>,
}

impl RequestValidator {
    pub fn new(
        started: Arc<AtomicBool>,
        features: SystemFeatures,
        tracker: Arc<dyn InterfaceTracker>,
    ) -> Self {
        Self {
            started,
            features,
            tracker,
        }
    }

    pub fn ensure_started(&self) -> Result<(), ServiceError> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ServiceError::NotStarted)
        }
    }

    pub fn ensure_iface_given(&self, iface: &str) -> Result<(), ServiceError> {
        if iface.is_empty() {
            Err(ServiceError::EmptyInterfaceName)
        } else {
            Ok(())
        }
    }

    pub fn ensure_feature(&self, feature: Feature, op: &'static str) -> Result<(), ServiceError> {
        if self.features.has(feature) {
            Ok(())
        } else {
            Err(ServiceError::FeatureNotEnabled { op, feature })
        }
    }

    pub fn ensure_tracked(&self, iface: &str) -> Result<(), ServiceError> {
        if self.tracker.is_tracking_interface(iface) {
            Ok(())
        } else {
            Err(ServiceError::UntrackedInterface(iface.to_string()))
        }
    }

    /// The full gate for operations that mutate interface networks.
    pub fn ensure_network_mutation_allowed(
        &self,
        iface: &str,
        op: &'static str,
    ) -> Result<(), ServiceError> {
        self.ensure_started()?;
        self.ensure_iface_given(iface)?;
        self.ensure_feature(Feature::NetworkManagement, op)?;
        self.ensure_tracked(iface)
    }
}
