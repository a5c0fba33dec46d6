//! Controller-specific error types.

use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Pod Network Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Reconciliation pass failed
    #[error(transparent)]
    Reconcile(#[from] pod_network::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Health/metrics server error
    #[error("HTTP server error: {0}")]
    Server(#[from] std::io::Error),
}

impl ControllerError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ControllerError::Kube(_) => "KubeError",
            ControllerError::Reconcile(e) => e.reason(),
            ControllerError::InvalidConfig(_) => "InvalidConfig",
            ControllerError::Watch(_) => "WatchError",
            ControllerError::Metrics(_) => "MetricsError",
            ControllerError::Server(_) => "ServerError",
        }
    }
}
