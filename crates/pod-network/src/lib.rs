//! # Pod network reconciliation core
//!
//! The logic shared by the runtime controller and the conformance checker:
//!
//! - **Network identity store** ([`index`]): watch-fed, copy-on-write index
//!   over PodNetworks, NetworkClasses, ResourceSlices and claim references
//! - **Readiness reconciler** ([`readiness`]): computes and persists the
//!   `Ready` condition of each PodNetwork
//! - **Device resolver** ([`resolver`]): maps a bound device back to its
//!   network by attribute lookup
//! - **Claim status projector** ([`projector`]): writes the resolved network
//!   into ResourceClaim status
//! - **Admission validation** ([`validation`])
//!
//! Cluster access goes through [`ClusterClient`]; enable the `test-util`
//! feature for an in-memory [`MockClusterClient`].

pub mod client;
pub mod error;
pub mod index;
pub mod projector;
pub mod readiness;
pub mod resolver;
pub mod validation;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
#[cfg(any(test, feature = "test-util"))]
pub mod test_utils;

pub use client::{ClusterClient, KubeClusterClient};
pub use error::Error;
pub use index::{ClaimKey, NetworkIndex, ObservedClass, PoolKey, SharedIndex, Snapshot};
pub use projector::{ClaimProjector, ProjectionFailure};
pub use readiness::{NetworkPhase, Readiness, ReadinessReconciler};
pub use resolver::{DeviceRef, ResolveError};
pub use validation::ValidationError;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockClusterClient;

/// What a reconciliation pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stored status already matched; nothing written
    Unchanged,
    /// Status written
    Updated,
    /// Object deleted while reconciling; result discarded
    Gone,
}

impl Outcome {
    /// Label for metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Unchanged => "unchanged",
            Outcome::Updated => "updated",
            Outcome::Gone => "gone",
        }
    }
}
