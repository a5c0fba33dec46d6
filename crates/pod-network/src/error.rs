//! Error types for the reconcile path.
//!
//! Resolution failures live in [`crate::resolver::ResolveError`]; admission
//! failures in [`crate::validation::ValidationError`]. This enum covers what
//! a reconciliation pass can return to its controller.

use crate::projector::ProjectionFailure;
use thiserror::Error;

/// Errors returned by a reconciliation pass.
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A conditional write targeted a stale resourceVersion
    #[error("Write conflict on {0}")]
    Conflict(String),

    /// The object disappeared
    #[error("Not found: {0}")]
    NotFound(String),

    /// Every retry of a conditional write conflicted
    #[error("Gave up on {object} after {attempts} conflicting writes")]
    ConflictRetriesExhausted {
        /// kind/name of the object
        object: String,
        /// Number of write attempts made
        attempts: u32,
    },

    /// Adding the Ready condition would exceed the condition limit
    #[error("{object} would carry {count} conditions, at most {max} are allowed")]
    TooManyConditions {
        /// kind/name of the object
        object: String,
        /// Resulting number of conditions
        count: usize,
        /// Allowed maximum
        max: usize,
    },

    /// Object has no metadata.name
    #[error("{0} is missing metadata.name")]
    MissingName(&'static str),

    /// One or more claim devices could not be resolved to a network
    #[error("Could not resolve {} device(s) of ResourceClaim {claim}: {}", failures.len(), join(failures))]
    Projection {
        /// namespace/name of the claim
        claim: String,
        /// Per-device failures
        failures: Vec<ProjectionFailure>,
    },
}

fn join(failures: &[ProjectionFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Short CamelCase label, used for metrics and log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Kube(_) => "KubeError",
            Error::Serialization(_) => "SerializationError",
            Error::Conflict(_) => "Conflict",
            Error::NotFound(_) => "NotFound",
            Error::ConflictRetriesExhausted { .. } => "ConflictRetriesExhausted",
            Error::TooManyConditions { .. } => "TooManyConditions",
            Error::MissingName(_) => "MissingName",
            Error::Projection { .. } => "ResolutionFailed",
        }
    }
}

/// Maps a kube API error onto conflict / not-found where applicable.
pub(crate) fn classify(object: String, error: kube::Error) -> Error {
    match &error {
        kube::Error::Api(response) if response.code == 409 => Error::Conflict(object),
        kube::Error::Api(response) if response.code == 404 => Error::NotFound(object),
        _ => Error::Kube(error),
    }
}
