//! # Pod network conformance
//!
//! Validates that a cluster honours the attachment contract: classes are
//! backed by advertised devices, devices name real network objects, claim
//! allocations and status entries resolve back to advertised devices, and
//! PodNetwork readiness is current.
//!
//! State comes from a live cluster ([`ClusterState::from_cluster`]) or a
//! recorded YAML dump ([`ClusterState::from_yaml`]). Checks share the
//! resolver and readiness logic of the runtime controller.

pub mod checks;
pub mod report;
pub mod state;

pub use checks::run_checks;
pub use report::{Check, Finding, Report, Severity};
pub use state::{ClusterState, StateError, TargetObject};
