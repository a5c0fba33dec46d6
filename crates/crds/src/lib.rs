//! Pod network CRD definitions
//!
//! Kubernetes resources for multi-network pod attachment:
//! - `PodNetwork`: cluster-scoped network identity with readiness conditions
//! - `NetworkClass`: classification pointing at an implementation-owned kind
//! - the standardized device attribute vocabulary
//! - serde views of the DRA `ResourceSlice` and `ResourceClaim` objects

pub mod attributes;
pub mod condition;
pub mod dra;
pub mod network_class;
pub mod pod_network;

pub use condition::*;
pub use dra::*;
pub use network_class::*;
pub use pod_network::*;
