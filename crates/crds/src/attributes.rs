//! Standardized device attributes
//!
//! The fixed vocabulary implementations use to tag an advertised device as
//! an attachment to a pod network, and the shape of the reference written
//! back into claim status. Claim selectors and advertised attributes must
//! agree on these exact names.

use serde::{Deserialize, Serialize};

/// Identity name of the network the device attaches to. Required.
pub const POD_NETWORK: &str = "podNetwork";

/// Namespace of the network object. Required iff the class targets a
/// namespaced kind.
pub const POD_NETWORK_NAMESPACE: &str = "podNetworkNamespace";

/// Name of the NetworkClass the network object belongs to. Required.
pub const NETWORK_CLASS: &str = "networkClass";

/// Key under `status.devices[].data` holding the projected reference.
pub const POD_NETWORK_REF: &str = "podNetworkRef";

/// Condition type on a claim status entry reporting projection outcome.
pub const POD_NETWORK_RESOLVED: &str = "PodNetworkResolved";

/// Reason on a successful `PodNetworkResolved` condition.
pub const REASON_RESOLVED: &str = "Resolved";

/// True when an advertised attribute name carries the given standardized key.
///
/// DRA attribute names are either bare (`podNetwork`) or qualified with a
/// domain (`example.com/podNetwork`).
pub fn attribute_matches(name: &str, key: &str) -> bool {
    match name.rsplit_once('/') {
        Some((domain, id)) => !domain.is_empty() && id == key,
        None => name == key,
    }
}

/// Resolved network reference projected into claim status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct PodNetworkRef {
    /// Network identity name
    pub pod_network: String,

    /// Classification name
    pub network_class: String,

    /// Namespace of the network object, for namespaced target kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_network_namespace: Option<String>,
}

impl std::fmt::Display for PodNetworkRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.pod_network_namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.network_class, ns, self.pod_network),
            None => write!(f, "{}/{}", self.network_class, self.pod_network),
        }
    }
}
