//! NetworkClass CRD
//!
//! Maps a classification name to the implementation-owned object kind whose
//! instances are pod networks. Immutable once created.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "multinetwork.k8s.io",
    version = "v1alpha1",
    kind = "NetworkClass",
    shortname = "netclass",
    printcolumn = r#"{"name":"Group","type":"string","jsonPath":".spec.group"}"#,
    printcolumn = r#"{"name":"Kind","type":"string","jsonPath":".spec.kind"}"#
)]
#[serde(rename_all = "camelCase")]
#[schemars(extend("x-kubernetes-validations" = [{"rule": "self == oldSelf", "message": "spec is immutable"}]))]
pub struct NetworkClassSpec {
    /// API group of the target kind (empty for the core group)
    #[serde(default)]
    pub group: String,

    /// API version of the target kind
    pub version: String,

    /// Target kind, e.g. "UserDefinedNetwork"
    pub kind: String,
}

/// Group/version/kind of an implementation-owned network object type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKind {
    /// API group
    pub group: String,
    /// API version
    pub version: String,
    /// Kind
    pub kind: String,
}

impl TargetKind {
    /// Converts into kube's GVK for discovery.
    pub fn to_gvk(&self) -> kube::core::GroupVersionKind {
        kube::core::GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    /// `group/version` as written in `apiVersion`.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

impl NetworkClassSpec {
    /// The target kind this class points at.
    pub fn target(&self) -> TargetKind {
        TargetKind {
            group: self.group.clone(),
            version: self.version.clone(),
            kind: self.kind.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_for_named_and_core_groups() {
        let spec = NetworkClassSpec {
            group: "k8s.ovn.org".to_string(),
            version: "v1".to_string(),
            kind: "UserDefinedNetwork".to_string(),
        };
        assert_eq!(spec.target().api_version(), "k8s.ovn.org/v1");

        let core = NetworkClassSpec {
            group: String::new(),
            version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
        };
        assert_eq!(core.target().api_version(), "v1");
    }
}
