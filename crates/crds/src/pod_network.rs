//! PodNetwork CRD
//!
//! Cluster-scoped identity of a logical pod network. Administrators own the
//! spec; the owning implementation reports conditions; the readiness
//! reconciler authors the `Ready` condition.

use crate::condition::{Condition, READY};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maximum number of conditions a PodNetwork may carry.
pub const MAX_CONDITIONS: usize = 5;

/// Maximum provider length.
pub const MAX_PROVIDER_LEN: usize = 253;

/// `<dns-subdomain>/<name>`, the domain carrying at least one dot.
pub const PROVIDER_PATTERN: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)+/[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "multinetwork.k8s.io",
    version = "v1alpha1",
    kind = "PodNetwork",
    shortname = "podnet",
    status = "PodNetworkStatus",
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".spec.provider"}"#,
    printcolumn = r#"{"name":"Enabled","type":"boolean","jsonPath":".spec.enabled"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PodNetworkSpec {
    /// Administrative switch; a disabled network is never Ready
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Domain-prefixed name of the owning implementation (e.g. "foo.io/bar")
    #[schemars(
        length(min = 1, max = 253),
        extend("pattern" = PROVIDER_PATTERN),
        extend("x-kubernetes-validations" = [{"rule": "self == oldSelf", "message": "provider is immutable"}])
    )]
    pub provider: String,

    /// Implementation-specific payload, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub parameters: Option<serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodNetworkStatus {
    /// Conditions, map-keyed by type
    #[serde(default)]
    #[schemars(
        length(max = 5),
        extend("x-kubernetes-list-type" = "map", "x-kubernetes-list-map-keys" = ["type"])
    )]
    pub conditions: Vec<Condition>,
}

impl PodNetwork {
    /// Conditions as stored, or the seeded `Ready=Unknown/Pending` when the
    /// object has never been reconciled.
    pub fn effective_conditions(&self) -> Vec<Condition> {
        match &self.status {
            Some(status) if !status.conditions.is_empty() => status.conditions.clone(),
            _ => vec![Condition::pending_ready()],
        }
    }

    /// Conditions authored by the implementation, i.e. every type but `Ready`.
    pub fn implementation_conditions(&self) -> impl Iterator<Item = &Condition> {
        self.status
            .iter()
            .flat_map(|s| s.conditions.iter())
            .filter(|c| c.type_ != READY)
    }

    /// The stored `Ready` condition, if any.
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| crate::condition::find_condition(&s.conditions, READY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ConditionStatus;
    use kube::CustomResourceExt;

    #[test]
    fn enabled_defaults_to_true() {
        let spec: PodNetworkSpec = serde_json::from_value(serde_json::json!({
            "provider": "foo.io/bar"
        }))
        .unwrap();
        assert!(spec.enabled);
        assert!(spec.parameters.is_none());
    }

    #[test]
    fn parameters_pass_through_unchanged() {
        let raw = serde_json::json!({
            "provider": "foo.io/bar",
            "parameters": {"vlan": 42, "nested": {"mtu": 9000}}
        });
        let spec: PodNetworkSpec = serde_json::from_value(raw.clone()).unwrap();
        let back = serde_json::to_value(&spec).unwrap();
        assert_eq!(back["parameters"], raw["parameters"]);
    }

    #[test]
    fn unreconciled_network_is_seeded_pending() {
        let pn = PodNetwork::new(
            "net-dataplane",
            PodNetworkSpec {
                enabled: true,
                provider: "foo.io/bar".to_string(),
                parameters: None,
            },
        );
        let conditions = pn.effective_conditions();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, READY);
        assert_eq!(conditions[0].status, ConditionStatus::Unknown);
        assert_eq!(conditions[0].reason, "Pending");
    }

    #[test]
    fn crd_is_cluster_scoped() {
        let crd = PodNetwork::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.group, "multinetwork.k8s.io");
    }

    #[test]
    fn crd_rejects_malformed_provider() {
        let crd = serde_json::to_value(PodNetwork::crd()).unwrap();
        let provider = &crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["spec"]["properties"]["provider"];
        assert_eq!(provider["pattern"], PROVIDER_PATTERN);
        assert_eq!(provider["maxLength"], 253);
    }
}
