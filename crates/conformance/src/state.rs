//! Cluster state under test
//!
//! Collected either from a live cluster or from a recorded multi-document
//! YAML dump (`kubectl get -o yaml` output, `List` documents included).

use crds::{NetworkClass, PodNetwork, ResourceClaim, ResourceSlice, TargetKind};
use kube::api::{DynamicObject, ListParams};
use kube::discovery::{self, Scope};
use kube::{Api, Client, Resource, ResourceExt};
use pod_network::{NetworkIndex, ObservedClass, SharedIndex};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors while collecting cluster state.
#[derive(Debug, Error)]
pub enum StateError {
    /// Malformed YAML
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A document could not be interpreted
    #[error("document {index}: {message}")]
    Document {
        /// Zero-based document position
        index: usize,
        /// What went wrong
        message: String,
    },

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

/// An object of a NetworkClass target kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetObject {
    /// Name
    pub name: String,
    /// Namespace, for namespaced kinds
    pub namespace: Option<String>,
}

/// Everything the checks look at.
#[derive(Debug, Default)]
pub struct ClusterState {
    /// PodNetworks
    pub pod_networks: Vec<PodNetwork>,
    /// NetworkClasses with the scope of their target kind
    pub classes: Vec<ObservedClass>,
    /// NetworkClasses whose target kind is not served
    pub unserved_classes: Vec<NetworkClass>,
    /// ResourceSlices
    pub slices: Vec<ResourceSlice>,
    /// ResourceClaims
    pub claims: Vec<ResourceClaim>,
    /// Objects of every class target kind
    pub targets: HashMap<TargetKind, Vec<TargetObject>>,
}

impl ClusterState {
    /// Builds a network index over this state.
    pub fn index(&self) -> SharedIndex {
        let index = NetworkIndex::shared();
        index.reset_pod_networks(self.pod_networks.clone());
        index.reset_network_classes(self.classes.clone());
        index.reset_slices(self.slices.clone());
        index.reset_claims(&self.claims);
        index
    }

    /// Objects of a target kind.
    pub fn targets_of(&self, kind: &TargetKind) -> &[TargetObject] {
        self.targets.get(kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// Parses a recorded multi-document YAML dump.
    ///
    /// Documents of unknown kinds are kept as potential class targets. The
    /// scope of a target kind comes from a recorded CustomResourceDefinition
    /// when present, otherwise from whether its objects carry a namespace.
    pub fn from_yaml(input: &str) -> Result<Self, StateError> {
        let mut state = Self::default();
        let mut classes = Vec::new();
        let mut scopes: HashMap<TargetKind, bool> = HashMap::new();

        for (index, document) in serde_yaml::Deserializer::from_str(input).enumerate() {
            let value = Value::deserialize(document)?;
            for item in flatten_lists(value) {
                state.ingest(index, item, &mut classes, &mut scopes)?;
            }
        }

        for class in classes {
            let target = class.spec.target();
            let namespaced = scopes
                .get(&target)
                .copied()
                .unwrap_or_else(|| state.targets_of(&target).iter().any(|o| o.namespace.is_some()));
            state.classes.push(ObservedClass { class, namespaced });
        }
        info!(
            pod_networks = state.pod_networks.len(),
            classes = state.classes.len(),
            slices = state.slices.len(),
            claims = state.claims.len(),
            "Loaded recorded state"
        );
        Ok(state)
    }

    fn ingest(
        &mut self,
        index: usize,
        value: Value,
        classes: &mut Vec<NetworkClass>,
        scopes: &mut HashMap<TargetKind, bool>,
    ) -> Result<(), StateError> {
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);
        let (Some(api_version), Some(kind)) = (field("apiVersion"), field("kind")) else {
            return Err(StateError::Document {
                index,
                message: "missing apiVersion or kind".to_string(),
            });
        };
        let invalid = |e: serde_yaml::Error| StateError::Document {
            index,
            message: format!("{kind}: {e}"),
        };
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group.to_string(), version.to_string()),
            None => (String::new(), api_version.clone()),
        };

        if group == PodNetwork::group(&()) && kind == PodNetwork::kind(&()) {
            self.pod_networks.push(serde_yaml::from_value(value).map_err(invalid)?);
        } else if group == NetworkClass::group(&()) && kind == NetworkClass::kind(&()) {
            classes.push(serde_yaml::from_value(value).map_err(invalid)?);
        } else if group == ResourceSlice::group(&()) && kind == ResourceSlice::kind(&()) {
            self.slices.push(serde_yaml::from_value(value).map_err(invalid)?);
        } else if group == ResourceClaim::group(&()) && kind == ResourceClaim::kind(&()) {
            self.claims.push(serde_yaml::from_value(value).map_err(invalid)?);
        } else if group == "apiextensions.k8s.io" && kind == "CustomResourceDefinition" {
            record_crd_scopes(&value, scopes);
        } else {
            let metadata = value.get("metadata");
            let meta = |name: &str| metadata.and_then(|m| m.get(name)).and_then(Value::as_str).map(str::to_string);
            let Some(name) = meta("name") else {
                return Err(StateError::Document {
                    index,
                    message: format!("{kind} without metadata.name"),
                });
            };
            debug!(%api_version, %kind, %name, "Recorded target object");
            self.targets
                .entry(TargetKind { group, version, kind })
                .or_default()
                .push(TargetObject {
                    name,
                    namespace: meta("namespace"),
                });
        }
        Ok(())
    }

    /// Lists the state from a live cluster, discovering each class target.
    pub async fn from_cluster(client: Client) -> Result<Self, StateError> {
        let lp = ListParams::default();
        let mut state = Self {
            pod_networks: Api::<PodNetwork>::all(client.clone()).list(&lp).await?.items,
            slices: Api::<ResourceSlice>::all(client.clone()).list(&lp).await?.items,
            claims: Api::<ResourceClaim>::all(client.clone()).list(&lp).await?.items,
            ..Self::default()
        };
        let classes = Api::<NetworkClass>::all(client.clone()).list(&lp).await?.items;

        for class in classes {
            let target = class.spec.target();
            match discovery::pinned_kind(&client, &target.to_gvk()).await {
                Ok((resource, caps)) => {
                    if !state.targets.contains_key(&target) {
                        let objects = Api::<DynamicObject>::all_with(client.clone(), &resource)
                            .list(&lp)
                            .await?
                            .items
                            .iter()
                            .map(|o| TargetObject {
                                name: o.name_any(),
                                namespace: o.namespace(),
                            })
                            .collect();
                        state.targets.insert(target, objects);
                    }
                    state.classes.push(ObservedClass {
                        class,
                        namespaced: caps.scope == Scope::Namespaced,
                    });
                }
                Err(error) => {
                    warn!(class = %class.name_any(), %target, %error, "Target kind not served");
                    state.unserved_classes.push(class);
                }
            }
        }
        info!(
            pod_networks = state.pod_networks.len(),
            classes = state.classes.len(),
            slices = state.slices.len(),
            claims = state.claims.len(),
            "Listed cluster state"
        );
        Ok(state)
    }
}

/// Expands `List` documents into their items.
fn flatten_lists(value: Value) -> Vec<Value> {
    if value.is_null() {
        return Vec::new();
    }
    let is_list = value
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind == "List" || kind.ends_with("List"));
    match value.get("items") {
        Some(Value::Sequence(items)) if is_list => items.iter().cloned().flat_map(flatten_lists).collect(),
        _ => vec![value],
    }
}

fn record_crd_scopes(crd: &Value, scopes: &mut HashMap<TargetKind, bool>) {
    let spec = crd.get("spec");
    let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);
    let (Some(group), Some(kind)) = (
        text(spec.and_then(|s| s.get("group"))),
        text(spec.and_then(|s| s.get("names")).and_then(|n| n.get("kind"))),
    ) else {
        return;
    };
    let namespaced = text(spec.and_then(|s| s.get("scope"))).as_deref() == Some("Namespaced");
    let versions = spec
        .and_then(|s| s.get("versions"))
        .and_then(Value::as_sequence)
        .into_iter()
        .flatten()
        .filter_map(|v| text(v.get("name")));
    for version in versions {
        scopes.insert(
            TargetKind {
                group: group.clone(),
                version,
                kind: kind.clone(),
            },
            namespaced,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORDED: &str = r#"
apiVersion: multinetwork.k8s.io/v1alpha1
kind: PodNetwork
metadata:
  name: blue-network
spec:
  provider: foo.io/bar
---
apiVersion: multinetwork.k8s.io/v1alpha1
kind: NetworkClass
metadata:
  name: ovn-kubernetes
spec:
  group: k8s.ovn.org
  version: v1
  kind: UserDefinedNetwork
---
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: userdefinednetworks.k8s.ovn.org
spec:
  group: k8s.ovn.org
  names:
    kind: UserDefinedNetwork
  scope: Namespaced
  versions:
    - name: v1
---
apiVersion: v1
kind: List
items:
  - apiVersion: k8s.ovn.org/v1
    kind: UserDefinedNetwork
    metadata:
      name: blue-network
      namespace: tenant-a
  - apiVersion: resource.k8s.io/v1
    kind: ResourceSlice
    metadata:
      name: node-a-net
    spec:
      driver: net.example.com
      nodeName: node-a
      pool:
        name: node-a
        generation: 1
        resourceSliceCount: 1
      devices:
        - name: blue-network-resource
          attributes:
            podNetwork:
              string: blue-network
            networkClass:
              string: ovn-kubernetes
            podNetworkNamespace:
              string: tenant-a
"#;

    #[test]
    fn test_recorded_state_is_sorted_by_kind() {
        let state = ClusterState::from_yaml(RECORDED).unwrap();

        assert_eq!(state.pod_networks.len(), 1);
        assert!(state.pod_networks[0].spec.enabled);
        assert_eq!(state.classes.len(), 1);
        assert!(state.classes[0].namespaced);
        assert_eq!(state.slices.len(), 1);
        assert_eq!(state.slices[0].spec.devices[0].name, "blue-network-resource");

        let target = state.classes[0].class.spec.target();
        assert_eq!(
            state.targets_of(&target),
            &[TargetObject {
                name: "blue-network".to_string(),
                namespace: Some("tenant-a".to_string()),
            }]
        );
    }

    #[test]
    fn test_scope_falls_back_to_object_namespaces() {
        let input = r#"
apiVersion: multinetwork.k8s.io/v1alpha1
kind: NetworkClass
metadata:
  name: cluster-net
spec:
  group: example.com
  version: v1
  kind: Network
---
apiVersion: example.com/v1
kind: Network
metadata:
  name: red-network
"#;
        let state = ClusterState::from_yaml(input).unwrap();
        assert!(!state.classes[0].namespaced);
    }

    #[test]
    fn test_document_without_kind_is_rejected() {
        let err = ClusterState::from_yaml("metadata:\n  name: x\n").unwrap_err();
        assert!(matches!(err, StateError::Document { index: 0, .. }));
    }

    #[test]
    fn test_index_serves_recorded_objects() {
        let state = ClusterState::from_yaml(RECORDED).unwrap();
        let snapshot = state.index().snapshot();
        assert!(snapshot.pod_network("blue-network").is_some());
        assert!(snapshot.network_class("ovn-kubernetes").is_some());
    }
}
