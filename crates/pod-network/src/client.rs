//! Cluster client seam
//!
//! Reconcilers read fresh objects and perform conditional status writes
//! through this trait. The concrete implementation talks to the API server;
//! tests use [`crate::mock::MockClusterClient`].

use crate::error::{classify, Error};
use crds::{AllocatedDeviceStatus, PodNetwork, PodNetworkStatus, ResourceClaim};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;

/// Reads and conditional status writes against the cluster.
///
/// Writes carry the last observed `resourceVersion` as a precondition and
/// fail with [`Error::Conflict`] when it is stale, or [`Error::NotFound`]
/// when the object was deleted in the meantime.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetches a PodNetwork straight from the API server.
    async fn get_pod_network(&self, name: &str) -> Result<Option<PodNetwork>, Error>;

    /// Replaces the status of a PodNetwork.
    async fn replace_pod_network_status(
        &self,
        name: &str,
        resource_version: Option<&str>,
        status: &PodNetworkStatus,
    ) -> Result<PodNetwork, Error>;

    /// Fetches a ResourceClaim straight from the API server.
    async fn get_resource_claim(&self, namespace: &str, name: &str) -> Result<Option<ResourceClaim>, Error>;

    /// Replaces `status.devices` of a ResourceClaim.
    async fn replace_claim_devices(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        devices: &[AllocatedDeviceStatus],
    ) -> Result<ResourceClaim, Error>;
}

/// [`ClusterClient`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    field_manager: String,
}

impl KubeClusterClient {
    /// Creates a client writing under the given field manager.
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..PatchParams::default()
        }
    }
}

/// Merge patch body; `metadata.resourceVersion` makes the API server reject
/// the patch with 409 when the object moved on.
fn conditional_status_patch(resource_version: Option<&str>, status: serde_json::Value) -> serde_json::Value {
    match resource_version {
        Some(rv) => json!({ "metadata": { "resourceVersion": rv }, "status": status }),
        None => json!({ "status": status }),
    }
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_pod_network(&self, name: &str) -> Result<Option<PodNetwork>, Error> {
        let api: Api<PodNetwork> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn replace_pod_network_status(
        &self,
        name: &str,
        resource_version: Option<&str>,
        status: &PodNetworkStatus,
    ) -> Result<PodNetwork, Error> {
        let api: Api<PodNetwork> = Api::all(self.client.clone());
        let patch = conditional_status_patch(resource_version, serde_json::to_value(status)?);
        api.patch_status(name, &self.patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify(format!("PodNetwork/{name}"), e))
    }

    async fn get_resource_claim(&self, namespace: &str, name: &str) -> Result<Option<ResourceClaim>, Error> {
        let api: Api<ResourceClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn replace_claim_devices(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        devices: &[AllocatedDeviceStatus],
    ) -> Result<ResourceClaim, Error> {
        let api: Api<ResourceClaim> = Api::namespaced(self.client.clone(), namespace);
        let patch = conditional_status_patch(resource_version, json!({ "devices": devices }));
        api.patch_status(name, &self.patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify(format!("ResourceClaim/{namespace}/{name}"), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_carries_resource_version_precondition() {
        let patch = conditional_status_patch(Some("42"), json!({"conditions": []}));
        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert_eq!(patch["status"]["conditions"], json!([]));
    }

    #[test]
    fn patch_without_version_is_unconditional() {
        let patch = conditional_status_patch(None, json!({}));
        assert!(patch.get("metadata").is_none());
    }
}
