//! Mock ClusterClient for unit testing
//!
//! Stores objects in memory and emulates the API server's optimistic
//! concurrency: every write bumps `resourceVersion`, and a write carrying a
//! stale one fails with a conflict.

use crate::client::ClusterClient;
use crate::error::Error;
use crds::{AllocatedDeviceStatus, PodNetwork, PodNetworkStatus, ResourceClaim, ResourceClaimStatus};
use kube::ResourceExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Mock ClusterClient for testing
#[derive(Clone, Default)]
pub struct MockClusterClient {
    pod_networks: Arc<Mutex<HashMap<String, PodNetwork>>>,
    claims: Arc<Mutex<HashMap<(String, String), ResourceClaim>>>,
    // Counter for resourceVersions
    next_rv: Arc<Mutex<u64>>,
    // Writes that will fail with a conflict before one succeeds
    pending_conflicts: Arc<Mutex<u32>>,
    status_writes: Arc<Mutex<usize>>,
}

impl MockClusterClient {
    /// Create an empty mock client
    pub fn new() -> Self {
        Self {
            next_rv: Arc::new(Mutex::new(100)),
            ..Self::default()
        }
    }

    fn bump_rv(&self) -> String {
        let mut rv = self.next_rv.lock();
        *rv += 1;
        rv.to_string()
    }

    /// Add a PodNetwork to the mock store (for test setup)
    pub fn insert_pod_network(&self, pod_network: PodNetwork) {
        self.pod_networks.lock().insert(pod_network.name_any(), pod_network);
    }

    /// Add a ResourceClaim to the mock store (for test setup)
    pub fn insert_claim(&self, claim: ResourceClaim) {
        let key = (claim.namespace().unwrap_or_default(), claim.name_any());
        self.claims.lock().insert(key, claim);
    }

    /// Stored PodNetwork
    pub fn pod_network(&self, name: &str) -> Option<PodNetwork> {
        self.pod_networks.lock().get(name).cloned()
    }

    /// Stored ResourceClaim
    pub fn claim(&self, namespace: &str, name: &str) -> Option<ResourceClaim> {
        self.claims
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Make the next `count` status writes fail as if another writer got
    /// there first. Each injected conflict also bumps the stored version.
    pub fn inject_conflicts(&self, count: u32) {
        *self.pending_conflicts.lock() = count;
    }

    /// Number of successful status writes
    pub fn status_writes(&self) -> usize {
        *self.status_writes.lock()
    }

    fn take_conflict(&self) -> bool {
        let mut pending = self.pending_conflicts.lock();
        if *pending > 0 {
            *pending -= 1;
            true
        } else {
            false
        }
    }
}

fn is_stale(stored: Option<&str>, expected: Option<&str>) -> bool {
    matches!(expected, Some(expected) if stored != Some(expected))
}

#[async_trait::async_trait]
impl ClusterClient for MockClusterClient {
    async fn get_pod_network(&self, name: &str) -> Result<Option<PodNetwork>, Error> {
        Ok(self.pod_network(name))
    }

    async fn replace_pod_network_status(
        &self,
        name: &str,
        resource_version: Option<&str>,
        status: &PodNetworkStatus,
    ) -> Result<PodNetwork, Error> {
        let object = format!("PodNetwork/{name}");
        let conflict = self.take_conflict();
        let mut store = self.pod_networks.lock();
        let stored = store.get_mut(name).ok_or_else(|| Error::NotFound(object.clone()))?;
        if conflict {
            stored.metadata.resource_version = Some(self.bump_rv());
            return Err(Error::Conflict(object));
        }
        if is_stale(stored.metadata.resource_version.as_deref(), resource_version) {
            return Err(Error::Conflict(object));
        }
        stored.status = Some(status.clone());
        stored.metadata.resource_version = Some(self.bump_rv());
        *self.status_writes.lock() += 1;
        Ok(stored.clone())
    }

    async fn get_resource_claim(&self, namespace: &str, name: &str) -> Result<Option<ResourceClaim>, Error> {
        Ok(self.claim(namespace, name))
    }

    async fn replace_claim_devices(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        devices: &[AllocatedDeviceStatus],
    ) -> Result<ResourceClaim, Error> {
        let object = format!("ResourceClaim/{namespace}/{name}");
        let conflict = self.take_conflict();
        let mut store = self.claims.lock();
        let stored = store
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::NotFound(object.clone()))?;
        if conflict {
            stored.metadata.resource_version = Some(self.bump_rv());
            return Err(Error::Conflict(object));
        }
        if is_stale(stored.metadata.resource_version.as_deref(), resource_version) {
            return Err(Error::Conflict(object));
        }
        stored
            .status
            .get_or_insert_with(ResourceClaimStatus::default)
            .devices = devices.to_vec();
        stored.metadata.resource_version = Some(self.bump_rv());
        *self.status_writes.lock() += 1;
        Ok(stored.clone())
    }
}
