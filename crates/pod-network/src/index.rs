//! Network identity store
//!
//! An in-memory index over the objects the reconcilers cross-reference:
//! PodNetworks by name, NetworkClasses by name and by target kind,
//! ResourceSlices by `(driver, pool)`, and the network references each
//! ResourceClaim has been projected to.
//!
//! The index is fed by watch events and read through copy-on-write
//! snapshots: a reader clones an `Arc` under a short read lock and then
//! reads without holding any lock, so a long reconciliation never blocks
//! writers or other readers. Writers clone the snapshot only when a reader
//! still holds it.

use crate::resolver::{self, DeviceRef, ResolveError};
use crds::attributes::{PodNetworkRef, POD_NETWORK_REF};
use crds::{NetworkClass, PodNetwork, ResourceClaim, ResourceSlice, TargetKind};
use kube::ResourceExt;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared handle to the index.
pub type SharedIndex = Arc<NetworkIndex>;

/// `(driver, pool)` identifying a device pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey {
    /// Driver name
    pub driver: String,
    /// Pool name
    pub pool: String,
}

impl PoolKey {
    /// Creates a pool key.
    pub fn new(driver: impl Into<String>, pool: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            pool: pool.into(),
        }
    }
}

/// `namespace/name` of a ResourceClaim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClaimKey {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ClaimKey {
    /// Key of a claim object.
    pub fn of(claim: &ResourceClaim) -> Self {
        Self {
            namespace: claim.namespace().unwrap_or_default(),
            name: claim.name_any(),
        }
    }
}

impl std::fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A NetworkClass together with the scope of its target kind.
#[derive(Debug, Clone)]
pub struct ClassEntry {
    /// The class object
    pub class: Arc<NetworkClass>,
    /// Whether the target kind is namespaced
    pub namespaced: bool,
}

impl ClassEntry {
    /// Target kind of the class.
    pub fn target(&self) -> TargetKind {
        self.class.spec.target()
    }
}

/// A NetworkClass as observed by a watcher, with its scope discovered.
#[derive(Debug, Clone)]
pub struct ObservedClass {
    /// The class object
    pub class: NetworkClass,
    /// Whether the target kind is namespaced
    pub namespaced: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ClaimRecord {
    pools: BTreeSet<PoolKey>,
    refs: BTreeSet<PodNetworkRef>,
}

/// Immutable view of the index at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pod_networks: HashMap<String, Arc<PodNetwork>>,
    classes: HashMap<String, ClassEntry>,
    classes_by_kind: HashMap<TargetKind, BTreeSet<String>>,
    slices: HashMap<String, Arc<ResourceSlice>>,
    slices_by_pool: HashMap<PoolKey, BTreeSet<String>>,
    claims: HashMap<ClaimKey, ClaimRecord>,
    claims_by_pool: HashMap<PoolKey, BTreeSet<ClaimKey>>,
    claims_by_network: HashMap<String, BTreeSet<ClaimKey>>,
}

/// Watch-fed store with copy-on-write snapshots.
#[derive(Debug, Default)]
pub struct NetworkIndex {
    current: RwLock<Arc<Snapshot>>,
}

impl NetworkIndex {
    /// Creates an empty shared index.
    pub fn shared() -> SharedIndex {
        Arc::new(Self::default())
    }

    /// Current snapshot. Cheap; holds no lock once returned.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    fn update<T>(&self, f: impl FnOnce(&mut Snapshot) -> T) -> T {
        let mut current = self.current.write();
        f(Arc::make_mut(&mut current))
    }

    // === PodNetwork ===

    /// Inserts or replaces a PodNetwork.
    pub fn apply_pod_network(&self, pod_network: PodNetwork) {
        let name = pod_network.name_any();
        self.update(|s| s.pod_networks.insert(name, Arc::new(pod_network)));
    }

    /// Removes a PodNetwork.
    pub fn delete_pod_network(&self, name: &str) {
        self.update(|s| s.pod_networks.remove(name));
    }

    /// Replaces every PodNetwork after a relist.
    pub fn reset_pod_networks(&self, pod_networks: Vec<PodNetwork>) {
        let fresh = pod_networks
            .into_iter()
            .map(|pn| (pn.name_any(), Arc::new(pn)))
            .collect();
        self.update(|s| s.pod_networks = fresh);
    }

    // === NetworkClass ===

    /// Inserts or replaces a NetworkClass.
    pub fn apply_network_class(&self, observed: ObservedClass) {
        self.update(|s| s.insert_class(observed));
    }

    /// Removes a NetworkClass.
    pub fn delete_network_class(&self, name: &str) {
        self.update(|s| s.remove_class(name));
    }

    /// Replaces every NetworkClass after a relist.
    pub fn reset_network_classes(&self, classes: Vec<ObservedClass>) {
        self.update(|s| {
            s.classes.clear();
            s.classes_by_kind.clear();
            for observed in classes {
                s.insert_class(observed);
            }
        });
    }

    // === ResourceSlice ===

    /// Inserts or replaces a ResourceSlice.
    pub fn apply_slice(&self, slice: ResourceSlice) {
        self.update(|s| s.insert_slice(slice));
    }

    /// Removes a ResourceSlice.
    pub fn delete_slice(&self, name: &str) {
        self.update(|s| s.remove_slice(name));
    }

    /// Replaces every ResourceSlice after a relist.
    pub fn reset_slices(&self, slices: Vec<ResourceSlice>) {
        self.update(|s| {
            s.slices.clear();
            s.slices_by_pool.clear();
            for slice in slices {
                s.insert_slice(slice);
            }
        });
    }

    // === ResourceClaim ===

    /// Records which pools a claim is bound to and which networks its
    /// status has been projected to.
    pub fn apply_claim(&self, claim: &ResourceClaim) {
        let key = ClaimKey::of(claim);
        let record = claim_record(claim);
        self.update(|s| s.insert_claim(key, record));
    }

    /// Forgets a claim.
    pub fn delete_claim(&self, key: &ClaimKey) {
        self.update(|s| s.remove_claim(key));
    }

    /// Replaces every claim record after a relist.
    pub fn reset_claims(&self, claims: &[ResourceClaim]) {
        self.update(|s| {
            s.claims.clear();
            s.claims_by_pool.clear();
            s.claims_by_network.clear();
            for claim in claims {
                s.insert_claim(ClaimKey::of(claim), claim_record(claim));
            }
        });
    }
}

fn claim_record(claim: &ResourceClaim) -> ClaimRecord {
    let mut record = ClaimRecord::default();
    let Some(status) = &claim.status else {
        return record;
    };
    if let Some(results) = status.allocation.as_ref().and_then(|a| a.devices.as_ref()) {
        for result in &results.results {
            record.pools.insert(PoolKey::new(&result.driver, &result.pool));
        }
    }
    for entry in &status.devices {
        record.pools.insert(PoolKey::new(&entry.driver, &entry.pool));
        let Some(raw) = entry.data.as_ref().and_then(|d| d.get(POD_NETWORK_REF)) else {
            continue;
        };
        match serde_json::from_value::<PodNetworkRef>(raw.clone()) {
            Ok(r) => {
                record.refs.insert(r);
            }
            Err(error) => {
                warn!(claim = %ClaimKey::of(claim), device = %entry.device, %error, "Ignoring malformed podNetworkRef");
            }
        }
    }
    record
}

impl Snapshot {
    fn insert_class(&mut self, observed: ObservedClass) {
        let name = observed.class.name_any();
        self.remove_class(&name);
        let entry = ClassEntry {
            class: Arc::new(observed.class),
            namespaced: observed.namespaced,
        };
        self.classes_by_kind
            .entry(entry.target())
            .or_default()
            .insert(name.clone());
        self.classes.insert(name, entry);
    }

    fn remove_class(&mut self, name: &str) {
        if let Some(old) = self.classes.remove(name) {
            let target = old.target();
            if let Some(names) = self.classes_by_kind.get_mut(&target) {
                names.remove(name);
                if names.is_empty() {
                    self.classes_by_kind.remove(&target);
                }
            }
        }
    }

    fn insert_slice(&mut self, slice: ResourceSlice) {
        let name = slice.name_any();
        self.remove_slice(&name);
        let key = PoolKey::new(&slice.spec.driver, &slice.spec.pool.name);
        self.slices_by_pool.entry(key).or_default().insert(name.clone());
        self.slices.insert(name, Arc::new(slice));
    }

    fn remove_slice(&mut self, name: &str) {
        if let Some(old) = self.slices.remove(name) {
            let key = PoolKey::new(&old.spec.driver, &old.spec.pool.name);
            if let Some(names) = self.slices_by_pool.get_mut(&key) {
                names.remove(name);
                if names.is_empty() {
                    self.slices_by_pool.remove(&key);
                }
            }
        }
    }

    fn insert_claim(&mut self, key: ClaimKey, record: ClaimRecord) {
        self.remove_claim(&key);
        for pool in &record.pools {
            self.claims_by_pool.entry(pool.clone()).or_default().insert(key.clone());
        }
        for r in &record.refs {
            self.claims_by_network
                .entry(r.pod_network.clone())
                .or_default()
                .insert(key.clone());
        }
        self.claims.insert(key, record);
    }

    fn remove_claim(&mut self, key: &ClaimKey) {
        let Some(old) = self.claims.remove(key) else {
            return;
        };
        for pool in &old.pools {
            if let Some(keys) = self.claims_by_pool.get_mut(pool) {
                keys.remove(key);
                if keys.is_empty() {
                    self.claims_by_pool.remove(pool);
                }
            }
        }
        for r in &old.refs {
            if let Some(keys) = self.claims_by_network.get_mut(&r.pod_network) {
                keys.remove(key);
                if keys.is_empty() {
                    self.claims_by_network.remove(&r.pod_network);
                }
            }
        }
    }

    /// PodNetwork by name.
    pub fn pod_network(&self, name: &str) -> Option<&Arc<PodNetwork>> {
        self.pod_networks.get(name)
    }

    /// Every PodNetwork.
    pub fn pod_networks(&self) -> impl Iterator<Item = &Arc<PodNetwork>> {
        self.pod_networks.values()
    }

    /// NetworkClass by name.
    pub fn network_class(&self, name: &str) -> Option<&ClassEntry> {
        self.classes.get(name)
    }

    /// Every NetworkClass.
    pub fn network_classes(&self) -> impl Iterator<Item = &ClassEntry> {
        self.classes.values()
    }

    /// Target kinds named by at least one class.
    pub fn target_kinds(&self) -> impl Iterator<Item = &TargetKind> {
        self.classes_by_kind.keys()
    }

    /// Names of the classes targeting a kind.
    pub fn classes_for_kind(&self, target: &TargetKind) -> impl Iterator<Item = &str> {
        self.classes_by_kind
            .get(target)
            .into_iter()
            .flat_map(|names| names.iter().map(String::as_str))
    }

    /// Every ResourceSlice.
    pub fn slices(&self) -> impl Iterator<Item = &Arc<ResourceSlice>> {
        self.slices.values()
    }

    /// Slices of a pool, restricted to the newest pool generation seen.
    pub fn current_pool_slices(&self, pool: &PoolKey) -> Vec<&Arc<ResourceSlice>> {
        let slices: Vec<_> = self
            .slices_by_pool
            .get(pool)
            .into_iter()
            .flatten()
            .filter_map(|name| self.slices.get(name))
            .collect();
        let newest = slices.iter().map(|s| s.spec.pool.generation).max();
        slices
            .into_iter()
            .filter(|s| Some(s.spec.pool.generation) == newest)
            .collect()
    }

    /// Claims bound to devices of a pool.
    pub fn claims_for_pool(&self, pool: &PoolKey) -> impl Iterator<Item = &ClaimKey> {
        self.claims_by_pool.get(pool).into_iter().flatten()
    }

    /// Number of claims projected onto the given network.
    pub fn users_of(&self, pod_network: &str) -> usize {
        self.claims_by_network.get(pod_network).map_or(0, BTreeSet::len)
    }

    /// Resolves a bound device against the current pool content.
    ///
    /// The device must be advertised by exactly one slice of the newest
    /// generation of its pool.
    pub fn resolve(&self, device: &DeviceRef) -> Result<PodNetworkRef, ResolveError> {
        let pool = PoolKey::new(&device.driver, &device.pool);
        let advertising: Vec<_> = self
            .current_pool_slices(&pool)
            .into_iter()
            .filter(|s| s.spec.devices.iter().any(|d| d.name == device.device))
            .collect();
        match advertising.as_slice() {
            [] => Err(ResolveError::DeviceNotFound(device.clone())),
            [slice] => {
                debug!(%device, slice = %slice.name_any(), "Resolving device");
                resolver::resolve_in_slice(device, slice, self)
            }
            many => Err(ResolveError::AmbiguousDevice {
                device: device.clone(),
                count: many.len(),
            }),
        }
    }
}
