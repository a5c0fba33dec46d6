//! Watch feeds for the network index.
//!
//! Four watchers keep the in-memory index in step with the cluster. A relist
//! (`Init` .. `InitDone`) replaces the whole kind at once, so objects deleted
//! while the watch was disconnected are dropped. The first completed list of
//! each kind is recorded in [`SyncState`], which gates `/readyz` and claim
//! projection.

use crate::backoff::BackoffTracker;
use crate::error::ControllerError;
use async_trait::async_trait;
use crds::{NetworkClass, PodNetwork, ResourceClaim, ResourceSlice};
use futures::StreamExt;
use kube::discovery::{self, Scope};
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::{watcher, WatchStreamExt};
use pod_network::{ClaimKey, NetworkIndex, ObservedClass, SharedIndex};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Kinds feeding the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedKind {
    /// PodNetwork
    PodNetworks = 0,
    /// NetworkClass
    NetworkClasses = 1,
    /// ResourceSlice
    ResourceSlices = 2,
    /// ResourceClaim
    ResourceClaims = 3,
}

impl std::fmt::Display for WatchedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WatchedKind::PodNetworks => "PodNetwork",
            WatchedKind::NetworkClasses => "NetworkClass",
            WatchedKind::ResourceSlices => "ResourceSlice",
            WatchedKind::ResourceClaims => "ResourceClaim",
        };
        f.write_str(s)
    }
}

/// Which watchers have completed their initial list.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    synced: Arc<[AtomicBool; 4]>,
}

impl SyncState {
    /// Records the end of the first list of a kind.
    pub fn mark_synced(&self, kind: WatchedKind) {
        self.synced[kind as usize].store(true, Ordering::Release);
    }

    /// Whether a kind has completed its first list.
    pub fn is_synced(&self, kind: WatchedKind) -> bool {
        self.synced[kind as usize].load(Ordering::Acquire)
    }

    /// Whether every kind has.
    pub fn all_synced(&self) -> bool {
        self.synced.iter().all(|s| s.load(Ordering::Acquire))
    }
}

/// Index mutation derived from a watch event.
#[derive(Debug, PartialEq)]
pub enum Change<K> {
    /// Object added or modified
    Apply(K),
    /// Object deleted
    Delete(K),
    /// Full list; everything else of the kind is gone
    Reset(Vec<K>),
}

/// Buffers `InitApply` events until the list completes.
#[derive(Debug)]
pub struct Relist<K> {
    buffer: Option<Vec<K>>,
}

impl<K> Default for Relist<K> {
    fn default() -> Self {
        Self { buffer: None }
    }
}

impl<K> Relist<K> {
    /// Folds one event; returns the change to apply, if any.
    pub fn handle(&mut self, event: watcher::Event<K>) -> Option<Change<K>> {
        match event {
            watcher::Event::Apply(object) => Some(Change::Apply(object)),
            watcher::Event::Delete(object) => Some(Change::Delete(object)),
            watcher::Event::Init => {
                self.buffer = Some(Vec::new());
                None
            }
            watcher::Event::InitApply(object) => {
                self.buffer.get_or_insert_with(Vec::new).push(object);
                None
            }
            watcher::Event::InitDone => Some(Change::Reset(self.buffer.take().unwrap_or_default())),
        }
    }
}

/// Receives the changes of one kind.
#[async_trait]
pub trait IndexFeed<K>: Send + Sync {
    /// Object added or modified.
    async fn apply(&self, object: K);
    /// Object deleted.
    async fn delete(&self, object: K);
    /// Full relist.
    async fn reset(&self, objects: Vec<K>);
}

/// NetworkClasses whose target kind is not served yet.
///
/// Rediscovery publishes a class only if it is still parked at that point,
/// under the same lock a delete uses to un-park it, so a class deleted while
/// its discovery was in flight is never served.
#[derive(Debug, Default)]
pub struct ParkedClasses {
    classes: Mutex<HashMap<String, NetworkClass>>,
}

impl ParkedClasses {
    /// Parks a class until its target kind is served.
    pub fn park(&self, class: NetworkClass) {
        if let Ok(mut parked) = self.classes.lock() {
            parked.insert(class.name_any(), class);
        }
    }

    /// Forgets a class, on delete or after it was discovered by its feed.
    pub fn unpark(&self, name: &str) {
        if let Ok(mut parked) = self.classes.lock() {
            parked.remove(name);
        }
    }

    /// Forgets every class ahead of a relist.
    pub fn clear(&self) {
        if let Ok(mut parked) = self.classes.lock() {
            parked.clear();
        }
    }

    /// Currently parked classes.
    pub fn pending(&self) -> Vec<NetworkClass> {
        self.classes
            .lock()
            .map(|parked| parked.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Moves a rediscovered class into the index if it is still parked.
    pub fn promote(&self, observed: ObservedClass, index: &NetworkIndex) -> bool {
        let Ok(mut parked) = self.classes.lock() else {
            return false;
        };
        if parked.remove(&observed.class.name_any()).is_none() {
            return false;
        }
        index.apply_network_class(observed);
        true
    }
}

/// Writes watch changes into the index.
///
/// NetworkClasses need their target kind's scope before they can be used for
/// resolution; it is looked up through API discovery. Classes whose kind is
/// not served yet are parked and retried by [`rediscover_classes`].
pub struct IndexWriter {
    index: SharedIndex,
    client: Client,
    parked: ParkedClasses,
    backoff: Arc<BackoffTracker>,
}

impl IndexWriter {
    /// Creates a writer for `index`, using `client` for discovery. Deleted
    /// objects are dropped from `backoff`.
    pub fn new(index: SharedIndex, client: Client, backoff: Arc<BackoffTracker>) -> Self {
        Self {
            index,
            client,
            parked: ParkedClasses::default(),
            backoff,
        }
    }

    /// Looks up whether the class's target kind is namespaced.
    async fn scope_of(&self, class: &NetworkClass) -> Result<bool, kube::Error> {
        let (_, caps) = discovery::pinned_kind(&self.client, &class.spec.target().to_gvk()).await?;
        Ok(caps.scope == Scope::Namespaced)
    }

    async fn discover(&self, class: NetworkClass) -> Option<ObservedClass> {
        let name = class.name_any();
        let target = class.spec.target();
        match self.scope_of(&class).await {
            Ok(namespaced) => {
                self.parked.unpark(&name);
                debug!(class = %name, %target, namespaced, "Discovered NetworkClass target");
                Some(ObservedClass { class, namespaced })
            }
            Err(error) => {
                warn!(class = %name, %target, %error, "NetworkClass target kind not served, will retry");
                self.parked.park(class);
                None
            }
        }
    }
}

#[async_trait]
impl IndexFeed<PodNetwork> for IndexWriter {
    async fn apply(&self, object: PodNetwork) {
        self.index.apply_pod_network(object);
    }

    async fn delete(&self, object: PodNetwork) {
        self.backoff.forget(&object);
        self.index.delete_pod_network(&object.name_any());
    }

    async fn reset(&self, objects: Vec<PodNetwork>) {
        self.index.reset_pod_networks(objects);
    }
}

#[async_trait]
impl IndexFeed<NetworkClass> for IndexWriter {
    async fn apply(&self, object: NetworkClass) {
        if let Some(observed) = self.discover(object).await {
            self.index.apply_network_class(observed);
        }
    }

    async fn delete(&self, object: NetworkClass) {
        let name = object.name_any();
        self.parked.unpark(&name);
        self.index.delete_network_class(&name);
    }

    async fn reset(&self, objects: Vec<NetworkClass>) {
        self.parked.clear();
        let mut observed = Vec::with_capacity(objects.len());
        for class in objects {
            if let Some(o) = self.discover(class).await {
                observed.push(o);
            }
        }
        self.index.reset_network_classes(observed);
    }
}

#[async_trait]
impl IndexFeed<ResourceSlice> for IndexWriter {
    async fn apply(&self, object: ResourceSlice) {
        self.index.apply_slice(object);
    }

    async fn delete(&self, object: ResourceSlice) {
        self.index.delete_slice(&object.name_any());
    }

    async fn reset(&self, objects: Vec<ResourceSlice>) {
        self.index.reset_slices(objects);
    }
}

#[async_trait]
impl IndexFeed<ResourceClaim> for IndexWriter {
    async fn apply(&self, object: ResourceClaim) {
        self.index.apply_claim(&object);
    }

    async fn delete(&self, object: ResourceClaim) {
        self.backoff.forget(&object);
        self.index.delete_claim(&ClaimKey::of(&object));
    }

    async fn reset(&self, objects: Vec<ResourceClaim>) {
        self.index.reset_claims(&objects);
    }
}

/// Runs one watcher into `feed` until the stream ends.
pub async fn feed<K, F>(api: Api<K>, feed: Arc<F>, kind: WatchedKind, sync: SyncState) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    F: IndexFeed<K> + 'static,
{
    info!("Starting {} watcher", kind);

    let mut relist = Relist::default();
    let mut stream = Box::pin(watcher(api, watcher::Config::default()).default_backoff());

    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => match relist.handle(event) {
                Some(Change::Apply(object)) => feed.apply(object).await,
                Some(Change::Delete(object)) => feed.delete(object).await,
                Some(Change::Reset(objects)) => {
                    info!(%kind, count = objects.len(), "Watcher list complete");
                    feed.reset(objects).await;
                    sync.mark_synced(kind);
                }
                None => {}
            },
            Err(error) => warn!(%kind, %error, "Watcher stream error, backing off"),
        }
    }

    Err(ControllerError::Watch(format!("{kind} watcher stream ended")))
}

/// Periodically retries discovery for classes whose target kind was not served.
pub async fn rediscover_classes(writer: Arc<IndexWriter>, every: Duration) -> Result<(), ControllerError> {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        for class in writer.parked.pending() {
            let Ok(namespaced) = writer.scope_of(&class).await else {
                continue;
            };
            let name = class.name_any();
            if writer.parked.promote(ObservedClass { class, namespaced }, &writer.index) {
                info!(class = %name, "NetworkClass target kind now served");
            } else {
                debug!(class = %name, "NetworkClass changed during rediscovery, skipping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pod_network::test_utils::{network_class, observed_class};

    #[test]
    fn test_relist_buffers_until_done() {
        let mut relist = Relist::default();

        assert_eq!(relist.handle(watcher::Event::Init), None);
        assert_eq!(relist.handle(watcher::Event::InitApply("a")), None);
        assert_eq!(relist.handle(watcher::Event::InitApply("b")), None);
        assert_eq!(relist.handle(watcher::Event::InitDone), Some(Change::Reset(vec!["a", "b"])));
        assert_eq!(relist.handle(watcher::Event::Apply("c")), Some(Change::Apply("c")));
        assert_eq!(relist.handle(watcher::Event::Delete("a")), Some(Change::Delete("a")));
    }

    #[test]
    fn test_relist_after_reconnect_starts_empty() {
        let mut relist = Relist::default();
        relist.handle(watcher::Event::Init);
        relist.handle(watcher::Event::InitApply(1));
        relist.handle(watcher::Event::InitDone);

        relist.handle(watcher::Event::Init);
        relist.handle(watcher::Event::InitApply(2));
        assert_eq!(relist.handle(watcher::Event::InitDone), Some(Change::Reset(vec![2])));
    }

    #[test]
    fn test_empty_relist_resets_to_nothing() {
        let mut relist: Relist<u8> = Relist::default();
        relist.handle(watcher::Event::Init);
        assert_eq!(relist.handle(watcher::Event::InitDone), Some(Change::Reset(vec![])));
    }

    #[test]
    fn test_rediscovered_class_is_published_while_parked() {
        let index = NetworkIndex::shared();
        let parked = ParkedClasses::default();
        parked.park(network_class("ovn-kubernetes", "k8s.ovn.org", "UserDefinedNetwork"));

        let published = parked.promote(observed_class("ovn-kubernetes", "k8s.ovn.org", "UserDefinedNetwork", true), &index);

        assert!(published);
        assert!(parked.pending().is_empty());
        assert!(index.snapshot().network_class("ovn-kubernetes").is_some());
    }

    #[test]
    fn test_class_deleted_during_rediscovery_stays_deleted() {
        let index = NetworkIndex::shared();
        let parked = ParkedClasses::default();
        parked.park(network_class("ovn-kubernetes", "k8s.ovn.org", "UserDefinedNetwork"));
        let in_flight = parked.pending();

        // Delete event handled while discovery was awaiting
        parked.unpark("ovn-kubernetes");
        index.delete_network_class("ovn-kubernetes");

        for class in in_flight {
            assert!(!parked.promote(ObservedClass { class, namespaced: true }, &index));
        }
        assert!(index.snapshot().network_class("ovn-kubernetes").is_none());
    }

    #[test]
    fn test_relist_clears_parked_classes() {
        let parked = ParkedClasses::default();
        parked.park(network_class("a", "example.com", "Network"));
        parked.park(network_class("b", "example.com", "Network"));

        parked.clear();

        assert!(parked.pending().is_empty());
    }

    #[test]
    fn test_sync_state_requires_every_kind() {
        let sync = SyncState::default();
        sync.mark_synced(WatchedKind::PodNetworks);
        sync.mark_synced(WatchedKind::NetworkClasses);
        sync.mark_synced(WatchedKind::ResourceSlices);
        assert!(sync.is_synced(WatchedKind::ResourceSlices));
        assert!(!sync.all_synced());

        sync.mark_synced(WatchedKind::ResourceClaims);
        assert!(sync.all_synced());
    }
}
