//! Main controller implementation.
//!
//! Wires the watch feeds, the two reconcile loops and the health server
//! around one shared network index:
//! - PodNetwork loop: readiness reconciler
//! - ResourceClaim loop: claim status projector, also triggered by
//!   ResourceSlice changes for the claims bound to that pool
//!
//! Each watcher and loop runs as its own task; the controller exits with an
//! error as soon as any of them stops or panics.

use crate::backoff::{object_key, BackoffTracker};
use crate::config::Config;
use crate::error::ControllerError;
use crate::events::EventPublisher;
use crate::metrics::Metrics;
use crate::server::{self, AppState};
use crate::watcher::{self, IndexWriter, SyncState, WatchedKind};
use crds::{NetworkClass, PodNetwork, ResourceClaim, ResourceSlice};
use futures::future::select_all;
use futures::{Future, StreamExt};
use kube::{Api, Client, Resource};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher as kube_watcher, Controller as KubeController};
use pod_network::{
    ClaimProjector, ClusterClient, Error as ReconcileError, KubeClusterClient, NetworkIndex, Outcome, PoolKey,
    ReadinessReconciler, SharedIndex,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Field manager for status writes.
const FIELD_MANAGER: &str = "pod-network-controller";

/// Delay before retrying a claim while the index is still loading.
const SYNC_WAIT: Duration = Duration::from_secs(2);

/// Interval for retrying discovery of unserved NetworkClass targets.
const REDISCOVERY_INTERVAL: Duration = Duration::from_secs(30);

/// Debounce for claim reconciliations, so slice changes land in the index first.
const CLAIM_DEBOUNCE: Duration = Duration::from_secs(1);

/// Shared state handed to every reconciliation.
pub struct Context {
    readiness: ReadinessReconciler,
    projector: ClaimProjector,
    sync: SyncState,
    backoff: Arc<BackoffTracker>,
    events: EventPublisher,
    metrics: Metrics,
}

impl Context {
    fn record(&self, kind: &str, result: &Result<Outcome, ReconcileError>, started: Instant) {
        let label = match result {
            Ok(outcome) => outcome.as_str(),
            Err(e) => e.reason(),
        };
        self.metrics.record_reconcile(kind, label, started.elapsed());
        if let Err(ReconcileError::Projection { failures, .. }) = result {
            for failure in failures {
                self.metrics.record_resolution_failure(failure.reason());
            }
        }
    }

    /// Publishes a failed pass as an event, then hands the error back.
    async fn fail<K>(&self, obj: &K, error: ReconcileError) -> ControllerError
    where
        K: Resource<DynamicType = ()>,
    {
        let error = ControllerError::from(error);
        self.events.reconcile_failed(obj, &error).await;
        error
    }
}

/// A named background task.
type Task = (&'static str, JoinHandle<Result<(), ControllerError>>);

fn spawn<F>(name: &'static str, task: F) -> Task
where
    F: Future<Output = Result<(), ControllerError>> + Send + 'static,
{
    (name, tokio::spawn(task))
}

/// Waits for the first task to stop and aborts the rest.
async fn supervise(tasks: Vec<Task>) -> Result<(), ControllerError> {
    let (names, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
    let (finished, index, remaining) = select_all(handles).await;
    for handle in &remaining {
        handle.abort();
    }
    let name = names[index];
    match finished {
        Ok(Ok(())) => Err(ControllerError::Watch(format!("{} stopped", name))),
        Ok(Err(e)) => {
            error!(task = name, error = %e, "Task failed");
            Err(e)
        }
        Err(e) => Err(ControllerError::Watch(format!("{} panicked: {}", name, e))),
    }
}

/// Main controller for pod network reconciliation.
pub struct Controller {
    client: Client,
    config: Config,
    index: SharedIndex,
    sync: SyncState,
    metrics: Metrics,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Pod Network Controller");

        let client = Client::try_default().await?;
        let metrics = Metrics::new()?;

        Ok(Self {
            client,
            config,
            index: NetworkIndex::shared(),
            sync: SyncState::default(),
            metrics,
        })
    }

    /// Runs until a watcher, a loop or the server stops.
    pub async fn run(self) -> Result<(), ControllerError> {
        let cluster: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(self.client.clone(), FIELD_MANAGER));
        let backoff = Arc::new(BackoffTracker::new(self.config.backoff_min, self.config.backoff_max));
        let ctx = Arc::new(Context {
            readiness: ReadinessReconciler::new(Arc::clone(&cluster), Arc::clone(&self.index)),
            projector: ClaimProjector::new(cluster, Arc::clone(&self.index)),
            sync: self.sync.clone(),
            backoff: Arc::clone(&backoff),
            events: EventPublisher::new(self.client.clone()),
            metrics: self.metrics.clone(),
        });
        let writer = Arc::new(IndexWriter::new(Arc::clone(&self.index), self.client.clone(), backoff));

        let pod_networks: Api<PodNetwork> = Api::all(self.client.clone());
        let classes: Api<NetworkClass> = Api::all(self.client.clone());
        let slices: Api<ResourceSlice> = Api::all(self.client.clone());
        let claims: Api<ResourceClaim> = Api::all(self.client.clone());

        let state = AppState {
            sync: self.sync.clone(),
            metrics: self.metrics.clone(),
        };

        info!("Starting watchers, reconcile loops and health server");
        let tasks = vec![
            spawn(
                "PodNetwork watcher",
                watcher::feed(pod_networks.clone(), Arc::clone(&writer), WatchedKind::PodNetworks, self.sync.clone()),
            ),
            spawn(
                "NetworkClass watcher",
                watcher::feed(classes, Arc::clone(&writer), WatchedKind::NetworkClasses, self.sync.clone()),
            ),
            spawn(
                "ResourceSlice watcher",
                watcher::feed(slices.clone(), Arc::clone(&writer), WatchedKind::ResourceSlices, self.sync.clone()),
            ),
            spawn(
                "ResourceClaim watcher",
                watcher::feed(claims.clone(), Arc::clone(&writer), WatchedKind::ResourceClaims, self.sync.clone()),
            ),
            spawn(
                "NetworkClass rediscovery",
                watcher::rediscover_classes(writer, REDISCOVERY_INTERVAL),
            ),
            spawn(
                "PodNetwork readiness loop",
                run_readiness_loop(pod_networks, Arc::clone(&ctx), self.config.concurrency),
            ),
            spawn(
                "ResourceClaim projection loop",
                run_projection_loop(claims, slices, Arc::clone(&self.index), ctx, self.config.concurrency),
            ),
            spawn("health server", server::serve(self.config.metrics_addr, state)),
        ];

        supervise(tasks).await
    }
}

async fn run_readiness_loop(api: Api<PodNetwork>, ctx: Arc<Context>, concurrency: u16) -> Result<(), ControllerError> {
    info!("Starting PodNetwork readiness loop");
    KubeController::new(api, kube_watcher::Config::default())
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .run(reconcile_pod_network, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(object = %obj, "Reconciled"),
                Err(e) => warn!(error = %e, "PodNetwork controller error"),
            }
        })
        .await;
    Err(ControllerError::Watch("PodNetwork reconcile loop ended".to_string()))
}

async fn run_projection_loop(
    claims: Api<ResourceClaim>,
    slices: Api<ResourceSlice>,
    index: SharedIndex,
    ctx: Arc<Context>,
    concurrency: u16,
) -> Result<(), ControllerError> {
    info!("Starting ResourceClaim projection loop");
    let claims_in_pool = move |slice: ResourceSlice| {
        let pool = PoolKey::new(&slice.spec.driver, &slice.spec.pool.name);
        index
            .snapshot()
            .claims_for_pool(&pool)
            .map(|key| ObjectRef::<ResourceClaim>::new(&key.name).within(&key.namespace))
            .collect::<Vec<_>>()
    };
    KubeController::new(claims, kube_watcher::Config::default())
        .watches(slices, kube_watcher::Config::default(), claims_in_pool)
        .with_config(
            ControllerConfig::default()
                .debounce(CLAIM_DEBOUNCE)
                .concurrency(concurrency),
        )
        .run(reconcile_claim, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(object = %obj, "Reconciled"),
                Err(e) => warn!(error = %e, "ResourceClaim controller error"),
            }
        })
        .await;
    Err(ControllerError::Watch("ResourceClaim reconcile loop ended".to_string()))
}

async fn reconcile_pod_network(pod_network: Arc<PodNetwork>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let key = object_key(pod_network.as_ref());
    let started = Instant::now();
    let result = ctx.readiness.reconcile(&pod_network).await;
    ctx.record("PodNetwork", &result, started);
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => return Err(ctx.fail(pod_network.as_ref(), e).await),
    };
    debug!(object = %key, outcome = outcome.as_str(), "PodNetwork reconciled");
    ctx.backoff.reset(&key);
    Ok(Action::await_change())
}

async fn reconcile_claim(claim: Arc<ResourceClaim>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let key = object_key(claim.as_ref());
    if !ctx.sync.all_synced() {
        debug!(object = %key, "Index still loading, deferring");
        return Ok(Action::requeue(SYNC_WAIT));
    }
    let started = Instant::now();
    let result = ctx.projector.reconcile(&claim).await;
    ctx.record("ResourceClaim", &result, started);
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => return Err(ctx.fail(claim.as_ref(), e).await),
    };
    debug!(object = %key, outcome = outcome.as_str(), "ResourceClaim reconciled");
    ctx.backoff.reset(&key);
    Ok(Action::await_change())
}

/// Requeues with per-object exponential backoff.
fn error_policy<K>(obj: Arc<K>, error: &ControllerError, ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let key = object_key(obj.as_ref());
    let (delay, failures) = ctx.backoff.next_for(&key);
    error!(
        object = %key,
        reason = error.reason(),
        failures,
        retry_in = ?delay,
        "Reconciliation failed: {}", error
    );
    Action::requeue(delay)
}
