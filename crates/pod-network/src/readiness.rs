//! Readiness reconciler
//!
//! Computes the `Ready` condition of a PodNetwork from its spec and the
//! conditions its implementation reported, and persists it with an
//! optimistic-concurrency write. Level-triggered: every pass starts from
//! the full current object, so re-running after a crash or a missed event
//! is safe. Implementation-authored conditions are never touched.

use crate::client::ClusterClient;
use crate::error::Error;
use crate::index::SharedIndex;
use crate::Outcome;
use crds::condition::{set_condition, Condition, ConditionStatus, READY, REASON_PENDING};
use crds::{PodNetwork, PodNetworkStatus, MAX_CONDITIONS};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reason when `enabled=false`.
pub const REASON_ADMINISTRATIVELY_DISABLED: &str = "AdministrativelyDisabled";

/// Reason when an implementation condition is `False`.
pub const REASON_CONDITIONS_NOT_READY: &str = "ConditionsNotReady";

/// Reason on `Ready=True`.
pub const REASON_READY: &str = "Ready";

/// Conflicting writes tolerated per pass before giving up.
pub const MAX_CONFLICT_RETRIES: u32 = 5;

/// Readiness of a PodNetwork, from which the `Ready` condition is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// `enabled=false`; overrides everything else
    Disabled,
    /// Some implementation condition is `False`
    NotReady {
        /// Types of the failing conditions
        failing: Vec<String>,
    },
    /// Some implementation condition is not yet determined
    Pending {
        /// Types of the undetermined conditions
        unknown: Vec<String>,
    },
    /// Enabled and every implementation condition is `True`
    Ready,
}

impl Readiness {
    /// Computes readiness from the full current object.
    pub fn compute(pod_network: &PodNetwork) -> Self {
        if !pod_network.spec.enabled {
            return Readiness::Disabled;
        }
        let mut failing = Vec::new();
        let mut unknown = Vec::new();
        for condition in pod_network.implementation_conditions() {
            match condition.status {
                ConditionStatus::True => {}
                ConditionStatus::False => failing.push(condition.type_.clone()),
                ConditionStatus::Unknown => unknown.push(condition.type_.clone()),
            }
        }
        if !failing.is_empty() {
            Readiness::NotReady { failing }
        } else if !unknown.is_empty() {
            Readiness::Pending { unknown }
        } else {
            Readiness::Ready
        }
    }

    /// Renders the `Ready` condition for this state.
    pub fn condition(&self, observed_generation: Option<i64>) -> Condition {
        let (status, reason, message) = match self {
            Readiness::Disabled => (
                ConditionStatus::False,
                REASON_ADMINISTRATIVELY_DISABLED,
                "network is administratively disabled".to_string(),
            ),
            Readiness::NotReady { failing } => (
                ConditionStatus::False,
                REASON_CONDITIONS_NOT_READY,
                format!("conditions not ready: {}", failing.join(", ")),
            ),
            Readiness::Pending { unknown } => (
                ConditionStatus::Unknown,
                REASON_PENDING,
                format!("waiting for conditions: {}", unknown.join(", ")),
            ),
            Readiness::Ready => (ConditionStatus::True, REASON_READY, String::new()),
        };
        Condition::new(READY, status, reason, message).with_observed_generation(observed_generation)
    }
}

/// Externally observed lifecycle phase of a PodNetwork.
///
/// Derived, never stored. `InUse` is advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkPhase {
    /// Initial, or some implementation condition is not True
    NotReady,
    /// Validated and enabled
    Ready,
    /// Ready and at least one claim resolves against it
    InUse,
    /// `enabled=false`, reachable from any phase
    Disabled,
}

impl NetworkPhase {
    /// Phase for a readiness state and number of claims using the network.
    pub fn observe(readiness: &Readiness, users: usize) -> Self {
        match readiness {
            Readiness::Disabled => NetworkPhase::Disabled,
            Readiness::NotReady { .. } | Readiness::Pending { .. } => NetworkPhase::NotReady,
            Readiness::Ready if users > 0 => NetworkPhase::InUse,
            Readiness::Ready => NetworkPhase::Ready,
        }
    }
}

impl std::fmt::Display for NetworkPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NetworkPhase::NotReady => "NotReady",
            NetworkPhase::Ready => "Ready",
            NetworkPhase::InUse => "InUse",
            NetworkPhase::Disabled => "Disabled",
        };
        f.write_str(s)
    }
}

/// Status the object should carry, or `None` when it already does.
pub fn desired_status(pod_network: &PodNetwork) -> Result<Option<PodNetworkStatus>, Error> {
    let readiness = Readiness::compute(pod_network);
    let mut conditions = pod_network.effective_conditions();
    if !set_condition(&mut conditions, readiness.condition(pod_network.metadata.generation)) {
        return Ok(None);
    }
    if conditions.len() > MAX_CONDITIONS {
        return Err(Error::TooManyConditions {
            object: format!("PodNetwork/{}", pod_network.name_any()),
            count: conditions.len(),
            max: MAX_CONDITIONS,
        });
    }
    Ok(Some(PodNetworkStatus { conditions }))
}

/// Persists the `Ready` condition of PodNetworks.
pub struct ReadinessReconciler {
    client: Arc<dyn ClusterClient>,
    index: SharedIndex,
}

impl ReadinessReconciler {
    /// Creates a reconciler writing through `client`.
    pub fn new(client: Arc<dyn ClusterClient>, index: SharedIndex) -> Self {
        Self { client, index }
    }

    /// Reconciles one PodNetwork, starting from the cached copy.
    ///
    /// A conflicting write re-reads the object from the API server and
    /// recomputes; after [`MAX_CONFLICT_RETRIES`] conflicts the pass fails
    /// with [`Error::ConflictRetriesExhausted`]. A write against a deleted
    /// object is discarded.
    pub async fn reconcile(&self, pod_network: &PodNetwork) -> Result<Outcome, Error> {
        let name = pod_network.metadata.name.clone().ok_or(Error::MissingName("PodNetwork"))?;
        let mut current = pod_network.clone();

        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let Some(status) = desired_status(&current)? else {
                debug!(pod_network = %name, "Ready condition up to date");
                return Ok(Outcome::Unchanged);
            };
            let ready = Readiness::compute(&current);
            let written = self
                .client
                .replace_pod_network_status(&name, current.metadata.resource_version.as_deref(), &status)
                .await;
            match written {
                Ok(updated) => {
                    let phase = NetworkPhase::observe(&ready, self.index.snapshot().users_of(&name));
                    info!(pod_network = %name, ?ready, %phase, "Updated Ready condition");
                    self.index.apply_pod_network(updated);
                    return Ok(Outcome::Updated);
                }
                Err(Error::Conflict(_)) => {
                    debug!(pod_network = %name, attempt, "Stale write, re-reading");
                    match self.client.get_pod_network(&name).await? {
                        Some(fresh) => current = fresh,
                        None => return Ok(Outcome::Gone),
                    }
                }
                Err(Error::NotFound(_)) => {
                    debug!(pod_network = %name, "Deleted while reconciling, discarding result");
                    return Ok(Outcome::Gone);
                }
                Err(e) => return Err(e),
            }
        }

        warn!(pod_network = %name, attempts = MAX_CONFLICT_RETRIES, "Conflict retries exhausted");
        Err(Error::ConflictRetriesExhausted {
            object: format!("PodNetwork/{name}"),
            attempts: MAX_CONFLICT_RETRIES,
        })
    }
}
