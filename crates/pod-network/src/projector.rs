//! Claim status projector
//!
//! Writes the network each bound device resolves to into the claim's
//! `status.devices[]` entries: `data.podNetworkRef` carries the resolved
//! reference and a `PodNetworkResolved` condition records the outcome.
//!
//! When re-resolution of an already projected entry fails, the previous
//! reference is kept and the condition flips to `False`. A successful
//! resolution to a different network overwrites the reference. Fields the
//! driver reported (`networkData`, other `data` keys, other conditions) are
//! passed through unchanged. Entries for devices without a `podNetwork`
//! attribute belong to other kinds of drivers and are left alone.
//!
//! Only entries a driver has already reported in `status.devices` are
//! projected; allocation results without a status entry wait for the driver.

use crate::client::ClusterClient;
use crate::error::Error;
use crate::index::{ClaimKey, SharedIndex, Snapshot};
use crate::readiness::MAX_CONFLICT_RETRIES;
use crate::resolver::{DeviceRef, ResolveError};
use crate::Outcome;
use crds::attributes::{PodNetworkRef, POD_NETWORK_REF, POD_NETWORK_RESOLVED, REASON_RESOLVED};
use crds::condition::{set_condition, Condition, ConditionStatus};
use crds::{AllocatedDeviceStatus, ResourceClaim};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a single status entry could not be projected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProjectionFailure {
    /// The device did not resolve to a network
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The entry's `data` is set but is not a JSON object
    #[error("status entry for device {0} carries non-object data")]
    DataNotObject(DeviceRef),
}

impl ProjectionFailure {
    /// Stable reason string, used as the condition reason.
    pub fn reason(&self) -> &'static str {
        match self {
            ProjectionFailure::Resolve(e) => e.reason(),
            ProjectionFailure::DataNotObject(_) => "DataNotObject",
        }
    }
}

/// Result of projecting one claim's status entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    /// The entries as they should be stored
    pub devices: Vec<AllocatedDeviceStatus>,
    /// References resolved in this pass
    pub resolved: Vec<PodNetworkRef>,
    /// Entries that failed
    pub failures: Vec<ProjectionFailure>,
}

/// Projects every entry against one snapshot. Pure.
pub fn project_devices(entries: &[AllocatedDeviceStatus], snapshot: &Snapshot, generation: Option<i64>) -> Projection {
    let mut projection = Projection::default();
    for entry in entries {
        let mut entry = entry.clone();
        let device = DeviceRef::from(&entry);
        let resolved = snapshot.resolve(&device);
        if matches!(&resolved, Err(e) if e.is_non_network_device()) && !is_projected(&entry) {
            projection.devices.push(entry);
            continue;
        }
        let outcome = resolved
            .map_err(ProjectionFailure::from)
            .and_then(|r| write_ref(&mut entry, &device, &r).map(|()| r));
        let condition = match &outcome {
            Ok(r) => Condition::new(
                POD_NETWORK_RESOLVED,
                ConditionStatus::True,
                REASON_RESOLVED,
                format!("resolved to {r}"),
            ),
            Err(failure) => Condition::new(
                POD_NETWORK_RESOLVED,
                ConditionStatus::False,
                failure.reason(),
                failure.to_string(),
            ),
        };
        set_condition(&mut entry.conditions, condition.with_observed_generation(generation));
        match outcome {
            Ok(r) => projection.resolved.push(r),
            Err(failure) => projection.failures.push(failure),
        }
        projection.devices.push(entry);
    }
    projection
}

/// Whether an earlier pass wrote a reference into this entry.
fn is_projected(entry: &AllocatedDeviceStatus) -> bool {
    entry.data.as_ref().and_then(|d| d.get(POD_NETWORK_REF)).is_some()
}

fn write_ref(entry: &mut AllocatedDeviceStatus, device: &DeviceRef, r: &PodNetworkRef) -> Result<(), ProjectionFailure> {
    let data = entry.data.get_or_insert_with(|| Value::Object(Default::default()));
    let Value::Object(map) = data else {
        return Err(ProjectionFailure::DataNotObject(device.clone()));
    };
    let value = serde_json::to_value(r).map_err(|_| ProjectionFailure::DataNotObject(device.clone()))?;
    map.insert(POD_NETWORK_REF.to_string(), value);
    Ok(())
}

/// Persists projected claim status.
pub struct ClaimProjector {
    client: Arc<dyn ClusterClient>,
    index: SharedIndex,
}

impl ClaimProjector {
    /// Creates a projector writing through `client`.
    pub fn new(client: Arc<dyn ClusterClient>, index: SharedIndex) -> Self {
        Self { client, index }
    }

    /// Projects one claim, starting from the cached copy.
    ///
    /// The status is written before resolution failures are reported, so
    /// the `PodNetworkResolved` conditions always reflect the latest pass.
    /// Failures come back as [`Error::Projection`] for the controller to
    /// retry with backoff.
    pub async fn reconcile(&self, claim: &ResourceClaim) -> Result<Outcome, Error> {
        let name = claim.metadata.name.clone().ok_or(Error::MissingName("ResourceClaim"))?;
        let namespace = claim.metadata.namespace.clone().unwrap_or_default();
        let key = ClaimKey {
            namespace: namespace.clone(),
            name: name.clone(),
        };
        let mut current = claim.clone();

        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let entries = current.status.as_ref().map(|s| s.devices.as_slice()).unwrap_or_default();
            if entries.is_empty() {
                debug!(claim = %key, "No bound devices yet");
                self.index.apply_claim(&current);
                return Ok(Outcome::Unchanged);
            }
            let projection = project_devices(entries, &self.index.snapshot(), current.metadata.generation);
            if projection.devices.as_slice() == entries {
                debug!(claim = %key, "Claim status up to date");
                self.index.apply_claim(&current);
                return finish(&key, Outcome::Unchanged, projection.failures);
            }
            let written = self
                .client
                .replace_claim_devices(
                    &namespace,
                    &name,
                    current.metadata.resource_version.as_deref(),
                    &projection.devices,
                )
                .await;
            match written {
                Ok(updated) => {
                    info!(
                        claim = %key,
                        resolved = projection.resolved.len(),
                        failed = projection.failures.len(),
                        "Projected claim status"
                    );
                    self.index.apply_claim(&updated);
                    return finish(&key, Outcome::Updated, projection.failures);
                }
                Err(Error::Conflict(_)) => {
                    debug!(claim = %key, attempt, "Stale write, re-reading");
                    match self.client.get_resource_claim(&namespace, &name).await? {
                        Some(fresh) => current = fresh,
                        None => {
                            self.index.delete_claim(&key);
                            return Ok(Outcome::Gone);
                        }
                    }
                }
                Err(Error::NotFound(_)) => {
                    debug!(claim = %key, "Deleted while reconciling, discarding result");
                    self.index.delete_claim(&key);
                    return Ok(Outcome::Gone);
                }
                Err(e) => return Err(e),
            }
        }

        warn!(claim = %key, attempts = MAX_CONFLICT_RETRIES, "Conflict retries exhausted");
        Err(Error::ConflictRetriesExhausted {
            object: format!("ResourceClaim/{key}"),
            attempts: MAX_CONFLICT_RETRIES,
        })
    }
}

fn finish(key: &ClaimKey, outcome: Outcome, failures: Vec<ProjectionFailure>) -> Result<Outcome, Error> {
    if failures.is_empty() {
        return Ok(outcome);
    }
    for failure in &failures {
        warn!(claim = %key, reason = failure.reason(), %failure, "Device not resolved");
    }
    Err(Error::Projection {
        claim: key.to_string(),
        failures,
    })
}
