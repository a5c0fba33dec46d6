//! The conformance checks
//!
//! Each check reads one [`Snapshot`] built from the collected state and
//! reuses the resolver, readiness and validation logic of the runtime.

use crate::report::{Check, Report};
use crate::state::{ClusterState, TargetObject};
use crds::attributes::{PodNetworkRef, POD_NETWORK_NAMESPACE, POD_NETWORK_REF};
use crds::{ResourceClaim, ResourceSlice};
use kube::ResourceExt;
use pod_network::resolver::{find_attribute, resolve_in_slice};
use pod_network::validation::validate_pod_network;
use pod_network::{ClaimKey, DeviceRef, PoolKey, Readiness, ResolveError, Snapshot};
use std::collections::BTreeSet;
use tracing::debug;

/// Runs every check against `state`.
pub fn run_checks(state: &ClusterState) -> Report {
    let index = state.index();
    let snapshot = index.snapshot();
    let advertised = advertised_devices(&snapshot);
    let mut report = Report::default();

    classes_advertised(state, &snapshot, &advertised, &mut report);
    devices_reference_targets(state, &advertised, &mut report);
    allocations_advertised(state, &snapshot, &mut report);
    claim_status_resolvable(state, &snapshot, &mut report);
    pod_networks_ready(state, &mut report);

    debug!(findings = report.findings.len(), "Checks complete");
    report
}

/// A device in the newest generation of its pool, with its resolution.
struct Advertised<'a> {
    device: DeviceRef,
    slice: &'a ResourceSlice,
    resolution: Result<PodNetworkRef, ResolveError>,
}

fn advertised_devices(snapshot: &Snapshot) -> Vec<Advertised<'_>> {
    let pools: BTreeSet<PoolKey> = snapshot
        .slices()
        .map(|s| PoolKey::new(&s.spec.driver, &s.spec.pool.name))
        .collect();
    let mut advertised = Vec::new();
    for pool in &pools {
        for slice in snapshot.current_pool_slices(pool) {
            for device in &slice.spec.devices {
                let device = DeviceRef::new(&pool.driver, &pool.pool, &device.name);
                let resolution = resolve_in_slice(&device, slice, snapshot);
                advertised.push(Advertised {
                    device,
                    slice: slice.as_ref(),
                    resolution,
                });
            }
        }
    }
    advertised
}

/// A device without a `podNetwork` attribute is not a network attachment.
fn is_network_device(advertised: &Advertised<'_>) -> bool {
    !matches!(&advertised.resolution, Err(e) if e.is_non_network_device())
}

fn target_matches(object: &TargetObject, reference: &PodNetworkRef) -> bool {
    object.name == reference.pod_network
        && (reference.pod_network_namespace.is_none() || object.namespace == reference.pod_network_namespace)
}

/// 1: every class target kind has objects, each with an advertised device.
fn classes_advertised(state: &ClusterState, snapshot: &Snapshot, advertised: &[Advertised<'_>], report: &mut Report) {
    for class in &state.unserved_classes {
        report.error(
            Check::ClassesAdvertised,
            format!("NetworkClass/{}", class.name_any()),
            format!("target kind {} is not served by the API server", class.spec.target()),
        );
    }
    for target in snapshot.target_kinds() {
        let objects = state.targets_of(target);
        for class_name in snapshot.classes_for_kind(target) {
            let object = format!("NetworkClass/{class_name}");
            if objects.is_empty() {
                report.error(Check::ClassesAdvertised, &object, format!("no objects of {target}"));
                continue;
            }
            for target_object in objects {
                let found = advertised.iter().any(|a| {
                    matches!(&a.resolution, Ok(r) if r.network_class == class_name && target_matches(target_object, r))
                });
                if !found {
                    let name = match &target_object.namespace {
                        Some(ns) => format!("{ns}/{}", target_object.name),
                        None => target_object.name.clone(),
                    };
                    report.error(
                        Check::ClassesAdvertised,
                        &object,
                        format!("{} {name} has no advertised device", target.kind),
                    );
                }
            }
        }
    }
}

/// 2: every tagged device names an existing object of its class's kind.
fn devices_reference_targets(state: &ClusterState, advertised: &[Advertised<'_>], report: &mut Report) {
    for a in advertised.iter().filter(|a| is_network_device(a)) {
        let object = format!("ResourceSlice/{} device {}", a.slice.name_any(), a.device.device);
        let reference = match &a.resolution {
            Ok(r) => r,
            Err(e) => {
                report.error(Check::DevicesReferenceTargets, &object, format!("{}: {e}", e.reason()));
                continue;
            }
        };
        let Some(class) = state.classes.iter().find(|c| c.class.name_any() == reference.network_class) else {
            continue;
        };
        let target = class.class.spec.target();
        if !state.targets_of(&target).iter().any(|o| target_matches(o, reference)) {
            report.error(
                Check::DevicesReferenceTargets,
                &object,
                format!("names {} {reference} which does not exist", target.kind),
            );
        }
        let carries_namespace = a
            .slice
            .spec
            .devices
            .iter()
            .find(|d| d.name == a.device.device)
            .and_then(|d| find_attribute(d, POD_NETWORK_NAMESPACE))
            .is_some();
        if !class.namespaced && carries_namespace {
            report.warning(
                Check::DevicesReferenceTargets,
                &object,
                format!("{POD_NETWORK_NAMESPACE} is set but {target} is cluster-scoped"),
            );
        }
    }
}

/// 3: every allocation result points at an advertised device.
fn allocations_advertised(state: &ClusterState, snapshot: &Snapshot, report: &mut Report) {
    for claim in &state.claims {
        let results = claim
            .status
            .as_ref()
            .and_then(|s| s.allocation.as_ref())
            .and_then(|a| a.devices.as_ref())
            .map(|d| d.results.as_slice())
            .unwrap_or_default();
        for result in results {
            let device = DeviceRef::from(result);
            let pool = PoolKey::new(&device.driver, &device.pool);
            let advertised = snapshot
                .current_pool_slices(&pool)
                .iter()
                .any(|s| s.spec.devices.iter().any(|d| d.name == device.device));
            if !advertised {
                report.error(
                    Check::AllocationsAdvertised,
                    claim_object(claim),
                    format!("request {} allocated {device} which is not advertised", result.request),
                );
            }
        }
    }
}

/// 4: every status entry resolves, and any projected reference agrees.
fn claim_status_resolvable(state: &ClusterState, snapshot: &Snapshot, report: &mut Report) {
    for claim in &state.claims {
        let entries = claim.status.as_ref().map(|s| s.devices.as_slice()).unwrap_or_default();
        for entry in entries {
            let device = DeviceRef::from(entry);
            let object = claim_object(claim);
            let projected = entry.data.as_ref().and_then(|d| d.get(POD_NETWORK_REF));
            let resolved = match snapshot.resolve(&device) {
                Ok(r) => r,
                Err(e) if e.is_non_network_device() && projected.is_none() => {
                    debug!(claim = %object, %device, "Skipping non-network device");
                    continue;
                }
                Err(e) => {
                    report.error(Check::ClaimStatusResolvable, &object, format!("{}: {e}", e.reason()));
                    continue;
                }
            };
            match projected.map(|raw| serde_json::from_value::<PodNetworkRef>(raw.clone())) {
                None => report.warning(
                    Check::ClaimStatusResolvable,
                    &object,
                    format!("device {device} is not projected yet"),
                ),
                Some(Err(e)) => report.error(
                    Check::ClaimStatusResolvable,
                    &object,
                    format!("device {device} has a malformed {POD_NETWORK_REF}: {e}"),
                ),
                Some(Ok(projected)) if projected != resolved => report.error(
                    Check::ClaimStatusResolvable,
                    &object,
                    format!("device {device} is projected to {projected} but resolves to {resolved}"),
                ),
                Some(Ok(_)) => {}
            }
        }
    }
}

/// 5: every PodNetwork is admissible and its Ready condition is current.
fn pod_networks_ready(state: &ClusterState, report: &mut Report) {
    for pod_network in &state.pod_networks {
        let object = format!("PodNetwork/{}", pod_network.name_any());
        if let Err(e) = validate_pod_network(pod_network) {
            report.error(Check::PodNetworksReady, &object, e.to_string());
        }
        let expected = Readiness::compute(pod_network).condition(pod_network.metadata.generation);
        match pod_network.ready_condition() {
            None => report.warning(Check::PodNetworksReady, &object, "Ready condition not set yet"),
            Some(stored) if !stored.same_state(&expected) => report.error(
                Check::PodNetworksReady,
                &object,
                format!(
                    "Ready is {}/{} but should be {}/{}",
                    stored.status, stored.reason, expected.status, expected.reason
                ),
            ),
            Some(_) => {}
        }
    }
}

fn claim_object(claim: &ResourceClaim) -> String {
    format!("ResourceClaim/{}", ClaimKey::of(claim))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Severity;
    use crds::condition::{Condition, ConditionStatus, READY};
    use crds::TargetKind;
    use pod_network::readiness::REASON_READY;
    use pod_network::test_utils::*;

    const DRIVER: &str = "net.example.com";

    fn target(namespace: Option<&str>, name: &str) -> TargetObject {
        TargetObject {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
        }
    }

    fn ready_network(name: &str) -> crds::PodNetwork {
        pod_network_with_conditions(
            name,
            true,
            vec![Condition::new(READY, ConditionStatus::True, REASON_READY, "").with_observed_generation(Some(1))],
        )
    }

    /// A conformant cluster: one cluster-scoped class, one network, one
    /// advertised device, one projected claim.
    fn conformant() -> ClusterState {
        let mut state = ClusterState {
            pod_networks: vec![ready_network("blue-network")],
            classes: vec![observed_class("cluster-net", "example.com", "Network", false)],
            slices: vec![slice(
                "node-a-net",
                DRIVER,
                "node-a",
                1,
                vec![network_device(
                    "blue-network-resource",
                    Some("blue-network"),
                    Some("cluster-net"),
                    None,
                )],
            )],
            claims: vec![projected_claim(
                "default",
                "blue",
                DRIVER,
                "node-a",
                "blue-network-resource",
                "blue-network",
            )],
            ..ClusterState::default()
        };
        state.targets.insert(
            TargetKind {
                group: "example.com".to_string(),
                version: "v1".to_string(),
                kind: "Network".to_string(),
            },
            vec![target(None, "blue-network")],
        );
        state
    }

    #[test]
    fn test_conformant_cluster_has_no_errors() {
        let report = run_checks(&conformant());
        assert!(!report.has_errors(), "{report}");
    }

    #[test]
    fn test_class_without_objects_fails() {
        let mut state = conformant();
        state.targets.clear();

        let report = run_checks(&state);

        assert_eq!(report.of(Check::ClassesAdvertised).count(), 1);
        assert!(report.has_errors());
    }

    #[test]
    fn test_object_without_device_fails() {
        let mut state = conformant();
        for objects in state.targets.values_mut() {
            objects.push(target(None, "red-network"));
        }

        let report = run_checks(&state);

        let finding = report.of(Check::ClassesAdvertised).next().unwrap();
        assert!(finding.message.contains("red-network"));
    }

    #[test]
    fn test_device_naming_missing_object_fails() {
        let mut state = conformant();
        state.slices[0]
            .spec
            .devices
            .push(network_device("ghost", Some("ghost-network"), Some("cluster-net"), None));

        let report = run_checks(&state);

        let finding = report.of(Check::DevicesReferenceTargets).next().unwrap();
        assert_eq!(finding.severity, Severity::Error);
        assert!(finding.message.contains("ghost-network"));
    }

    #[test]
    fn test_namespace_required_for_namespaced_kind() {
        let mut state = conformant();
        state.classes = vec![observed_class("ovn-kubernetes", "k8s.ovn.org", "UserDefinedNetwork", true)];
        state.slices[0].spec.devices = vec![network_device(
            "blue-network-resource",
            Some("blue-network"),
            Some("ovn-kubernetes"),
            None,
        )];

        let report = run_checks(&state);

        assert!(report
            .of(Check::DevicesReferenceTargets)
            .any(|f| f.message.starts_with("NamespaceRequired")));
    }

    #[test]
    fn test_non_network_devices_are_ignored() {
        let mut state = conformant();
        state.slices[0].spec.devices.push(network_device("gpu-0", None, None, None));

        let report = run_checks(&state);

        assert_eq!(report.of(Check::DevicesReferenceTargets).count(), 0);
    }

    #[test]
    fn test_non_network_claim_entries_are_skipped() {
        let mut state = conformant();
        state
            .slices
            .push(slice("node-a-gpus", "gpu.example.com", "node-a", 1, vec![network_device("gpu-0", None, None, None)]));
        let gpu = crds::AllocatedDeviceStatus {
            driver: "gpu.example.com".to_string(),
            pool: "node-a".to_string(),
            device: "gpu-0".to_string(),
            ..Default::default()
        };
        if let Some(status) = state.claims[0].status.as_mut() {
            status.devices.insert(0, gpu);
        }

        let report = run_checks(&state);

        assert!(!report.has_errors(), "{report}");
        assert_eq!(report.of(Check::ClaimStatusResolvable).count(), 0);
    }

    #[test]
    fn test_diverging_projection_fails() {
        let mut state = conformant();
        state.claims = vec![projected_claim(
            "default",
            "blue",
            DRIVER,
            "node-a",
            "blue-network-resource",
            "red-network",
        )];

        let report = run_checks(&state);

        let finding = report.of(Check::ClaimStatusResolvable).next().unwrap();
        assert_eq!(finding.severity, Severity::Error);
        assert!(finding.message.contains("red-network"));
    }

    #[test]
    fn test_unprojected_entry_is_a_warning() {
        let mut state = conformant();
        state.claims = vec![claim("default", "blue", vec![bound_entry(DRIVER, "node-a", "blue-network-resource")])];

        let report = run_checks(&state);

        assert!(!report.has_errors(), "{report}");
        assert_eq!(report.count(Severity::Warning), 1);
    }

    #[test]
    fn test_allocation_of_unadvertised_device_fails() {
        let mut state = conformant();
        let status = state.claims[0].status.get_or_insert_with(Default::default);
        status.allocation = Some(crds::AllocationResult {
            devices: Some(crds::DeviceAllocationResult {
                results: vec![crds::DeviceRequestAllocationResult {
                    request: "net".to_string(),
                    driver: DRIVER.to_string(),
                    pool: "node-a".to_string(),
                    device: "vanished".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        });

        let report = run_checks(&state);

        assert_eq!(report.of(Check::AllocationsAdvertised).count(), 1);
    }

    #[test]
    fn test_stale_ready_condition_fails() {
        let mut state = conformant();
        state.pod_networks[0].spec.enabled = false;

        let report = run_checks(&state);

        let finding = report.of(Check::PodNetworksReady).next().unwrap();
        assert!(finding.message.contains("AdministrativelyDisabled"));
    }

    #[test]
    fn test_invalid_provider_fails() {
        let mut state = conformant();
        state.pod_networks[0].spec.provider = "bar".to_string();

        let report = run_checks(&state);

        assert!(report.of(Check::PodNetworksReady).any(|f| f.severity == Severity::Error));
    }
}
