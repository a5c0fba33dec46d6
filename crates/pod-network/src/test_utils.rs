//! Test fixtures shared by unit tests and downstream crates' tests.

use crate::index::ObservedClass;
use crate::resolver::DeviceRef;
use crds::attributes::{PodNetworkRef, NETWORK_CLASS, POD_NETWORK, POD_NETWORK_NAMESPACE, POD_NETWORK_REF};
use crds::{
    AllocatedDeviceStatus, Condition, Device, DeviceAttribute, NetworkClass, NetworkClassSpec, PodNetwork,
    PodNetworkSpec, PodNetworkStatus, ResourceClaim, ResourceClaimSpec, ResourceClaimStatus, ResourcePool,
    ResourceSlice, ResourceSliceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// PodNetwork with the given enabled flag and no status.
pub fn pod_network(name: &str, enabled: bool) -> PodNetwork {
    PodNetwork {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            generation: Some(1),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: PodNetworkSpec {
            enabled,
            provider: "foo.io/bar".to_string(),
            parameters: None,
        },
        status: None,
    }
}

/// PodNetwork carrying the given conditions.
pub fn pod_network_with_conditions(name: &str, enabled: bool, conditions: Vec<Condition>) -> PodNetwork {
    let mut pn = pod_network(name, enabled);
    pn.status = Some(PodNetworkStatus { conditions });
    pn
}

/// NetworkClass targeting `group/v1, Kind=kind`.
pub fn network_class(name: &str, group: &str, kind: &str) -> NetworkClass {
    NetworkClass::new(
        name,
        NetworkClassSpec {
            group: group.to_string(),
            version: "v1".to_string(),
            kind: kind.to_string(),
        },
    )
}

/// NetworkClass with a known target scope.
pub fn observed_class(name: &str, group: &str, kind: &str, namespaced: bool) -> ObservedClass {
    ObservedClass {
        class: network_class(name, group, kind),
        namespaced,
    }
}

/// Device tagged with the standardized attributes that are `Some`.
pub fn network_device(
    name: &str,
    pod_network: Option<&str>,
    network_class: Option<&str>,
    namespace: Option<&str>,
) -> Device {
    let mut device = Device {
        name: name.to_string(),
        ..Device::default()
    };
    for (key, value) in [
        (POD_NETWORK, pod_network),
        (NETWORK_CLASS, network_class),
        (POD_NETWORK_NAMESPACE, namespace),
    ] {
        if let Some(value) = value {
            device.attributes.insert(key.to_string(), DeviceAttribute::string(value));
        }
    }
    device
}

/// ResourceSlice of one pool generation.
pub fn slice(name: &str, driver: &str, pool: &str, generation: i64, devices: Vec<Device>) -> ResourceSlice {
    ResourceSlice::new(
        name,
        ResourceSliceSpec {
            driver: driver.to_string(),
            pool: ResourcePool {
                name: pool.to_string(),
                generation,
                resource_slice_count: 1,
            },
            devices,
            extra: Default::default(),
        },
    )
}

/// Device reference shorthand.
pub fn device_ref(driver: &str, pool: &str, device: &str) -> DeviceRef {
    DeviceRef::new(driver, pool, device)
}

/// Status entry as a driver reports it after binding, before projection.
pub fn bound_entry(driver: &str, pool: &str, device: &str) -> AllocatedDeviceStatus {
    AllocatedDeviceStatus {
        driver: driver.to_string(),
        pool: pool.to_string(),
        device: device.to_string(),
        network_data: Some(crds::NetworkDeviceData {
            interface_name: Some("net1".to_string()),
            hardware_address: Some("02:00:00:00:00:01".to_string()),
            ips: vec!["10.10.0.5/24".to_string()],
        }),
        ..AllocatedDeviceStatus::default()
    }
}

/// ResourceClaim with the given status entries.
pub fn claim(namespace: &str, name: &str, devices: Vec<AllocatedDeviceStatus>) -> ResourceClaim {
    let mut claim = ResourceClaim::new(name, ResourceClaimSpec { extra: Default::default() });
    claim.metadata.namespace = Some(namespace.to_string());
    claim.metadata.generation = Some(1);
    claim.metadata.resource_version = Some("1".to_string());
    claim.status = Some(ResourceClaimStatus {
        devices,
        ..ResourceClaimStatus::default()
    });
    claim
}

/// ResourceClaim whose single entry is already projected onto a network.
pub fn projected_claim(
    namespace: &str,
    name: &str,
    driver: &str,
    pool: &str,
    device: &str,
    pod_network: &str,
) -> ResourceClaim {
    let mut entry = bound_entry(driver, pool, device);
    let reference = PodNetworkRef {
        pod_network: pod_network.to_string(),
        network_class: "cluster-net".to_string(),
        pod_network_namespace: None,
    };
    let mut data = serde_json::Map::new();
    data.insert(POD_NETWORK_REF.to_string(), serde_json::json!(reference));
    entry.data = Some(serde_json::Value::Object(data));
    claim(namespace, name, vec![entry])
}
