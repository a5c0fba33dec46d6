//! Dynamic Resource Allocation objects (`resource.k8s.io/v1`)
//!
//! Serde views of the upstream `ResourceSlice` and `ResourceClaim` kinds,
//! restricted to the fields this project reads or writes. Every other field
//! is kept in `extra` so a status write never drops data owned by the
//! scheduler or a driver.

use crate::condition::Condition;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Fields not modelled explicitly.
pub type Extra = BTreeMap<String, Value>;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[kube(
    group = "resource.k8s.io",
    version = "v1",
    kind = "ResourceSlice",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSliceSpec {
    /// Driver advertising the devices
    pub driver: String,

    /// Pool the slice belongs to
    pub pool: ResourcePool,

    /// Advertised devices
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<Device>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePool {
    /// Pool name, unique per driver
    pub name: String,

    /// Bumped by the driver whenever the pool content changes
    #[serde(default)]
    pub generation: i64,

    /// Number of slices making up this generation of the pool
    #[serde(default)]
    pub resource_slice_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Device name, unique within the pool
    pub name: String,

    /// Typed attributes keyed by (optionally domain-qualified) name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, DeviceAttribute>,

    #[serde(flatten)]
    pub extra: Extra,
}

/// One-of typed attribute value, as on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DeviceAttribute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bool: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DeviceAttribute {
    /// A string-valued attribute.
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            string: Some(value.into()),
            ..Self::default()
        }
    }

    /// Name of the populated variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        if self.string.is_some() {
            "string"
        } else if self.bool.is_some() {
            "bool"
        } else if self.int.is_some() {
            "int"
        } else if self.version.is_some() {
            "version"
        } else {
            "empty"
        }
    }
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[kube(
    group = "resource.k8s.io",
    version = "v1",
    kind = "ResourceClaim",
    namespaced,
    status = "ResourceClaimStatus",
    schema = "disabled"
)]
pub struct ResourceClaimSpec {
    /// Device requests and selectors, evaluated by the scheduler
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceClaimStatus {
    /// Set once the scheduler allocated devices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation: Option<AllocationResult>,

    /// Per-device status reported by drivers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<AllocatedDeviceStatus>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<DeviceAllocationResult>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAllocationResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<DeviceRequestAllocationResult>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequestAllocationResult {
    pub request: String,
    pub driver: String,
    pub pool: String,
    pub device: String,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedDeviceStatus {
    pub driver: String,
    pub pool: String,
    pub device: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Driver-specific data; also carries the projected `podNetworkRef`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_data: Option<NetworkDeviceData>,

    #[serde(flatten)]
    pub extra: Extra,
}

/// Interface details reported by the driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDeviceData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_address: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slice_keeps_unknown_fields() {
        let raw = json!({
            "apiVersion": "resource.k8s.io/v1",
            "kind": "ResourceSlice",
            "metadata": {"name": "node-a-dummy.example.com"},
            "spec": {
                "driver": "dummy.example.com",
                "nodeName": "node-a",
                "pool": {"name": "node-a", "generation": 3, "resourceSliceCount": 1},
                "devices": [{
                    "name": "blue-network-resource",
                    "attributes": {
                        "podNetwork": {"string": "blue-network"},
                        "networkClass": {"string": "ovn-kubernetes"},
                        "mtu": {"int": 1500}
                    },
                    "capacity": {"bandwidth": {"value": "10G"}}
                }]
            }
        });
        let slice: ResourceSlice = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(slice.spec.pool.generation, 3);
        assert_eq!(slice.spec.devices[0].attributes["mtu"].type_name(), "int");
        let back = serde_json::to_value(&slice).unwrap();
        assert_eq!(back["spec"]["nodeName"], "node-a");
        assert_eq!(back["spec"]["devices"][0]["capacity"], raw["spec"]["devices"][0]["capacity"]);
    }

    #[test]
    fn claim_status_round_trips_driver_data() {
        let raw = json!({
            "apiVersion": "resource.k8s.io/v1",
            "kind": "ResourceClaim",
            "metadata": {"name": "claim", "namespace": "default"},
            "spec": {"devices": {"requests": [{"name": "net"}]}},
            "status": {
                "reservedFor": [{"resource": "pods", "name": "p", "uid": "1"}],
                "devices": [{
                    "driver": "dummy.example.com",
                    "pool": "node-a",
                    "device": "blue-network-resource",
                    "shareID": "abc",
                    "networkData": {"interfaceName": "net1", "ips": ["10.0.0.2/24"]}
                }]
            }
        });
        let claim: ResourceClaim = serde_json::from_value(raw.clone()).unwrap();
        let status = claim.status.as_ref().unwrap();
        assert_eq!(
            status.devices[0].network_data.as_ref().unwrap().interface_name.as_deref(),
            Some("net1")
        );
        let back = serde_json::to_value(&claim).unwrap();
        assert_eq!(back["status"], raw["status"]);
        assert_eq!(back["spec"], raw["spec"]);
    }
}
