//! Device resolver
//!
//! Maps a bound device `(driver, pool, device)` back to the network it
//! attaches to, by reading the standardized attributes of the advertising
//! ResourceSlice entry. Resolution is a pure function of the snapshot it is
//! given; nothing is cached across passes.
//!
//! Attribute values are read as plain strings. That typing decision is
//! confined to [`string_attribute`].

use crate::index::Snapshot;
use crds::attributes::{attribute_matches, PodNetworkRef, NETWORK_CLASS, POD_NETWORK, POD_NETWORK_NAMESPACE};
use crds::{AllocatedDeviceStatus, Device, DeviceAttribute, DeviceRequestAllocationResult, ResourceSlice};
use thiserror::Error;

/// Identifier of an allocated device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceRef {
    /// Driver name
    pub driver: String,
    /// Pool name
    pub pool: String,
    /// Device name within the pool
    pub device: String,
}

impl DeviceRef {
    /// Creates a device reference.
    pub fn new(driver: impl Into<String>, pool: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            pool: pool.into(),
            device: device.into(),
        }
    }
}

impl std::fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.driver, self.pool, self.device)
    }
}

impl From<&AllocatedDeviceStatus> for DeviceRef {
    fn from(entry: &AllocatedDeviceStatus) -> Self {
        Self::new(&entry.driver, &entry.pool, &entry.device)
    }
}

impl From<&DeviceRequestAllocationResult> for DeviceRef {
    fn from(result: &DeviceRequestAllocationResult) -> Self {
        Self::new(&result.driver, &result.pool, &result.device)
    }
}

/// Why a device could not be resolved to a network.
///
/// All variants are recoverable: the inputs are owned by other controllers
/// and may converge later.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// No slice of the pool advertises the device
    #[error("device {0} is not advertised by any ResourceSlice")]
    DeviceNotFound(DeviceRef),

    /// Several slices of the newest pool generation advertise the device
    #[error("device {device} is advertised by {count} ResourceSlices")]
    AmbiguousDevice {
        /// The device
        device: DeviceRef,
        /// Number of advertising slices
        count: usize,
    },

    /// A required standardized attribute is absent
    #[error("device {device} has no {attribute} attribute")]
    AttributeMissing {
        /// The device
        device: DeviceRef,
        /// Missing attribute key
        attribute: &'static str,
    },

    /// A standardized attribute is not string-typed
    #[error("attribute {attribute} of device {device} is {found}, expected string")]
    AttributeType {
        /// The device
        device: DeviceRef,
        /// Offending attribute key
        attribute: &'static str,
        /// Type found instead
        found: &'static str,
    },

    /// The device names a NetworkClass that does not exist
    #[error("device {device} references unknown NetworkClass {class}")]
    ClassificationNotFound {
        /// The device
        device: DeviceRef,
        /// Class name from the device
        class: String,
    },

    /// The class targets a namespaced kind but the device carries no namespace
    #[error("device {device} belongs to NetworkClass {class} targeting namespaced {kind} but has no podNetworkNamespace attribute")]
    NamespaceRequired {
        /// The device
        device: DeviceRef,
        /// Class name
        class: String,
        /// Target kind of the class
        kind: String,
    },
}

impl ResolveError {
    /// CamelCase reason, used in conditions and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ResolveError::DeviceNotFound(_) => "DeviceNotFound",
            ResolveError::AmbiguousDevice { .. } => "AmbiguousDevice",
            ResolveError::AttributeMissing { .. } => "AttributeMissing",
            ResolveError::AttributeType { .. } => "AttributeType",
            ResolveError::ClassificationNotFound { .. } => "ClassificationNotFound",
            ResolveError::NamespaceRequired { .. } => "NamespaceRequired",
        }
    }

    /// The device carries no `podNetwork` attribute and so is not a network
    /// attachment at all.
    pub fn is_non_network_device(&self) -> bool {
        matches!(self, ResolveError::AttributeMissing { attribute, .. } if *attribute == POD_NETWORK)
    }

    /// The device that failed to resolve.
    pub fn device(&self) -> &DeviceRef {
        match self {
            ResolveError::DeviceNotFound(device)
            | ResolveError::AmbiguousDevice { device, .. }
            | ResolveError::AttributeMissing { device, .. }
            | ResolveError::AttributeType { device, .. }
            | ResolveError::ClassificationNotFound { device, .. }
            | ResolveError::NamespaceRequired { device, .. } => device,
        }
    }
}

/// Resolves a device against the slice it was allocated from.
///
/// Driver and pool are matched on the slice itself, the device by name
/// within it. Classes are looked up in `snapshot` to learn whether the
/// namespace attribute is mandatory; for cluster-scoped target kinds a
/// namespace attribute is ignored.
pub fn resolve_in_slice(
    device: &DeviceRef,
    slice: &ResourceSlice,
    snapshot: &Snapshot,
) -> Result<PodNetworkRef, ResolveError> {
    if slice.spec.driver != device.driver || slice.spec.pool.name != device.pool {
        return Err(ResolveError::DeviceNotFound(device.clone()));
    }
    let entry = slice
        .spec
        .devices
        .iter()
        .find(|d| d.name == device.device)
        .ok_or_else(|| ResolveError::DeviceNotFound(device.clone()))?;

    let pod_network = string_attribute(device, entry, POD_NETWORK)?.ok_or_else(|| ResolveError::AttributeMissing {
        device: device.clone(),
        attribute: POD_NETWORK,
    })?;
    let network_class = string_attribute(device, entry, NETWORK_CLASS)?.ok_or_else(|| ResolveError::AttributeMissing {
        device: device.clone(),
        attribute: NETWORK_CLASS,
    })?;

    let class = snapshot
        .network_class(&network_class)
        .ok_or_else(|| ResolveError::ClassificationNotFound {
            device: device.clone(),
            class: network_class.clone(),
        })?;

    let pod_network_namespace = if class.namespaced {
        let namespace = string_attribute(device, entry, POD_NETWORK_NAMESPACE)?;
        if namespace.is_none() {
            return Err(ResolveError::NamespaceRequired {
                device: device.clone(),
                class: network_class,
                kind: class.target().to_string(),
            });
        }
        namespace
    } else {
        None
    };

    Ok(PodNetworkRef {
        pod_network,
        network_class,
        pod_network_namespace,
    })
}

/// Finds a standardized attribute on a device. A bare key wins over a
/// domain-qualified one.
pub fn find_attribute<'a>(entry: &'a Device, key: &str) -> Option<&'a DeviceAttribute> {
    entry.attributes.get(key).or_else(|| {
        entry
            .attributes
            .iter()
            .find(|(name, _)| attribute_matches(name, key))
            .map(|(_, value)| value)
    })
}

/// Reads a standardized attribute as a non-empty string.
fn string_attribute(device: &DeviceRef, entry: &Device, key: &'static str) -> Result<Option<String>, ResolveError> {
    let Some(attribute) = find_attribute(entry, key) else {
        return Ok(None);
    };
    match &attribute.string {
        Some(value) if value.is_empty() => Ok(None),
        Some(value) => Ok(Some(value.clone())),
        None => Err(ResolveError::AttributeType {
            device: device.clone(),
            attribute: key,
            found: attribute.type_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::NetworkIndex;
    use crate::test_utils::*;

    const DRIVER: &str = "dummy.example.com";
    const POOL: &str = "node-a";

    fn index_with(classes: Vec<crate::index::ObservedClass>, devices: Vec<Device>) -> crate::index::SharedIndex {
        let index = NetworkIndex::shared();
        for class in classes {
            index.apply_network_class(class);
        }
        index.apply_slice(slice("node-a-dummy", DRIVER, POOL, 1, devices));
        index
    }

    #[test]
    fn resolves_identity_and_class() {
        let index = index_with(
            vec![observed_class("cluster-net", "example.com", "Network", false)],
            vec![network_device("blue-network-resource", Some("blue-network"), Some("cluster-net"), None)],
        );
        let resolved = index
            .snapshot()
            .resolve(&DeviceRef::new(DRIVER, POOL, "blue-network-resource"))
            .unwrap();
        assert_eq!(resolved.pod_network, "blue-network");
        assert_eq!(resolved.network_class, "cluster-net");
        assert_eq!(resolved.pod_network_namespace, None);
    }

    #[test]
    fn missing_identity_attribute_is_not_a_network_device() {
        let index = index_with(
            vec![observed_class("cluster-net", "example.com", "Network", false)],
            vec![network_device("gpu-0", None, Some("cluster-net"), None)],
        );
        let err = index.snapshot().resolve(&DeviceRef::new(DRIVER, POOL, "gpu-0")).unwrap_err();
        assert_eq!(err.reason(), "AttributeMissing");
        assert!(matches!(err, ResolveError::AttributeMissing { attribute: POD_NETWORK, .. }));
        assert!(err.is_non_network_device());
    }

    #[test]
    fn namespaced_kind_requires_namespace_attribute() {
        let index = index_with(
            vec![observed_class("ovn-kubernetes", "k8s.ovn.org", "UserDefinedNetwork", true)],
            vec![network_device("blue-network-resource", Some("blue-network"), Some("ovn-kubernetes"), None)],
        );
        let err = index
            .snapshot()
            .resolve(&DeviceRef::new(DRIVER, POOL, "blue-network-resource"))
            .unwrap_err();
        assert_eq!(err.reason(), "NamespaceRequired");
        assert!(!err.is_non_network_device());
    }

    #[test]
    fn namespaced_kind_with_namespace_resolves() {
        let index = index_with(
            vec![observed_class("ovn-kubernetes", "k8s.ovn.org", "UserDefinedNetwork", true)],
            vec![network_device("blue-network-resource", Some("blue-network"), Some("ovn-kubernetes"), Some("tenant-a"))],
        );
        let resolved = index
            .snapshot()
            .resolve(&DeviceRef::new(DRIVER, POOL, "blue-network-resource"))
            .unwrap();
        assert_eq!(resolved.pod_network_namespace.as_deref(), Some("tenant-a"));
    }

    #[test]
    fn cluster_scoped_kind_ignores_namespace_attribute() {
        let index = index_with(
            vec![observed_class("cluster-net", "example.com", "Network", false)],
            vec![network_device("blue", Some("blue-network"), Some("cluster-net"), Some("stray"))],
        );
        let resolved = index.snapshot().resolve(&DeviceRef::new(DRIVER, POOL, "blue")).unwrap();
        assert_eq!(resolved.pod_network_namespace, None);
    }

    #[test]
    fn dangling_class_reference_is_reported() {
        let index = index_with(
            vec![],
            vec![network_device("blue", Some("blue-network"), Some("deleted-class"), None)],
        );
        let err = index.snapshot().resolve(&DeviceRef::new(DRIVER, POOL, "blue")).unwrap_err();
        assert_eq!(
            err,
            ResolveError::ClassificationNotFound {
                device: DeviceRef::new(DRIVER, POOL, "blue"),
                class: "deleted-class".to_string(),
            }
        );
    }

    #[test]
    fn qualified_attribute_names_are_accepted() {
        let mut dev = network_device("blue", None, None, None);
        dev.attributes
            .insert("multinetwork.k8s.io/podNetwork".to_string(), DeviceAttribute::string("blue-network"));
        dev.attributes
            .insert("multinetwork.k8s.io/networkClass".to_string(), DeviceAttribute::string("cluster-net"));
        let index = index_with(vec![observed_class("cluster-net", "example.com", "Network", false)], vec![dev]);
        let resolved = index.snapshot().resolve(&DeviceRef::new(DRIVER, POOL, "blue")).unwrap();
        assert_eq!(resolved.pod_network, "blue-network");
    }

    #[test]
    fn non_string_identity_is_a_type_error() {
        let mut dev = network_device("blue", None, Some("cluster-net"), None);
        dev.attributes.insert(
            POD_NETWORK.to_string(),
            DeviceAttribute {
                int: Some(7),
                ..DeviceAttribute::default()
            },
        );
        let index = index_with(vec![observed_class("cluster-net", "example.com", "Network", false)], vec![dev]);
        let err = index.snapshot().resolve(&DeviceRef::new(DRIVER, POOL, "blue")).unwrap_err();
        assert!(matches!(err, ResolveError::AttributeType { found: "int", .. }));
    }

    #[test]
    fn slice_of_another_pool_does_not_match() {
        let index = index_with(
            vec![observed_class("cluster-net", "example.com", "Network", false)],
            vec![network_device("blue", Some("blue-network"), Some("cluster-net"), None)],
        );
        let snap = index.snapshot();
        let other = slice("other", DRIVER, "node-b", 1, vec![]);
        let err = resolve_in_slice(&DeviceRef::new(DRIVER, POOL, "blue"), &other, &snap).unwrap_err();
        assert_eq!(err.reason(), "DeviceNotFound");
    }
}
