//! Admission validation logic
//!
//! Pure checks the API server would enforce at admission. The transport is
//! not part of this crate; the conformance checker runs these against
//! recorded objects.

use crds::{NetworkClass, PodNetwork, MAX_CONDITIONS, MAX_PROVIDER_LEN};
use std::collections::HashSet;
use thiserror::Error;

/// Admission rejection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Provider is empty or longer than allowed
    #[error("provider must be 1-{max} characters, got {len}")]
    ProviderLength {
        /// Actual length
        len: usize,
        /// Allowed maximum
        max: usize,
    },

    /// Provider is not `<domain>/<name>`
    #[error("provider {0:?} must be a domain-prefixed name such as example.com/impl")]
    ProviderFormat(String),

    /// Provider changed on update
    #[error("provider is immutable: {old:?} -> {new:?}")]
    ProviderImmutable {
        /// Stored value
        old: String,
        /// Requested value
        new: String,
    },

    /// NetworkClass spec changed on update
    #[error("NetworkClass {0} is immutable")]
    ClassImmutable(String),

    /// More conditions than allowed
    #[error("{count} conditions, at most {max} are allowed")]
    TooManyConditions {
        /// Actual number
        count: usize,
        /// Allowed maximum
        max: usize,
    },

    /// Two conditions share a type
    #[error("duplicate condition type {0}")]
    DuplicateCondition(String),
}

/// Checks a provider string: `<dns-subdomain>/<name>` with a dotted domain.
pub fn validate_provider(provider: &str) -> Result<(), ValidationError> {
    let len = provider.len();
    if len == 0 || len > MAX_PROVIDER_LEN {
        return Err(ValidationError::ProviderLength {
            len,
            max: MAX_PROVIDER_LEN,
        });
    }
    let invalid = || ValidationError::ProviderFormat(provider.to_string());
    let (domain, name) = provider.split_once('/').ok_or_else(invalid)?;
    if !domain.contains('.') || !is_dns_subdomain(domain) || !is_name(name) {
        return Err(invalid());
    }
    Ok(())
}

fn is_dns_subdomain(s: &str) -> bool {
    s.len() <= 253
        && s.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
}

fn is_name(s: &str) -> bool {
    let alnum = |c: char| c.is_ascii_alphanumeric();
    !s.is_empty()
        && s.starts_with(alnum)
        && s.ends_with(alnum)
        && s.chars().all(|c| alnum(c) || matches!(c, '-' | '_' | '.'))
}

/// Validates a PodNetwork on create.
pub fn validate_pod_network(pod_network: &PodNetwork) -> Result<(), ValidationError> {
    validate_provider(&pod_network.spec.provider)?;
    if let Some(status) = &pod_network.status {
        validate_conditions(status.conditions.iter().map(|c| c.type_.as_str()))?;
    }
    Ok(())
}

/// Validates a PodNetwork update against the stored object.
pub fn validate_pod_network_update(old: &PodNetwork, new: &PodNetwork) -> Result<(), ValidationError> {
    if old.spec.provider != new.spec.provider {
        return Err(ValidationError::ProviderImmutable {
            old: old.spec.provider.clone(),
            new: new.spec.provider.clone(),
        });
    }
    validate_pod_network(new)
}

/// Validates a NetworkClass update against the stored object.
pub fn validate_network_class_update(old: &NetworkClass, new: &NetworkClass) -> Result<(), ValidationError> {
    if old.spec != new.spec {
        return Err(ValidationError::ClassImmutable(
            new.metadata.name.clone().unwrap_or_default(),
        ));
    }
    Ok(())
}

/// At most [`MAX_CONDITIONS`] conditions with unique types.
pub fn validate_conditions<'a>(types: impl IntoIterator<Item = &'a str>) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for type_ in types {
        if !seen.insert(type_) {
            return Err(ValidationError::DuplicateCondition(type_.to_string()));
        }
    }
    if seen.len() > MAX_CONDITIONS {
        return Err(ValidationError::TooManyConditions {
            count: seen.len(),
            max: MAX_CONDITIONS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn test_provider_accepts_domain_prefixed_names() {
        assert!(validate_provider("foo.io/bar").is_ok());
        assert!(validate_provider("net.example.com/ovn-kubernetes").is_ok());
    }

    #[test]
    fn test_provider_rejects_malformed_values() {
        assert!(matches!(validate_provider(""), Err(ValidationError::ProviderLength { len: 0, .. })));
        assert!(matches!(validate_provider("bar"), Err(ValidationError::ProviderFormat(_))));
        assert!(matches!(validate_provider("localhost/bar"), Err(ValidationError::ProviderFormat(_))));
        assert!(matches!(validate_provider("Foo.io/bar"), Err(ValidationError::ProviderFormat(_))));
        assert!(matches!(validate_provider("foo.io/"), Err(ValidationError::ProviderFormat(_))));
        let long = format!("{}.io/bar", "a".repeat(250));
        assert!(matches!(validate_provider(&long), Err(ValidationError::ProviderLength { .. })));
    }

    #[test]
    fn test_provider_is_immutable() {
        let old = pod_network("dataplane", true);
        let mut new = old.clone();
        new.spec.enabled = false;
        assert!(validate_pod_network_update(&old, &new).is_ok());

        new.spec.provider = "other.io/impl".to_string();
        assert!(matches!(
            validate_pod_network_update(&old, &new),
            Err(ValidationError::ProviderImmutable { .. })
        ));
    }

    #[test]
    fn test_network_class_is_immutable() {
        let old = network_class("ovn-kubernetes", "k8s.ovn.org", "UserDefinedNetwork");
        assert!(validate_network_class_update(&old, &old.clone()).is_ok());

        let new = network_class("ovn-kubernetes", "k8s.ovn.org", "ClusterUserDefinedNetwork");
        assert_eq!(
            validate_network_class_update(&old, &new),
            Err(ValidationError::ClassImmutable("ovn-kubernetes".to_string()))
        );
    }

    #[test]
    fn test_conditions_limits() {
        assert!(validate_conditions(["Ready", "ParamsReady"]).is_ok());
        assert_eq!(
            validate_conditions(["Ready", "Ready"]),
            Err(ValidationError::DuplicateCondition("Ready".to_string()))
        );
        assert!(matches!(
            validate_conditions(["A", "B", "C", "D", "E", "F"]),
            Err(ValidationError::TooManyConditions { count: 6, max: 5 })
        ));
    }
}
