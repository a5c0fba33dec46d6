//! Controller configuration, read from environment variables.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::time::Duration;

/// Runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Bind address of the health and metrics endpoint (`METRICS_ADDR`)
    pub metrics_addr: SocketAddr,
    /// Concurrent reconciliations per loop (`RECONCILE_CONCURRENCY`)
    pub concurrency: u16,
    /// First retry delay after a failed pass (`BACKOFF_MIN_SECONDS`)
    pub backoff_min: Duration,
    /// Retry delay cap (`BACKOFF_MAX_SECONDS`)
    pub backoff_max: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            concurrency: 4,
            backoff_min: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let defaults = Self::default();
        let config = Self {
            metrics_addr: parse(&lookup, "METRICS_ADDR")?.unwrap_or(defaults.metrics_addr),
            concurrency: parse(&lookup, "RECONCILE_CONCURRENCY")?.unwrap_or(defaults.concurrency),
            backoff_min: parse(&lookup, "BACKOFF_MIN_SECONDS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_min),
            backoff_max: parse(&lookup, "BACKOFF_MAX_SECONDS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_max),
        };
        if config.concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if config.backoff_min.is_zero() || config.backoff_min > config.backoff_max {
            return Err(ControllerError::InvalidConfig(format!(
                "BACKOFF_MIN_SECONDS ({}) must be positive and not exceed BACKOFF_MAX_SECONDS ({})",
                config.backoff_min.as_secs(),
                config.backoff_max.as_secs()
            )));
        }
        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ControllerError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ControllerError> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.metrics_addr.port(), 8080);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("METRICS_ADDR", "127.0.0.1:9090"),
            ("RECONCILE_CONCURRENCY", "8"),
            ("BACKOFF_MIN_SECONDS", "1"),
            ("BACKOFF_MAX_SECONDS", "60"),
        ])
        .unwrap();
        assert_eq!(config.metrics_addr, "127.0.0.1:9090".parse().unwrap());
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.backoff_min, Duration::from_secs(1));
        assert_eq!(config.backoff_max, Duration::from_secs(60));
    }

    #[test]
    fn test_rejects_unparsable_values() {
        let err = from_pairs(&[("RECONCILE_CONCURRENCY", "many")]).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(msg) if msg.contains("RECONCILE_CONCURRENCY")));
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let err = from_pairs(&[("BACKOFF_MIN_SECONDS", "600"), ("BACKOFF_MAX_SECONDS", "60")]).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }
}
