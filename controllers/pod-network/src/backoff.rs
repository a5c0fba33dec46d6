//! # Exponential Backoff
//!
//! Per-object retry delays for failed reconciliations. Each object's delay
//! doubles on every consecutive failure, from a configured minimum up to a
//! cap, and starts over once the object reconciles successfully. Entries of
//! deleted objects are dropped by the watch feeds.

use kube::{Resource, ResourceExt};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `min` and capped at `max`
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Get the next delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Backoff state for one object
#[derive(Debug)]
struct BackoffState {
    backoff: ExponentialBackoff,
    error_count: u32,
}

/// Tracks backoff per object key (`kind/namespace/name`).
#[derive(Debug)]
pub struct BackoffTracker {
    min: Duration,
    max: Duration,
    states: Mutex<HashMap<String, BackoffState>>,
}

impl BackoffTracker {
    /// Creates a tracker with the given bounds.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Records a failure and returns `(delay, consecutive failures)`.
    pub fn next_for(&self, key: &str) -> (Duration, u32) {
        match self.states.lock() {
            Ok(mut states) => {
                let state = states.entry(key.to_string()).or_insert_with(|| BackoffState {
                    backoff: ExponentialBackoff::new(self.min, self.max),
                    error_count: 0,
                });
                state.error_count += 1;
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!(error = %e, "Failed to lock backoff states, using minimum backoff");
                (self.min, 1)
            }
        }
    }

    /// Forgets the failures of an object after a successful pass.
    pub fn reset(&self, key: &str) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(key);
        }
    }

    /// Drops the state of a deleted object.
    pub fn forget<K>(&self, obj: &K)
    where
        K: Resource<DynamicType = ()>,
    {
        self.reset(&object_key(obj));
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.states.lock().map(|states| states.len()).unwrap_or_default()
    }
}

/// `Kind/namespace/name`, or `Kind/name` for cluster-scoped objects.
pub fn object_key<K>(obj: &K) -> String
where
    K: Resource<DynamicType = ()>,
{
    match obj.namespace() {
        Some(ns) => format!("{}/{}/{}", K::kind(&()), ns, obj.name_any()),
        None => format!("{}/{}", K::kind(&()), obj.name_any()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pod_network::test_utils::{claim, pod_network};

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(secs(5), secs(300));

        let seq: Vec<u64> = (0..9).map(|_| backoff.next_backoff().as_secs()).collect();
        assert_eq!(seq, vec![5, 10, 20, 40, 80, 160, 300, 300, 300]);
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(secs(5), secs(300));
        backoff.next_backoff();
        backoff.next_backoff();

        backoff.reset();

        assert_eq!(backoff.next_backoff(), secs(5));
    }

    #[test]
    fn test_tracker_is_per_object() {
        let tracker = BackoffTracker::new(secs(5), secs(300));

        assert_eq!(tracker.next_for("PodNetwork/a"), (secs(5), 1));
        assert_eq!(tracker.next_for("PodNetwork/a"), (secs(10), 2));
        assert_eq!(tracker.next_for("PodNetwork/b"), (secs(5), 1));

        tracker.reset("PodNetwork/a");
        assert_eq!(tracker.next_for("PodNetwork/a"), (secs(5), 1));
    }

    #[test]
    fn test_object_key_includes_namespace_when_present() {
        assert_eq!(object_key(&pod_network("dataplane", true)), "PodNetwork/dataplane");
        assert_eq!(object_key(&claim("default", "blue", vec![])), "ResourceClaim/default/blue");
    }

    #[test]
    fn test_deleted_objects_leave_no_state() {
        let tracker = BackoffTracker::new(secs(5), secs(300));
        let failing_network = pod_network("dataplane", true);
        let failing_claim = claim("default", "blue", vec![]);
        tracker.next_for(&object_key(&failing_network));
        tracker.next_for(&object_key(&failing_claim));
        tracker.next_for(&object_key(&failing_claim));
        assert_eq!(tracker.tracked(), 2);

        tracker.forget(&failing_network);
        tracker.forget(&failing_claim);

        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn test_forget_unknown_object_is_harmless() {
        let tracker = BackoffTracker::new(secs(5), secs(300));
        tracker.next_for("PodNetwork/other");

        tracker.forget(&pod_network("dataplane", true));

        assert_eq!(tracker.tracked(), 1);
    }
}
