//! Status conditions
//!
//! Wire-compatible with `metav1.Condition`. Conditions live in a list that is
//! map-keyed by `type`; helpers here keep that invariant.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type authored by the readiness reconciler.
pub const READY: &str = "Ready";

/// Reason used while readiness has not been determined yet.
pub const REASON_PENDING: &str = "Pending";

/// A single observation of an aspect of an object's state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, unique within a condition list
    #[serde(rename = "type")]
    pub type_: String,

    /// True, False or Unknown
    pub status: ConditionStatus,

    /// Generation of the object the condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time the status flipped
    pub last_transition_time: DateTime<Utc>,

    /// Machine-readable CamelCase reason
    pub reason: String,

    /// Human-readable detail
    #[serde(default)]
    pub message: String,
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Condition has not been determined
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

impl Condition {
    /// Builds a condition stamped with the current time.
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            observed_generation: None,
            last_transition_time: Utc::now(),
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Sets the observed generation.
    #[must_use]
    pub fn with_observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// The seeded `Ready=Unknown/Pending` condition.
    pub fn pending_ready() -> Self {
        Self::new(READY, ConditionStatus::Unknown, REASON_PENDING, "")
    }

    /// Compares everything but the transition time.
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.observed_generation == other.observed_generation
    }
}

/// Finds the condition with the given type.
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Inserts or replaces the condition of the same type, in place.
///
/// The previous transition time is kept when the status did not change.
/// Returns `true` if the list changed in any field other than the
/// transition time.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.same_state(&condition) {
                return false;
            }
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64, status: ConditionStatus, reason: &str) -> Condition {
        Condition {
            type_: READY.to_string(),
            status,
            observed_generation: Some(1),
            last_transition_time: Utc.timestamp_opt(secs, 0).unwrap(),
            reason: reason.to_string(),
            message: String::new(),
        }
    }

    #[test]
    fn set_condition_appends_new_type() {
        let mut conditions = Vec::new();
        assert!(set_condition(&mut conditions, at(0, ConditionStatus::True, "Ready")));
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn set_condition_is_noop_for_same_state() {
        let mut conditions = vec![at(0, ConditionStatus::True, "Ready")];
        assert!(!set_condition(&mut conditions, at(100, ConditionStatus::True, "Ready")));
        assert_eq!(conditions[0].last_transition_time.timestamp(), 0);
    }

    #[test]
    fn set_condition_keeps_transition_time_when_status_unchanged() {
        let mut conditions = vec![at(0, ConditionStatus::False, "ConditionsNotReady")];
        assert!(set_condition(
            &mut conditions,
            at(100, ConditionStatus::False, "AdministrativelyDisabled")
        ));
        assert_eq!(conditions[0].reason, "AdministrativelyDisabled");
        assert_eq!(conditions[0].last_transition_time.timestamp(), 0);
    }

    #[test]
    fn set_condition_moves_transition_time_on_flip() {
        let mut conditions = vec![at(0, ConditionStatus::False, "AdministrativelyDisabled")];
        assert!(set_condition(&mut conditions, at(100, ConditionStatus::True, "Ready")));
        assert_eq!(conditions[0].last_transition_time.timestamp(), 100);
    }

    #[test]
    fn condition_status_uses_kubernetes_spelling() {
        let json = serde_json::to_value(at(0, ConditionStatus::Unknown, "Pending")).unwrap();
        assert_eq!(json["status"], "Unknown");
        assert_eq!(json["type"], "Ready");
        assert_eq!(json["lastTransitionTime"], "1970-01-01T00:00:00Z");
    }
}
