//! Kubernetes Events for failed reconciliations.
//!
//! A failed pass is published as a `Warning` event on the object so that
//! `kubectl describe` shows why a PodNetwork is not Ready or a claim is
//! missing its network.

use crate::error::ControllerError;
use kube::{Client, Resource};
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Reporting controller name on published events.
const REPORTER: &str = "pod-network-controller";

/// Action recorded on every published event.
const ACTION: &str = "Reconcile";

/// Upper bound the events API accepts for `note`.
const MAX_NOTE_LEN: usize = 1024;

/// Publishes reconcile failures as Warning events.
#[derive(Clone)]
pub struct EventPublisher {
    recorder: Recorder,
}

impl EventPublisher {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: REPORTER.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }

    /// Publishes `error` against `obj`. Publish failures are only logged.
    pub async fn reconcile_failed<K>(&self, obj: &K, error: &ControllerError)
    where
        K: Resource<DynamicType = ()>,
    {
        let event = failure_event(error);
        if let Err(e) = self.recorder.publish(&event, &obj.object_ref(&())).await {
            warn!(reason = %event.reason, error = %e, "Failed to publish event");
        }
    }
}

/// Builds the Warning event describing a failed pass.
pub fn failure_event(error: &ControllerError) -> Event {
    Event {
        type_: EventType::Warning,
        reason: error.reason().to_string(),
        note: Some(truncate_note(error.to_string())),
        action: ACTION.to_string(),
        secondary: None,
    }
}

fn truncate_note(mut note: String) -> String {
    if note.len() > MAX_NOTE_LEN {
        let mut end = MAX_NOTE_LEN;
        while !note.is_char_boundary(end) {
            end -= 1;
        }
        note.truncate(end);
    }
    note
}

#[cfg(test)]
mod tests {
    use super::*;
    use pod_network::test_utils::device_ref;
    use pod_network::{Error as ReconcileError, ProjectionFailure};

    #[test]
    fn test_conflict_maps_to_warning_with_reason() {
        let error = ControllerError::Reconcile(ReconcileError::ConflictRetriesExhausted {
            object: "PodNetwork/dataplane".to_string(),
            attempts: 5,
        });

        let event = failure_event(&error);

        assert!(matches!(event.type_, EventType::Warning));
        assert_eq!(event.reason, error.reason());
        assert_eq!(event.action, "Reconcile");
        assert_eq!(event.note.as_deref(), Some(error.to_string().as_str()));
        assert!(event.secondary.is_none());
    }

    #[test]
    fn test_projection_failure_names_reason() {
        let error = ControllerError::Reconcile(ReconcileError::Projection {
            claim: "default/blue".to_string(),
            failures: vec![ProjectionFailure::DataNotObject(device_ref("dra.example.com", "node-a", "eth1"))],
        });

        let event = failure_event(&error);

        assert_eq!(event.reason, "ResolutionFailed");
        assert!(event.note.as_deref().is_some_and(|note| note.contains("default/blue")));
    }

    #[test]
    fn test_long_note_is_truncated_on_char_boundary() {
        let error = ControllerError::Watch("ü".repeat(MAX_NOTE_LEN));

        let note = failure_event(&error).note.unwrap_or_default();

        assert!(note.len() <= MAX_NOTE_LEN);
        assert!(note.len() > MAX_NOTE_LEN - 2);
        assert!(note.starts_with("Resource watch failed: "));
    }
}
