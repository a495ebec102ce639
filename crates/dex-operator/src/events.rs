//! Publishing of Kubernetes events on the reconciled objects.
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::Instrument;

/// Receives events about the reconciled objects.
///
/// Publishing never fails from the point of view of the caller, problems are logged.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, object: ObjectReference, event: Event);
}

/// Builds an informational event.
pub fn normal(reason: &str, note: impl Into<String>) -> Event {
    Event {
        type_: EventType::Normal,
        reason: reason.to_owned(),
        note: Some(note.into()),
        action: reason.to_owned(),
        secondary: None,
    }
}

/// Builds a warning event, e.g. about a failed call to the identity provider.
pub fn warning(reason: &str, note: impl Into<String>) -> Event {
    Event {
        type_: EventType::Warning,
        ..normal(reason, note)
    }
}

/// Publishes events to the Kubernetes API in the background.
#[derive(Clone)]
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: kube::Client, controller: &str) -> Self {
        KubeEventPublisher {
            recorder: Recorder::new(
                client,
                Reporter {
                    controller: controller.to_owned(),
                    instance: None,
                },
            ),
        }
    }
}

impl EventPublisher for KubeEventPublisher {
    fn publish(&self, object: ObjectReference, event: Event) {
        let recorder = self.recorder.clone();
        // Run in the background
        tokio::spawn(
            async move {
                if let Err(err) = recorder.publish(&event, &object).await {
                    tracing::error!(
                        error = &err as &dyn std::error::Error,
                        "Failed to publish K8s event"
                    );
                }
            }
            .in_current_span(),
        );
    }
}
