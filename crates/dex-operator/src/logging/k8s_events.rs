//! Utilities for publishing Kubernetes events

use std::error::Error;

use kube::runtime::{
    controller,
    events::{Event, EventType},
};

use super::controller::ReconcilerError;
use crate::events::EventPublisher;

/// Maximum length of an event note, in bytes
const MAX_NOTE_LEN: usize = 1024;

/// Renders `err` followed by all of its sources, separated by `: `
pub fn error_chain(err: &dyn Error) -> String {
    std::iter::successors(Some(err), |&err| err.source())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

/// Cuts `note` down to [`MAX_NOTE_LEN`] bytes on a character boundary, ending it with an ellipsis.
fn truncate_note(note: &mut String) {
    const ELLIPSIS: char = '…';
    if note.len() <= MAX_NOTE_LEN {
        return;
    }

    let keep = MAX_NOTE_LEN - ELLIPSIS.len_utf8();
    let cut = note
        .char_indices()
        .map(|(index, _)| index)
        .take_while(|index| *index <= keep)
        .last()
        .unwrap_or(0);
    note.truncate(cut);
    note.push(ELLIPSIS);
}

/// Converts an [`Error`] into a publishable Kubernetes [`Event`]
fn error_to_event<E: ReconcilerError>(err: &E) -> Event {
    let mut note = error_chain(err);
    truncate_note(&mut note);
    Event {
        type_: EventType::Warning,
        reason: err.category().to_string(),
        note: Some(note),
        action: "Reconcile".to_string(),
        secondary: err.secondary_object().map(|secondary| secondary.into()),
    }
}

/// Reports an error coming from a controller to Kubernetes
///
/// This is intended to be executed on the log entries returned by [`kube::runtime::Controller::run`]
#[tracing::instrument(skip(events))]
pub fn publish_controller_error_as_k8s_event<ReconcileErr, QueueErr>(
    events: &dyn EventPublisher,
    controller_error: &controller::Error<ReconcileErr, QueueErr>,
) where
    ReconcileErr: ReconcilerError,
    QueueErr: Error,
{
    let (error, obj) = match controller_error {
        controller::Error::ReconcilerFailed(err, obj) => (err, obj),
        // Other error types are intended for the operator administrator, and aren't linked to a specific object
        _ => return,
    };
    events.publish(obj.clone().into(), error_to_event(error));
}
