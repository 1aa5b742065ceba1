//! Workflow execution: the step executor and the top-level orchestrator.

pub mod step;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

use agentflow_types::event::WorkflowEvent;

use crate::bus::EventBus;
use crate::repository::events::EventStore;

/// Append an event, then broadcast it. Event loss is preferable to workflow
/// failure: append errors are logged and swallowed.
pub(crate) async fn emit_event_safe<E: EventStore>(
    events: &E,
    bus: &EventBus,
    event: WorkflowEvent,
) {
    let event_type = event.event_type;
    match events.append_event(event).await {
        Ok(stamped) => bus.publish(stamped),
        Err(err) => {
            tracing::warn!(
                event_type = event_type.as_str(),
                error = %err,
                "failed to append workflow event; continuing"
            );
        }
    }
}
