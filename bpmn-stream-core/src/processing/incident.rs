use super::bpmn::BpmnStreamProcessor;
use super::{ProcessingContext, RecordProcessor};
use crate::error::{CommandError, Rejection};
use crate::record::*;
use std::sync::Arc;
use tracing::info;

/// INCIDENT RESOLVE: close the incident and retry the step that failed.
pub struct IncidentResolveProcessor {
    bpmn: Arc<BpmnStreamProcessor>,
}

impl IncidentResolveProcessor {
    pub fn new(bpmn: Arc<BpmnStreamProcessor>) -> Self {
        Self { bpmn }
    }
}

impl RecordProcessor for IncidentResolveProcessor {
    fn process(
        &self,
        command: &Record,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<(), CommandError> {
        let Some(incident) = ctx.state().incident(command.key).cloned() else {
            return Err(Rejection::not_found(format!(
                "Expected to resolve incident with key '{}', but no such incident was found",
                command.key
            ))
            .into());
        };

        ctx.append_event(command.key, IncidentIntent::Resolved, incident.clone())?;
        info!(
            key = command.key,
            element = %incident.element_id,
            element_instance = incident.element_instance_key,
            "Incident resolved, retrying"
        );
        self.bpmn.retry(ctx, incident.element_instance_key)?;
        Ok(())
    }
}
