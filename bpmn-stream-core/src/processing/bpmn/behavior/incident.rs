use super::BpmnBehaviors;
use crate::error::{Failure, ProcessingError};
use crate::processing::bpmn::BpmnElementContext;
use crate::record::{IncidentIntent, IncidentRecord};
use crate::types::Key;
use tracing::info;

pub trait IncidentBehavior {
    /// Raise an incident for a failed step of the element.
    fn create_incident(
        &mut self,
        failure: &Failure,
        context: &BpmnElementContext,
    ) -> Result<Key, ProcessingError>;

    /// Resolve every open incident of the element instance.
    fn resolve_incidents(&mut self, context: &BpmnElementContext) -> Result<(), ProcessingError>;
}

impl IncidentBehavior for BpmnBehaviors<'_, '_> {
    fn create_incident(
        &mut self,
        failure: &Failure,
        context: &BpmnElementContext,
    ) -> Result<Key, ProcessingError> {
        let key = self.ctx.next_key();
        info!(
            key,
            element = %context.element_id,
            element_instance = failure.element_instance_key,
            error_type = ?failure.error_type,
            message = %failure.message,
            "Raising incident"
        );
        self.ctx.append_event(
            key,
            IncidentIntent::Created,
            IncidentRecord {
                error_type: failure.error_type,
                error_message: failure.message.clone(),
                bpmn_process_id: context.bpmn_process_id.clone(),
                process_instance_key: context.process_instance_key,
                element_instance_key: failure.element_instance_key,
                element_id: context.element_id.clone(),
            },
        )?;
        Ok(key)
    }

    fn resolve_incidents(&mut self, context: &BpmnElementContext) -> Result<(), ProcessingError> {
        for (key, incident) in self.state().incidents_of(context.element_instance_key) {
            self.ctx
                .append_event(key, IncidentIntent::Resolved, incident)?;
        }
        Ok(())
    }
}
