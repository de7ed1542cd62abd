use super::{
    BpmnBehaviors, BpmnElementContext, BpmnElementProcessor, IncidentBehavior, JobBehavior,
    TransitionOutcome,
};
use crate::error::{ProcessingError, StepError};
use crate::model::ExecutableFlowNode;
use tracing::info;

/// The process element: activates the start event and completes once its
/// last child path ends.
pub struct ProcessProcessor;

impl BpmnElementProcessor for ProcessProcessor {
    fn finalize_activation(
        &self,
        _element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError> {
        let process = behaviors.process().clone();
        let start_event = behaviors.element(&process.start_event_id)?.clone();
        behaviors.transition_to_activated(context)?;
        behaviors.activate_element(&start_event, context.element_instance_key, context);
        Ok(())
    }

    fn finalize_completion(
        &self,
        _element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError> {
        behaviors.transition_to_completed(context)?;
        info!(
            process_instance = context.process_instance_key,
            process = %context.bpmn_process_id,
            "Process instance completed"
        );
        Ok(())
    }

    fn on_terminate(
        &self,
        _element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<TransitionOutcome, ProcessingError> {
        behaviors.cancel_jobs(context)?;
        behaviors.resolve_incidents(context)?;
        if behaviors.terminate_child_instances(context) {
            return Ok(TransitionOutcome::Skip);
        }
        behaviors.transition_to_terminated(context)?;
        info!(
            process_instance = context.process_instance_key,
            process = %context.bpmn_process_id,
            "Process instance terminated"
        );
        Ok(TransitionOutcome::Continue)
    }
}
