use super::{
    BpmnBehaviors, BpmnElementContext, BpmnElementProcessor, IncidentBehavior, JobBehavior,
    TransitionOutcome,
};
use crate::error::{Failure, ProcessingError, StepError};
use crate::model::ExecutableFlowNode;
use crate::record::{ErrorType, JobKind};

/// Creates a job for an external worker and waits for its completion.
/// Boundary timers are subscribed for the lifetime of the task.
pub struct ServiceTaskProcessor;

impl BpmnElementProcessor for ServiceTaskProcessor {
    fn finalize_activation(
        &self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError> {
        let job_type = element.job_type.as_deref().ok_or_else(|| {
            Failure::new(
                format!("Expected service task '{}' to have a job type", element.id),
                ErrorType::ExtractValueError,
                context.element_instance_key,
            )
        })?;
        behaviors.subscribe_to_events(element, context)?;
        behaviors.create_job(context, job_type, JobKind::Task)?;
        behaviors.transition_to_activated(context)?;
        Ok(())
    }

    fn on_complete(
        &self,
        _element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError> {
        behaviors.cancel_jobs(context)?;
        behaviors.unsubscribe_from_events(context)?;
        Ok(())
    }

    fn finalize_completion(
        &self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError> {
        behaviors.complete_and_take_outgoing(element, context)?;
        Ok(())
    }

    fn on_terminate(
        &self,
        _element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<TransitionOutcome, ProcessingError> {
        behaviors.cancel_jobs(context)?;
        behaviors.unsubscribe_from_events(context)?;
        behaviors.resolve_incidents(context)?;
        behaviors.transition_to_terminated(context)?;
        Ok(TransitionOutcome::Continue)
    }
}
