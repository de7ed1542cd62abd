use super::terminate_gateway;
use crate::error::{ProcessingError, StepError};
use crate::model::ExecutableFlowNode;
use crate::processing::bpmn::{
    no_wait_state, BpmnBehaviors, BpmnElementContext, BpmnElementProcessor, TransitionOutcome,
};

/// Forks into every outgoing flow. Joining happens when the incoming flows
/// are taken, so an activated parallel gateway always passes through.
pub struct ParallelGatewayProcessor;

impl BpmnElementProcessor for ParallelGatewayProcessor {
    fn finalize_activation(
        &self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError> {
        behaviors.pass_through(element, context)?;
        Ok(())
    }

    fn finalize_completion(
        &self,
        _element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        _behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError> {
        Err(no_wait_state(context))
    }

    fn on_terminate(
        &self,
        _element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<TransitionOutcome, ProcessingError> {
        terminate_gateway(context, behaviors)
    }
}
