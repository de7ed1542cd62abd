use super::{complete_taking, is_fulfilled, no_flow_taken, terminate_gateway};
use crate::error::{ProcessingError, StepError};
use crate::model::{ExecutableFlowNode, SequenceFlow};
use crate::processing::bpmn::{
    no_wait_state, BpmnBehaviors, BpmnElementContext, BpmnElementProcessor, TransitionOutcome,
};

/// Takes every outgoing flow whose condition holds. The default flow is
/// only taken when none does, regardless of its own condition.
pub struct InclusiveGatewayProcessor;

impl BpmnElementProcessor for InclusiveGatewayProcessor {
    fn finalize_activation(
        &self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError> {
        let process = behaviors.process().clone();
        let outgoing = process.outgoing(element);

        let mut default_flow = None;
        let mut fulfilled: Vec<&SequenceFlow> = Vec::new();
        for flow in &outgoing {
            if flow.is_default {
                default_flow = Some(*flow);
            } else if is_fulfilled(flow, context, behaviors)? {
                fulfilled.push(*flow);
            }
        }

        if fulfilled.is_empty() && !outgoing.is_empty() {
            let default_flow = default_flow.ok_or_else(|| no_flow_taken(context))?;
            fulfilled.push(default_flow);
        }
        complete_taking(&fulfilled, context, behaviors)?;
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
