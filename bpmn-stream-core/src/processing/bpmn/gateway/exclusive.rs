use super::{complete_taking, is_fulfilled, no_flow_taken, terminate_gateway};
use crate::error::{Failure, ProcessingError, StepError};
use crate::model::{ExecutableFlowNode, ExecutableProcess, SequenceFlow};
use crate::processing::bpmn::{
    no_wait_state, BpmnBehaviors, BpmnElementContext, BpmnElementProcessor, TransitionOutcome,
};

/// Takes the first outgoing flow whose condition holds, in declaration
/// order, else the default flow.
pub struct ExclusiveGatewayProcessor;

impl ExclusiveGatewayProcessor {
    fn find_sequence_flow_to_take<'p>(
        process: &'p ExecutableProcess,
        element: &'p ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &BpmnBehaviors<'_, '_>,
    ) -> Result<Option<&'p SequenceFlow>, Failure> {
        let outgoing = process.outgoing(element);
        if outgoing.is_empty() {
            // implicit end
            return Ok(None);
        }

        let mut default_flow = None;
        for flow in outgoing {
            if flow.is_default {
                default_flow = Some(flow);
                continue;
            }
            if is_fulfilled(flow, context, behaviors)? {
                return Ok(Some(flow));
            }
        }
        default_flow
            .map(Some)
            .ok_or_else(|| no_flow_taken(context))
    }
}

impl BpmnElementProcessor for ExclusiveGatewayProcessor {
    fn finalize_activation(
        &self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError> {
        let process = behaviors.process().clone();
        let flow = Self::find_sequence_flow_to_take(&process, element, context, behaviors)?;
        let flows: Vec<&SequenceFlow> = flow.into_iter().collect();
        complete_taking(&flows, context, behaviors)?;
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
