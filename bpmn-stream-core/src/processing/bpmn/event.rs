//! Start, end, intermediate catch and boundary events.

use super::{
    no_wait_state, BpmnBehaviors, BpmnElementContext, BpmnElementProcessor, IncidentBehavior,
    TransitionOutcome,
};
use crate::error::{ProcessingError, StepError};
use crate::model::ExecutableFlowNode;

fn terminate_event(
    context: &BpmnElementContext,
    behaviors: &mut BpmnBehaviors<'_, '_>,
) -> Result<TransitionOutcome, ProcessingError> {
    behaviors.resolve_incidents(context)?;
    behaviors.transition_to_terminated(context)?;
    Ok(TransitionOutcome::Continue)
}

// ─── None events ──────────────────────────────────────────────

pub struct StartEventProcessor;

impl BpmnElementProcessor for StartEventProcessor {
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
        terminate_event(context, behaviors)
    }
}

/// Ends its path. Completes the flow scope when nothing else runs in it.
pub struct EndEventProcessor;

impl BpmnElementProcessor for EndEventProcessor {
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
        terminate_event(context, behaviors)
    }
}

// ─── Catch events ─────────────────────────────────────────────

/// Waits for its timer or message. When activated after an event-based
/// gateway the event already happened and it completes right away.
pub struct IntermediateCatchEventProcessor;

impl BpmnElementProcessor for IntermediateCatchEventProcessor {
    fn finalize_activation(
        &self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError> {
        behaviors.subscribe_to_events(element, context)?;
        behaviors.transition_to_activated(context)?;
        Ok(())
    }

    fn on_complete(
        &self,
        _element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError> {
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
        behaviors.unsubscribe_from_events(context)?;
        terminate_event(context, behaviors)
    }
}

/// Only ever activated by its event firing; the host already decided
/// whether it is interrupted.
pub struct BoundaryEventProcessor;

impl BpmnElementProcessor for BoundaryEventProcessor {
    fn finalize_activation(
        &self,
        _element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError> {
        behaviors.transition_to_activated(context)?;
        behaviors.complete_element(context);
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
        terminate_event(context, behaviors)
    }
}
