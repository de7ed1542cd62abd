use crate::error::{Failure, ProcessingError, StepError};
use crate::model::ExecutableFlowNode;
use crate::processing::bpmn::{
    BpmnBehaviors, BpmnElementContext, BpmnElementProcessor, IncidentBehavior, JobBehavior,
    TransitionOutcome,
};
use crate::record::ErrorType;

/// Waits on the events of the catch events that follow it. The first one
/// that fires completes the gateway and continues with that catch event;
/// the other subscriptions are dropped.
pub struct EventBasedGatewayProcessor;

impl BpmnElementProcessor for EventBasedGatewayProcessor {
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
        _element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError> {
        let trigger = behaviors
            .state()
            .event_trigger(context.element_instance_key)
            .cloned()
            .ok_or_else(|| {
                Failure::new(
                    format!(
                        "Expected an event to have been triggered for event-based gateway '{}', but none was",
                        context.element_id
                    ),
                    ErrorType::Unknown,
                    context.element_instance_key,
                )
            })?;
        let catch_event = behaviors.element(&trigger.element_id)?.clone();

        behaviors.transition_to_completed(context)?;
        behaviors.activate_triggered_event(&catch_event, context.flow_scope_key, context)?;
        behaviors.activate_unblocked_joins(context)?;
        Ok(())
    }

    fn on_terminate(
        &self,
        _element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<TransitionOutcome, ProcessingError> {
        behaviors.unsubscribe_from_events(context)?;
        behaviors.cancel_jobs(context)?;
        behaviors.resolve_incidents(context)?;
        behaviors.transition_to_terminated(context)?;
        Ok(TransitionOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::bpmn::gateway::test_support::*;
    use crate::record::{ProcessInstanceIntent, Variables};

    #[test]
    fn test_subscribes_to_every_following_catch_event() {
        let yaml = r#"
id: race
nodes:
  - { kind: StartEvent, id: start }
  - { kind: EventBasedGateway, id: gw }
  - { kind: TimerCatch, id: fast, timer: PT1S }
  - { kind: TimerCatch, id: slow, timer: PT5S }
  - { kind: EndEvent, id: end }
edges:
  - { from: start, to: gw }
  - { from: gw, to: fast }
  - { from: gw, to: slow }
  - { from: fast, to: end }
  - { from: slow, to: end }
"#;
        let mut harness = GatewayHarness::new(yaml, Variables::new());
        let (result, entries) = harness.activate(&EventBasedGatewayProcessor, "gw");
        result.unwrap();

        assert_eq!(
            element_intents(&entries),
            vec![
                ProcessInstanceIntent::ElementActivating,
                ProcessInstanceIntent::ElementActivated,
            ]
        );
        assert!(taken_flows(&entries).is_empty());

        let mut timers: Vec<(String, i64)> = harness
            .state
            .timers()
            .map(|(_, timer)| (timer.target_element_id.clone(), timer.due_date))
            .collect();
        timers.sort();
        assert_eq!(
            timers,
            vec![("fast".to_string(), 1_000), ("slow".to_string(), 5_000)]
        );
    }
}
