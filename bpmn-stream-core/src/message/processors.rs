use crate::error::{CommandError, ProcessingError, Rejection};
use crate::processing::bpmn::{BpmnBehaviors, BpmnElementContext};
use crate::processing::{ProcessingContext, RecordProcessor};
use crate::record::*;
use crate::types::Key;
use std::collections::BTreeSet;
use tracing::debug;

/// MESSAGE PUBLISH: correlate a message to every element instance waiting
/// for it, at most once per process instance.
pub struct MessagePublishProcessor;

impl RecordProcessor for MessagePublishProcessor {
    fn process(
        &self,
        command: &Record,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<(), CommandError> {
        let RecordValue::Message(message) = &command.value else {
            return Err(ProcessingError::UnexpectedValue {
                intent: command.intent,
            }
            .into());
        };
        if message.name.trim().is_empty() {
            return Err(Rejection::invalid_argument(
                "Expected to publish a message with a name, but it was empty",
            )
            .into());
        }

        let key = ctx.next_key();
        ctx.append_event(key, MessageIntent::Published, message.clone())?;

        let mut correlated: BTreeSet<Key> = BTreeSet::new();
        let subscriptions = ctx
            .state()
            .correlating_subscriptions(&message.name, &message.correlation_key);
        for (subscription_key, subscription) in subscriptions {
            if correlated.contains(&subscription.process_instance_key) {
                continue;
            }
            let Some(instance) = ctx
                .state()
                .element_instance(subscription.element_instance_key)
                .filter(|instance| instance.is_active())
            else {
                continue;
            };
            let host = BpmnElementContext::of(instance);
            // another event already interrupts this instance
            if ctx.state().event_trigger(host.element_instance_key).is_some() {
                continue;
            }

            let process = ctx.process(&subscription.bpmn_process_id)?;
            let target = process
                .element(&subscription.target_element_id)
                .cloned()
                .ok_or_else(|| ProcessingError::UnknownElement {
                    bpmn_process_id: subscription.bpmn_process_id.clone(),
                    element_id: subscription.target_element_id.clone(),
                })?;

            let process_instance_key = subscription.process_instance_key;
            ctx.append_event(
                subscription_key,
                MessageSubscriptionIntent::Correlated,
                MessageSubscriptionRecord {
                    variables: message.variables.clone(),
                    ..subscription
                },
            )?;
            if !message.variables.is_empty() {
                let variables_key = ctx.next_key();
                ctx.append_event(
                    variables_key,
                    VariableDocumentIntent::Updated,
                    VariableDocumentRecord {
                        scope_key: process_instance_key,
                        variables: message.variables.clone(),
                    },
                )?;
            }
            debug!(
                message = %message.name,
                correlation_key = %message.correlation_key,
                element_instance = host.element_instance_key,
                target = %target.id,
                "Message correlated"
            );

            BpmnBehaviors::new(ctx, process).trigger_event(&host, &target)?;
            correlated.insert(process_instance_key);
        }

        if correlated.is_empty() {
            debug!(
                message = %message.name,
                correlation_key = %message.correlation_key,
                "Message published without open subscription"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ControlledClock;
    use crate::log::LogAppendEntry;
    use crate::model::yaml::parse_process_yaml;
    use crate::model::ProcessRegistry;
    use crate::state::{EventAppliers, ProcessingState};
    use crate::types::NO_KEY;
    use serde_json::json;
    use std::sync::Arc;

    const PROCESS: &str = r#"
id: payment
nodes:
  - { kind: StartEvent, id: start }
  - { kind: ServiceTask, id: charge, job_type: charge }
  - kind: MessageBoundary
    id: cancelled
    attached_to: charge
    message: { name: payment-cancelled, correlation_key: order_id }
  - kind: MessageBoundary
    id: noted
    attached_to: charge
    cancel_activity: false
    message: { name: payment-noted, correlation_key: order_id }
  - { kind: EndEvent, id: done }
  - { kind: EndEvent, id: aborted }
  - { kind: EndEvent, id: logged }
edges:
  - { from: start, to: charge }
  - { from: charge, to: done }
  - { from: cancelled, to: aborted }
  - { from: noted, to: logged }
"#;

    const TASK: Key = 2;

    struct Fixture {
        registry: Arc<ProcessRegistry>,
        appliers: EventAppliers,
        state: ProcessingState,
        clock: ControlledClock,
    }

    impl Fixture {
        /// Process instance 1 waiting in the service task with key 2.
        fn new() -> Self {
            let mut registry = ProcessRegistry::new();
            registry.deploy(parse_process_yaml(PROCESS).unwrap());
            let registry = Arc::new(registry);
            let appliers = EventAppliers::new(registry.clone());
            let mut state = ProcessingState::new(1);
            for (key, element_id, element_type, scope) in [
                (1, "payment", BpmnElementType::Process, NO_KEY),
                (TASK, "charge", BpmnElementType::ServiceTask, 1),
            ] {
                let record = ProcessInstanceRecord {
                    bpmn_process_id: "payment".into(),
                    process_instance_key: 1,
                    element_id: element_id.into(),
                    bpmn_element_type: element_type,
                    flow_scope_key: scope,
                };
                for intent in [
                    ProcessInstanceIntent::ElementActivating,
                    ProcessInstanceIntent::ElementActivated,
                ] {
                    appliers
                        .apply(&mut state, key, intent.into(), &record.clone().into())
                        .unwrap();
                }
            }
            Self {
                registry,
                appliers,
                state,
                clock: ControlledClock::new(0),
            }
        }

        fn subscribe(&mut self, key: Key, target: &str, name: &str, correlation_key: &str) {
            let subscription = MessageSubscriptionRecord {
                bpmn_process_id: "payment".into(),
                process_instance_key: 1,
                element_instance_key: TASK,
                target_element_id: target.into(),
                message_name: name.into(),
                correlation_key: correlation_key.into(),
                variables: Variables::new(),
            };
            self.appliers
                .apply(
                    &mut self.state,
                    key,
                    MessageSubscriptionIntent::Created.into(),
                    &subscription.into(),
                )
                .unwrap();
        }

        fn publish(
            &mut self,
            name: &str,
            correlation_key: &str,
            variables: Variables,
        ) -> (Result<(), CommandError>, Vec<LogAppendEntry>) {
            let command = Record {
                position: 1,
                source_record_position: -1,
                key: NO_KEY,
                record_type: RecordType::Command,
                intent: MessageIntent::Publish.into(),
                timestamp: 0,
                partition_id: 1,
                rejection_type: None,
                rejection_reason: String::new(),
                value: MessageRecord {
                    name: name.into(),
                    correlation_key: correlation_key.into(),
                    variables,
                }
                .into(),
            };
            let mut ctx =
                ProcessingContext::new(&mut self.state, &self.appliers, &self.registry, &self.clock);
            let result = MessagePublishProcessor.process(&command, &mut ctx);
            (result, ctx.into_entries())
        }
    }

    fn intents(entries: &[LogAppendEntry]) -> Vec<Intent> {
        entries.iter().map(|e| e.intent).collect()
    }

    #[test]
    fn test_interrupting_message_terminates_host() {
        let mut fixture = Fixture::new();
        fixture.subscribe(10, "cancelled", "payment-cancelled", "order-7");

        let variables: Variables = [("reason".to_string(), json!("fraud"))].into();
        let (result, entries) = fixture.publish("payment-cancelled", "order-7", variables);
        result.unwrap();

        assert_eq!(
            intents(&entries),
            vec![
                Intent::Message(MessageIntent::Published),
                Intent::MessageSubscription(MessageSubscriptionIntent::Correlated),
                Intent::VariableDocument(VariableDocumentIntent::Updated),
                Intent::ProcessInstance(ProcessInstanceIntent::TerminateElement),
            ]
        );
        assert_eq!(entries[3].key, TASK);
        let trigger = fixture.state.event_trigger(TASK).unwrap();
        assert_eq!(trigger.element_id, "cancelled");
        assert_eq!(trigger.event_key, 10);
        assert!(fixture.state.message_subscription(10).is_none());
        assert_eq!(
            fixture.state.variables(1).and_then(|v| v.get("reason")),
            Some(&json!("fraud"))
        );
    }

    #[test]
    fn test_correlation_key_must_match() {
        let mut fixture = Fixture::new();
        fixture.subscribe(10, "cancelled", "payment-cancelled", "order-7");

        let (result, entries) = fixture.publish("payment-cancelled", "order-8", Variables::new());
        result.unwrap();
        assert_eq!(intents(&entries), vec![Intent::Message(MessageIntent::Published)]);
        assert!(fixture.state.message_subscription(10).is_some());
    }

    #[test]
    fn test_non_interrupting_message_keeps_subscription() {
        let mut fixture = Fixture::new();
        fixture.subscribe(11, "noted", "payment-noted", "order-7");

        for _ in 0..2 {
            let (result, entries) = fixture.publish("payment-noted", "order-7", Variables::new());
            result.unwrap();
            assert_eq!(
                intents(&entries),
                vec![
                    Intent::Message(MessageIntent::Published),
                    Intent::MessageSubscription(MessageSubscriptionIntent::Correlated),
                    Intent::ProcessInstance(ProcessInstanceIntent::ElementActivating),
                    Intent::ProcessInstance(ProcessInstanceIntent::ElementActivated),
                    Intent::ProcessInstance(ProcessInstanceIntent::CompleteElement),
                ]
            );
        }
        assert!(fixture.state.message_subscription(11).is_some());
        assert!(fixture.state.event_trigger(TASK).is_none());
        assert!(fixture.state.element_instance(TASK).unwrap().is_active());
    }

    #[test]
    fn test_correlated_once_per_process_instance() {
        let mut fixture = Fixture::new();
        fixture.subscribe(10, "cancelled", "payment-cancelled", "order-7");
        fixture.subscribe(12, "cancelled", "payment-cancelled", "order-7");

        let (result, entries) = fixture.publish("payment-cancelled", "order-7", Variables::new());
        result.unwrap();
        let correlated = entries
            .iter()
            .filter(|e| e.intent == Intent::MessageSubscription(MessageSubscriptionIntent::Correlated))
            .count();
        assert_eq!(correlated, 1);
        assert!(fixture.state.message_subscription(12).is_some());
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut fixture = Fixture::new();
        let (result, entries) = fixture.publish("  ", "order-7", Variables::new());
        assert!(matches!(
            result,
            Err(CommandError::Rejected(Rejection {
                rejection_type: RejectionType::InvalidArgument,
                ..
            }))
        ));
        assert!(entries.is_empty());
    }
}
