use super::BpmnBehaviors;
use crate::error::{Failure, ProcessingError, StepError};
use crate::model::{ExecutableFlowNode, MessageDefinition};
use crate::processing::bpmn::BpmnElementContext;
use crate::record::{
    BpmnElementType, ErrorType, MessageSubscriptionIntent, MessageSubscriptionRecord,
    TimerIntent, TimerRecord, Variables,
};
use crate::timer::expression::TimerExpression;
use crate::types::Key;
use tracing::debug;

impl BpmnBehaviors<'_, '_> {
    /// Open the subscriptions an element waits on: its own event for a
    /// catch event, the attached boundary events for an activity, the events
    /// of the following catch events for an event-based gateway.
    ///
    /// Message correlation keys are all resolved before anything is written,
    /// so a missing key fails the step without opening any subscription.
    pub fn subscribe_to_events(
        &mut self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
    ) -> Result<(), StepError> {
        let process = self.process.clone();
        let handlers: Vec<&ExecutableFlowNode> = match element.element_type {
            BpmnElementType::IntermediateCatchEvent => vec![element],
            BpmnElementType::EventBasedGateway => process.successors(element),
            _ => process.boundary_events(element),
        };

        let mut messages = Vec::new();
        for handler in &handlers {
            if let Some(message) = &handler.message {
                let correlation_key = self.correlation_key(message, context)?;
                messages.push((handler.id.as_str(), message, correlation_key));
            }
        }

        for handler in &handlers {
            if let Some(timer) = &handler.timer {
                self.create_timer(context, &handler.id, timer)?;
            }
        }
        for (target_element_id, message, correlation_key) in messages {
            self.open_message_subscription(context, target_element_id, message, correlation_key)?;
        }
        Ok(())
    }

    /// Value of the correlation key variable, as a string. Numbers are
    /// accepted and formatted, anything else fails.
    fn correlation_key(
        &self,
        message: &MessageDefinition,
        context: &BpmnElementContext,
    ) -> Result<String, Failure> {
        let value = self
            .state()
            .variables(context.process_instance_key)
            .and_then(|variables| variables.get(&message.correlation_key));
        match value {
            Some(serde_json::Value::String(key)) => Ok(key.clone()),
            Some(serde_json::Value::Number(key)) => Ok(key.to_string()),
            Some(other) => Err(Failure::new(
                format!(
                    "Failed to extract the correlation key for '{}': expected a string or a number, but was '{other}'",
                    message.correlation_key
                ),
                ErrorType::ExtractValueError,
                context.element_instance_key,
            )),
            None => Err(Failure::new(
                format!(
                    "Failed to extract the correlation key for '{}': no such variable",
                    message.correlation_key
                ),
                ErrorType::ExtractValueError,
                context.element_instance_key,
            )),
        }
    }

    fn open_message_subscription(
        &mut self,
        context: &BpmnElementContext,
        target_element_id: &str,
        message: &MessageDefinition,
        correlation_key: String,
    ) -> Result<Key, ProcessingError> {
        let key = self.ctx.next_key();
        debug!(
            key,
            element_instance = context.element_instance_key,
            target = target_element_id,
            message = %message.name,
            correlation_key = %correlation_key,
            "Subscribing to message"
        );
        self.ctx.append_event(
            key,
            MessageSubscriptionIntent::Created,
            MessageSubscriptionRecord {
                bpmn_process_id: context.bpmn_process_id.clone(),
                process_instance_key: context.process_instance_key,
                element_instance_key: context.element_instance_key,
                target_element_id: target_element_id.to_string(),
                message_name: message.name.clone(),
                correlation_key,
                variables: Variables::new(),
            },
        )?;
        Ok(key)
    }

    fn create_timer(
        &mut self,
        context: &BpmnElementContext,
        target_element_id: &str,
        timer: &TimerExpression,
    ) -> Result<Key, ProcessingError> {
        let schedule = timer.schedule(self.ctx.now());
        let key = self.ctx.next_key();
        debug!(
            key,
            element_instance = context.element_instance_key,
            target = target_element_id,
            due_date = schedule.due_date,
            "Subscribing to timer"
        );
        self.ctx.append_event(
            key,
            TimerIntent::Created,
            TimerRecord {
                bpmn_process_id: context.bpmn_process_id.clone(),
                process_instance_key: context.process_instance_key,
                element_instance_key: context.element_instance_key,
                target_element_id: target_element_id.to_string(),
                due_date: schedule.due_date,
                repetitions: schedule.repetitions,
                interval_ms: schedule.interval_ms,
            },
        )?;
        Ok(key)
    }

    /// Cancel every open timer and message subscription of the element
    /// instance.
    pub fn unsubscribe_from_events(
        &mut self,
        context: &BpmnElementContext,
    ) -> Result<(), ProcessingError> {
        for (key, timer) in self.state().timers_of(context.element_instance_key) {
            self.ctx.append_event(key, TimerIntent::Canceled, timer)?;
        }
        for (key, subscription) in self
            .state()
            .message_subscriptions_of(context.element_instance_key)
        {
            self.ctx
                .append_event(key, MessageSubscriptionIntent::Deleted, subscription)?;
        }
        Ok(())
    }

    /// Hand an event that fired for `target` to the element instance waiting
    /// on it. A catch event or event-based gateway completes, an interrupting
    /// boundary event terminates its host, a non-interrupting one is
    /// activated next to it.
    pub fn trigger_event(
        &mut self,
        host: &BpmnElementContext,
        target: &ExecutableFlowNode,
    ) -> Result<(), ProcessingError> {
        match host.element_type {
            BpmnElementType::IntermediateCatchEvent | BpmnElementType::EventBasedGateway => {
                self.complete_element(host);
            }
            _ if target.element_type == BpmnElementType::BoundaryEvent => {
                if target.cancel_activity {
                    self.terminate_element(host);
                } else {
                    self.activate_triggered_event(target, host.flow_scope_key, host)?;
                }
            }
            _ => {
                return Err(ProcessingError::UnknownElement {
                    bpmn_process_id: host.bpmn_process_id.clone(),
                    element_id: target.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Activate the element that handles a fired event inside
    /// `flow_scope_key`. ACTIVATING and ACTIVATED are written directly, the
    /// completion follows as a command.
    pub fn activate_triggered_event(
        &mut self,
        element: &ExecutableFlowNode,
        flow_scope_key: Key,
        context: &BpmnElementContext,
    ) -> Result<Key, ProcessingError> {
        let key = self.ctx.next_key();
        let triggered = context.sibling(key, &element.id, element.element_type, flow_scope_key);
        self.transition_to_activating(&triggered)?;
        self.transition_to_activated(&triggered)?;
        self.complete_element(&triggered);
        Ok(key)
    }
}
