use super::{ElementInstance, ElementLifecycle, EventTrigger, ProcessingState};
use crate::error::ProcessingError;
use crate::model::{ExecutableFlowNode, ExecutableProcess, JoinKind, ProcessRegistry};
use crate::record::*;
use crate::types::{Key, NO_KEY};
use std::sync::Arc;
use tracing::trace;

/// Applies events to [`ProcessingState`]. The only code that mutates state;
/// used both while processing (as events are written) and on replay.
#[derive(Clone)]
pub struct EventAppliers {
    processes: Arc<ProcessRegistry>,
}

impl EventAppliers {
    pub fn new(processes: Arc<ProcessRegistry>) -> Self {
        Self { processes }
    }

    pub fn apply(
        &self,
        state: &mut ProcessingState,
        key: Key,
        intent: Intent,
        value: &RecordValue,
    ) -> Result<(), ProcessingError> {
        state.observe_key(key);
        trace!(key, ?intent, "Applying event");

        match (intent, value) {
            (
                Intent::ProcessInstanceCreation(ProcessInstanceCreationIntent::Created),
                RecordValue::ProcessInstanceCreation(creation),
            ) => {
                state
                    .variables
                    .insert(creation.process_instance_key, creation.variables.clone());
                Ok(())
            }
            (Intent::ProcessInstance(pi_intent), RecordValue::ProcessInstance(record)) => {
                self.apply_process_instance(state, key, pi_intent, record)
            }
            (Intent::Timer(timer_intent), RecordValue::Timer(timer)) => {
                self.apply_timer(state, key, timer_intent, timer)
            }
            (
                Intent::MessageSubscription(subscription_intent),
                RecordValue::MessageSubscription(subscription),
            ) => self.apply_message_subscription(state, key, subscription_intent, subscription),
            (Intent::Job(job_intent), RecordValue::Job(job)) => {
                match job_intent {
                    JobIntent::Created => {
                        state.jobs.insert(key, job.clone());
                    }
                    JobIntent::Completed => {
                        state.jobs.remove(&key);
                        if job.kind == JobKind::ExecutionListener {
                            if let Some(instance) =
                                state.element_instances.get_mut(&job.element_instance_key)
                            {
                                instance.completed_start_listeners += 1;
                            }
                        }
                    }
                    JobIntent::Canceled => {
                        state.jobs.remove(&key);
                    }
                    JobIntent::Complete => {}
                }
                Ok(())
            }
            (Intent::Incident(incident_intent), RecordValue::Incident(incident)) => {
                match incident_intent {
                    IncidentIntent::Created => {
                        state.incidents.insert(key, incident.clone());
                    }
                    IncidentIntent::Resolved => {
                        state.incidents.remove(&key);
                    }
                    IncidentIntent::Resolve => {}
                }
                Ok(())
            }
            (
                Intent::VariableDocument(VariableDocumentIntent::Updated),
                RecordValue::VariableDocument(document),
            ) => {
                state
                    .variables
                    .entry(document.scope_key)
                    .or_default()
                    .extend(document.variables.clone());
                Ok(())
            }
            (intent, _) if intent.value_type() != value.value_type() => {
                Err(ProcessingError::UnexpectedValue { intent })
            }
            // commands carry no state change
            _ => Ok(()),
        }
    }

    fn apply_process_instance(
        &self,
        state: &mut ProcessingState,
        key: Key,
        intent: ProcessInstanceIntent,
        record: &ProcessInstanceRecord,
    ) -> Result<(), ProcessingError> {
        use ProcessInstanceIntent::*;

        match intent {
            ElementActivating => {
                if state.element_instances.contains_key(&key) {
                    return Err(ProcessingError::DuplicateElementInstance { key });
                }
                state
                    .element_instances
                    .insert(key, ElementInstance::new(key, record.clone()));
                if record.flow_scope_key != NO_KEY {
                    let process = self.process(&record.bpmn_process_id)?;
                    let element = element(&process, &record.element_id)?;
                    consume_tokens(state, element, record.flow_scope_key);
                    if let Some(scope) = state.element_instances.get_mut(&record.flow_scope_key) {
                        scope.active_children += 1;
                    }
                }
                Ok(())
            }
            ElementActivated | ElementCompleting | ElementTerminating => {
                let instance = state
                    .element_instances
                    .get_mut(&key)
                    .ok_or(ProcessingError::ElementInstanceNotFound(key))?;
                check_transition(key, Some(instance.state), intent)?;
                instance.state = intent;
                Ok(())
            }
            ElementCompleted | ElementTerminated => {
                let instance = state
                    .element_instances
                    .get(&key)
                    .ok_or(ProcessingError::ElementInstanceNotFound(key))?;
                check_transition(key, Some(instance.state), intent)?;
                state.element_instances.remove(&key);
                state.event_triggers.remove(&key);
                state.taken_flows.retain(|(scope, _), _| *scope != key);
                state.reserved_joins.retain(|(scope, _), _| *scope != key);

                if record.bpmn_element_type == BpmnElementType::Process {
                    state.variables.remove(&record.process_instance_key);
                }
                if let Some(scope) = state.element_instances.get_mut(&record.flow_scope_key) {
                    scope.active_children = scope.active_children.saturating_sub(1);
                }
                Ok(())
            }
            SequenceFlowTaken => {
                let process = self.process(&record.bpmn_process_id)?;
                let flow = process.sequence_flow(&record.element_id).ok_or_else(|| {
                    ProcessingError::UnknownElement {
                        bpmn_process_id: record.bpmn_process_id.clone(),
                        element_id: record.element_id.clone(),
                    }
                })?;
                let target = element(&process, &flow.target_id)?;
                *state
                    .taken_flows
                    .entry((record.flow_scope_key, flow.id.clone()))
                    .or_insert(0) += 1;
                if target.join_kind() == Some(JoinKind::Parallel) {
                    reserve_complete_join(state, target, record.flow_scope_key);
                }
                if let Some(scope) = state.element_instances.get_mut(&record.flow_scope_key) {
                    scope.active_sequence_flows += 1;
                }
                Ok(())
            }
            ActivateElement | CompleteElement | TerminateElement | Cancel => Ok(()),
        }
    }

    fn apply_timer(
        &self,
        state: &mut ProcessingState,
        key: Key,
        intent: TimerIntent,
        timer: &TimerRecord,
    ) -> Result<(), ProcessingError> {
        match intent {
            TimerIntent::Created => {
                state.timers.insert(key, timer.clone());
            }
            TimerIntent::Triggered => {
                state.timers.remove(&key);
                self.store_trigger(
                    state,
                    key,
                    &timer.bpmn_process_id,
                    timer.element_instance_key,
                    &timer.target_element_id,
                )?;
            }
            TimerIntent::Canceled => {
                state.timers.remove(&key);
            }
            TimerIntent::Create | TimerIntent::Trigger | TimerIntent::Cancel => {}
        }
        Ok(())
    }

    fn apply_message_subscription(
        &self,
        state: &mut ProcessingState,
        key: Key,
        intent: MessageSubscriptionIntent,
        subscription: &MessageSubscriptionRecord,
    ) -> Result<(), ProcessingError> {
        match intent {
            MessageSubscriptionIntent::Created => {
                state.message_subscriptions.insert(key, subscription.clone());
            }
            MessageSubscriptionIntent::Correlated => {
                let process = self.process(&subscription.bpmn_process_id)?;
                let target = element(&process, &subscription.target_element_id)?;
                // a non-interrupting boundary keeps listening
                if target.element_type != BpmnElementType::BoundaryEvent || target.cancel_activity {
                    state.message_subscriptions.remove(&key);
                }
                self.store_trigger(
                    state,
                    key,
                    &subscription.bpmn_process_id,
                    subscription.element_instance_key,
                    &subscription.target_element_id,
                )?;
            }
            MessageSubscriptionIntent::Deleted => {
                state.message_subscriptions.remove(&key);
            }
        }
        Ok(())
    }

    /// Remember which event interrupts `host_key`: the first one to fire on
    /// an event-based gateway or an interrupting boundary event.
    fn store_trigger(
        &self,
        state: &mut ProcessingState,
        event_key: Key,
        bpmn_process_id: &str,
        host_key: Key,
        target_element_id: &str,
    ) -> Result<(), ProcessingError> {
        let Some(host) = state.element_instances.get(&host_key) else {
            return Ok(());
        };
        let process = self.process(bpmn_process_id)?;
        let target = element(&process, target_element_id)?;
        let interrupting = host.element_type() == BpmnElementType::EventBasedGateway
            || (target.element_type == BpmnElementType::BoundaryEvent && target.cancel_activity);
        if interrupting {
            state
                .event_triggers
                .entry(host_key)
                .or_insert_with(|| EventTrigger {
                    event_key,
                    element_id: target_element_id.to_string(),
                });
        }
        Ok(())
    }

    fn process(&self, bpmn_process_id: &str) -> Result<Arc<ExecutableProcess>, ProcessingError> {
        self.processes
            .get(bpmn_process_id)
            .ok_or_else(|| ProcessingError::UnknownProcess(bpmn_process_id.to_string()))
    }
}

fn element<'a>(
    process: &'a ExecutableProcess,
    element_id: &str,
) -> Result<&'a ExecutableFlowNode, ProcessingError> {
    process
        .element(element_id)
        .ok_or_else(|| ProcessingError::UnknownElement {
            bpmn_process_id: process.bpmn_process_id.clone(),
            element_id: element_id.to_string(),
        })
}

fn check_transition(
    key: Key,
    from: Option<ProcessInstanceIntent>,
    to: ProcessInstanceIntent,
) -> Result<(), ProcessingError> {
    if ElementLifecycle::can_transition(from, to) {
        Ok(())
    } else {
        Err(ProcessingError::IllegalTransition { key, from, to })
    }
}

fn take_token(state: &mut ProcessingState, scope_key: Key, flow_id: &str) -> bool {
    let slot = (scope_key, flow_id.to_string());
    let Some(count) = state.taken_flows.get_mut(&slot) else {
        return false;
    };
    *count -= 1;
    if *count == 0 {
        state.taken_flows.remove(&slot);
    }
    true
}

/// Once every incoming flow of a parallel join holds a token, one token per
/// flow is set aside for the join's next activation.
fn reserve_complete_join(state: &mut ProcessingState, join: &ExecutableFlowNode, scope_key: Key) {
    let complete = join
        .incoming
        .iter()
        .all(|flow_id| state.taken_flow_count(scope_key, flow_id) > 0);
    if !complete {
        return;
    }
    for flow_id in &join.incoming {
        take_token(state, scope_key, flow_id);
    }
    *state
        .reserved_joins
        .entry((scope_key, join.id.clone()))
        .or_insert(0) += 1;
}

/// An element reached through sequence flows consumes the tokens that
/// activated it: a parallel join its reserved set, an inclusive join one
/// token from every incoming flow holding one, anything else a single
/// token. Elements activated by an event hold no token.
fn consume_tokens(state: &mut ProcessingState, element: &ExecutableFlowNode, scope_key: Key) {
    let consumed = match element.join_kind() {
        Some(JoinKind::Parallel) => {
            let slot = (scope_key, element.id.clone());
            match state.reserved_joins.get_mut(&slot) {
                Some(count) => {
                    *count -= 1;
                    if *count == 0 {
                        state.reserved_joins.remove(&slot);
                    }
                    element.incoming.len() as u32
                }
                None => 0,
            }
        }
        Some(JoinKind::Inclusive) => element
            .incoming
            .iter()
            .filter(|flow_id| take_token(state, scope_key, flow_id))
            .count() as u32,
        None => element
            .incoming
            .iter()
            .find(|flow_id| state.taken_flow_count(scope_key, flow_id) > 0)
            .cloned()
            .map_or(0, |flow_id| u32::from(take_token(state, scope_key, &flow_id))),
    };

    if let Some(scope) = state.element_instances.get_mut(&scope_key) {
        scope.active_sequence_flows = scope.active_sequence_flows.saturating_sub(consumed);
    }
}
