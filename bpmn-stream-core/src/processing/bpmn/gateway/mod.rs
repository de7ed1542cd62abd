//! Gateway processors.
//!
//! None of the gateways except the event-based one has a wait state: they
//! decide which flows to take and complete within the activating command.
//! Joins are not here; they are decided when their incoming flows are taken.

mod event_based;
mod exclusive;
mod inclusive;
mod parallel;

pub use event_based::EventBasedGatewayProcessor;
pub use exclusive::ExclusiveGatewayProcessor;
pub use inclusive::InclusiveGatewayProcessor;
pub use parallel::ParallelGatewayProcessor;

use super::{BpmnBehaviors, BpmnElementContext, IncidentBehavior, JobBehavior, TransitionOutcome};
use crate::error::{Failure, ProcessingError};
use crate::model::SequenceFlow;
use crate::record::ErrorType;

pub(crate) const NO_OUTGOING_FLOW_TAKEN: &str =
    "Expected at least one condition to evaluate to true, or to have a default flow";

pub(crate) fn no_flow_taken(context: &BpmnElementContext) -> Failure {
    Failure::new(
        NO_OUTGOING_FLOW_TAKEN,
        ErrorType::ConditionError,
        context.element_instance_key,
    )
}

/// A flow without condition is always fulfilled.
fn is_fulfilled(
    flow: &SequenceFlow,
    context: &BpmnElementContext,
    behaviors: &BpmnBehaviors<'_, '_>,
) -> Result<bool, Failure> {
    match &flow.condition {
        Some(condition) => behaviors.evaluate_condition(condition, context),
        None => Ok(true),
    }
}

/// Cancel an outstanding execution listener job, resolve incidents and
/// terminate.
fn terminate_gateway(
    context: &BpmnElementContext,
    behaviors: &mut BpmnBehaviors<'_, '_>,
) -> Result<TransitionOutcome, ProcessingError> {
    behaviors.cancel_jobs(context)?;
    behaviors.resolve_incidents(context)?;
    behaviors.transition_to_terminated(context)?;
    Ok(TransitionOutcome::Continue)
}

/// Activate and complete a gateway without wait state, then take `flows`.
/// With no flow to take the gateway ends its path.
fn complete_taking(
    flows: &[&SequenceFlow],
    context: &BpmnElementContext,
    behaviors: &mut BpmnBehaviors<'_, '_>,
) -> Result<(), ProcessingError> {
    behaviors.transition_to_activated(context)?;
    behaviors.transition_to_completing(context)?;
    behaviors.transition_to_completed(context)?;
    if flows.is_empty() {
        return behaviors.on_element_completed(context);
    }
    behaviors.take_sequence_flows(context, flows)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Runs a gateway processor against a hand-built process and state.

    use crate::clock::ControlledClock;
    use crate::error::StepError;
    use crate::log::LogAppendEntry;
    use crate::model::yaml::parse_process_yaml;
    use crate::model::ProcessRegistry;
    use crate::processing::bpmn::{BpmnBehaviors, BpmnElementContext, BpmnElementProcessor};
    use crate::processing::ProcessingContext;
    use crate::record::*;
    use crate::state::{EventAppliers, ProcessingState};
    use crate::types::NO_KEY;
    use std::sync::Arc;

    pub struct GatewayHarness {
        pub registry: Arc<ProcessRegistry>,
        pub state: ProcessingState,
        pub process_id: String,
    }

    impl GatewayHarness {
        /// Deploy `yaml` and start an active process instance with `variables`.
        pub fn new(yaml: &str, variables: Variables) -> Self {
            let process = parse_process_yaml(yaml).unwrap();
            let process_id = process.bpmn_process_id.clone();
            let mut registry = ProcessRegistry::new();
            registry.deploy(process);
            let registry = Arc::new(registry);

            let appliers = EventAppliers::new(registry.clone());
            let mut state = ProcessingState::new(1);
            let root = ProcessInstanceRecord {
                bpmn_process_id: process_id.clone(),
                process_instance_key: 1,
                element_id: process_id.clone(),
                bpmn_element_type: BpmnElementType::Process,
                flow_scope_key: NO_KEY,
            };
            let creation = ProcessInstanceCreationRecord {
                bpmn_process_id: process_id.clone(),
                process_instance_key: 1,
                variables,
            };
            appliers
                .apply(&mut state, 1, ProcessInstanceCreationIntent::Created.into(), &creation.into())
                .unwrap();
            for intent in [
                ProcessInstanceIntent::ElementActivating,
                ProcessInstanceIntent::ElementActivated,
            ] {
                appliers
                    .apply(&mut state, 1, intent.into(), &root.clone().into())
                    .unwrap();
            }
            Self {
                registry,
                state,
                process_id,
            }
        }

        /// Activate `element_id` in the root scope and run `finalize_activation`.
        pub fn activate(
            &mut self,
            processor: &dyn BpmnElementProcessor,
            element_id: &str,
        ) -> (Result<(), StepError>, Vec<LogAppendEntry>) {
            let appliers = EventAppliers::new(self.registry.clone());
            let clock = ControlledClock::new(0);
            let process = self.registry.get(&self.process_id).unwrap();
            let element = process.element(element_id).unwrap().clone();
            let mut ctx = ProcessingContext::new(&mut self.state, &appliers, &self.registry, &clock);
            let key = ctx.next_key();
            let context = BpmnElementContext {
                element_instance_key: key,
                flow_scope_key: 1,
                process_instance_key: 1,
                bpmn_process_id: self.process_id.clone(),
                element_id: element_id.to_string(),
                element_type: element.element_type,
            };
            let mut behaviors = BpmnBehaviors::new(&mut ctx, process.clone());
            behaviors.transition_to_activating(&context).unwrap();
            let result = processor.finalize_activation(&element, &context, &mut behaviors);
            drop(behaviors);
            (result, ctx.into_entries())
        }
    }

    /// Ids of the sequence flows taken, in order.
    pub fn taken_flows(entries: &[LogAppendEntry]) -> Vec<String> {
        entries
            .iter()
            .filter(|e| e.intent == Intent::ProcessInstance(ProcessInstanceIntent::SequenceFlowTaken))
            .filter_map(|e| match &e.value {
                RecordValue::ProcessInstance(pi) => Some(pi.element_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Element ids of the ACTIVATE_ELEMENT commands, in order.
    pub fn activated_elements(entries: &[LogAppendEntry]) -> Vec<String> {
        entries
            .iter()
            .filter(|e| e.intent == Intent::ProcessInstance(ProcessInstanceIntent::ActivateElement))
            .filter_map(|e| match &e.value {
                RecordValue::ProcessInstance(pi) => Some(pi.element_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Process instance intents of the entries, commands and events alike.
    pub fn element_intents(entries: &[LogAppendEntry]) -> Vec<ProcessInstanceIntent> {
        entries
            .iter()
            .filter_map(|e| match e.intent {
                Intent::ProcessInstance(intent) => Some(intent),
                _ => None,
            })
            .collect()
    }
}
