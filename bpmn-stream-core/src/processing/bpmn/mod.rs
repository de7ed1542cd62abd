//! BPMN element execution
//!
//! [`BpmnStreamProcessor`] owns the element lifecycle: it validates lifecycle
//! commands, writes the lifecycle transitions it is responsible for and calls
//! into the [`BpmnElementProcessor`] registered for the element's type. The
//! element processors decide what happens next (which flows to take, what to
//! subscribe to) and express it through [`BpmnBehaviors`].

pub mod behavior;
mod container;
mod context;
mod event;
pub mod gateway;
mod task;

pub use behavior::{BpmnBehaviors, IncidentBehavior, JobBehavior};
pub use container::ProcessProcessor;
pub use context::BpmnElementContext;
pub use event::{
    BoundaryEventProcessor, EndEventProcessor, IntermediateCatchEventProcessor,
    StartEventProcessor,
};
pub use gateway::{
    EventBasedGatewayProcessor, ExclusiveGatewayProcessor, InclusiveGatewayProcessor,
    ParallelGatewayProcessor,
};
pub use task::ServiceTaskProcessor;

use crate::error::{CommandError, Failure, ProcessingError, Rejection, StepError};
use crate::model::{ExecutableFlowNode, ExecutableProcess};
use crate::processing::{ProcessingContext, RecordProcessor};
use crate::record::*;
use crate::state::EventTrigger;
use crate::types::{Key, NO_KEY};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

// ─── Element processor contract ───────────────────────────────

/// What the lifecycle driver does after `on_terminate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The element reached TERMINATED; notify its flow scope.
    Continue,
    /// Termination waits for children; the last child finishes it.
    Skip,
}

pub trait BpmnElementProcessor: Send + Sync {
    /// Right after ELEMENT_ACTIVATING, before any start execution listener.
    fn on_activate(
        &self,
        _element: &ExecutableFlowNode,
        _context: &BpmnElementContext,
        _behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError> {
        Ok(())
    }

    /// After all start execution listeners completed.
    fn finalize_activation(
        &self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError>;

    /// On COMPLETE_ELEMENT, before ELEMENT_COMPLETING.
    fn on_complete(
        &self,
        _element: &ExecutableFlowNode,
        _context: &BpmnElementContext,
        _behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError> {
        Ok(())
    }

    fn finalize_completion(
        &self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), StepError>;

    /// After ELEMENT_TERMINATING: cancel side effects and terminate.
    fn on_terminate(
        &self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<TransitionOutcome, ProcessingError>;
}

/// `finalize_completion` of an element that completes during activation.
pub(crate) fn no_wait_state(context: &BpmnElementContext) -> StepError {
    Failure::new(
        format!(
            "Expected to explicitly complete element '{}' of type {:?}, but it does not have a wait state",
            context.element_id, context.element_type
        ),
        ErrorType::Unknown,
        context.element_instance_key,
    )
    .into()
}

// ─── Registry ─────────────────────────────────────────────────

pub struct BpmnElementProcessors {
    processors: HashMap<BpmnElementType, Box<dyn BpmnElementProcessor>>,
}

impl BpmnElementProcessors {
    pub fn empty() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut processors = Self::empty();
        processors
            .register(BpmnElementType::Process, Box::new(ProcessProcessor))
            .register(BpmnElementType::StartEvent, Box::new(StartEventProcessor))
            .register(BpmnElementType::EndEvent, Box::new(EndEventProcessor))
            .register(BpmnElementType::ServiceTask, Box::new(ServiceTaskProcessor))
            .register(
                BpmnElementType::ExclusiveGateway,
                Box::new(ExclusiveGatewayProcessor),
            )
            .register(
                BpmnElementType::InclusiveGateway,
                Box::new(InclusiveGatewayProcessor),
            )
            .register(
                BpmnElementType::ParallelGateway,
                Box::new(ParallelGatewayProcessor),
            )
            .register(
                BpmnElementType::EventBasedGateway,
                Box::new(EventBasedGatewayProcessor),
            )
            .register(
                BpmnElementType::IntermediateCatchEvent,
                Box::new(IntermediateCatchEventProcessor),
            )
            .register(
                BpmnElementType::BoundaryEvent,
                Box::new(BoundaryEventProcessor),
            );
        processors
    }

    pub fn register(
        &mut self,
        element_type: BpmnElementType,
        processor: Box<dyn BpmnElementProcessor>,
    ) -> &mut Self {
        self.processors.insert(element_type, processor);
        self
    }

    pub fn get(
        &self,
        element_type: BpmnElementType,
    ) -> Result<&dyn BpmnElementProcessor, ProcessingError> {
        self.processors
            .get(&element_type)
            .map(|p| p.as_ref())
            .ok_or(ProcessingError::MissingElementProcessor(element_type))
    }
}

impl Default for BpmnElementProcessors {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ─── Lifecycle driver ─────────────────────────────────────────

/// Processes the PROCESS_INSTANCE commands and drives element lifecycles
/// for the other processors (listener jobs, incident retries).
pub struct BpmnStreamProcessor {
    processors: Arc<BpmnElementProcessors>,
}

impl BpmnStreamProcessor {
    pub fn new(processors: Arc<BpmnElementProcessors>) -> Self {
        Self { processors }
    }

    fn activate(
        &self,
        command: &Record,
        record: &ProcessInstanceRecord,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<(), CommandError> {
        if record.flow_scope_key != NO_KEY {
            let scope_active = ctx
                .state()
                .element_instance(record.flow_scope_key)
                .is_some_and(|scope| scope.is_active());
            if !scope_active {
                return Err(Rejection::not_found(format!(
                    "Expected flow scope instance with key '{}' to be active, but it is not",
                    record.flow_scope_key
                ))
                .into());
            }
        }
        let key = if command.key == NO_KEY {
            ctx.next_key()
        } else {
            command.key
        };
        if ctx.state().element_instance(key).is_some() {
            return Err(Rejection::invalid_state(format!(
                "Expected to activate element with key '{key}', but it is already active"
            ))
            .into());
        }

        let process = ctx.process(&record.bpmn_process_id)?;
        let element = element(&process, &record.element_id)?;
        let processor = self.processors.get(element.element_type)?;
        let context = BpmnElementContext::new(key, record);
        let mut behaviors = BpmnBehaviors::new(ctx, process.clone());
        if !behaviors.join_ready(element, record.flow_scope_key) {
            debug!(
                join = %element.id,
                scope = record.flow_scope_key,
                "Join no longer ready, activation dropped"
            );
            return Ok(());
        }

        behaviors.transition_to_activating(&context)?;
        let result = processor.on_activate(element, &context, &mut behaviors);
        if !handle_step(result, &context, &mut behaviors)? {
            return Ok(());
        }
        self.continue_activation(element, &context, &mut behaviors)?;
        Ok(())
    }

    /// Run the next start listener, or `finalize_activation` once all
    /// listeners completed.
    fn continue_activation(
        &self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), ProcessingError> {
        let completed = behaviors
            .state()
            .element_instance(context.element_instance_key)
            .map(|instance| instance.completed_start_listeners)
            .unwrap_or(0);
        if let Some(listener) = element.start_listeners().nth(completed) {
            let open_job = !behaviors
                .state()
                .jobs_of(context.element_instance_key)
                .is_empty();
            if !open_job {
                debug!(
                    element = %context.element_id,
                    job_type = %listener.job_type,
                    "Running start execution listener"
                );
                behaviors.create_job(context, &listener.job_type, JobKind::ExecutionListener)?;
            }
            return Ok(());
        }

        let processor = self.processors.get(element.element_type)?;
        let result = processor.finalize_activation(element, context, behaviors);
        handle_step(result, context, behaviors)?;
        Ok(())
    }

    fn complete(
        &self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), ProcessingError> {
        let processor = self.processors.get(element.element_type)?;
        let result = processor.on_complete(element, context, behaviors);
        if !handle_step(result, context, behaviors)? {
            return Ok(());
        }
        behaviors.transition_to_completing(context)?;
        self.finalize_completion(element, context, behaviors)
    }

    fn finalize_completion(
        &self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), ProcessingError> {
        let processor = self.processors.get(element.element_type)?;
        let result = processor.finalize_completion(element, context, behaviors);
        handle_step(result, context, behaviors)?;
        Ok(())
    }

    fn terminate(
        &self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), ProcessingError> {
        let trigger = behaviors
            .state()
            .event_trigger(context.element_instance_key)
            .cloned();
        let processor = self.processors.get(element.element_type)?;

        behaviors.transition_to_terminating(context)?;
        match processor.on_terminate(element, context, behaviors)? {
            TransitionOutcome::Continue => self.after_terminated(element, context, trigger, behaviors),
            TransitionOutcome::Skip => Ok(()),
        }
    }

    /// An interrupting boundary event that caused the termination is
    /// activated now, in the host's flow scope. Otherwise the flow scope
    /// is notified.
    fn after_terminated(
        &self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
        trigger: Option<EventTrigger>,
        behaviors: &mut BpmnBehaviors<'_, '_>,
    ) -> Result<(), ProcessingError> {
        if let Some(trigger) = trigger {
            let process = behaviors.process().clone();
            let boundary = process.element(&trigger.element_id).filter(|boundary| {
                boundary.element_type == BpmnElementType::BoundaryEvent
                    && boundary.attached_to.as_deref() == Some(element.id.as_str())
            });
            let scope_active = behaviors
                .state()
                .element_instance(context.flow_scope_key)
                .is_some_and(|scope| scope.is_active());
            if let Some(boundary) = boundary {
                if scope_active {
                    behaviors.activate_triggered_event(boundary, context.flow_scope_key, context)?;
                    return behaviors.activate_unblocked_joins(context);
                }
            }
        }
        behaviors.on_element_terminated(context)
    }

    /// Continue an element whose start execution listener job completed.
    pub fn on_start_listener_completed(
        &self,
        ctx: &mut ProcessingContext<'_>,
        element_instance_key: Key,
    ) -> Result<(), ProcessingError> {
        let Some((process, context)) = instance_context(ctx, element_instance_key)? else {
            return Ok(());
        };
        let state = ctx.state().element_instance(element_instance_key).map(|i| i.state);
        if state != Some(ProcessInstanceIntent::ElementActivating) {
            return Ok(());
        }
        let element = element(&process, &context.element_id)?;
        let mut behaviors = BpmnBehaviors::new(ctx, process.clone());
        self.continue_activation(element, &context, &mut behaviors)
    }

    /// Retry the step an incident was raised for.
    pub fn retry(
        &self,
        ctx: &mut ProcessingContext<'_>,
        element_instance_key: Key,
    ) -> Result<(), ProcessingError> {
        let Some((process, context)) = instance_context(ctx, element_instance_key)? else {
            return Ok(());
        };
        let state = ctx.state().element_instance(element_instance_key).map(|i| i.state);
        let element = element(&process, &context.element_id)?;
        let mut behaviors = BpmnBehaviors::new(ctx, process.clone());
        debug!(key = element_instance_key, ?state, "Retrying element step");
        match state {
            Some(ProcessInstanceIntent::ElementActivating) => {
                self.continue_activation(element, &context, &mut behaviors)
            }
            Some(ProcessInstanceIntent::ElementActivated) => {
                self.complete(element, &context, &mut behaviors)
            }
            Some(ProcessInstanceIntent::ElementCompleting) => {
                self.finalize_completion(element, &context, &mut behaviors)
            }
            _ => Ok(()),
        }
    }
}

impl RecordProcessor for BpmnStreamProcessor {
    fn process(
        &self,
        command: &Record,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<(), CommandError> {
        let Intent::ProcessInstance(intent) = command.intent else {
            return Err(ProcessingError::MissingRecordProcessor(command.intent).into());
        };
        let record = command
            .as_process_instance()
            .ok_or(ProcessingError::UnexpectedValue {
                intent: command.intent,
            })?;

        match intent {
            ProcessInstanceIntent::ActivateElement => self.activate(command, record, ctx),
            ProcessInstanceIntent::CompleteElement => {
                let Some(instance) = ctx.state().element_instance(command.key) else {
                    return Err(Rejection::not_found(format!(
                        "Expected to complete element with key '{}', but no such element was found",
                        command.key
                    ))
                    .into());
                };
                if !instance.is_active() {
                    return Err(Rejection::invalid_state(format!(
                        "Expected element with key '{}' to be activated, but it is in state {:?}",
                        command.key, instance.state
                    ))
                    .into());
                }
                let (process, context) = instance_context(ctx, command.key)?
                    .ok_or(ProcessingError::ElementInstanceNotFound(command.key))?;
                let element = element(&process, &context.element_id)?;
                let mut behaviors = BpmnBehaviors::new(ctx, process.clone());
                self.complete(element, &context, &mut behaviors)?;
                Ok(())
            }
            ProcessInstanceIntent::TerminateElement => {
                let Some(instance) = ctx.state().element_instance(command.key) else {
                    return Err(Rejection::not_found(format!(
                        "Expected to terminate element with key '{}', but no such element was found",
                        command.key
                    ))
                    .into());
                };
                if instance.is_terminating() {
                    return Err(Rejection::invalid_state(format!(
                        "Expected to terminate element with key '{}', but it is already terminating",
                        command.key
                    ))
                    .into());
                }
                let (process, context) = instance_context(ctx, command.key)?
                    .ok_or(ProcessingError::ElementInstanceNotFound(command.key))?;
                let element = element(&process, &context.element_id)?;
                let mut behaviors = BpmnBehaviors::new(ctx, process.clone());
                self.terminate(element, &context, &mut behaviors)?;
                Ok(())
            }
            ProcessInstanceIntent::Cancel => {
                let instance = ctx
                    .state()
                    .element_instance(command.key)
                    .filter(|i| i.element_type() == BpmnElementType::Process);
                let Some(instance) = instance else {
                    return Err(Rejection::not_found(format!(
                        "Expected to cancel a process instance with key '{}', but no such process was found",
                        command.key
                    ))
                    .into());
                };
                if instance.is_terminating() {
                    return Err(Rejection::invalid_state(format!(
                        "Expected to cancel a process instance with key '{}', but it is already being canceled",
                        command.key
                    ))
                    .into());
                }
                let value = instance.value.clone();
                ctx.append_command(command.key, ProcessInstanceIntent::TerminateElement, value);
                Ok(())
            }
            other => Err(Rejection::invalid_argument(format!(
                "Expected a process instance command, but got {other:?}"
            ))
            .into()),
        }
    }
}

// ─── Helpers ──────────────────────────────────────────────────

fn element<'p>(
    process: &'p ExecutableProcess,
    element_id: &str,
) -> Result<&'p ExecutableFlowNode, ProcessingError> {
    process
        .element(element_id)
        .ok_or_else(|| ProcessingError::UnknownElement {
            bpmn_process_id: process.bpmn_process_id.clone(),
            element_id: element_id.to_string(),
        })
}

fn instance_context(
    ctx: &ProcessingContext<'_>,
    element_instance_key: Key,
) -> Result<Option<(Arc<ExecutableProcess>, BpmnElementContext)>, ProcessingError> {
    let Some(instance) = ctx.state().element_instance(element_instance_key) else {
        return Ok(None);
    };
    let process = ctx.process(&instance.value.bpmn_process_id)?;
    Ok(Some((process, BpmnElementContext::of(instance))))
}

/// Turns a step failure into an incident. `Ok(true)` when the step
/// succeeded and the lifecycle may continue.
fn handle_step(
    result: Result<(), StepError>,
    context: &BpmnElementContext,
    behaviors: &mut BpmnBehaviors<'_, '_>,
) -> Result<bool, ProcessingError> {
    match result {
        Ok(()) => Ok(true),
        Err(StepError::Failure(failure)) => {
            warn!(
                key = context.element_instance_key,
                element = %context.element_id,
                %failure,
                "Element step failed"
            );
            behaviors.create_incident(&failure, context)?;
            Ok(false)
        }
        Err(StepError::Processing(e)) => Err(e),
    }
}
