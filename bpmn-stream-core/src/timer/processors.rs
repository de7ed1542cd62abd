use crate::error::{CommandError, ProcessingError, Rejection};
use crate::processing::bpmn::{BpmnBehaviors, BpmnElementContext};
use crate::processing::{ProcessingContext, RecordProcessor};
use crate::record::*;
use crate::types::NO_KEY;
use tracing::debug;

fn timer_value<'r>(command: &'r Record) -> Result<&'r TimerRecord, ProcessingError> {
    command.as_timer().ok_or(ProcessingError::UnexpectedValue {
        intent: command.intent,
    })
}

// ─── CREATE ───────────────────────────────────────────────────

/// TIMER CREATE: open a timer for an activated element. Used to schedule the
/// next occurrence of a cycle.
pub struct TimerCreateProcessor;

impl RecordProcessor for TimerCreateProcessor {
    fn process(
        &self,
        command: &Record,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<(), CommandError> {
        let timer = timer_value(command)?;
        let active = ctx
            .state()
            .element_instance(timer.element_instance_key)
            .is_some_and(|instance| instance.is_active());
        if !active {
            return Err(Rejection::not_found(format!(
                "Expected to create timer for element instance '{}', but it is not active",
                timer.element_instance_key
            ))
            .into());
        }
        let process = ctx.process(&timer.bpmn_process_id)?;
        if process.element(&timer.target_element_id).is_none() {
            return Err(Rejection::invalid_argument(format!(
                "Expected timer target '{}' to exist in process '{}', but it does not",
                timer.target_element_id, timer.bpmn_process_id
            ))
            .into());
        }

        let key = ctx.next_key();
        ctx.append_event(key, TimerIntent::Created, timer.clone())?;
        Ok(())
    }
}

// ─── TRIGGER ──────────────────────────────────────────────────

/// TIMER TRIGGER: fire a due timer and hand the event to the element that
/// waits on it.
pub struct TimerTriggerProcessor;

impl TimerTriggerProcessor {
    /// Next occurrence of a cycle, or `None` when no repetition is left.
    fn next_occurrence(timer: &TimerRecord) -> Option<TimerRecord> {
        if timer.repetitions == 0 {
            return None;
        }
        Some(TimerRecord {
            due_date: timer.due_date.saturating_add(timer.interval_ms),
            repetitions: if timer.repetitions < 0 {
                -1
            } else {
                timer.repetitions - 1
            },
            ..timer.clone()
        })
    }
}

impl RecordProcessor for TimerTriggerProcessor {
    fn process(
        &self,
        command: &Record,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<(), CommandError> {
        let Some(timer) = ctx.state().timer(command.key).cloned() else {
            return Err(Rejection::not_found(format!(
                "Expected to trigger timer with key '{}', but no such timer was found",
                command.key
            ))
            .into());
        };
        let Some(instance) = ctx
            .state()
            .element_instance(timer.element_instance_key)
            .filter(|instance| instance.is_active())
        else {
            return Err(Rejection::not_found(format!(
                "Expected to trigger timer with key '{}', but its element instance '{}' is not active",
                command.key, timer.element_instance_key
            ))
            .into());
        };
        let host = BpmnElementContext::of(instance);
        if ctx.state().event_trigger(host.element_instance_key).is_some() {
            return Err(Rejection::invalid_state(format!(
                "Expected to trigger timer with key '{}', but element instance '{}' was already triggered",
                command.key, host.element_instance_key
            ))
            .into());
        }

        let process = ctx.process(&timer.bpmn_process_id)?;
        let target = process
            .element(&timer.target_element_id)
            .cloned()
            .ok_or_else(|| ProcessingError::UnknownElement {
                bpmn_process_id: timer.bpmn_process_id.clone(),
                element_id: timer.target_element_id.clone(),
            })?;

        ctx.append_event(command.key, TimerIntent::Triggered, timer.clone())?;
        debug!(
            key = command.key,
            element_instance = host.element_instance_key,
            target = %target.id,
            due_date = timer.due_date,
            "Timer triggered"
        );

        BpmnBehaviors::new(ctx, process).trigger_event(&host, &target)?;
        let repeating =
            target.element_type == BpmnElementType::BoundaryEvent && !target.cancel_activity;
        if repeating {
            if let Some(next) = Self::next_occurrence(&timer) {
                ctx.append_command(NO_KEY, TimerIntent::Create, next);
            }
        }
        Ok(())
    }
}

// ─── CANCEL ───────────────────────────────────────────────────

pub struct TimerCancelProcessor;

impl RecordProcessor for TimerCancelProcessor {
    fn process(
        &self,
        command: &Record,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<(), CommandError> {
        let Some(timer) = ctx.state().timer(command.key).cloned() else {
            return Err(Rejection::not_found(format!(
                "Expected to cancel timer with key '{}', but no such timer was found",
                command.key
            ))
            .into());
        };
        ctx.append_event(command.key, TimerIntent::Canceled, timer)?;
        Ok(())
    }
}
