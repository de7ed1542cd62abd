use super::bpmn::BpmnStreamProcessor;
use super::{ProcessingContext, RecordProcessor};
use crate::error::{CommandError, ProcessingError, Rejection};
use crate::record::*;
use std::sync::Arc;
use tracing::debug;

/// JOB COMPLETE: a worker finished a job. Task jobs complete their element,
/// listener jobs let the element's activation continue.
pub struct JobCompleteProcessor {
    bpmn: Arc<BpmnStreamProcessor>,
}

impl JobCompleteProcessor {
    pub fn new(bpmn: Arc<BpmnStreamProcessor>) -> Self {
        Self { bpmn }
    }
}

impl RecordProcessor for JobCompleteProcessor {
    fn process(
        &self,
        command: &Record,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<(), CommandError> {
        let completion = command.as_job().ok_or(ProcessingError::UnexpectedValue {
            intent: command.intent,
        })?;
        let Some(job) = ctx.state().job(command.key).cloned() else {
            return Err(Rejection::not_found(format!(
                "Expected to complete job with key '{}', but no such job was found",
                command.key
            ))
            .into());
        };

        ctx.append_event(
            command.key,
            JobIntent::Completed,
            JobRecord {
                variables: completion.variables.clone(),
                ..job.clone()
            },
        )?;
        if !completion.variables.is_empty() {
            let key = ctx.next_key();
            ctx.append_event(
                key,
                VariableDocumentIntent::Updated,
                VariableDocumentRecord {
                    scope_key: job.process_instance_key,
                    variables: completion.variables.clone(),
                },
            )?;
        }
        debug!(key = command.key, job_type = %job.job_type, kind = ?job.kind, "Job completed");

        match job.kind {
            JobKind::Task => {
                if let Some(instance) = ctx.state().element_instance(job.element_instance_key) {
                    let value = instance.value.clone();
                    ctx.append_command(
                        job.element_instance_key,
                        ProcessInstanceIntent::CompleteElement,
                        value,
                    );
                }
            }
            JobKind::ExecutionListener => {
                self.bpmn
                    .on_start_listener_completed(ctx, job.element_instance_key)?;
            }
        }
        Ok(())
    }
}
