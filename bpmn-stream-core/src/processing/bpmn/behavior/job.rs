use super::BpmnBehaviors;
use crate::error::ProcessingError;
use crate::processing::bpmn::BpmnElementContext;
use crate::record::{JobIntent, JobKind, JobRecord, Variables};
use crate::types::Key;

pub trait JobBehavior {
    fn create_job(
        &mut self,
        context: &BpmnElementContext,
        job_type: &str,
        kind: JobKind,
    ) -> Result<Key, ProcessingError>;

    /// Cancel every outstanding job of the element instance, task and
    /// execution listener jobs alike.
    fn cancel_jobs(&mut self, context: &BpmnElementContext) -> Result<(), ProcessingError>;
}

impl JobBehavior for BpmnBehaviors<'_, '_> {
    fn create_job(
        &mut self,
        context: &BpmnElementContext,
        job_type: &str,
        kind: JobKind,
    ) -> Result<Key, ProcessingError> {
        let key = self.ctx.next_key();
        self.ctx.append_event(
            key,
            JobIntent::Created,
            JobRecord {
                job_type: job_type.to_string(),
                kind,
                bpmn_process_id: context.bpmn_process_id.clone(),
                process_instance_key: context.process_instance_key,
                element_instance_key: context.element_instance_key,
                element_id: context.element_id.clone(),
                variables: Variables::new(),
            },
        )?;
        Ok(key)
    }

    fn cancel_jobs(&mut self, context: &BpmnElementContext) -> Result<(), ProcessingError> {
        for (key, job) in self.state().jobs_of(context.element_instance_key) {
            self.ctx.append_event(key, JobIntent::Canceled, job)?;
        }
        Ok(())
    }
}
