use super::{ProcessingContext, RecordProcessor};
use crate::error::{CommandError, ProcessingError, Rejection};
use crate::record::*;
use crate::types::NO_KEY;
use tracing::info;

/// PROCESS_INSTANCE_CREATION CREATE: allocate the process instance key,
/// seed its variables and request activation of the process element.
pub struct ProcessInstanceCreationProcessor;

impl RecordProcessor for ProcessInstanceCreationProcessor {
    fn process(
        &self,
        command: &Record,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<(), CommandError> {
        let RecordValue::ProcessInstanceCreation(creation) = &command.value else {
            return Err(ProcessingError::UnexpectedValue {
                intent: command.intent,
            }
            .into());
        };
        let Some(process) = ctx.processes().get(&creation.bpmn_process_id) else {
            return Err(Rejection::not_found(format!(
                "Expected to create an instance of process '{}', but no such process was deployed",
                creation.bpmn_process_id
            ))
            .into());
        };

        let process_instance_key = ctx.next_key();
        ctx.append_event(
            process_instance_key,
            ProcessInstanceCreationIntent::Created,
            ProcessInstanceCreationRecord {
                bpmn_process_id: process.bpmn_process_id.clone(),
                process_instance_key,
                variables: creation.variables.clone(),
            },
        )?;
        ctx.append_command(
            process_instance_key,
            ProcessInstanceIntent::ActivateElement,
            ProcessInstanceRecord {
                bpmn_process_id: process.bpmn_process_id.clone(),
                process_instance_key,
                element_id: process.bpmn_process_id.clone(),
                bpmn_element_type: BpmnElementType::Process,
                flow_scope_key: NO_KEY,
            },
        );
        info!(
            process = %process.bpmn_process_id,
            process_instance = process_instance_key,
            "Creating process instance"
        );
        Ok(())
    }
}
