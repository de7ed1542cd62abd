use super::{ProcessingContext, RecordProcessor};
use crate::error::{CommandError, ProcessingError, Rejection};
use crate::record::*;

/// VARIABLE_DOCUMENT UPDATE: merge variables into a process instance.
/// The scope may be the process instance or any of its element instances;
/// variables always land on the process instance.
pub struct VariableDocumentUpdateProcessor;

impl RecordProcessor for VariableDocumentUpdateProcessor {
    fn process(
        &self,
        command: &Record,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<(), CommandError> {
        let RecordValue::VariableDocument(document) = &command.value else {
            return Err(ProcessingError::UnexpectedValue {
                intent: command.intent,
            }
            .into());
        };

        let scope_key = if ctx.state().variables(document.scope_key).is_some() {
            Some(document.scope_key)
        } else {
            ctx.state()
                .element_instance(document.scope_key)
                .map(|instance| instance.value.process_instance_key)
        };
        let Some(scope_key) = scope_key else {
            return Err(Rejection::not_found(format!(
                "Expected to update variables of scope '{}', but no such scope was found",
                document.scope_key
            ))
            .into());
        };

        let key = ctx.next_key();
        ctx.append_event(
            key,
            VariableDocumentIntent::Updated,
            VariableDocumentRecord {
                scope_key,
                variables: document.variables.clone(),
            },
        )?;
        Ok(())
    }
}
