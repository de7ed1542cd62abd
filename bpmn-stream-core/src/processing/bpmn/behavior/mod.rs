//! Side effects available to element processors.
//!
//! Element processors never append records themselves; every write goes
//! through [`BpmnBehaviors`], which appends to the current processing result
//! so ordering within a batch is decided in one place.

mod flow;
mod incident;
mod job;
mod subscription;
mod transition;

pub use incident::IncidentBehavior;
pub use job::JobBehavior;

use super::BpmnElementContext;
use crate::error::{Failure, ProcessingError};
use crate::model::{Condition, ExecutableFlowNode, ExecutableProcess};
use crate::processing::ProcessingContext;
use crate::record::{ErrorType, Variables};
use crate::state::ProcessingState;
use std::sync::Arc;

pub struct BpmnBehaviors<'c, 'a> {
    ctx: &'c mut ProcessingContext<'a>,
    process: Arc<ExecutableProcess>,
}

impl<'c, 'a> BpmnBehaviors<'c, 'a> {
    pub fn new(ctx: &'c mut ProcessingContext<'a>, process: Arc<ExecutableProcess>) -> Self {
        Self { ctx, process }
    }

    pub fn state(&self) -> &ProcessingState {
        self.ctx.state()
    }

    pub fn process(&self) -> &Arc<ExecutableProcess> {
        &self.process
    }

    pub(crate) fn element(&self, element_id: &str) -> Result<&ExecutableFlowNode, ProcessingError> {
        self.process
            .element(element_id)
            .ok_or_else(|| ProcessingError::UnknownElement {
                bpmn_process_id: self.process.bpmn_process_id.clone(),
                element_id: element_id.to_string(),
            })
    }

    /// Evaluate a sequence flow condition against the variables of the
    /// process instance.
    pub fn evaluate_condition(
        &self,
        condition: &Condition,
        context: &BpmnElementContext,
    ) -> Result<bool, Failure> {
        let empty = Variables::new();
        let variables = self
            .state()
            .variables(context.process_instance_key)
            .unwrap_or(&empty);
        condition.evaluate(variables).map_err(|e| {
            Failure::new(
                e.to_string(),
                ErrorType::ExtractValueError,
                context.element_instance_key,
            )
        })
    }
}
