use super::BpmnBehaviors;
use crate::error::ProcessingError;
use crate::model::ExecutableFlowNode;
use crate::processing::bpmn::BpmnElementContext;
use crate::record::{ProcessInstanceIntent, ProcessInstanceRecord};
use crate::types::Key;
use tracing::debug;

impl BpmnBehaviors<'_, '_> {
    fn transition_to(
        &mut self,
        context: &BpmnElementContext,
        intent: ProcessInstanceIntent,
    ) -> Result<(), ProcessingError> {
        debug!(
            key = context.element_instance_key,
            element = %context.element_id,
            ?intent,
            "Element transition"
        );
        self.ctx
            .append_event(context.element_instance_key, intent, context.record())
    }

    pub fn transition_to_activating(
        &mut self,
        context: &BpmnElementContext,
    ) -> Result<(), ProcessingError> {
        self.transition_to(context, ProcessInstanceIntent::ElementActivating)
    }

    pub fn transition_to_activated(
        &mut self,
        context: &BpmnElementContext,
    ) -> Result<(), ProcessingError> {
        self.transition_to(context, ProcessInstanceIntent::ElementActivated)
    }

    pub fn transition_to_completing(
        &mut self,
        context: &BpmnElementContext,
    ) -> Result<(), ProcessingError> {
        self.transition_to(context, ProcessInstanceIntent::ElementCompleting)
    }

    pub fn transition_to_completed(
        &mut self,
        context: &BpmnElementContext,
    ) -> Result<(), ProcessingError> {
        self.transition_to(context, ProcessInstanceIntent::ElementCompleted)
    }

    pub fn transition_to_terminating(
        &mut self,
        context: &BpmnElementContext,
    ) -> Result<(), ProcessingError> {
        self.transition_to(context, ProcessInstanceIntent::ElementTerminating)
    }

    pub fn transition_to_terminated(
        &mut self,
        context: &BpmnElementContext,
    ) -> Result<(), ProcessingError> {
        self.transition_to(context, ProcessInstanceIntent::ElementTerminated)
    }

    /// Request activation of `element` inside `flow_scope_key`. Returns the
    /// key of the new element instance.
    pub fn activate_element(
        &mut self,
        element: &ExecutableFlowNode,
        flow_scope_key: Key,
        context: &BpmnElementContext,
    ) -> Key {
        let key = self.ctx.next_key();
        self.ctx.append_command(
            key,
            ProcessInstanceIntent::ActivateElement,
            ProcessInstanceRecord {
                bpmn_process_id: context.bpmn_process_id.clone(),
                process_instance_key: context.process_instance_key,
                element_id: element.id.clone(),
                bpmn_element_type: element.element_type,
                flow_scope_key,
            },
        );
        key
    }

    pub fn complete_element(&mut self, context: &BpmnElementContext) {
        self.ctx.append_command(
            context.element_instance_key,
            ProcessInstanceIntent::CompleteElement,
            context.record(),
        );
    }

    pub fn terminate_element(&mut self, context: &BpmnElementContext) {
        self.ctx.append_command(
            context.element_instance_key,
            ProcessInstanceIntent::TerminateElement,
            context.record(),
        );
    }

    /// Request termination of every child that is not already terminating.
    /// Returns `true` if the scope still has children to wait for.
    pub fn terminate_child_instances(&mut self, context: &BpmnElementContext) -> bool {
        let children: Vec<BpmnElementContext> = self
            .state()
            .child_instances(context.element_instance_key)
            .into_iter()
            .filter(|child| !child.is_terminating())
            .map(BpmnElementContext::of)
            .collect();
        for child in &children {
            self.terminate_element(child);
        }
        self.state()
            .element_instance(context.element_instance_key)
            .is_some_and(|scope| scope.active_children > 0)
    }

    /// An element completed without taking a sequence flow: complete its
    /// flow scope once nothing is left running in it. Inclusive joins the
    /// element could have reached may be unblocked now.
    pub fn on_element_completed(
        &mut self,
        context: &BpmnElementContext,
    ) -> Result<(), ProcessingError> {
        let Some(scope) = self.state().element_instance(context.flow_scope_key) else {
            return Ok(());
        };
        if !scope.is_active() {
            return Ok(());
        }
        if scope.can_complete_scope() {
            let scope = BpmnElementContext::of(scope);
            self.complete_element(&scope);
            return Ok(());
        }
        self.activate_unblocked_joins(context)
    }

    /// An element reached TERMINATED: finish a terminating flow scope when
    /// this was its last child, otherwise treat it like a completion.
    pub fn on_element_terminated(
        &mut self,
        context: &BpmnElementContext,
    ) -> Result<(), ProcessingError> {
        let Some(scope) = self.state().element_instance(context.flow_scope_key) else {
            return Ok(());
        };
        let scope_context = BpmnElementContext::of(scope);
        if scope.is_terminating() {
            if scope.active_children == 0 {
                self.transition_to_terminated(&scope_context)?;
                self.on_element_terminated(&scope_context)?;
            }
            return Ok(());
        }
        self.on_element_completed(context)
    }
}
