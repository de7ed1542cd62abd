use super::BpmnBehaviors;
use crate::error::ProcessingError;
use crate::model::{ExecutableFlowNode, JoinKind, SequenceFlow};
use crate::processing::bpmn::BpmnElementContext;
use crate::record::{BpmnElementType, ProcessInstanceIntent, ProcessInstanceRecord};
use crate::types::Key;
use std::collections::BTreeSet;
use tracing::debug;

impl BpmnBehaviors<'_, '_> {
    /// Take a single flow out of the element. See [`Self::take_sequence_flows`].
    pub fn take_sequence_flow(
        &mut self,
        context: &BpmnElementContext,
        flow: &SequenceFlow,
    ) -> Result<(), ProcessingError> {
        self.take_sequence_flows(context, &[flow])
    }

    /// Take `flows` out of the finished element and activate their targets.
    ///
    /// A parallel join is activated by the token that completes a set of one
    /// token per incoming flow. An inclusive join is only decided after all
    /// of `flows` are taken, once nothing left in the scope can still send it
    /// a token.
    pub fn take_sequence_flows(
        &mut self,
        context: &BpmnElementContext,
        flows: &[&SequenceFlow],
    ) -> Result<(), ProcessingError> {
        for flow in flows {
            let target = self.element(&flow.target_id)?.clone();
            let activate = match target.join_kind() {
                Some(JoinKind::Parallel) => {
                    self.completes_parallel_join(&target, &flow.id, context.flow_scope_key)
                }
                Some(JoinKind::Inclusive) => false,
                None => true,
            };

            let key = self.ctx.next_key();
            self.ctx.append_event(
                key,
                ProcessInstanceIntent::SequenceFlowTaken,
                ProcessInstanceRecord {
                    bpmn_process_id: context.bpmn_process_id.clone(),
                    process_instance_key: context.process_instance_key,
                    element_id: flow.id.clone(),
                    bpmn_element_type: BpmnElementType::SequenceFlow,
                    flow_scope_key: context.flow_scope_key,
                },
            )?;

            if activate {
                self.activate_element(&target, context.flow_scope_key, context);
            } else if target.join_kind() == Some(JoinKind::Parallel) {
                debug!(
                    join = %target.id,
                    scope = context.flow_scope_key,
                    "Join waiting for incoming flows"
                );
            }
        }
        self.activate_unblocked_joins(context)
    }

    /// Whether a token on `flow_id` gives every incoming flow of the join a
    /// token. Checked before the flow is taken: completed sets are reserved
    /// as soon as they are complete.
    fn completes_parallel_join(
        &self,
        join: &ExecutableFlowNode,
        flow_id: &str,
        scope_key: Key,
    ) -> bool {
        join.incoming
            .iter()
            .filter(|incoming| incoming.as_str() != flow_id)
            .all(|incoming| self.state().taken_flow_count(scope_key, incoming) > 0)
    }

    /// Request activation of the inclusive joins `finished` could have sent a
    /// token to, once nothing else in the scope can.
    pub fn activate_unblocked_joins(
        &mut self,
        finished: &BpmnElementContext,
    ) -> Result<(), ProcessingError> {
        let process = self.process.clone();
        let Some(element) = process.element(&finished.element_id) else {
            return Ok(());
        };
        if element.element_type == BpmnElementType::Process {
            return Ok(());
        }
        let reachable = process.reachable_flows([element.id.as_str()], None);
        let candidates: BTreeSet<&str> = reachable
            .iter()
            .filter_map(|flow_id| process.sequence_flow(flow_id))
            .map(|flow| flow.target_id.as_str())
            .collect();

        for join_id in candidates {
            let Some(join) = process.element(join_id) else {
                continue;
            };
            if join.join_kind() != Some(JoinKind::Inclusive) {
                continue;
            }
            if self.inclusive_join_ready(join, finished.flow_scope_key) {
                self.activate_element(join, finished.flow_scope_key, finished);
            }
        }
        Ok(())
    }

    /// Whether an ACTIVATE_ELEMENT for `element` may go ahead. Always true
    /// for elements that are not joins.
    pub fn join_ready(&self, element: &ExecutableFlowNode, scope_key: Key) -> bool {
        match element.join_kind() {
            Some(JoinKind::Parallel) => self
                .state()
                .reserved_joins(scope_key)
                .any(|join_id| join_id == element.id),
            Some(JoinKind::Inclusive) => self.inclusive_join_ready(element, scope_key),
            None => true,
        }
    }

    /// An inclusive join is ready when at least one incoming flow holds a
    /// token and every other incoming flow is out of reach of everything
    /// still running or pending in the scope.
    pub fn inclusive_join_ready(&self, join: &ExecutableFlowNode, scope_key: Key) -> bool {
        let state = self.state();
        let (arrived, missing): (Vec<&String>, Vec<&String>) = join
            .incoming
            .iter()
            .partition(|flow| state.taken_flow_count(scope_key, flow) > 0);
        if arrived.is_empty() {
            return false;
        }
        if missing.is_empty() {
            return true;
        }

        let process = self.process.clone();
        let mut sources: BTreeSet<String> = BTreeSet::new();
        for instance in state.child_instances(scope_key) {
            if !instance.is_terminating() {
                sources.insert(instance.value.element_id.clone());
            } else if let Some(trigger) = state.event_trigger(instance.key) {
                sources.insert(trigger.element_id.clone());
            }
        }
        for (flow_id, _) in state.pending_flows(scope_key) {
            if join.incoming.iter().any(|incoming| incoming == flow_id) {
                continue;
            }
            let Some(flow) = process.sequence_flow(flow_id) else {
                continue;
            };
            // partial sets at a parallel join do not move on by themselves
            let partial_join = process
                .element(&flow.target_id)
                .is_some_and(|target| target.join_kind() == Some(JoinKind::Parallel));
            if !partial_join {
                sources.insert(flow.target_id.clone());
            }
        }
        for join_id in state.reserved_joins(scope_key) {
            sources.insert(join_id.to_string());
        }

        let reachable =
            process.reachable_flows(sources.iter().map(String::as_str), Some(join.id.as_str()));
        let blocked = missing.iter().any(|flow| reachable.contains(flow.as_str()));
        if blocked {
            debug!(
                join = %join.id,
                scope = scope_key,
                arrived = arrived.len(),
                "Inclusive join waiting for reachable flows"
            );
        }
        !blocked
    }

    /// Take every outgoing flow, or complete the scope when there is none.
    pub fn take_outgoing_sequence_flows(
        &mut self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
    ) -> Result<(), ProcessingError> {
        let process = self.process.clone();
        let outgoing = process.outgoing(element);
        if outgoing.is_empty() {
            return self.on_element_completed(context);
        }
        self.take_sequence_flows(context, &outgoing)
    }

    /// COMPLETED, then continue along the outgoing flows.
    pub fn complete_and_take_outgoing(
        &mut self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
    ) -> Result<(), ProcessingError> {
        self.transition_to_completed(context)?;
        self.take_outgoing_sequence_flows(element, context)
    }

    /// The whole lifecycle of an element without wait state in one step.
    pub fn pass_through(
        &mut self,
        element: &ExecutableFlowNode,
        context: &BpmnElementContext,
    ) -> Result<(), ProcessingError> {
        self.transition_to_activated(context)?;
        self.transition_to_completing(context)?;
        self.complete_and_take_outgoing(element, context)
    }
}
