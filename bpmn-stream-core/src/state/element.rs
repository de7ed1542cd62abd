use crate::record::{BpmnElementType, ProcessInstanceIntent, ProcessInstanceRecord};
use crate::types::Key;

use ProcessInstanceIntent::*;

/// Allowed lifecycle transitions of an element instance.
pub struct ElementLifecycle;

impl ElementLifecycle {
    /// `from` is `None` for an instance that does not exist yet.
    pub fn can_transition(from: Option<ProcessInstanceIntent>, to: ProcessInstanceIntent) -> bool {
        match from {
            None => to == ElementActivating,
            Some(ElementActivating) => matches!(to, ElementActivated | ElementTerminating),
            Some(ElementActivated) => matches!(to, ElementCompleting | ElementTerminating),
            Some(ElementCompleting) => matches!(to, ElementCompleted | ElementTerminating),
            Some(ElementTerminating) => to == ElementTerminated,
            Some(_) => false,
        }
    }

    pub fn is_final(state: ProcessInstanceIntent) -> bool {
        matches!(state, ElementCompleted | ElementTerminated)
    }
}

/// Runtime occurrence of an element within a process instance.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementInstance {
    pub key: Key,
    pub value: ProcessInstanceRecord,
    pub state: ProcessInstanceIntent,
    /// Child element instances that have not completed or terminated.
    pub active_children: u32,
    /// Sequence flows taken inside this scope whose target is not active yet.
    pub active_sequence_flows: u32,
    /// Start execution listener jobs already completed.
    pub completed_start_listeners: usize,
}

impl ElementInstance {
    pub fn new(key: Key, value: ProcessInstanceRecord) -> Self {
        Self {
            key,
            value,
            state: ElementActivating,
            active_children: 0,
            active_sequence_flows: 0,
            completed_start_listeners: 0,
        }
    }

    pub fn element_id(&self) -> &str {
        &self.value.element_id
    }

    pub fn element_type(&self) -> BpmnElementType {
        self.value.bpmn_element_type
    }

    pub fn flow_scope_key(&self) -> Key {
        self.value.flow_scope_key
    }

    pub fn is_active(&self) -> bool {
        self.state == ElementActivated
    }

    pub fn is_terminating(&self) -> bool {
        self.state == ElementTerminating
    }

    /// No active children and no tokens in transit.
    pub fn can_complete_scope(&self) -> bool {
        self.active_children == 0 && self.active_sequence_flows == 0
    }
}

/// The event that completes a waiting element: the key of the timer or
/// message subscription that fired, and the element that handles it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventTrigger {
    pub event_key: Key,
    pub element_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_lifecycle() {
        assert!(ElementLifecycle::can_transition(None, ElementActivating));
        assert!(ElementLifecycle::can_transition(
            Some(ElementActivating),
            ElementActivated
        ));
        assert!(ElementLifecycle::can_transition(
            Some(ElementActivated),
            ElementCompleting
        ));
        assert!(ElementLifecycle::can_transition(
            Some(ElementCompleting),
            ElementCompleted
        ));
    }

    #[test]
    fn test_termination_from_any_non_final_state() {
        for from in [ElementActivating, ElementActivated, ElementCompleting] {
            assert!(ElementLifecycle::can_transition(Some(from), ElementTerminating));
        }
        assert!(ElementLifecycle::can_transition(
            Some(ElementTerminating),
            ElementTerminated
        ));
    }

    #[test]
    fn test_no_skipping_states() {
        assert!(!ElementLifecycle::can_transition(None, ElementActivated));
        assert!(!ElementLifecycle::can_transition(
            Some(ElementActivating),
            ElementCompleted
        ));
        assert!(!ElementLifecycle::can_transition(
            Some(ElementTerminating),
            ElementActivated
        ));
        assert!(!ElementLifecycle::can_transition(
            Some(ElementCompleted),
            ElementTerminating
        ));
        assert!(!ElementLifecycle::can_transition(
            Some(ElementActivated),
            SequenceFlowTaken
        ));
    }
}
