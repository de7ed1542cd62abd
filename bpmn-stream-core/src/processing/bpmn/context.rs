use crate::record::{BpmnElementType, ProcessInstanceRecord};
use crate::state::ElementInstance;
use crate::types::Key;

/// Identifies the element instance a BPMN step works on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BpmnElementContext {
    pub element_instance_key: Key,
    pub flow_scope_key: Key,
    pub process_instance_key: Key,
    pub bpmn_process_id: String,
    pub element_id: String,
    pub element_type: BpmnElementType,
}

impl BpmnElementContext {
    pub fn new(element_instance_key: Key, record: &ProcessInstanceRecord) -> Self {
        Self {
            element_instance_key,
            flow_scope_key: record.flow_scope_key,
            process_instance_key: record.process_instance_key,
            bpmn_process_id: record.bpmn_process_id.clone(),
            element_id: record.element_id.clone(),
            element_type: record.bpmn_element_type,
        }
    }

    pub fn of(instance: &ElementInstance) -> Self {
        Self::new(instance.key, &instance.value)
    }

    pub fn record(&self) -> ProcessInstanceRecord {
        ProcessInstanceRecord {
            bpmn_process_id: self.bpmn_process_id.clone(),
            process_instance_key: self.process_instance_key,
            element_id: self.element_id.clone(),
            bpmn_element_type: self.element_type,
            flow_scope_key: self.flow_scope_key,
        }
    }

    /// Context for another element of the same process instance.
    pub fn sibling(
        &self,
        element_instance_key: Key,
        element_id: &str,
        element_type: BpmnElementType,
        flow_scope_key: Key,
    ) -> Self {
        Self {
            element_instance_key,
            flow_scope_key,
            process_instance_key: self.process_instance_key,
            bpmn_process_id: self.bpmn_process_id.clone(),
            element_id: element_id.to_string(),
            element_type,
        }
    }
}
