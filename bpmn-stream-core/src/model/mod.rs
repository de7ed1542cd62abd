//! Executable process definitions.
//!
//! The engine only reads these: they are immutable, pre-validated and shared
//! by all partitions. [`yaml`] builds them from a YAML graph description.

pub mod yaml;

use crate::record::{BpmnElementType, Variables};
use crate::timer::expression::TimerExpression;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;

// ─── Conditions ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
}

/// Guard of a sequence flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Literal(bool),
    Compare {
        variable: String,
        op: CompareOp,
        value: serde_json::Value,
    },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConditionError {
    #[error("Expected variable '{0}' to be present, but it was not found")]
    MissingVariable(String),

    #[error("Cannot compare '{variable}' ({actual}) with {expected} using {op:?}")]
    NotComparable {
        variable: String,
        op: CompareOp,
        actual: serde_json::Value,
        expected: serde_json::Value,
    },
}

impl Condition {
    pub fn evaluate(&self, variables: &Variables) -> Result<bool, ConditionError> {
        let (variable, op, expected) = match self {
            Condition::Literal(b) => return Ok(*b),
            Condition::Compare {
                variable,
                op,
                value,
            } => (variable, *op, value),
        };

        let actual = variables
            .get(variable)
            .ok_or_else(|| ConditionError::MissingVariable(variable.clone()))?;

        match op {
            CompareOp::Eq => Ok(json_eq(actual, expected)),
            CompareOp::Neq => Ok(!json_eq(actual, expected)),
            _ => {
                let ordering = match (actual, expected) {
                    (serde_json::Value::Number(a), serde_json::Value::Number(b)) => a
                        .as_f64()
                        .zip(b.as_f64())
                        .and_then(|(a, b)| a.partial_cmp(&b)),
                    (serde_json::Value::String(a), serde_json::Value::String(b)) => {
                        Some(a.cmp(b))
                    }
                    _ => None,
                };
                let ordering = ordering.ok_or_else(|| ConditionError::NotComparable {
                    variable: variable.clone(),
                    op,
                    actual: actual.clone(),
                    expected: expected.clone(),
                })?;
                Ok(match op {
                    CompareOp::Lt => ordering.is_lt(),
                    CompareOp::Lte => ordering.is_le(),
                    CompareOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                })
            }
        }
    }
}

/// Numbers compare by value (`1 == 1.0`), everything else structurally.
fn json_eq(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a, b) {
        (serde_json::Value::Number(x), serde_json::Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

// ─── Elements ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceFlow {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub condition: Option<Condition>,
    pub is_default: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerEventType {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionListener {
    pub event_type: ListenerEventType,
    pub job_type: String,
}

/// Message an element waits for. The correlation key is read from the named
/// process variable when the subscription is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDefinition {
    pub name: String,
    pub correlation_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutableFlowNode {
    pub id: String,
    pub element_type: BpmnElementType,
    /// Incoming sequence flow ids.
    pub incoming: Vec<String>,
    /// Outgoing sequence flow ids, in declaration order.
    pub outgoing: Vec<String>,
    /// Timer of an intermediate catch event or boundary event.
    pub timer: Option<TimerExpression>,
    /// Message of an intermediate catch event or boundary event.
    pub message: Option<MessageDefinition>,
    /// Job type of a service task.
    pub job_type: Option<String>,
    /// Host activity of a boundary event.
    pub attached_to: Option<String>,
    /// Whether a boundary event interrupts its host.
    pub cancel_activity: bool,
    /// Boundary events attached to this activity.
    pub boundary_events: Vec<String>,
    pub execution_listeners: Vec<ExecutionListener>,
}

/// How a gateway with several incoming flows merges them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Waits for one token per incoming flow.
    Parallel,
    /// Waits for the tokens that can still arrive.
    Inclusive,
}

impl ExecutableFlowNode {
    pub fn new(id: impl Into<String>, element_type: BpmnElementType) -> Self {
        Self {
            id: id.into(),
            element_type,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            timer: None,
            message: None,
            job_type: None,
            attached_to: None,
            cancel_activity: true,
            boundary_events: Vec::new(),
            execution_listeners: Vec::new(),
        }
    }

    pub fn join_kind(&self) -> Option<JoinKind> {
        if self.incoming.len() < 2 {
            return None;
        }
        match self.element_type {
            BpmnElementType::ParallelGateway => Some(JoinKind::Parallel),
            BpmnElementType::InclusiveGateway => Some(JoinKind::Inclusive),
            _ => None,
        }
    }

    pub fn start_listeners(&self) -> impl Iterator<Item = &ExecutionListener> {
        self.execution_listeners
            .iter()
            .filter(|l| l.event_type == ListenerEventType::Start)
    }
}

/// A deployed, executable process.
#[derive(Debug, Clone)]
pub struct ExecutableProcess {
    pub bpmn_process_id: String,
    /// The process element itself (element id = BPMN process id).
    pub process: ExecutableFlowNode,
    pub start_event_id: String,
    elements: HashMap<String, ExecutableFlowNode>,
    flows: HashMap<String, SequenceFlow>,
}

impl ExecutableProcess {
    /// Assemble a process from already-validated parts.
    pub(crate) fn new(
        bpmn_process_id: String,
        start_event_id: String,
        elements: HashMap<String, ExecutableFlowNode>,
        flows: HashMap<String, SequenceFlow>,
    ) -> Self {
        let process = ExecutableFlowNode::new(bpmn_process_id.clone(), BpmnElementType::Process);
        Self {
            bpmn_process_id,
            process,
            start_event_id,
            elements,
            flows,
        }
    }

    /// Look up an element by id; the process id resolves to the process itself.
    pub fn element(&self, id: &str) -> Option<&ExecutableFlowNode> {
        if id == self.bpmn_process_id {
            return Some(&self.process);
        }
        self.elements.get(id)
    }

    pub fn sequence_flow(&self, id: &str) -> Option<&SequenceFlow> {
        self.flows.get(id)
    }

    /// Outgoing flows of `element` in declaration order.
    pub fn outgoing<'a>(&'a self, element: &'a ExecutableFlowNode) -> Vec<&'a SequenceFlow> {
        element
            .outgoing
            .iter()
            .filter_map(|id| self.flows.get(id))
            .collect()
    }

    /// Elements reached directly by the outgoing flows of `element`.
    pub fn successors<'a>(&'a self, element: &'a ExecutableFlowNode) -> Vec<&'a ExecutableFlowNode> {
        self.outgoing(element)
            .into_iter()
            .filter_map(|flow| self.elements.get(&flow.target_id))
            .collect()
    }

    pub fn boundary_events<'a>(
        &'a self,
        element: &'a ExecutableFlowNode,
    ) -> Vec<&'a ExecutableFlowNode> {
        element
            .boundary_events
            .iter()
            .filter_map(|id| self.elements.get(id))
            .collect()
    }

    pub fn elements(&self) -> impl Iterator<Item = &ExecutableFlowNode> {
        self.elements.values()
    }

    /// Ids of every sequence flow a token starting at one of `sources` could
    /// still take. Boundary events count as reachable from their host.
    /// Traversal does not continue past `stop_at`.
    pub fn reachable_flows<'s>(
        &self,
        sources: impl IntoIterator<Item = &'s str>,
        stop_at: Option<&str>,
    ) -> BTreeSet<String> {
        let mut flows = BTreeSet::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut pending: VecDeque<&ExecutableFlowNode> = sources
            .into_iter()
            .filter_map(|id| self.elements.get(id))
            .collect();

        while let Some(node) = pending.pop_front() {
            if !visited.insert(node.id.as_str()) {
                continue;
            }
            pending.extend(self.boundary_events(node));
            for flow in self.outgoing(node) {
                flows.insert(flow.id.clone());
                if stop_at == Some(flow.target_id.as_str()) {
                    continue;
                }
                if let Some(target) = self.elements.get(&flow.target_id) {
                    pending.push_back(target);
                }
            }
        }
        flows
    }
}

// ─── Registry ─────────────────────────────────────────────────

/// Deployed processes keyed by BPMN process id. Latest deployment wins.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    processes: HashMap<String, Arc<ExecutableProcess>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deploy(&mut self, process: ExecutableProcess) {
        self.processes
            .insert(process.bpmn_process_id.clone(), Arc::new(process));
    }

    pub fn get(&self, bpmn_process_id: &str) -> Option<Arc<ExecutableProcess>> {
        self.processes.get(bpmn_process_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn process_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.processes.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, serde_json::Value)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn compare(variable: &str, op: CompareOp, value: serde_json::Value) -> Condition {
        Condition::Compare {
            variable: variable.into(),
            op,
            value,
        }
    }

    #[test]
    fn test_literal_conditions() {
        let empty = Variables::new();
        assert_eq!(Condition::Literal(true).evaluate(&empty), Ok(true));
        assert_eq!(Condition::Literal(false).evaluate(&empty), Ok(false));
    }

    #[test]
    fn test_compare_conditions() {
        let v = vars(&[("amount", json!(150)), ("tier", json!("gold"))]);
        assert_eq!(
            compare("amount", CompareOp::Gt, json!(100)).evaluate(&v),
            Ok(true)
        );
        assert_eq!(
            compare("amount", CompareOp::Lte, json!(149.5)).evaluate(&v),
            Ok(false)
        );
        assert_eq!(
            compare("amount", CompareOp::Eq, json!(150.0)).evaluate(&v),
            Ok(true)
        );
        assert_eq!(
            compare("tier", CompareOp::Neq, json!("silver")).evaluate(&v),
            Ok(true)
        );
    }

    #[test]
    fn test_condition_errors() {
        let v = vars(&[("flag", json!(true))]);
        assert_eq!(
            compare("missing", CompareOp::Eq, json!(1)).evaluate(&v),
            Err(ConditionError::MissingVariable("missing".into()))
        );
        assert!(matches!(
            compare("flag", CompareOp::Gt, json!(1)).evaluate(&v),
            Err(ConditionError::NotComparable { .. })
        ));
    }

    #[test]
    fn test_condition_yaml_forms() {
        let literal: Condition = serde_yaml::from_str("true").unwrap();
        assert_eq!(literal, Condition::Literal(true));
        let cmp: Condition =
            serde_yaml::from_str("{ variable: amount, op: '>=', value: 10 }").unwrap();
        assert_eq!(cmp, compare("amount", CompareOp::Gte, json!(10)));
    }

    #[test]
    fn test_reachable_flows_stop_at_join() {
        let process = yaml::parse_process_yaml(
            r#"
id: reach
nodes:
  - { kind: StartEvent, id: start }
  - { kind: ParallelGateway, id: fork }
  - { kind: ServiceTask, id: work, job_type: work }
  - { kind: TimerBoundary, id: late, attached_to: work, timer: PT1M }
  - { kind: InclusiveGateway, id: join }
  - { kind: EndEvent, id: end }
  - { kind: EndEvent, id: timed_out }
edges:
  - { id: direct, from: fork, to: join }
  - { id: via_work, from: fork, to: work }
  - { from: start, to: fork }
  - { id: worked, from: work, to: join }
  - { from: late, to: timed_out }
  - { id: done, from: join, to: end }
"#,
        )
        .unwrap();

        let from_work = process.reachable_flows(["work"], Some("join"));
        assert_eq!(
            from_work.into_iter().collect::<Vec<_>>(),
            vec!["late->timed_out", "worked"]
        );
        let from_fork = process.reachable_flows(["fork"], None);
        assert!(from_fork.contains("done"));
        assert!(!process.reachable_flows(["fork"], Some("join")).contains("done"));
    }
}
