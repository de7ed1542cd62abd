//! YAML process definitions.
//!
//! ```yaml
//! id: order
//! nodes:
//!   - kind: StartEvent
//!     id: start
//!   - kind: ExclusiveGateway
//!     id: check
//!   - kind: ServiceTask
//!     id: ship
//!     job_type: ship-order
//!   - kind: TimerBoundary
//!     id: ship_timeout
//!     attached_to: ship
//!     timer: PT1H
//!   - kind: MessageBoundary
//!     id: ship_cancelled
//!     attached_to: ship
//!     message: { name: order-cancelled, correlation_key: order_id }
//!   - kind: EndEvent
//!     id: end
//! edges:
//!   - from: start
//!     to: check
//!   - from: check
//!     to: ship
//!     condition: { variable: amount, op: ">", value: 0 }
//!   - from: check
//!     to: end
//!     is_default: true
//! ```

use super::{
    Condition, ExecutableFlowNode, ExecutableProcess, ExecutionListener, MessageDefinition,
    SequenceFlow,
};
use crate::record::BpmnElementType;
use crate::timer::expression::TimerExpression;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

fn default_true() -> bool {
    true
}

// ── DTOs ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDto {
    pub id: String,
    pub nodes: Vec<NodeDto>,
    #[serde(default)]
    pub edges: Vec<EdgeDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDto {
    #[serde(default)]
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum NodeDto {
    StartEvent {
        id: String,
    },
    EndEvent {
        id: String,
    },
    ServiceTask {
        id: String,
        job_type: String,
        #[serde(default)]
        listeners: Vec<ExecutionListener>,
    },
    ExclusiveGateway {
        id: String,
        #[serde(default)]
        listeners: Vec<ExecutionListener>,
    },
    InclusiveGateway {
        id: String,
        #[serde(default)]
        listeners: Vec<ExecutionListener>,
    },
    ParallelGateway {
        id: String,
        #[serde(default)]
        listeners: Vec<ExecutionListener>,
    },
    EventBasedGateway {
        id: String,
        #[serde(default)]
        listeners: Vec<ExecutionListener>,
    },
    TimerCatch {
        id: String,
        timer: String,
    },
    TimerBoundary {
        id: String,
        attached_to: String,
        timer: String,
        #[serde(default = "default_true")]
        cancel_activity: bool,
    },
    MessageCatch {
        id: String,
        message: MessageDefinition,
    },
    MessageBoundary {
        id: String,
        attached_to: String,
        message: MessageDefinition,
        #[serde(default = "default_true")]
        cancel_activity: bool,
    },
}

impl NodeDto {
    pub fn id(&self) -> &str {
        match self {
            NodeDto::StartEvent { id }
            | NodeDto::EndEvent { id }
            | NodeDto::ServiceTask { id, .. }
            | NodeDto::ExclusiveGateway { id, .. }
            | NodeDto::InclusiveGateway { id, .. }
            | NodeDto::ParallelGateway { id, .. }
            | NodeDto::EventBasedGateway { id, .. }
            | NodeDto::TimerCatch { id, .. }
            | NodeDto::TimerBoundary { id, .. }
            | NodeDto::MessageCatch { id, .. }
            | NodeDto::MessageBoundary { id, .. } => id,
        }
    }

    fn element_type(&self) -> BpmnElementType {
        match self {
            NodeDto::StartEvent { .. } => BpmnElementType::StartEvent,
            NodeDto::EndEvent { .. } => BpmnElementType::EndEvent,
            NodeDto::ServiceTask { .. } => BpmnElementType::ServiceTask,
            NodeDto::ExclusiveGateway { .. } => BpmnElementType::ExclusiveGateway,
            NodeDto::InclusiveGateway { .. } => BpmnElementType::InclusiveGateway,
            NodeDto::ParallelGateway { .. } => BpmnElementType::ParallelGateway,
            NodeDto::EventBasedGateway { .. } => BpmnElementType::EventBasedGateway,
            NodeDto::TimerCatch { .. } | NodeDto::MessageCatch { .. } => {
                BpmnElementType::IntermediateCatchEvent
            }
            NodeDto::TimerBoundary { .. } | NodeDto::MessageBoundary { .. } => {
                BpmnElementType::BoundaryEvent
            }
        }
    }
}

// ── Validation ──

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Invalid process '{process_id}': {}", .errors.join("; "))]
pub struct ModelError {
    pub process_id: String,
    pub errors: Vec<String>,
}

/// Parse and validate one process definition.
pub fn parse_process_yaml(yaml: &str) -> Result<ExecutableProcess> {
    let dto: ProcessDto = serde_yaml::from_str(yaml).context("Failed to parse process YAML")?;
    Ok(build_process(dto)?)
}

/// Load every `*.yaml` / `*.yml` file in `dir`, sorted by file name.
pub fn load_process_dir(dir: impl AsRef<Path>) -> Result<Vec<ExecutableProcess>> {
    let dir = dir.as_ref();
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read process directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml")
        })
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|path| {
            let yaml = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            parse_process_yaml(&yaml).with_context(|| format!("In {}", path.display()))
        })
        .collect()
}

/// Validate a DTO and convert it into an executable process. Reports all
/// problems found, not just the first.
pub fn build_process(dto: ProcessDto) -> Result<ExecutableProcess, ModelError> {
    let mut errors = Vec::new();
    let mut elements: HashMap<String, ExecutableFlowNode> = HashMap::new();
    let mut flows: HashMap<String, SequenceFlow> = HashMap::new();
    let mut flow_order: Vec<String> = Vec::new();

    for node in &dto.nodes {
        let id = node.id();
        if id == dto.id {
            errors.push(format!("Node id '{id}' clashes with the process id"));
            continue;
        }
        if elements.contains_key(id) {
            errors.push(format!("Duplicate node id '{id}'"));
            continue;
        }

        let mut element = ExecutableFlowNode::new(id, node.element_type());
        match node {
            NodeDto::ServiceTask {
                job_type,
                listeners,
                ..
            } => {
                if job_type.trim().is_empty() {
                    errors.push(format!("Service task '{id}' has an empty job_type"));
                }
                element.job_type = Some(job_type.clone());
                element.execution_listeners = listeners.clone();
            }
            NodeDto::ExclusiveGateway { listeners, .. }
            | NodeDto::InclusiveGateway { listeners, .. }
            | NodeDto::ParallelGateway { listeners, .. }
            | NodeDto::EventBasedGateway { listeners, .. } => {
                element.execution_listeners = listeners.clone();
            }
            NodeDto::TimerCatch { timer, .. } => {
                element.timer = parse_timer(id, timer, &mut errors);
            }
            NodeDto::TimerBoundary {
                attached_to,
                timer,
                cancel_activity,
                ..
            } => {
                element.timer = parse_timer(id, timer, &mut errors);
                element.attached_to = Some(attached_to.clone());
                element.cancel_activity = *cancel_activity;
            }
            NodeDto::MessageCatch { message, .. } => {
                element.message = Some(check_message(id, message, &mut errors));
            }
            NodeDto::MessageBoundary {
                attached_to,
                message,
                cancel_activity,
                ..
            } => {
                element.message = Some(check_message(id, message, &mut errors));
                element.attached_to = Some(attached_to.clone());
                element.cancel_activity = *cancel_activity;
            }
            NodeDto::StartEvent { .. } | NodeDto::EndEvent { .. } => {}
        }
        elements.insert(id.to_string(), element);
    }

    for edge in &dto.edges {
        let id = edge
            .id
            .clone()
            .unwrap_or_else(|| format!("{}->{}", edge.from, edge.to));
        if flows.contains_key(&id) || elements.contains_key(&id) {
            errors.push(format!("Duplicate sequence flow id '{id}'"));
            continue;
        }
        let mut valid = true;
        for (end, node_id) in [("from", &edge.from), ("to", &edge.to)] {
            if !elements.contains_key(node_id) {
                errors.push(format!("Edge '{id}' {end} unknown node '{node_id}'"));
                valid = false;
            }
        }
        if !valid {
            continue;
        }
        flows.insert(
            id.clone(),
            SequenceFlow {
                id: id.clone(),
                source_id: edge.from.clone(),
                target_id: edge.to.clone(),
                condition: edge.condition.clone(),
                is_default: edge.is_default,
            },
        );
        flow_order.push(id);
    }

    for flow_id in &flow_order {
        let flow = &flows[flow_id];
        if let Some(source) = elements.get_mut(&flow.source_id) {
            source.outgoing.push(flow.id.clone());
        }
        if let Some(target) = elements.get_mut(&flow.target_id) {
            target.incoming.push(flow.id.clone());
        }
    }

    // boundary events hang off their host activity
    let boundaries: Vec<(String, String)> = elements
        .values()
        .filter_map(|e| e.attached_to.clone().map(|host| (e.id.clone(), host)))
        .collect();
    let mut boundaries = boundaries;
    boundaries.sort();
    for (boundary_id, host_id) in boundaries {
        match elements.get_mut(&host_id) {
            Some(host) if host.element_type == BpmnElementType::ServiceTask => {
                host.boundary_events.push(boundary_id);
            }
            Some(_) => errors.push(format!(
                "Boundary event '{boundary_id}' must be attached to a service task, not '{host_id}'"
            )),
            None => errors.push(format!(
                "Boundary event '{boundary_id}' attached to unknown node '{host_id}'"
            )),
        }
    }

    let starts: Vec<&ExecutableFlowNode> = elements
        .values()
        .filter(|e| e.element_type == BpmnElementType::StartEvent)
        .collect();
    if starts.len() != 1 {
        errors.push(format!(
            "Expected exactly one StartEvent, found {}",
            starts.len()
        ));
    }
    let start_event_id = starts.first().map(|e| e.id.clone()).unwrap_or_default();

    validate_elements(&elements, &flows, &mut errors);

    if !errors.is_empty() {
        errors.sort();
        return Err(ModelError {
            process_id: dto.id,
            errors,
        });
    }
    Ok(ExecutableProcess::new(dto.id, start_event_id, elements, flows))
}

fn parse_timer(id: &str, timer: &str, errors: &mut Vec<String>) -> Option<TimerExpression> {
    match TimerExpression::parse(timer) {
        Ok(expr) => Some(expr),
        Err(e) => {
            errors.push(format!("Timer of '{id}': {e}"));
            None
        }
    }
}

fn check_message(
    id: &str,
    message: &MessageDefinition,
    errors: &mut Vec<String>,
) -> MessageDefinition {
    if message.name.trim().is_empty() {
        errors.push(format!("Message of '{id}' has an empty name"));
    }
    if message.correlation_key.trim().is_empty() {
        errors.push(format!("Message of '{id}' has an empty correlation_key"));
    }
    message.clone()
}

fn validate_elements(
    elements: &HashMap<String, ExecutableFlowNode>,
    flows: &HashMap<String, SequenceFlow>,
    errors: &mut Vec<String>,
) {
    let mut with_default: HashSet<&str> = HashSet::new();
    for flow in flows.values() {
        if !flow.is_default {
            continue;
        }
        let source = &elements[&flow.source_id];
        if !matches!(
            source.element_type,
            BpmnElementType::ExclusiveGateway | BpmnElementType::InclusiveGateway
        ) {
            errors.push(format!(
                "Default flow '{}' must start at an exclusive or inclusive gateway",
                flow.id
            ));
        } else if !with_default.insert(source.id.as_str()) {
            errors.push(format!("Gateway '{}' has more than one default flow", source.id));
        }
    }

    for element in elements.values() {
        match element.element_type {
            BpmnElementType::StartEvent if !element.incoming.is_empty() => {
                errors.push(format!("StartEvent '{}' must not have incoming flows", element.id));
            }
            BpmnElementType::EndEvent if !element.outgoing.is_empty() => {
                errors.push(format!("EndEvent '{}' must not have outgoing flows", element.id));
            }
            BpmnElementType::BoundaryEvent if !element.incoming.is_empty() => {
                errors.push(format!(
                    "Boundary event '{}' must not have incoming flows",
                    element.id
                ));
            }
            BpmnElementType::EventBasedGateway => {
                if element.outgoing.len() < 2 {
                    errors.push(format!(
                        "Event-based gateway '{}' needs at least two outgoing flows",
                        element.id
                    ));
                }
                for flow_id in &element.outgoing {
                    let flow = &flows[flow_id];
                    let target = &elements[&flow.target_id];
                    if target.element_type != BpmnElementType::IntermediateCatchEvent {
                        errors.push(format!(
                            "Event-based gateway '{}' must only lead to catch events, not '{}'",
                            element.id, target.id
                        ));
                    } else if target.incoming.len() != 1 {
                        errors.push(format!(
                            "Catch event '{}' after event-based gateway '{}' must have one incoming flow",
                            target.id, element.id
                        ));
                    }
                    if flow.condition.is_some() {
                        errors.push(format!(
                            "Flow '{}' after event-based gateway must not have a condition",
                            flow.id
                        ));
                    }
                }
            }
            _ => {}
        }
    }
}
