//! Records of the partition log.
//!
//! Every entry of the log is an immutable [`Record`]: a command (request), an
//! event (fact) or a command rejection. Payloads are plain serde structs so
//! records can be exported independently of the engine's in-memory state.

use crate::types::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Variables of a scope, as a flat JSON document.
pub type Variables = BTreeMap<String, serde_json::Value>;

// ─── Record classification ────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    Command,
    Event,
    CommandRejection,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    ProcessInstanceCreation,
    ProcessInstance,
    Timer,
    Job,
    Incident,
    VariableDocument,
    Message,
    MessageSubscription,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionType {
    InvalidArgument,
    NotFound,
    InvalidState,
}

// ─── Intents ──────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessInstanceCreationIntent {
    Create,
    Created,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessInstanceIntent {
    // commands
    ActivateElement,
    CompleteElement,
    TerminateElement,
    Cancel,
    // events
    ElementActivating,
    ElementActivated,
    ElementCompleting,
    ElementCompleted,
    ElementTerminating,
    ElementTerminated,
    SequenceFlowTaken,
}

impl ProcessInstanceIntent {
    /// Whether this is one of the element lifecycle states.
    pub fn is_lifecycle_state(&self) -> bool {
        matches!(
            self,
            Self::ElementActivating
                | Self::ElementActivated
                | Self::ElementCompleting
                | Self::ElementCompleted
                | Self::ElementTerminating
                | Self::ElementTerminated
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerIntent {
    Create,
    Created,
    Trigger,
    Triggered,
    Cancel,
    Canceled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobIntent {
    Created,
    Complete,
    Completed,
    Canceled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentIntent {
    Created,
    Resolve,
    Resolved,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableDocumentIntent {
    Update,
    Updated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageIntent {
    Publish,
    Published,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageSubscriptionIntent {
    Created,
    Correlated,
    Deleted,
}

/// The verb of a record, grouped by value type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "valueType", content = "intent", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    ProcessInstanceCreation(ProcessInstanceCreationIntent),
    ProcessInstance(ProcessInstanceIntent),
    Timer(TimerIntent),
    Job(JobIntent),
    Incident(IncidentIntent),
    VariableDocument(VariableDocumentIntent),
    Message(MessageIntent),
    MessageSubscription(MessageSubscriptionIntent),
}

impl Intent {
    pub fn value_type(&self) -> ValueType {
        match self {
            Intent::ProcessInstanceCreation(_) => ValueType::ProcessInstanceCreation,
            Intent::ProcessInstance(_) => ValueType::ProcessInstance,
            Intent::Timer(_) => ValueType::Timer,
            Intent::Job(_) => ValueType::Job,
            Intent::Incident(_) => ValueType::Incident,
            Intent::VariableDocument(_) => ValueType::VariableDocument,
            Intent::Message(_) => ValueType::Message,
            Intent::MessageSubscription(_) => ValueType::MessageSubscription,
        }
    }

    /// Whether this intent names a fact (as opposed to a request).
    pub fn is_event(&self) -> bool {
        match self {
            Intent::ProcessInstanceCreation(i) => *i == ProcessInstanceCreationIntent::Created,
            Intent::ProcessInstance(i) => !matches!(
                i,
                ProcessInstanceIntent::ActivateElement
                    | ProcessInstanceIntent::CompleteElement
                    | ProcessInstanceIntent::TerminateElement
                    | ProcessInstanceIntent::Cancel
            ),
            Intent::Timer(i) => matches!(
                i,
                TimerIntent::Created | TimerIntent::Triggered | TimerIntent::Canceled
            ),
            Intent::Job(i) => *i != JobIntent::Complete,
            Intent::Incident(i) => *i != IncidentIntent::Resolve,
            Intent::VariableDocument(i) => *i == VariableDocumentIntent::Updated,
            Intent::Message(i) => *i == MessageIntent::Published,
            Intent::MessageSubscription(_) => true,
        }
    }
}

impl From<ProcessInstanceIntent> for Intent {
    fn from(i: ProcessInstanceIntent) -> Self {
        Intent::ProcessInstance(i)
    }
}

impl From<ProcessInstanceCreationIntent> for Intent {
    fn from(i: ProcessInstanceCreationIntent) -> Self {
        Intent::ProcessInstanceCreation(i)
    }
}

impl From<TimerIntent> for Intent {
    fn from(i: TimerIntent) -> Self {
        Intent::Timer(i)
    }
}

impl From<JobIntent> for Intent {
    fn from(i: JobIntent) -> Self {
        Intent::Job(i)
    }
}

impl From<IncidentIntent> for Intent {
    fn from(i: IncidentIntent) -> Self {
        Intent::Incident(i)
    }
}

impl From<VariableDocumentIntent> for Intent {
    fn from(i: VariableDocumentIntent) -> Self {
        Intent::VariableDocument(i)
    }
}

impl From<MessageIntent> for Intent {
    fn from(i: MessageIntent) -> Self {
        Intent::Message(i)
    }
}

impl From<MessageSubscriptionIntent> for Intent {
    fn from(i: MessageSubscriptionIntent) -> Self {
        Intent::MessageSubscription(i)
    }
}

// ─── Element kinds ────────────────────────────────────────────

/// Closed set of BPMN element kinds the engine can execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BpmnElementType {
    Process,
    StartEvent,
    EndEvent,
    ServiceTask,
    ExclusiveGateway,
    InclusiveGateway,
    ParallelGateway,
    EventBasedGateway,
    IntermediateCatchEvent,
    BoundaryEvent,
    SequenceFlow,
}

// ─── Error types (incidents) ──────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    ConditionError,
    ExtractValueError,
    Unknown,
}

// ─── Payloads ─────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInstanceCreationRecord {
    pub bpmn_process_id: String,
    pub process_instance_key: Key,
    #[serde(default)]
    pub variables: Variables,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInstanceRecord {
    pub bpmn_process_id: String,
    pub process_instance_key: Key,
    pub element_id: String,
    pub bpmn_element_type: BpmnElementType,
    pub flow_scope_key: Key,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerRecord {
    pub bpmn_process_id: String,
    pub process_instance_key: Key,
    pub element_instance_key: Key,
    /// Element that handles the timer when it fires.
    pub target_element_id: String,
    pub due_date: Timestamp,
    /// Further occurrences after this one: `-1` unbounded, `0` none.
    pub repetitions: i32,
    /// Cycle period in milliseconds (0 for single-shot timers).
    pub interval_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    Task,
    ExecutionListener,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_type: String,
    pub kind: JobKind,
    pub bpmn_process_id: String,
    pub process_instance_key: Key,
    pub element_instance_key: Key,
    pub element_id: String,
    /// Variables returned by the worker on completion.
    #[serde(default)]
    pub variables: Variables,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentRecord {
    pub error_type: ErrorType,
    pub error_message: String,
    pub bpmn_process_id: String,
    pub process_instance_key: Key,
    pub element_instance_key: Key,
    pub element_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDocumentRecord {
    pub scope_key: Key,
    pub variables: Variables,
}

/// A message published to the partition. Correlated to every waiting
/// subscription with the same name and correlation key, then dropped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub name: String,
    pub correlation_key: String,
    #[serde(default)]
    pub variables: Variables,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSubscriptionRecord {
    pub bpmn_process_id: String,
    pub process_instance_key: Key,
    pub element_instance_key: Key,
    /// Element that handles the message when it is correlated.
    pub target_element_id: String,
    pub message_name: String,
    pub correlation_key: String,
    /// Variables of the correlated message; empty until then.
    #[serde(default)]
    pub variables: Variables,
}

/// Typed payload of a record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordValue {
    ProcessInstanceCreation(ProcessInstanceCreationRecord),
    ProcessInstance(ProcessInstanceRecord),
    Timer(TimerRecord),
    Job(JobRecord),
    Incident(IncidentRecord),
    VariableDocument(VariableDocumentRecord),
    Message(MessageRecord),
    MessageSubscription(MessageSubscriptionRecord),
}

impl RecordValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            RecordValue::ProcessInstanceCreation(_) => ValueType::ProcessInstanceCreation,
            RecordValue::ProcessInstance(_) => ValueType::ProcessInstance,
            RecordValue::Timer(_) => ValueType::Timer,
            RecordValue::Job(_) => ValueType::Job,
            RecordValue::Incident(_) => ValueType::Incident,
            RecordValue::VariableDocument(_) => ValueType::VariableDocument,
            RecordValue::Message(_) => ValueType::Message,
            RecordValue::MessageSubscription(_) => ValueType::MessageSubscription,
        }
    }
}

impl From<ProcessInstanceCreationRecord> for RecordValue {
    fn from(v: ProcessInstanceCreationRecord) -> Self {
        RecordValue::ProcessInstanceCreation(v)
    }
}

impl From<ProcessInstanceRecord> for RecordValue {
    fn from(v: ProcessInstanceRecord) -> Self {
        RecordValue::ProcessInstance(v)
    }
}

impl From<TimerRecord> for RecordValue {
    fn from(v: TimerRecord) -> Self {
        RecordValue::Timer(v)
    }
}

impl From<JobRecord> for RecordValue {
    fn from(v: JobRecord) -> Self {
        RecordValue::Job(v)
    }
}

impl From<IncidentRecord> for RecordValue {
    fn from(v: IncidentRecord) -> Self {
        RecordValue::Incident(v)
    }
}

impl From<VariableDocumentRecord> for RecordValue {
    fn from(v: VariableDocumentRecord) -> Self {
        RecordValue::VariableDocument(v)
    }
}

impl From<MessageRecord> for RecordValue {
    fn from(v: MessageRecord) -> Self {
        RecordValue::Message(v)
    }
}

impl From<MessageSubscriptionRecord> for RecordValue {
    fn from(v: MessageSubscriptionRecord) -> Self {
        RecordValue::MessageSubscription(v)
    }
}

// ─── Record ───────────────────────────────────────────────────

/// One committed entry of a partition log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub position: Position,
    /// Command that caused this record, `-1` for client commands.
    pub source_record_position: Position,
    pub key: Key,
    pub record_type: RecordType,
    pub intent: Intent,
    pub timestamp: Timestamp,
    pub partition_id: PartitionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_type: Option<RejectionType>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rejection_reason: String,
    pub value: RecordValue,
}

impl Record {
    pub fn value_type(&self) -> ValueType {
        self.intent.value_type()
    }

    pub fn is_command(&self) -> bool {
        self.record_type == RecordType::Command
    }

    pub fn is_event(&self) -> bool {
        self.record_type == RecordType::Event
    }

    pub fn is_rejection(&self) -> bool {
        self.record_type == RecordType::CommandRejection
    }

    pub fn as_process_instance(&self) -> Option<&ProcessInstanceRecord> {
        match &self.value {
            RecordValue::ProcessInstance(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_timer(&self) -> Option<&TimerRecord> {
        match &self.value {
            RecordValue::Timer(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_job(&self) -> Option<&JobRecord> {
        match &self.value {
            RecordValue::Job(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_incident(&self) -> Option<&IncidentRecord> {
        match &self.value {
            RecordValue::Incident(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_message_subscription(&self) -> Option<&MessageSubscriptionRecord> {
        match &self.value {
            RecordValue::MessageSubscription(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.record_type {
            RecordType::Command => "C",
            RecordType::Event => "E",
            RecordType::CommandRejection => "R",
        };
        let intent = match self.intent {
            Intent::ProcessInstanceCreation(i) => format!("{i:?}"),
            Intent::ProcessInstance(i) => format!("{i:?}"),
            Intent::Timer(i) => format!("{i:?}"),
            Intent::Job(i) => format!("{i:?}"),
            Intent::Incident(i) => format!("{i:?}"),
            Intent::VariableDocument(i) => format!("{i:?}"),
            Intent::Message(i) => format!("{i:?}"),
            Intent::MessageSubscription(i) => format!("{i:?}"),
        };
        write!(
            f,
            "{} {kind} {:?} {intent} key={} src={}",
            self.position,
            self.value_type(),
            self.key,
            self.source_record_position
        )?;
        if let Some(element) = self.as_process_instance() {
            write!(f, " element={}", element.element_id)?;
        }
        if let Some(rejection) = self.rejection_type {
            write!(f, " rejected={rejection:?} \"{}\"", self.rejection_reason)?;
        }
        Ok(())
    }
}

/// SHA-256 over the canonical JSON form of `records`. Two logs with the same
/// digest are byte-identical.
pub fn log_digest<'a>(records: impl IntoIterator<Item = &'a Record>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for record in records {
        // Serializing plain data structs into a Vec cannot fail.
        let bytes = serde_json::to_vec(record).unwrap_or_default();
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(&bytes);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer_record(position: Position) -> Record {
        Record {
            position,
            source_record_position: NO_POSITION,
            key: 7,
            record_type: RecordType::Event,
            intent: TimerIntent::Created.into(),
            timestamp: 1_000,
            partition_id: 1,
            rejection_type: None,
            rejection_reason: String::new(),
            value: TimerRecord {
                bpmn_process_id: "process".into(),
                process_instance_key: 1,
                element_instance_key: 2,
                target_element_id: "timer".into(),
                due_date: 2_000,
                repetitions: 0,
                interval_ms: 0,
            }
            .into(),
        }
    }

    #[test]
    fn test_intent_classification() {
        assert!(Intent::from(TimerIntent::Triggered).is_event());
        assert!(!Intent::from(TimerIntent::Trigger).is_event());
        assert!(!Intent::from(ProcessInstanceIntent::ActivateElement).is_event());
        assert!(Intent::from(ProcessInstanceIntent::SequenceFlowTaken).is_event());
        assert!(!Intent::from(JobIntent::Complete).is_event());
        assert!(!Intent::from(MessageIntent::Publish).is_event());
        assert!(Intent::from(MessageSubscriptionIntent::Correlated).is_event());
        assert_eq!(
            Intent::from(IncidentIntent::Resolve).value_type(),
            ValueType::Incident
        );
    }

    #[test]
    fn test_record_json_shape() {
        let json = serde_json::to_value(timer_record(3)).unwrap();
        assert_eq!(json["intent"]["valueType"], "TIMER");
        assert_eq!(json["intent"]["intent"], "CREATED");
        assert_eq!(json["recordType"], "EVENT");
        assert_eq!(json["value"]["timer"]["targetElementId"], "timer");
        assert!(json.get("rejectionType").is_none());
    }

    #[test]
    fn test_log_digest_sensitive_to_content() {
        let a = vec![timer_record(1), timer_record(2)];
        let mut b = a.clone();
        assert_eq!(log_digest(&a), log_digest(&b));
        b[1].timestamp += 1;
        assert_ne!(log_digest(&a), log_digest(&b));
    }
}
