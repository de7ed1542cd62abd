use crate::log::WriteError;
use crate::record::{BpmnElementType, ErrorType, Intent, ProcessInstanceIntent, RejectionType};
use crate::types::Key;
use std::fmt;
use thiserror::Error;

/// A business-rule violation while executing an element. Raised as an
/// incident; the element instance stays where it is until resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    pub message: String,
    pub error_type: ErrorType,
    pub element_instance_key: Key,
}

impl Failure {
    pub fn new(message: impl Into<String>, error_type: ErrorType, element_instance_key: Key) -> Self {
        Self {
            message: message.into(),
            error_type,
            element_instance_key,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.error_type, self.message)
    }
}

impl std::error::Error for Failure {}

/// Refusal to apply a command. Written as a COMMAND_REJECTION record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub rejection_type: RejectionType,
    pub reason: String,
}

impl Rejection {
    pub fn new(rejection_type: RejectionType, reason: impl Into<String>) -> Self {
        Self {
            rejection_type,
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(RejectionType::NotFound, reason)
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::new(RejectionType::InvalidState, reason)
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::new(RejectionType::InvalidArgument, reason)
    }
}

/// Unexpected internal fault. Fatal to the in-flight command: state is
/// rolled back and the partition stops processing.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Process '{0}' is not deployed")]
    UnknownProcess(String),

    #[error("Element '{element_id}' not found in process '{bpmn_process_id}'")]
    UnknownElement {
        bpmn_process_id: String,
        element_id: String,
    },

    #[error("No element processor registered for {0:?}")]
    MissingElementProcessor(BpmnElementType),

    #[error("No record processor registered for {0:?}")]
    MissingRecordProcessor(Intent),

    #[error("Element instance {0} not found")]
    ElementInstanceNotFound(Key),

    #[error("Element instance {key} already exists")]
    DuplicateElementInstance { key: Key },

    #[error("Illegal transition of element instance {key} from {from:?} to {to:?}")]
    IllegalTransition {
        key: Key,
        from: Option<ProcessInstanceIntent>,
        to: ProcessInstanceIntent,
    },

    #[error("Record {intent:?} does not carry a matching value")]
    UnexpectedValue { intent: Intent },

    #[error("Failed to write follow-up records: {0}")]
    Write(#[from] WriteError),
}

/// Why an element step did not complete: either a business failure that
/// becomes an incident or an internal fault that halts the partition.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{0}")]
    Failure(#[from] Failure),

    #[error(transparent)]
    Processing(#[from] ProcessingError),
}

/// Outcome of a command processor that did not succeed.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Rejected ({:?}): {}", .0.rejection_type, .0.reason)]
    Rejected(Rejection),

    #[error(transparent)]
    Processing(#[from] ProcessingError),
}

impl From<Rejection> for CommandError {
    fn from(rejection: Rejection) -> Self {
        CommandError::Rejected(rejection)
    }
}
