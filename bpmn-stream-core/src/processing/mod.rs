//! Command processing
//!
//! A [`RecordProcessor`] handles one command intent. It reads state through
//! the [`ProcessingContext`] and produces follow-up records with it; events
//! are applied to state the moment they are appended, so later steps of the
//! same command observe them. The stream processor writes the collected batch
//! once the processor returns.

pub mod bpmn;
mod creation;
mod incident;
mod job;
mod variable;

pub use creation::ProcessInstanceCreationProcessor;
pub use incident::IncidentResolveProcessor;
pub use job::JobCompleteProcessor;
pub use variable::VariableDocumentUpdateProcessor;

use crate::clock::Clock;
use crate::error::{CommandError, ProcessingError, Rejection};
use crate::log::LogAppendEntry;
use crate::message::MessagePublishProcessor;
use crate::model::{ExecutableProcess, ProcessRegistry};
use crate::record::*;
use crate::state::{EventAppliers, ProcessingState};
use crate::timer::{TimerCancelProcessor, TimerCreateProcessor, TimerTriggerProcessor};
use crate::types::{Key, Timestamp};
use bpmn::{BpmnElementProcessors, BpmnStreamProcessor};
use std::collections::HashMap;
use std::sync::Arc;

/// Handles commands of one intent.
pub trait RecordProcessor: Send + Sync {
    fn process(
        &self,
        command: &Record,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<(), CommandError>;
}

// ─── Context ──────────────────────────────────────────────────

/// Everything a processor may touch while handling one command.
pub struct ProcessingContext<'a> {
    state: &'a mut ProcessingState,
    appliers: &'a EventAppliers,
    processes: &'a ProcessRegistry,
    clock: &'a dyn Clock,
    entries: Vec<LogAppendEntry>,
}

impl<'a> ProcessingContext<'a> {
    pub fn new(
        state: &'a mut ProcessingState,
        appliers: &'a EventAppliers,
        processes: &'a ProcessRegistry,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            state,
            appliers,
            processes,
            clock,
            entries: Vec::new(),
        }
    }

    pub fn state(&self) -> &ProcessingState {
        self.state
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn next_key(&mut self) -> Key {
        self.state.next_key()
    }

    pub fn process(&self, bpmn_process_id: &str) -> Result<Arc<ExecutableProcess>, ProcessingError> {
        self.processes
            .get(bpmn_process_id)
            .ok_or_else(|| ProcessingError::UnknownProcess(bpmn_process_id.to_string()))
    }

    pub(crate) fn processes(&self) -> &ProcessRegistry {
        self.processes
    }

    /// Append an event and apply it to state.
    pub fn append_event(
        &mut self,
        key: Key,
        intent: impl Into<Intent>,
        value: impl Into<RecordValue>,
    ) -> Result<(), ProcessingError> {
        let entry = LogAppendEntry::event(key, intent, value);
        self.appliers
            .apply(&mut *self.state, entry.key, entry.intent, &entry.value)?;
        self.entries.push(entry);
        Ok(())
    }

    /// Append a follow-up command; it is processed after this batch.
    pub fn append_command(
        &mut self,
        key: Key,
        intent: impl Into<Intent>,
        value: impl Into<RecordValue>,
    ) {
        self.entries.push(LogAppendEntry::command(key, intent, value));
    }

    pub fn entries(&self) -> &[LogAppendEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LogAppendEntry> {
        self.entries
    }
}

// ─── Registry ─────────────────────────────────────────────────

/// Record processors keyed by command intent.
pub struct RecordProcessors {
    processors: HashMap<Intent, Arc<dyn RecordProcessor>>,
}

impl RecordProcessors {
    pub fn empty() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    /// Every built-in command processor, sharing one set of element
    /// processors.
    pub fn with_defaults() -> Self {
        let bpmn = Arc::new(BpmnStreamProcessor::new(Arc::new(
            BpmnElementProcessors::with_defaults(),
        )));

        let mut processors = Self::empty();
        for intent in [
            ProcessInstanceIntent::ActivateElement,
            ProcessInstanceIntent::CompleteElement,
            ProcessInstanceIntent::TerminateElement,
            ProcessInstanceIntent::Cancel,
        ] {
            processors.register(intent, bpmn.clone());
        }
        processors
            .register(
                ProcessInstanceCreationIntent::Create,
                Arc::new(ProcessInstanceCreationProcessor),
            )
            .register(TimerIntent::Create, Arc::new(TimerCreateProcessor))
            .register(TimerIntent::Trigger, Arc::new(TimerTriggerProcessor))
            .register(TimerIntent::Cancel, Arc::new(TimerCancelProcessor))
            .register(
                JobIntent::Complete,
                Arc::new(JobCompleteProcessor::new(bpmn.clone())),
            )
            .register(
                IncidentIntent::Resolve,
                Arc::new(IncidentResolveProcessor::new(bpmn)),
            )
            .register(
                VariableDocumentIntent::Update,
                Arc::new(VariableDocumentUpdateProcessor),
            )
            .register(MessageIntent::Publish, Arc::new(MessagePublishProcessor));
        processors
    }

    pub fn register(
        &mut self,
        intent: impl Into<Intent>,
        processor: Arc<dyn RecordProcessor>,
    ) -> &mut Self {
        self.processors.insert(intent.into(), processor);
        self
    }

    /// Route `command` to its processor. Event intents written as commands
    /// are rejected.
    pub fn process(
        &self,
        command: &Record,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<(), CommandError> {
        if command.intent.is_event() {
            return Err(Rejection::invalid_argument(format!(
                "Expected a command intent, but got {:?}",
                command.intent
            ))
            .into());
        }
        let processor = self
            .processors
            .get(&command.intent)
            .ok_or(ProcessingError::MissingRecordProcessor(command.intent))?;
        processor.process(command, ctx)
    }
}

impl Default for RecordProcessors {
    fn default() -> Self {
        Self::with_defaults()
    }
}
