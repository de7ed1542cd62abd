#![allow(dead_code)]

use bpmn_stream_core::config::{LogConfig, ProcessorConfig};
use bpmn_stream_core::log::LogAppendEntry;
use bpmn_stream_core::model::yaml::parse_process_yaml;
use bpmn_stream_core::record::*;
use bpmn_stream_core::{
    ControlledClock, Key, LogStream, LogStreamWriter, Position, ProcessRegistry,
    StreamProcessor, StreamProcessorHandle, WriteError, NO_KEY, NO_POSITION,
};
use std::sync::Arc;
use std::time::Duration;

pub const START_TIME: i64 = 1_700_000_000_000;

/// One partition with a controlled clock and no periodic timer check, so
/// tests decide exactly when timers fire.
pub struct Engine {
    pub log: LogStream,
    pub clock: Arc<ControlledClock>,
    pub processes: Arc<ProcessRegistry>,
    pub processor: StreamProcessorHandle,
    writer: LogStreamWriter,
}

impl Engine {
    pub fn start(definitions: &[&str]) -> Self {
        Self::with_log_config(definitions, LogConfig::default())
    }

    pub fn with_log_config(definitions: &[&str], log_config: LogConfig) -> Self {
        let mut registry = ProcessRegistry::new();
        for yaml in definitions {
            registry.deploy(parse_process_yaml(yaml).expect("valid process definition"));
        }
        let clock = Arc::new(ControlledClock::new(START_TIME));
        let log = LogStream::new(1, log_config, clock.clone());
        let processes = Arc::new(registry);
        let processor = start_processor(&log, &processes);
        Self {
            writer: log.new_writer(),
            log,
            clock,
            processes,
            processor,
        }
    }

    /// Close the processor and start a fresh one on the same log.
    pub async fn restart(self) -> Self {
        let Engine {
            log,
            clock,
            processes,
            processor,
            writer,
        } = self;
        processor.close().await;
        let processor = start_processor(&log, &processes);
        processor.await_caught_up().await;
        Self {
            log,
            clock,
            processes,
            processor,
            writer,
        }
    }

    pub fn try_write_command(
        &self,
        key: Key,
        intent: impl Into<Intent>,
        value: impl Into<RecordValue>,
    ) -> Result<Position, WriteError> {
        self.writer
            .try_write(vec![LogAppendEntry::command(key, intent, value)], NO_POSITION)
    }

    /// Write a client command and wait until it and everything it caused was
    /// processed.
    pub async fn command(
        &self,
        key: Key,
        intent: impl Into<Intent>,
        value: impl Into<RecordValue>,
    ) -> Position {
        let position = self
            .try_write_command(key, intent, value)
            .expect("command accepted");
        self.processor.await_caught_up().await;
        position
    }

    pub async fn create_instance(&self, bpmn_process_id: &str, variables: serde_json::Value) -> Key {
        let position = self
            .command(
                NO_KEY,
                ProcessInstanceCreationIntent::Create,
                ProcessInstanceCreationRecord {
                    bpmn_process_id: bpmn_process_id.to_string(),
                    process_instance_key: NO_KEY,
                    variables: to_variables(variables),
                },
            )
            .await;
        self.records()
            .into_iter()
            .find(|r| {
                r.source_record_position == position
                    && r.intent == Intent::ProcessInstanceCreation(ProcessInstanceCreationIntent::Created)
            })
            .map(|r| r.key)
            .expect("process instance created")
    }

    pub async fn complete_job(&self, job_key: Key, variables: serde_json::Value) -> Position {
        let job = self
            .records()
            .into_iter()
            .find(|r| r.key == job_key && r.intent == Intent::Job(JobIntent::Created))
            .and_then(|r| r.as_job().cloned())
            .expect("job exists");
        self.command(
            job_key,
            JobIntent::Complete,
            JobRecord {
                variables: to_variables(variables),
                ..job
            },
        )
        .await
    }

    pub async fn publish_message(
        &self,
        name: &str,
        correlation_key: &str,
        variables: serde_json::Value,
    ) -> Position {
        self.command(
            NO_KEY,
            MessageIntent::Publish,
            MessageRecord {
                name: name.to_string(),
                correlation_key: correlation_key.to_string(),
                variables: to_variables(variables),
            },
        )
        .await
    }

    /// Advance the clock, run the due-date check and wait for the triggered
    /// timers to be processed.
    pub async fn advance_and_fire(&self, by: Duration) -> usize {
        self.clock.advance(by);
        let written = self
            .processor
            .check_due_timers()
            .await
            .expect("processor running");
        self.processor.await_caught_up().await;
        written
    }

    pub fn records(&self) -> Vec<Record> {
        self.log.records()
    }

    pub fn events(&self) -> Vec<Record> {
        self.records().into_iter().filter(|r| r.is_event()).collect()
    }

    pub fn rejections(&self) -> Vec<Record> {
        self.records().into_iter().filter(|r| r.is_rejection()).collect()
    }

    /// Lifecycle events of `element_id` across all instances, in log order.
    pub fn element_intents(&self, element_id: &str) -> Vec<ProcessInstanceIntent> {
        self.events()
            .iter()
            .filter_map(|r| match (r.intent, r.as_process_instance()) {
                (Intent::ProcessInstance(intent), Some(pi)) if pi.element_id == element_id => {
                    Some(intent)
                }
                _ => None,
            })
            .collect()
    }

    pub fn count_events(&self, intent: impl Into<Intent>, element_id: &str) -> usize {
        let intent = intent.into();
        self.events()
            .iter()
            .filter(|r| r.intent == intent)
            .filter(|r| match &r.value {
                RecordValue::ProcessInstance(pi) => pi.element_id == element_id,
                RecordValue::Timer(t) => t.target_element_id == element_id,
                RecordValue::Job(j) => j.element_id == element_id,
                RecordValue::Incident(i) => i.element_id == element_id,
                RecordValue::MessageSubscription(m) => m.target_element_id == element_id,
                _ => false,
            })
            .count()
    }

    pub fn taken_flows(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter(|r| r.intent == Intent::ProcessInstance(ProcessInstanceIntent::SequenceFlowTaken))
            .filter_map(|r| r.as_process_instance().map(|pi| pi.element_id.clone()))
            .collect()
    }

    /// Keys of jobs created for `element_id` that are still open.
    pub fn open_jobs(&self, element_id: &str) -> Vec<Key> {
        let events = self.events();
        events
            .iter()
            .filter(|r| r.intent == Intent::Job(JobIntent::Created))
            .filter(|r| r.as_job().is_some_and(|j| j.element_id == element_id))
            .map(|r| r.key)
            .filter(|key| {
                !events.iter().any(|r| {
                    r.key == *key
                        && matches!(
                            r.intent,
                            Intent::Job(JobIntent::Completed) | Intent::Job(JobIntent::Canceled)
                        )
                })
            })
            .collect()
    }

    pub fn timer_events(&self, target_element_id: &str) -> Vec<(TimerIntent, Key, i64)> {
        self.events()
            .iter()
            .filter_map(|r| match (r.intent, r.as_timer()) {
                (Intent::Timer(intent), Some(t)) if t.target_element_id == target_element_id => {
                    Some((intent, r.key, t.due_date))
                }
                _ => None,
            })
            .collect()
    }

    pub fn incidents(&self) -> Vec<(Key, IncidentRecord)> {
        self.events()
            .iter()
            .filter(|r| r.intent == Intent::Incident(IncidentIntent::Created))
            .filter_map(|r| r.as_incident().map(|i| (r.key, i.clone())))
            .collect()
    }

    pub fn process_completed(&self, process_instance_key: Key) -> bool {
        self.events().iter().any(|r| {
            r.key == process_instance_key
                && r.intent == Intent::ProcessInstance(ProcessInstanceIntent::ElementCompleted)
        })
    }

    pub fn process_terminated(&self, process_instance_key: Key) -> bool {
        self.events().iter().any(|r| {
            r.key == process_instance_key
                && r.intent == Intent::ProcessInstance(ProcessInstanceIntent::ElementTerminated)
        })
    }

    pub async fn close(self) {
        self.processor.close().await;
    }
}

pub fn start_processor(log: &LogStream, processes: &Arc<ProcessRegistry>) -> StreamProcessorHandle {
    StreamProcessor::builder(log.clone(), processes.clone())
        .config(ProcessorConfig {
            timer_check_interval_ms: 0,
        })
        .build()
        .start()
}

pub fn to_variables(value: serde_json::Value) -> Variables {
    match value {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        serde_json::Value::Null => Variables::new(),
        other => panic!("variables must be a JSON object, got {other}"),
    }
}
