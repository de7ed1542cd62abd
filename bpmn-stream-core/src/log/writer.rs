use super::LogInner;
use crate::record::*;
use crate::types::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Backpressure: {pending} unprocessed records (limit {limit})")]
    Backpressure { pending: i64, limit: i64 },

    #[error("Cannot append an empty batch")]
    EmptyBatch,

    #[error("Intent {intent:?} does not match value type {value_type:?}")]
    MismatchedValueType { intent: Intent, value_type: ValueType },

    #[error("Log is closed")]
    Closed,
}

/// A record to append, before the log assigns position and timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct LogAppendEntry {
    pub key: Key,
    pub record_type: RecordType,
    pub intent: Intent,
    pub rejection_type: Option<RejectionType>,
    pub rejection_reason: String,
    pub value: RecordValue,
}

impl LogAppendEntry {
    pub fn command(key: Key, intent: impl Into<Intent>, value: impl Into<RecordValue>) -> Self {
        Self::new(key, RecordType::Command, intent.into(), value.into())
    }

    pub fn event(key: Key, intent: impl Into<Intent>, value: impl Into<RecordValue>) -> Self {
        Self::new(key, RecordType::Event, intent.into(), value.into())
    }

    /// Rejection of `command`, echoing its key, intent and value.
    pub fn rejection(command: &Record, rejection_type: RejectionType, reason: String) -> Self {
        Self {
            key: command.key,
            record_type: RecordType::CommandRejection,
            intent: command.intent,
            rejection_type: Some(rejection_type),
            rejection_reason: reason,
            value: command.value.clone(),
        }
    }

    fn new(key: Key, record_type: RecordType, intent: Intent, value: RecordValue) -> Self {
        Self {
            key,
            record_type,
            intent,
            rejection_type: None,
            rejection_reason: String::new(),
            value,
        }
    }
}

/// Appends batches to a partition log.
#[derive(Clone)]
pub struct LogStreamWriter {
    inner: Arc<LogInner>,
}

impl LogStreamWriter {
    pub(super) fn new(inner: Arc<LogInner>) -> Self {
        Self { inner }
    }

    /// Append `entries` atomically and return the position of the last one.
    ///
    /// `source_position` is the command the batch was produced from, or
    /// [`NO_POSITION`] for client writes. Client writes fail immediately with
    /// [`WriteError::Backpressure`] when the processor lags too far behind.
    pub fn try_write(
        &self,
        entries: Vec<LogAppendEntry>,
        source_position: Position,
    ) -> Result<Position, WriteError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(WriteError::Closed);
        }
        if entries.is_empty() {
            return Err(WriteError::EmptyBatch);
        }
        for entry in &entries {
            if entry.intent.value_type() != entry.value.value_type() {
                return Err(WriteError::MismatchedValueType {
                    intent: entry.intent,
                    value_type: entry.value.value_type(),
                });
            }
        }

        let timestamp = self.inner.clock.now();
        let last_position = {
            let mut records = self
                .inner
                .records
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            let commit_position = records.len() as Position;
            if source_position == NO_POSITION {
                let processed = self.inner.processed_position.load(Ordering::SeqCst);
                let pending = commit_position - processed;
                let limit = self.inner.config.backpressure_limit;
                if pending >= limit {
                    return Err(WriteError::Backpressure { pending, limit });
                }
            }

            for entry in entries {
                let position = records.len() as Position + 1;
                records.push(Record {
                    position,
                    source_record_position: source_position,
                    key: entry.key,
                    record_type: entry.record_type,
                    intent: entry.intent,
                    timestamp,
                    partition_id: self.inner.partition_id,
                    rejection_type: entry.rejection_type,
                    rejection_reason: entry.rejection_reason,
                    value: entry.value,
                });
            }
            let last_position = records.len() as Position;
            self.inner.publish_commit(last_position);
            last_position
        };

        trace!(
            partition = self.inner.partition_id,
            position = last_position,
            source = source_position,
            "Committed batch"
        );
        self.inner.notify_listeners();
        Ok(last_position)
    }
}
