//! Record exporters
//!
//! An [`ExporterDirector`] follows a partition log with its own reader and
//! hands every committed record, in position order, to each registered
//! [`Exporter`]. A failing exporter is retried until it accepts the record,
//! so exporters never observe gaps.

use crate::log::LogStream;
use crate::record::{Intent, ProcessInstanceIntent, Record};
use crate::types::{PartitionId, Position};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RETRY_DELAY: Duration = Duration::from_millis(100);

#[async_trait]
pub trait Exporter: Send {
    /// Stable identifier used in logs.
    fn id(&self) -> &str;

    async fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn export(&mut self, record: &Record) -> anyhow::Result<()>;

    async fn close(&mut self) {}
}

// ─── Director ─────────────────────────────────────────────────

pub struct ExporterDirector;

impl ExporterDirector {
    /// Spawn the export task for `log`. Exporters that fail to open are
    /// dropped with a warning.
    pub fn start(log: &LogStream, exporters: Vec<Box<dyn Exporter>>) -> ExporterDirectorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (position_tx, position_rx) = watch::channel(0);
        let partition_id = log.partition_id();
        let task = ExportTask {
            partition_id,
            log: log.clone(),
            exporters,
            shutdown_rx,
            position_tx,
        };
        let join = tokio::spawn(task.run());
        ExporterDirectorHandle {
            partition_id,
            shutdown_tx,
            position_rx,
            join,
        }
    }
}

pub struct ExporterDirectorHandle {
    partition_id: PartitionId,
    shutdown_tx: watch::Sender<bool>,
    position_rx: watch::Receiver<Position>,
    join: JoinHandle<()>,
}

impl ExporterDirectorHandle {
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Position of the last record accepted by every exporter.
    pub fn exported_position(&self) -> Position {
        *self.position_rx.borrow()
    }

    /// Wait until every record up to `position` has been exported.
    pub async fn await_exported(&self, position: Position) {
        let mut rx = self.position_rx.clone();
        let _ = rx.wait_for(|exported| *exported >= position).await;
    }

    /// Stop exporting and close all exporters.
    pub async fn close(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            warn!(partition = self.partition_id, error = %e, "Export task panicked");
        }
    }
}

struct ExportTask {
    partition_id: PartitionId,
    log: LogStream,
    exporters: Vec<Box<dyn Exporter>>,
    shutdown_rx: watch::Receiver<bool>,
    position_tx: watch::Sender<Position>,
}

impl ExportTask {
    async fn run(mut self) {
        let mut opened = Vec::with_capacity(self.exporters.len());
        for mut exporter in std::mem::take(&mut self.exporters) {
            match exporter.open().await {
                Ok(()) => {
                    debug!(partition = self.partition_id, exporter = exporter.id(), "Exporter opened");
                    opened.push(exporter);
                }
                Err(e) => {
                    warn!(
                        partition = self.partition_id,
                        exporter = exporter.id(),
                        error = %e,
                        "Exporter failed to open, skipping"
                    );
                }
            }
        }
        self.exporters = opened;
        info!(
            partition = self.partition_id,
            exporters = self.exporters.len(),
            "Exporter director started"
        );

        let mut reader = self.log.new_reader();
        loop {
            let record = tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => break,
                next = reader.next_committed() => match next {
                    Some(record) => record,
                    None => break,
                },
            };
            if !self.export(&record).await {
                break;
            }
            let _ = self.position_tx.send(record.position);
        }

        for exporter in &mut self.exporters {
            exporter.close().await;
        }
        info!(
            partition = self.partition_id,
            position = *self.position_tx.borrow(),
            "Exporter director stopped"
        );
    }

    /// Returns false when shutdown was requested while retrying.
    async fn export(&mut self, record: &Record) -> bool {
        for exporter in self.exporters.iter_mut() {
            loop {
                match exporter.export(record).await {
                    Ok(()) => break,
                    Err(e) => {
                        warn!(
                            partition = self.partition_id,
                            exporter = exporter.id(),
                            position = record.position,
                            error = %e,
                            "Export failed, retrying"
                        );
                        tokio::select! {
                            _ = self.shutdown_rx.changed() => return false,
                            _ = tokio::time::sleep(RETRY_DELAY) => {}
                        }
                    }
                }
            }
        }
        true
    }
}

// ─── Built-in exporters ───────────────────────────────────────

/// Logs every record at debug level.
#[derive(Debug, Default)]
pub struct LoggingExporter;

#[async_trait]
impl Exporter for LoggingExporter {
    fn id(&self) -> &str {
        "logging"
    }

    async fn export(&mut self, record: &Record) -> anyhow::Result<()> {
        debug!(partition = record.partition_id, "{record}");
        Ok(())
    }
}

/// Keeps exported records in memory. Clones share the same buffer, so a test
/// can hand one clone to the director and query the other.
#[derive(Clone, Debug, Default)]
pub struct RecordingExporter {
    records: Arc<Mutex<Vec<Record>>>,
}

impl RecordingExporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn records(&self) -> Vec<Record> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn with_intent(&self, intent: impl Into<Intent>) -> Vec<Record> {
        let intent = intent.into();
        self.lock()
            .iter()
            .filter(|r| r.intent == intent)
            .cloned()
            .collect()
    }

    /// Process instance events of `element_id` in log order.
    pub fn element_intents(&self, element_id: &str) -> Vec<ProcessInstanceIntent> {
        self.lock()
            .iter()
            .filter(|r| r.is_event())
            .filter_map(|r| match (r.intent, r.as_process_instance()) {
                (Intent::ProcessInstance(intent), Some(pi)) if pi.element_id == element_id => {
                    Some(intent)
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[async_trait]
impl Exporter for RecordingExporter {
    fn id(&self) -> &str {
        "recording"
    }

    async fn export(&mut self, record: &Record) -> anyhow::Result<()> {
        self.lock().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ControlledClock;
    use crate::config::LogConfig;
    use crate::log::LogAppendEntry;
    use crate::record::*;
    use crate::types::NO_POSITION;

    fn new_log() -> LogStream {
        LogStream::new(1, LogConfig::default(), Arc::new(ControlledClock::new(0)))
    }

    fn update(key: i64) -> LogAppendEntry {
        LogAppendEntry::command(
            key,
            VariableDocumentIntent::Update,
            VariableDocumentRecord {
                scope_key: key,
                variables: Variables::new(),
            },
        )
    }

    /// Fails the first `failures` exports.
    struct FlakyExporter {
        failures: usize,
        inner: RecordingExporter,
    }

    #[async_trait]
    impl Exporter for FlakyExporter {
        fn id(&self) -> &str {
            "flaky"
        }

        async fn export(&mut self, record: &Record) -> anyhow::Result<()> {
            if self.failures > 0 {
                self.failures -= 1;
                anyhow::bail!("sink unavailable");
            }
            self.inner.export(record).await
        }
    }

    struct BrokenOpen;

    #[async_trait]
    impl Exporter for BrokenOpen {
        fn id(&self) -> &str {
            "broken"
        }

        async fn open(&mut self) -> anyhow::Result<()> {
            anyhow::bail!("no connection")
        }

        async fn export(&mut self, _record: &Record) -> anyhow::Result<()> {
            panic!("never opened");
        }
    }

    #[tokio::test]
    async fn test_exports_committed_records_in_order() {
        let log = new_log();
        let recording = RecordingExporter::new();
        let director = ExporterDirector::start(&log, vec![Box::new(recording.clone())]);

        let writer = log.new_writer();
        writer.try_write(vec![update(1), update(2)], NO_POSITION).unwrap();
        writer.try_write(vec![update(3)], NO_POSITION).unwrap();

        director.await_exported(3).await;
        let positions: Vec<_> = recording.records().iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert_eq!(director.exported_position(), 3);
        director.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_export_is_retried_without_gaps() {
        let log = new_log();
        let recording = RecordingExporter::new();
        let flaky = FlakyExporter {
            failures: 2,
            inner: recording.clone(),
        };
        let director = ExporterDirector::start(&log, vec![Box::new(flaky)]);

        log.new_writer()
            .try_write(vec![update(1), update(2)], NO_POSITION)
            .unwrap();
        director.await_exported(2).await;

        let keys: Vec<_> = recording.records().iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![1, 2]);
        director.close().await;
    }

    #[tokio::test]
    async fn test_exporter_failing_to_open_is_skipped() {
        let log = new_log();
        let recording = RecordingExporter::new();
        let director = ExporterDirector::start(
            &log,
            vec![Box::new(BrokenOpen), Box::new(recording.clone())],
        );

        log.new_writer().try_write(vec![update(7)], NO_POSITION).unwrap();
        director.await_exported(1).await;
        assert_eq!(recording.len(), 1);
        director.close().await;
    }

    #[tokio::test]
    async fn test_recording_queries() {
        let mut recording = RecordingExporter::new();
        let log = new_log();
        log.new_writer()
            .try_write(
                vec![
                    update(1),
                    LogAppendEntry::event(
                        2,
                        ProcessInstanceIntent::ElementActivated,
                        ProcessInstanceRecord {
                            bpmn_process_id: "p".into(),
                            process_instance_key: 2,
                            element_id: "start".into(),
                            bpmn_element_type: BpmnElementType::StartEvent,
                            flow_scope_key: 1,
                        },
                    ),
                ],
                NO_POSITION,
            )
            .unwrap();
        for record in log.records() {
            recording.export(&record).await.unwrap();
        }

        assert_eq!(recording.with_intent(VariableDocumentIntent::Update).len(), 1);
        assert_eq!(
            recording.element_intents("start"),
            vec![ProcessInstanceIntent::ElementActivated]
        );
        recording.clear();
        assert!(recording.is_empty());
    }
}
