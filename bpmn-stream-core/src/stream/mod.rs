//! Stream processor
//!
//! One tokio task per partition. On start it replays the committed log into
//! a fresh [`ProcessingState`], then processes every unprocessed command in
//! position order and appends the resulting batch. The task owns the state;
//! the [`StreamProcessorHandle`] talks to it over a control channel.

pub mod monitor;

use crate::clock::Clock;
use crate::config::ProcessorConfig;
use crate::error::CommandError;
use crate::log::{LogAppendEntry, LogStream, LogStreamReader, LogStreamWriter};
use crate::model::ProcessRegistry;
use crate::processing::{ProcessingContext, RecordProcessors};
use crate::record::Record;
use crate::state::{EventAppliers, ProcessingState};
use crate::timer::DueDateTimerChecker;
use crate::types::{PartitionId, Position};
use monitor::ProcessingProgress;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info};

const CONTROL_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Replay,
    Processing,
    /// A command hit an internal fault; nothing more is processed.
    Failed,
    Closed,
}

#[derive(Debug, Error)]
pub enum StreamProcessorError {
    #[error("Stream processor of partition {0} is closed")]
    Closed(PartitionId),
}

type Responder<T> = oneshot::Sender<T>;

enum ControlMessage {
    LastProcessedPosition(Responder<Position>),
    CheckDueTimers(Responder<usize>),
    Inspect(Box<dyn FnOnce(&ProcessingState) + Send>),
    Close(Responder<()>),
}

// ─── Builder ──────────────────────────────────────────────────

pub struct StreamProcessorBuilder {
    log: LogStream,
    processes: Arc<ProcessRegistry>,
    config: ProcessorConfig,
    record_processors: Option<RecordProcessors>,
}

impl StreamProcessorBuilder {
    pub fn config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn record_processors(mut self, record_processors: RecordProcessors) -> Self {
        self.record_processors = Some(record_processors);
        self
    }

    pub fn build(self) -> StreamProcessor {
        StreamProcessor {
            log: self.log,
            processes: self.processes,
            config: self.config,
            record_processors: self.record_processors.unwrap_or_default(),
        }
    }
}

pub struct StreamProcessor {
    log: LogStream,
    processes: Arc<ProcessRegistry>,
    config: ProcessorConfig,
    record_processors: RecordProcessors,
}

impl StreamProcessor {
    pub fn builder(log: LogStream, processes: Arc<ProcessRegistry>) -> StreamProcessorBuilder {
        StreamProcessorBuilder {
            log,
            processes,
            config: ProcessorConfig::default(),
            record_processors: None,
        }
    }

    /// Spawn the partition task. Must be called from within a tokio runtime.
    pub fn start(self) -> StreamProcessorHandle {
        let partition_id = self.log.partition_id();
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (phase_tx, phase_rx) = watch::channel(Phase::Replay);
        let (position_tx, position_rx) = watch::channel(0);

        let worker = Worker {
            partition_id,
            clock: self.log.clock(),
            reader: self.log.new_reader(),
            writer: self.log.new_writer(),
            log: self.log.clone(),
            state: ProcessingState::new(partition_id),
            appliers: EventAppliers::new(self.processes.clone()),
            processes: self.processes,
            record_processors: self.record_processors,
            timer_checker: DueDateTimerChecker::new(),
            config: self.config,
            control_rx,
            phase: Phase::Replay,
            phase_tx,
            position_tx,
            last_position: 0,
            log_closed: false,
        };
        let task = tokio::spawn(worker.run());

        StreamProcessorHandle {
            partition_id,
            log: self.log,
            control_tx,
            phase_rx,
            position_rx,
            task,
        }
    }
}

// ─── Handle ───────────────────────────────────────────────────

pub struct StreamProcessorHandle {
    partition_id: PartitionId,
    log: LogStream,
    control_tx: mpsc::Sender<ControlMessage>,
    phase_rx: watch::Receiver<Phase>,
    position_rx: watch::Receiver<Position>,
    task: JoinHandle<()>,
}

impl StreamProcessorHandle {
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn phase(&self) -> Phase {
        *self.phase_rx.borrow()
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(Responder<T>) -> ControlMessage,
    ) -> Result<T, StreamProcessorError> {
        let (tx, rx) = oneshot::channel();
        self.control_tx
            .send(message(tx))
            .await
            .map_err(|_| StreamProcessorError::Closed(self.partition_id))?;
        rx.await
            .map_err(|_| StreamProcessorError::Closed(self.partition_id))
    }

    /// Position of the last record the processor handled (0 before any).
    pub async fn last_processed_position(&self) -> Result<Position, StreamProcessorError> {
        self.request(ControlMessage::LastProcessedPosition).await
    }

    /// Run the due-date timer check now. Returns the number of TRIGGER
    /// commands written.
    pub async fn check_due_timers(&self) -> Result<usize, StreamProcessorError> {
        self.request(ControlMessage::CheckDueTimers).await
    }

    /// Run `f` against the partition state on the processor task.
    pub async fn with_state<R, F>(&self, f: F) -> Result<R, StreamProcessorError>
    where
        R: Send + 'static,
        F: FnOnce(&ProcessingState) -> R + Send + 'static,
    {
        self.request(|tx| {
            ControlMessage::Inspect(Box::new(move |state| {
                let _ = tx.send(f(state));
            }))
        })
        .await
    }

    pub fn is_caught_up(&self) -> bool {
        *self.position_rx.borrow() >= self.log.commit_position()
    }

    /// Wait until every committed record was handled, or processing stopped.
    pub async fn await_caught_up(&self) {
        let mut position_rx = self.position_rx.clone();
        let mut phase_rx = self.phase_rx.clone();
        loop {
            let stopped = matches!(*phase_rx.borrow(), Phase::Failed | Phase::Closed);
            if stopped || self.is_caught_up() {
                return;
            }
            tokio::select! {
                changed = position_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                changed = phase_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Progress snapshot for an idle monitor.
    pub fn progress(&self) -> Arc<dyn ProcessingProgress> {
        Arc::new(StreamProgress {
            log: self.log.clone(),
            position_rx: self.position_rx.clone(),
        })
    }

    /// Stop the processor task and wait for it to finish.
    pub async fn close(self) {
        let _ = self.request(ControlMessage::Close).await;
        let _ = self.task.await;
    }
}

struct StreamProgress {
    log: LogStream,
    position_rx: watch::Receiver<Position>,
}

impl ProcessingProgress for StreamProgress {
    fn is_caught_up(&self) -> bool {
        *self.position_rx.borrow() >= self.log.commit_position()
    }
}

// ─── Worker ───────────────────────────────────────────────────

struct Worker {
    partition_id: PartitionId,
    clock: Arc<dyn Clock>,
    log: LogStream,
    reader: LogStreamReader,
    writer: LogStreamWriter,
    state: ProcessingState,
    appliers: EventAppliers,
    processes: Arc<ProcessRegistry>,
    record_processors: RecordProcessors,
    timer_checker: DueDateTimerChecker,
    config: ProcessorConfig,
    control_rx: mpsc::Receiver<ControlMessage>,
    phase: Phase,
    phase_tx: watch::Sender<Phase>,
    position_tx: watch::Sender<Position>,
    last_position: Position,
    log_closed: bool,
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl Worker {
    async fn run(mut self) {
        info!(partition = self.partition_id, "Stream processor starting");
        if let Err(e) = self.replay() {
            error!(partition = self.partition_id, error = %e, "Replay failed");
            self.set_phase(Phase::Failed);
        } else {
            self.set_phase(Phase::Processing);
        }

        let mut ticker = (self.config.timer_check_interval_ms > 0).then(|| {
            let mut interval = tokio::time::interval(self.config.timer_check_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let consuming = self.phase == Phase::Processing && !self.log_closed;
            tokio::select! {
                biased;

                message = self.control_rx.recv() => {
                    match message {
                        Some(ControlMessage::Close(ack)) => {
                            self.set_phase(Phase::Closed);
                            let _ = ack.send(());
                            break;
                        }
                        Some(message) => self.handle_control(message),
                        // every handle is gone
                        None => {
                            self.set_phase(Phase::Closed);
                            break;
                        }
                    }
                }
                record = self.reader.next_committed(), if consuming => {
                    match record {
                        Some(record) => self.process_record(record),
                        None => {
                            debug!(partition = self.partition_id, "Log closed");
                            self.log_closed = true;
                        }
                    }
                }
                _ = tick(&mut ticker), if consuming => {
                    self.check_due_timers();
                }
            }
        }
        info!(
            partition = self.partition_id,
            position = self.last_position,
            "Stream processor stopped"
        );
    }

    /// Rebuild state from the committed events and position the reader on
    /// the first command that has no follow-up records yet.
    fn replay(&mut self) -> Result<(), crate::error::ProcessingError> {
        let mut events = 0usize;
        let mut last_source: Position = 0;
        self.reader.seek_to_first();
        while let Some(record) = self.reader.next() {
            self.state.observe_key(record.key);
            if record.is_command() {
                continue;
            }
            last_source = last_source.max(record.source_record_position);
            if record.is_event() {
                self.appliers
                    .apply(&mut self.state, record.key, record.intent, &record.value)?;
                events += 1;
            }
        }

        self.reader.seek(last_source + 1);
        self.update_position(last_source);
        info!(
            partition = self.partition_id,
            events,
            last_processed = last_source,
            commit_position = self.log.commit_position(),
            "Replay finished"
        );
        Ok(())
    }

    fn handle_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::LastProcessedPosition(tx) => {
                let _ = tx.send(self.last_position);
            }
            ControlMessage::CheckDueTimers(tx) => {
                let written = if self.phase == Phase::Processing {
                    self.check_due_timers()
                } else {
                    0
                };
                let _ = tx.send(written);
            }
            ControlMessage::Inspect(f) => f(&self.state),
            ControlMessage::Close(tx) => {
                let _ = tx.send(());
            }
        }
    }

    fn check_due_timers(&mut self) -> usize {
        let written = self
            .timer_checker
            .check(&self.state, self.clock.now(), &self.writer);
        if written > 0 {
            debug!(partition = self.partition_id, written, "Triggered due timers");
        }
        written
    }

    fn process_record(&mut self, record: Record) {
        if record.is_command() {
            self.process_command(&record);
            if self.phase == Phase::Failed {
                return;
            }
        }
        self.update_position(record.position);
    }

    fn process_command(&mut self, command: &Record) {
        let checkpoint = self.state.clone();
        let mut ctx = ProcessingContext::new(
            &mut self.state,
            &self.appliers,
            &self.processes,
            self.clock.as_ref(),
        );
        let result = self.record_processors.process(command, &mut ctx);
        let entries = ctx.into_entries();

        let batch = match result {
            Ok(()) => entries,
            Err(CommandError::Rejected(rejection)) => {
                self.state = checkpoint.clone();
                debug!(
                    partition = self.partition_id,
                    position = command.position,
                    key = command.key,
                    intent = ?command.intent,
                    rejection_type = ?rejection.rejection_type,
                    reason = %rejection.reason,
                    "Command rejected"
                );
                vec![LogAppendEntry::rejection(
                    command,
                    rejection.rejection_type,
                    rejection.reason,
                )]
            }
            Err(CommandError::Processing(e)) => {
                self.state = checkpoint;
                self.fail(command, &e);
                return;
            }
        };
        if batch.is_empty() {
            return;
        }
        if let Err(e) = self.writer.try_write(batch, command.position) {
            self.state = checkpoint;
            self.fail(command, &e);
        }
    }

    fn fail(&mut self, command: &Record, e: &dyn std::error::Error) {
        error!(
            partition = self.partition_id,
            position = command.position,
            key = command.key,
            intent = ?command.intent,
            error = %e,
            "Failed to process command, stopping partition"
        );
        self.set_phase(Phase::Failed);
    }

    fn update_position(&mut self, position: Position) {
        self.last_position = position;
        self.log.set_processed_position(position);
        self.position_tx.send_replace(position);
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.phase_tx.send_replace(phase);
    }
}
