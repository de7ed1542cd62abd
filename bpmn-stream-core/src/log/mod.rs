//! Partition log
//!
//! Append-only, in-memory sequence of [`Record`]s. A batch is committed
//! atomically when it is appended; readers see committed records in strict
//! position order and can suspend until more records are committed.

mod reader;
mod writer;

pub use reader::LogStreamReader;
pub use writer::{LogAppendEntry, LogStreamWriter, WriteError};

use crate::clock::Clock;
use crate::config::LogConfig;
use crate::record::Record;
use crate::types::{PartitionId, Position};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock, TryLockError};
use tokio::sync::watch;

/// Notified after committed batches, outside of the log's locks. Positions
/// only ever increase; batches committed concurrently may be announced
/// together under the highest position.
pub trait CommitListener: Send + Sync {
    fn on_commit(&self, commit_position: Position);
}

/// Handle to one partition's log. Cheap to clone.
#[derive(Clone)]
pub struct LogStream {
    inner: Arc<LogInner>,
}

pub(crate) struct LogInner {
    pub(crate) partition_id: PartitionId,
    pub(crate) config: LogConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) records: RwLock<Vec<Record>>,
    pub(crate) commit_tx: watch::Sender<Position>,
    /// Last position read and handled by the stream processor.
    pub(crate) processed_position: AtomicI64,
    pub(crate) closed: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn CommitListener>>>,
    /// Last position handed to the listeners. Held while they run.
    announced: Mutex<Position>,
    announce_pending: AtomicBool,
}

impl LogStream {
    pub fn new(partition_id: PartitionId, config: LogConfig, clock: Arc<dyn Clock>) -> Self {
        let (commit_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(LogInner {
                partition_id,
                config,
                clock,
                records: RwLock::new(Vec::new()),
                commit_tx,
                processed_position: AtomicI64::new(0),
                closed: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
                announced: Mutex::new(0),
                announce_pending: AtomicBool::new(false),
            }),
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.inner.partition_id
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }

    pub fn new_writer(&self) -> LogStreamWriter {
        LogStreamWriter::new(self.inner.clone())
    }

    pub fn new_reader(&self) -> LogStreamReader {
        LogStreamReader::new(self.inner.clone())
    }

    /// Position of the last committed record (0 for an empty log).
    pub fn commit_position(&self) -> Position {
        *self.inner.commit_tx.borrow()
    }

    /// Subscribe to commit position changes.
    pub fn subscribe_commits(&self) -> watch::Receiver<Position> {
        self.inner.commit_tx.subscribe()
    }

    pub fn processed_position(&self) -> Position {
        self.inner.processed_position.load(Ordering::SeqCst)
    }

    /// Called by the stream processor after it handled `position`.
    pub fn set_processed_position(&self, position: Position) {
        self.inner
            .processed_position
            .fetch_max(position, Ordering::SeqCst);
    }

    pub fn register_commit_listener(&self, listener: Arc<dyn CommitListener>) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    /// Copy of all committed records.
    pub fn records(&self) -> Vec<Record> {
        self.inner
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Reject further writes and wake suspended readers.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.commit_tx.send_modify(|_| {});
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl LogInner {
    /// Publish `commit_position`. Must be called with the records lock held
    /// so the position never moves backwards.
    pub(crate) fn publish_commit(&self, commit_position: Position) {
        self.commit_tx.send_if_modified(|current| {
            if commit_position > *current {
                *current = commit_position;
                true
            } else {
                false
            }
        });
    }

    /// Hand the latest commit position to the listeners. Called after the
    /// records lock is released. One thread announces at a time; a writer
    /// that finds the gate taken leaves its commit to the current holder.
    pub(crate) fn notify_listeners(&self) {
        self.announce_pending.store(true, Ordering::SeqCst);
        loop {
            let mut announced = match self.announced.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            while self.announce_pending.swap(false, Ordering::SeqCst) {
                let commit_position = *self.commit_tx.borrow();
                if commit_position <= *announced {
                    continue;
                }
                *announced = commit_position;
                let listeners: Vec<Arc<dyn CommitListener>> = self
                    .listeners
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clone();
                for listener in listeners {
                    listener.on_commit(commit_position);
                }
            }
            drop(announced);
            // a writer may have given up on the gate after our last swap
            if !self.announce_pending.load(Ordering::SeqCst) {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ControlledClock;
    use crate::record::*;
    use crate::types::NO_POSITION;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn log(limit: i64) -> (LogStream, ControlledClock) {
        let clock = ControlledClock::new(5_000);
        let log = LogStream::new(
            1,
            LogConfig {
                backpressure_limit: limit,
            },
            Arc::new(clock.clone()),
        );
        (log, clock)
    }

    fn create_command(process: &str) -> LogAppendEntry {
        LogAppendEntry::command(
            -1,
            ProcessInstanceCreationIntent::Create,
            ProcessInstanceCreationRecord {
                bpmn_process_id: process.into(),
                process_instance_key: -1,
                variables: Variables::new(),
            },
        )
    }

    #[test]
    fn test_append_assigns_contiguous_positions() {
        let (log, clock) = log(100);
        let writer = log.new_writer();
        let first = writer
            .try_write(vec![create_command("a")], NO_POSITION)
            .unwrap();
        clock.advance(Duration::from_millis(10));
        let last = writer
            .try_write(vec![create_command("b"), create_command("c")], NO_POSITION)
            .unwrap();
        assert_eq!(first, 1);
        assert_eq!(last, 3);
        assert_eq!(log.commit_position(), 3);

        let records = log.records();
        assert_eq!(
            records.iter().map(|r| r.position).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(records[0].timestamp, 5_000);
        assert_eq!(records[2].timestamp, 5_010);
        assert!(records.iter().all(|r| r.partition_id == 1));
    }

    #[test]
    fn test_client_writes_fail_fast_under_backpressure() {
        let (log, _) = log(2);
        let writer = log.new_writer();
        writer
            .try_write(vec![create_command("a"), create_command("b")], NO_POSITION)
            .unwrap();
        let err = writer
            .try_write(vec![create_command("c")], NO_POSITION)
            .unwrap_err();
        assert!(matches!(err, WriteError::Backpressure { .. }));

        // processor follow-ups are never backpressured
        writer.try_write(vec![create_command("d")], 1).unwrap();

        log.set_processed_position(3);
        writer
            .try_write(vec![create_command("e")], NO_POSITION)
            .unwrap();
    }

    #[test]
    fn test_empty_batch_and_closed_log_rejected() {
        let (log, _) = log(10);
        let writer = log.new_writer();
        assert!(matches!(
            writer.try_write(vec![], NO_POSITION),
            Err(WriteError::EmptyBatch)
        ));
        log.close();
        assert!(matches!(
            writer.try_write(vec![create_command("a")], NO_POSITION),
            Err(WriteError::Closed)
        ));
    }

    struct CountingListener(AtomicUsize);

    impl CommitListener for CountingListener {
        fn on_commit(&self, _commit_position: Position) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_commit_listeners_notified_per_batch() {
        let (log, _) = log(10);
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        log.register_commit_listener(listener.clone());
        let writer = log.new_writer();
        writer
            .try_write(vec![create_command("a"), create_command("b")], NO_POSITION)
            .unwrap();
        writer
            .try_write(vec![create_command("c")], NO_POSITION)
            .unwrap();
        assert_eq!(listener.0.load(Ordering::SeqCst), 2);
    }

    #[derive(Default)]
    struct OrderCheckingListener {
        last: Mutex<Position>,
        out_of_order: AtomicUsize,
    }

    impl CommitListener for OrderCheckingListener {
        fn on_commit(&self, commit_position: Position) {
            let mut last = self.last.lock().unwrap();
            if commit_position <= *last {
                self.out_of_order.fetch_add(1, Ordering::SeqCst);
            }
            *last = commit_position;
        }
    }

    #[test]
    fn test_concurrent_commits_are_announced_in_order() {
        for _ in 0..20 {
            let (log, _) = log(i64::MAX);
            let listener = Arc::new(OrderCheckingListener::default());
            log.register_commit_listener(listener.clone());
            let mut commits = log.subscribe_commits();

            let writers: Vec<_> = (0..4)
                .map(|_| {
                    let writer = log.new_writer();
                    std::thread::spawn(move || {
                        for _ in 0..200 {
                            writer.try_write(vec![create_command("a")], 1).unwrap();
                        }
                    })
                })
                .collect();
            let mut seen = 0;
            while seen < 800 {
                let position = *commits.borrow_and_update();
                assert!(position >= seen, "commit position went back to {position}");
                seen = position;
                std::thread::yield_now();
            }
            for writer in writers {
                writer.join().unwrap();
            }

            assert_eq!(listener.out_of_order.load(Ordering::SeqCst), 0);
            assert_eq!(*listener.last.lock().unwrap(), 800);
            assert_eq!(log.commit_position(), 800);
        }
    }
}
