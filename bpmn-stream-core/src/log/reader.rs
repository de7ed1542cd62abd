use super::LogInner;
use crate::record::Record;
use crate::types::Position;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;

/// Restartable cursor over the committed records of a log.
///
/// Iterating never blocks and ends at the commit position; use
/// [`LogStreamReader::next_committed`] to suspend until more records arrive.
pub struct LogStreamReader {
    inner: Arc<LogInner>,
    commit_rx: watch::Receiver<Position>,
    next_position: Position,
}

impl LogStreamReader {
    pub(super) fn new(inner: Arc<LogInner>) -> Self {
        let commit_rx = inner.commit_tx.subscribe();
        Self {
            inner,
            commit_rx,
            next_position: 1,
        }
    }

    /// Position of the record the next read returns.
    pub fn next_position(&self) -> Position {
        self.next_position
    }

    pub fn seek(&mut self, position: Position) {
        self.next_position = position.max(1);
    }

    pub fn seek_to_first(&mut self) {
        self.next_position = 1;
    }

    pub fn has_next(&self) -> bool {
        self.next_position <= *self.inner.commit_tx.borrow()
    }

    /// Wait for the next committed record. Returns `None` once the log is
    /// closed and fully read.
    pub async fn next_committed(&mut self) -> Option<Record> {
        loop {
            // mark the current version seen before checking, so a commit
            // racing with the check still wakes us
            self.commit_rx.borrow_and_update();
            if let Some(record) = self.next() {
                return Some(record);
            }
            if self.inner.closed.load(Ordering::SeqCst) {
                return None;
            }
            if self.commit_rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

impl Iterator for LogStreamReader {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        let records = self
            .inner
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let record = records.get((self.next_position - 1) as usize)?.clone();
        self.next_position += 1;
        Some(record)
    }
}
