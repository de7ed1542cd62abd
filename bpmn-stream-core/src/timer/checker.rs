use crate::log::{LogAppendEntry, LogStreamWriter, WriteError};
use crate::record::TimerIntent;
use crate::state::ProcessingState;
use crate::types::{Key, Timestamp, NO_POSITION};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Writes a TRIGGER command for every timer that is due.
///
/// A timer is triggered at most once while it is open: the checker remembers
/// the timers it already wrote a command for until they disappear from state.
#[derive(Debug, Default)]
pub struct DueDateTimerChecker {
    in_flight: HashSet<Key>,
}

impl DueDateTimerChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of TRIGGER commands written.
    pub fn check(
        &mut self,
        state: &ProcessingState,
        now: Timestamp,
        writer: &LogStreamWriter,
    ) -> usize {
        self.in_flight.retain(|key| state.timer(*key).is_some());

        let mut written = 0;
        for (key, timer) in state.due_timers(now) {
            if self.in_flight.contains(&key) {
                continue;
            }
            let entry = LogAppendEntry::command(key, TimerIntent::Trigger, timer);
            match writer.try_write(vec![entry], NO_POSITION) {
                Ok(_) => {
                    self.in_flight.insert(key);
                    written += 1;
                }
                Err(WriteError::Backpressure { pending, limit }) => {
                    debug!(key, pending, limit, "Timer trigger deferred by backpressure");
                    break;
                }
                Err(e) => {
                    warn!(key, error = %e, "Failed to write timer trigger");
                    break;
                }
            }
        }
        written
    }

    /// Timers with a TRIGGER command written but not yet processed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
