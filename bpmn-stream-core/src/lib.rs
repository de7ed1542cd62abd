//! bpmn-stream-core
//!
//! Event-sourced BPMN process engine. Each partition is an append-only log
//! of commands and events; a single stream processor per partition consumes
//! the commands, applies the resulting events to in-memory state, and writes
//! them back to the log. State can always be rebuilt by replaying the events.

pub mod clock;
pub mod config;
pub mod error;
pub mod exporter;
pub mod log;
pub mod message;
pub mod model;
pub mod processing;
pub mod record;
pub mod state;
pub mod stream;
pub mod timer;
pub mod types;

pub use clock::{Clock, ControlledClock, SystemClock};
pub use config::EngineConfig;
pub use error::{CommandError, Failure, ProcessingError, Rejection, StepError};
pub use exporter::{Exporter, ExporterDirector, LoggingExporter, RecordingExporter};
pub use log::{LogAppendEntry, LogStream, LogStreamReader, LogStreamWriter, WriteError};
pub use model::{ExecutableProcess, ProcessRegistry};
pub use record::{log_digest, Intent, Record, RecordType, RecordValue};
pub use state::ProcessingState;
pub use stream::monitor::IdleStateMonitor;
pub use stream::{Phase, StreamProcessor, StreamProcessorHandle};
pub use types::{Key, PartitionId, Position, Timestamp, NO_KEY, NO_POSITION};
