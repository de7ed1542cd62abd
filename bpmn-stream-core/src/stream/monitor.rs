//! Idle/processing monitor
//!
//! Tells interested parties when a partition has gone quiet (the processor
//! caught up with the log and stayed caught up for a few checks) and when
//! work resumes (a new batch was committed). Listeners are one-shot.

use crate::config::MonitorConfig;
use crate::log::CommitListener;
use crate::types::Position;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::trace;

/// Whether a processor has handled everything committed to its log.
pub trait ProcessingProgress: Send + Sync {
    fn is_caught_up(&self) -> bool;
}

type Listener = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Listeners {
    idle: Vec<Listener>,
    processing: Vec<Listener>,
    consecutive_idle: u32,
    check_scheduled: bool,
    idle_flag: bool,
}

pub struct IdleStateMonitor {
    this: Weak<IdleStateMonitor>,
    progress: Arc<dyn ProcessingProgress>,
    grace_period: Duration,
    idle_threshold: u32,
    runtime: Handle,
    listeners: Mutex<Listeners>,
}

impl IdleStateMonitor {
    /// Must be called from within a tokio runtime; the check loop runs on it.
    pub fn new(progress: Arc<dyn ProcessingProgress>, config: &MonitorConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            progress,
            grace_period: config.grace_period(),
            idle_threshold: config.idle_threshold.max(1),
            runtime: Handle::current(),
            listeners: Mutex::new(Listeners::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether the last check loop ended idle and nothing was committed since.
    pub fn is_idle(&self) -> bool {
        self.lock().idle_flag
    }

    /// Run `listener` once the partition is idle.
    pub fn on_idle(&self, listener: impl FnOnce() + Send + 'static) {
        self.lock().idle.push(Box::new(listener));
        self.schedule_check();
    }

    /// Run `listener` on the next commit.
    pub fn on_processing(&self, listener: impl FnOnce() + Send + 'static) {
        self.lock().processing.push(Box::new(listener));
    }

    pub async fn wait_for_idle(&self) {
        let (tx, rx) = oneshot::channel();
        self.on_idle(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }

    fn schedule_check(&self) {
        let Some(monitor) = self.this.upgrade() else {
            return;
        };
        {
            let mut listeners = self.lock();
            if listeners.check_scheduled {
                return;
            }
            listeners.check_scheduled = true;
        }
        self.runtime.spawn(async move { monitor.check_loop().await });
    }

    async fn check_loop(&self) {
        loop {
            tokio::time::sleep(self.grace_period).await;
            let caught_up = self.progress.is_caught_up();

            let fired = {
                let mut listeners = self.lock();
                if !caught_up {
                    listeners.consecutive_idle = 0;
                    None
                } else {
                    listeners.consecutive_idle += 1;
                    if listeners.consecutive_idle >= self.idle_threshold {
                        listeners.consecutive_idle = 0;
                        listeners.check_scheduled = false;
                        listeners.idle_flag = true;
                        Some(std::mem::take(&mut listeners.idle))
                    } else {
                        None
                    }
                }
            };
            trace!(caught_up, "Idle check");

            if let Some(idle) = fired {
                for listener in idle {
                    listener();
                }
                return;
            }
        }
    }
}

impl CommitListener for IdleStateMonitor {
    fn on_commit(&self, _commit_position: Position) {
        let processing = {
            let mut listeners = self.lock();
            listeners.consecutive_idle = 0;
            listeners.idle_flag = false;
            std::mem::take(&mut listeners.processing)
        };
        for listener in processing {
            listener();
        }
        self.schedule_check();
    }
}
