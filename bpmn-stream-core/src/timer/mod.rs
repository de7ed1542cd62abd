//! Timer events
//!
//! Timers are created as subscriptions of waiting elements, fired by the
//! [`DueDateTimerChecker`] writing TRIGGER commands, and canceled when the
//! element stops waiting.

mod checker;
pub mod expression;
mod processors;

pub use checker::DueDateTimerChecker;
pub use expression::{TimerExpression, TimerExpressionError, TimerSchedule};
pub use processors::{TimerCancelProcessor, TimerCreateProcessor, TimerTriggerProcessor};
