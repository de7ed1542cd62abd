//! ISO-8601 timer expressions: durations (`PT1S`, `P1DT2H`, `-PT5S`) and
//! repeating cycles (`R3/PT10S`, `R/PT1H`).

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimerExpressionError {
    #[error("Empty timer expression")]
    Empty,

    #[error("Invalid duration '{0}'")]
    InvalidDuration(String),

    #[error("Unsupported duration component '{component}' in '{expression}'")]
    UnsupportedComponent { component: char, expression: String },

    #[error("Invalid repetition '{0}', expected R<n> or R")]
    InvalidRepetition(String),

    #[error("Cycle '{0}' must repeat at least once")]
    ZeroRepetitions(String),
}

/// A parsed timer definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerExpression {
    /// Fires once, `duration_ms` after activation. May be zero or negative.
    Duration { duration_ms: i64 },
    /// Fires every `interval_ms`; `repetitions` total firings, `None` unbounded.
    Cycle {
        repetitions: Option<u32>,
        interval_ms: i64,
    },
}

/// The first occurrence of a timer, as stored on the timer record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerSchedule {
    pub due_date: Timestamp,
    /// Further occurrences after the first: `-1` unbounded.
    pub repetitions: i32,
    pub interval_ms: i64,
}

impl TimerExpression {
    pub fn parse(expression: &str) -> Result<Self, TimerExpressionError> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(TimerExpressionError::Empty);
        }

        let Some(rest) = expression.strip_prefix('R') else {
            return Ok(TimerExpression::Duration {
                duration_ms: parse_duration_ms(expression)?,
            });
        };

        let (count, duration) = rest
            .split_once('/')
            .ok_or_else(|| TimerExpressionError::InvalidRepetition(expression.to_string()))?;
        if duration.contains('/') {
            // R<n>/<start>/<duration> with an explicit start date
            return Err(TimerExpressionError::InvalidRepetition(
                expression.to_string(),
            ));
        }

        let repetitions = if count.is_empty() {
            None
        } else {
            let n: u32 = count
                .parse()
                .map_err(|_| TimerExpressionError::InvalidRepetition(expression.to_string()))?;
            if n == 0 {
                return Err(TimerExpressionError::ZeroRepetitions(
                    expression.to_string(),
                ));
            }
            Some(n)
        };

        Ok(TimerExpression::Cycle {
            repetitions,
            interval_ms: parse_duration_ms(duration)?,
        })
    }

    /// Schedule relative to `now`.
    pub fn schedule(&self, now: Timestamp) -> TimerSchedule {
        match *self {
            TimerExpression::Duration { duration_ms } => TimerSchedule {
                due_date: now.saturating_add(duration_ms),
                repetitions: 0,
                interval_ms: 0,
            },
            TimerExpression::Cycle {
                repetitions,
                interval_ms,
            } => TimerSchedule {
                due_date: now.saturating_add(interval_ms),
                repetitions: repetitions
                    .map(|n| (n - 1).min(i32::MAX as u32) as i32)
                    .unwrap_or(-1),
                interval_ms,
            },
        }
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self, TimerExpression::Cycle { .. })
    }
}

impl FromStr for TimerExpression {
    type Err = TimerExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TimerExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerExpression::Duration { duration_ms } => write!(f, "{}", format_ms(*duration_ms)),
            TimerExpression::Cycle {
                repetitions,
                interval_ms,
            } => match repetitions {
                Some(n) => write!(f, "R{n}/{}", format_ms(*interval_ms)),
                None => write!(f, "R/{}", format_ms(*interval_ms)),
            },
        }
    }
}

fn format_ms(ms: i64) -> String {
    let sign = if ms < 0 { "-" } else { "" };
    let abs = ms.unsigned_abs();
    if abs % 1000 == 0 {
        format!("{sign}PT{}S", abs / 1000)
    } else {
        format!("{sign}PT{}.{:03}S", abs / 1000, abs % 1000)
    }
}

const MS_PER_SECOND: f64 = 1_000.0;
const MS_PER_MINUTE: f64 = 60.0 * MS_PER_SECOND;
const MS_PER_HOUR: f64 = 60.0 * MS_PER_MINUTE;
const MS_PER_DAY: f64 = 24.0 * MS_PER_HOUR;
const MS_PER_WEEK: f64 = 7.0 * MS_PER_DAY;

/// Parse `[-]P[nW][nD][T[nH][nM][n[.f]S]]` into milliseconds.
fn parse_duration_ms(expression: &str) -> Result<i64, TimerExpressionError> {
    let invalid = || TimerExpressionError::InvalidDuration(expression.to_string());

    let (negative, body) = match expression.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, expression),
    };
    let body = body.strip_prefix('P').ok_or_else(invalid)?;
    if body.is_empty() {
        return Err(invalid());
    }

    let (date_part, time_part) = match body.split_once('T') {
        Some((date, time)) => {
            if time.is_empty() {
                return Err(invalid());
            }
            (date, Some(time))
        }
        None => (body, None),
    };

    let mut total = 0.0_f64;
    total += sum_components(date_part, expression, |unit| match unit {
        'W' => Some(MS_PER_WEEK),
        'D' => Some(MS_PER_DAY),
        _ => None,
    })?;
    if let Some(time) = time_part {
        total += sum_components(time, expression, |unit| match unit {
            'H' => Some(MS_PER_HOUR),
            'M' => Some(MS_PER_MINUTE),
            'S' => Some(MS_PER_SECOND),
            _ => None,
        })?;
    }

    let ms = total.round() as i64;
    Ok(if negative { -ms } else { ms })
}

fn sum_components(
    part: &str,
    expression: &str,
    unit_ms: impl Fn(char) -> Option<f64>,
) -> Result<f64, TimerExpressionError> {
    let mut total = 0.0;
    let mut number = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            number.push(if c == ',' { '.' } else { c });
            continue;
        }
        let factor = unit_ms(c).ok_or_else(|| TimerExpressionError::UnsupportedComponent {
            component: c,
            expression: expression.to_string(),
        })?;
        let value: f64 = number
            .parse()
            .map_err(|_| TimerExpressionError::InvalidDuration(expression.to_string()))?;
        total += value * factor;
        number.clear();
    }
    if !number.is_empty() {
        return Err(TimerExpressionError::InvalidDuration(
            expression.to_string(),
        ));
    }
    Ok(total)
}
