// src/schedule.rs

//! Scheduler variants producing the next invocation time of a job.
//!
//! A scheduler is a pure function of the job's last scheduled time and the
//! current clock reading. It keeps no timers and has no side effects.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, Utc};

/// Policy producing the next scheduled time for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheduler {
    /// Run again immediately, every time the previous run has finished.
    Constant,
    /// Run once a day at the given UTC time of day.
    Daily { at: NaiveTime },
    /// Run every `every` after the previous scheduled time.
    Interval { every: Duration },
}

impl Scheduler {
    pub fn daily() -> Self {
        Scheduler::Daily {
            at: NaiveTime::MIN,
        }
    }

    /// Compute the next scheduled time.
    ///
    /// `last` is the scheduled time of the job's newest run, if any.
    pub fn next_run(
        &self,
        last: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Scheduler::Constant => Some(now),
            Scheduler::Daily { at } => match last {
                Some(last) => next_daily_after(last, *at, false),
                None => next_daily_after(now, *at, true),
            },
            Scheduler::Interval { every } => {
                let every = chrono::Duration::from_std(*every).ok()?;
                match last {
                    Some(last) => last.checked_add_signed(every),
                    None => Some(now),
                }
            }
        }
    }

    /// Constant jobs only get a new run once nothing is left unfinished.
    pub fn waits_for_completion(&self) -> bool {
        matches!(self, Scheduler::Constant)
    }
}

/// Next instant at time-of-day `at` after `reference`. With `inclusive`, an
/// occurrence exactly at `reference` counts.
fn next_daily_after(
    reference: DateTime<Utc>,
    at: NaiveTime,
    inclusive: bool,
) -> Option<DateTime<Utc>> {
    let candidate = reference.date_naive().and_time(at).and_utc();
    let upcoming = if inclusive {
        candidate >= reference
    } else {
        candidate > reference
    };
    if upcoming {
        Some(candidate)
    } else {
        candidate.checked_add_days(Days::new(1))
    }
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheduler::Constant => write!(f, "constant"),
            Scheduler::Daily { at } => write!(f, "daily {}", at.format("%H:%M:%S")),
            Scheduler::Interval { every } => write!(f, "interval {}s", every.as_secs()),
        }
    }
}

/// Parses `"constant"`, `"daily"`, `"daily 04:30"`, `"interval 90s"`.
impl FromStr for Scheduler {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let kind = parts
            .next()
            .ok_or_else(|| "empty schedule".to_string())?
            .to_lowercase();
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(format!("too many arguments in schedule '{s}'"));
        }

        match (kind.as_str(), arg) {
            ("constant", None) => Ok(Scheduler::Constant),
            ("daily", None) => Ok(Scheduler::daily()),
            ("daily", Some(time)) => {
                let at = NaiveTime::parse_from_str(time, "%H:%M:%S")
                    .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
                    .map_err(|e| format!("invalid daily time '{time}': {e}"))?;
                Ok(Scheduler::Daily { at })
            }
            ("interval", Some(dur)) => {
                let every = parse_duration(dur)?;
                if every.is_zero() {
                    return Err("interval must be greater than zero".to_string());
                }
                Ok(Scheduler::Interval { every })
            }
            ("interval", None) => Err("interval schedule needs a duration".to_string()),
            (other, _) => Err(format!(
                "unknown schedule '{other}' (expected constant, daily or interval)"
            )),
        }
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`, `"1d"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        "d" => Ok(Duration::from_secs(value * 60 * 60 * 24)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, h or d",
            unit
        )),
    }
}
