use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use marketlog_core::config::parse_hhmm;
use marketlog_core::TaskError;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{Result, SchedulerError};

/// Longest accepted interval: one leap year.
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;

/// Defines how often a job becomes due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cadence {
    /// Fire every `every_secs` seconds, measured from the previous dispatch.
    Interval { every_secs: u64 },

    /// Fire once per calendar day at HH:MM in the scheduler's local time zone.
    DailyAt { hour: u8, minute: u8 },
}

impl Cadence {
    pub fn every(period: Duration) -> Self {
        Cadence::Interval {
            every_secs: period.as_secs(),
        }
    }

    pub fn every_mins(mins: u64) -> Self {
        Cadence::Interval {
            // Overflow saturates; validate() rejects the result.
            every_secs: mins.saturating_mul(60),
        }
    }

    pub fn daily_at(hour: u8, minute: u8) -> Self {
        Cadence::DailyAt { hour, minute }
    }

    /// Parse a "HH:MM" wall-clock time into a `DailyAt` cadence.
    pub fn parse_daily(at: &str) -> Result<Self> {
        let (hour, minute) = parse_hhmm(at)
            .ok_or_else(|| SchedulerError::InvalidCadence(format!("expected HH:MM, got {at:?}")))?;
        Ok(Cadence::DailyAt { hour, minute })
    }

    /// Reject zero or over-long intervals and impossible wall-clock times.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Cadence::Interval { every_secs: 0 } => Err(SchedulerError::InvalidCadence(
                "interval must be at least one second".into(),
            )),
            Cadence::Interval { every_secs } if every_secs > MAX_INTERVAL_SECS => {
                Err(SchedulerError::InvalidCadence(format!(
                    "interval of {every_secs}s exceeds the {MAX_INTERVAL_SECS}s maximum"
                )))
            }
            Cadence::DailyAt { hour, minute } if hour > 23 || minute > 59 => {
                Err(SchedulerError::InvalidCadence(format!(
                    "{hour:02}:{minute:02} is not a 24-hour wall-clock time"
                )))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Interval { every_secs } => write!(f, "every {every_secs}s"),
            Cadence::DailyAt { hour, minute } => write!(f, "daily at {hour:02}:{minute:02}"),
        }
    }
}

/// A unit of recurring work.
///
/// Returns the number of items it handled (records appended, commits made)
/// for logging. Errors are recorded against the job and never reach other jobs.
#[async_trait]
pub trait Task: Send + Sync {
    async fn execute(&self, ctx: &TaskContext) -> std::result::Result<usize, TaskError>;
}

/// Per-execution information handed to [`Task::execute`].
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub job: String,
    /// Dispatch time of this run.
    pub fired_at: DateTime<Local>,
    /// UUIDv7, unique per run, for log correlation.
    pub run_id: Uuid,
    shutdown: watch::Receiver<bool>,
}

impl TaskContext {
    pub(crate) fn new(job: &str, fired_at: DateTime<Local>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            job: job.to_string(),
            fired_at,
            run_id: Uuid::now_v7(),
            shutdown,
        }
    }

    /// Context for running a task outside a scheduler (manual runs, tests).
    pub fn detached(job: &str) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(job, Local::now(), rx)
    }

    /// True once the scheduler has been asked to stop. Tasks may check this
    /// between steps; the scheduler never cancels a run itself.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Registration record for one job. Immutable once registered.
#[derive(Clone)]
pub struct JobSpec {
    pub name: String,
    pub cadence: Cadence,
    pub task: Arc<dyn Task>,
    pub enabled: bool,
    /// Fire at startup instead of waiting one full cadence.
    pub run_on_start: bool,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, cadence: Cadence, task: Arc<dyn Task>) -> Self {
        Self {
            name: name.into(),
            cadence,
            task,
            enabled: true,
            run_on_start: true,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }
}

impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("name", &self.name)
            .field("cadence", &self.cadence)
            .field("enabled", &self.enabled)
            .field("run_on_start", &self.run_on_start)
            .finish_non_exhaustive()
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its next fire time.
    Idle,
    /// An execution is in flight.
    Running,
    /// Registered with `enabled = false`; never fires.
    Disabled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

/// Read-only view of a job's execution state, for operational tooling.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub name: String,
    pub cadence: Cadence,
    pub status: JobStatus,
    pub last_fired: Option<DateTime<Local>>,
    pub next_fire: Option<DateTime<Local>>,
    /// Reset to zero by the next successful run.
    pub consecutive_failures: u32,
    pub total_runs: u64,
    pub total_failures: u64,
    /// Ticks skipped because the previous run was still in flight.
    pub dropped_ticks: u64,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_daily_accepts_wall_clock_times() {
        assert_eq!(
            Cadence::parse_daily("23:59").unwrap(),
            Cadence::daily_at(23, 59)
        );
        assert_eq!(Cadence::parse_daily("9:05").unwrap(), Cadence::daily_at(9, 5));
    }

    #[test]
    fn parse_daily_rejects_garbage() {
        for bad in ["24:00", "12:60", "noon", "12", "-1:00", ""] {
            assert!(Cadence::parse_daily(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn validate_rejects_zero_interval() {
        assert!(Cadence::Interval { every_secs: 0 }.validate().is_err());
        assert!(Cadence::every_mins(10).validate().is_ok());
    }

    #[test]
    fn validate_rejects_interval_longer_than_a_year() {
        assert!(Cadence::every(Duration::from_secs(MAX_INTERVAL_SECS)).validate().is_ok());
        assert!(Cadence::every_mins(200_000_000_000).validate().is_err());
        assert_eq!(
            Cadence::every_mins(u64::MAX),
            Cadence::Interval { every_secs: u64::MAX }
        );
    }

    #[test]
    fn cadence_serde_shape() {
        let json = serde_json::to_string(&Cadence::daily_at(9, 5)).unwrap();
        assert_eq!(json, r#"{"kind":"daily_at","hour":9,"minute":5}"#);
        let back: Cadence = serde_json::from_str(r#"{"kind":"interval","every_secs":600}"#).unwrap();
        assert_eq!(back, Cadence::every_mins(10));
    }

    #[test]
    fn cadence_display() {
        assert_eq!(Cadence::every_mins(10).to_string(), "every 600s");
        assert_eq!(Cadence::daily_at(9, 5).to_string(), "daily at 09:05");
    }

    #[test]
    fn detached_context_is_not_shutting_down() {
        let ctx = TaskContext::detached("manual");
        assert_eq!(ctx.job, "manual");
        assert!(!ctx.is_shutting_down());
    }
}
