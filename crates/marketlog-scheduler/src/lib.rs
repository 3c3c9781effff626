//! `marketlog-scheduler`: multi-cadence job scheduler.
//!
//! # Overview
//!
//! Jobs are registered once at startup as [`JobSpec`]s. [`Scheduler::run`]
//! wakes every tick (1 s by default), dispatches every job whose next fire
//! time has passed onto its own Tokio task, and never waits on a job itself.
//! A job whose previous run is still in flight skips that tick; two runs of
//! the same job never overlap. Different jobs run in parallel.
//!
//! # Cadence variants
//!
//! | Variant    | Behaviour                                          |
//! |------------|----------------------------------------------------|
//! | `Interval` | Repeat every N seconds, measured from each dispatch |
//! | `DailyAt`  | Fire at HH:MM local time every day                 |

pub mod clock;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod types;

pub use clock::{Clock, SystemClock, TokioClock};
pub use engine::{Scheduler, SchedulerHandle, SchedulerOptions};
pub use error::{Result, SchedulerError};
pub use types::{Cadence, JobSnapshot, MAX_INTERVAL_SECS, JobSpec, JobStatus, Task, TaskContext};
