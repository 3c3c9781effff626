use thiserror::Error;

/// Errors raised while building a scheduler. Job execution failures are not
/// errors of the scheduler; they are recorded per job.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The provided cadence definition is invalid.
    #[error("Invalid cadence: {0}")]
    InvalidCadence(String),

    /// A job with this name is already registered.
    #[error("Duplicate job name: {name}")]
    DuplicateJob { name: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
