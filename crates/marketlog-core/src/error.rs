use thiserror::Error;

/// An external data-source fetch failed.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Fetch timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The source cannot serve this kind of query.
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// Log store read/write failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A complete line in the log could not be decoded.
    #[error("Corrupt entry at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

/// Version-control commit or push failure.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("Version control operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a scheduled task can report back to the scheduler.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    /// The task panicked; the scheduler caught it and treats it as a failure.
    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Short classification used as a structured log field.
    pub fn code(&self) -> &'static str {
        match self {
            TaskError::Source(SourceError::Timeout { .. }) => "SOURCE_TIMEOUT",
            TaskError::Source(_) => "SOURCE_ERROR",
            TaskError::Store(_) => "IO_ERROR",
            TaskError::Vcs(VcsError::Timeout { .. }) => "VCS_TIMEOUT",
            TaskError::Vcs(_) => "VCS_ERROR",
            TaskError::Panicked(_) => "PANICKED",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
