//! `marketlog-core`: types, errors and configuration shared by every
//! marketlog crate.

pub mod config;
pub mod error;
pub mod types;

pub use error::{ConfigError, SourceError, StoreError, TaskError, VcsError};
pub use types::{ApiKeyPair, GitCredentials, LogRecord, RecordKind};
