use async_trait::async_trait;
use chrono::{DateTime, Local};
use marketlog_core::{GitCredentials, VcsError};
use marketlog_store::Snapshot;

/// Author and committer identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new commit was created; carries its id.
    Committed(String),
    /// The tracked content already matches the head commit.
    Unchanged,
}

/// History backend for snapshot publishing.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Record exactly `snapshot`'s bytes as the new content of the tracked file.
    async fn commit(
        &self,
        snapshot: &Snapshot,
        message: &str,
        author: &Signature,
        when: DateTime<Local>,
    ) -> Result<CommitOutcome, VcsError>;

    /// Push local history to `remote`.
    async fn push(&self, remote: &str, credentials: &GitCredentials) -> Result<(), VcsError>;
}
