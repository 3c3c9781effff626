//! `marketlog-publisher`: periodic commit of the report log.
//!
//! [`SnapshotPublisher`] is a scheduled [`Task`](marketlog_scheduler::Task):
//! it snapshots the log store, commits the snapshot through a
//! [`VersionControl`] backend when its content changed, and pushes the
//! history when credentials are configured. [`GitCli`] is the backend used in
//! production; it drives the `git` executable.

pub mod git;
pub mod publisher;
pub mod vcs;

pub use git::GitCli;
pub use publisher::{PublisherOptions, SnapshotPublisher};
pub use vcs::{CommitOutcome, Signature, VersionControl};
