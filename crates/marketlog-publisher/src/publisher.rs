use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use marketlog_core::{GitCredentials, TaskError};
use marketlog_scheduler::{Task, TaskContext};
use marketlog_store::LogStore;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::vcs::{CommitOutcome, Signature, VersionControl};

#[derive(Debug, Clone)]
pub struct PublisherOptions {
    pub remote: String,
    pub author: Signature,
    /// No credentials: commits stay local.
    pub credentials: Option<GitCredentials>,
    pub push_timeout: Duration,
}

#[derive(Debug)]
struct PublishState {
    /// Fingerprint of the last snapshot the history is known to contain.
    last_fingerprint: Option<String>,
    pending_push: bool,
}

/// Commits the report log whenever its content changed and pushes it.
pub struct SnapshotPublisher {
    store: Arc<LogStore>,
    vcs: Arc<dyn VersionControl>,
    options: PublisherOptions,
    state: Mutex<PublishState>,
}

impl SnapshotPublisher {
    pub fn new(store: Arc<LogStore>, vcs: Arc<dyn VersionControl>, options: PublisherOptions) -> Self {
        Self {
            store,
            vcs,
            options,
            // Commits from an earlier process may not have reached the remote.
            state: Mutex::new(PublishState {
                last_fingerprint: None,
                pending_push: true,
            }),
        }
    }

    fn message(&self, records: usize) -> String {
        let file = self
            .store
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report log".to_string());
        format!("Update {file} ({records} records)")
    }

    async fn push(&self, state: &mut PublishState, ctx: &TaskContext) {
        let Some(credentials) = &self.options.credentials else {
            debug!(job = %ctx.job, "no git credentials; history stays local");
            return;
        };
        let remote = &self.options.remote;
        match tokio::time::timeout(self.options.push_timeout, self.vcs.push(remote, credentials)).await {
            Ok(Ok(())) => {
                state.pending_push = false;
                info!(job = %ctx.job, %remote, "snapshot pushed");
            }
            Ok(Err(e)) => warn!(job = %ctx.job, %remote, "push failed, will retry next cycle: {e}"),
            Err(_) => warn!(
                job = %ctx.job,
                %remote,
                timeout_ms = self.options.push_timeout.as_millis() as u64,
                "push timed out, will retry next cycle"
            ),
        }
    }
}

#[async_trait]
impl Task for SnapshotPublisher {
    async fn execute(&self, ctx: &TaskContext) -> Result<usize, TaskError> {
        let snapshot = self.store.snapshot().await?;
        let mut state = self.state.lock().await;

        let mut committed = 0;
        if snapshot.is_empty() {
            debug!(job = %ctx.job, "report log is empty; nothing to commit");
        } else if state.last_fingerprint.as_deref() == Some(snapshot.fingerprint()) {
            debug!(job = %ctx.job, "snapshot unchanged since last commit");
        } else {
            let records = snapshot.record_count();
            let outcome = self
                .vcs
                .commit(&snapshot, &self.message(records), &self.options.author, ctx.fired_at)
                .await?;
            match outcome {
                CommitOutcome::Committed(id) => {
                    info!(job = %ctx.job, commit = %id, records, "snapshot committed");
                    state.pending_push = true;
                    committed = records;
                }
                CommitOutcome::Unchanged => {
                    debug!(job = %ctx.job, "history already holds this snapshot");
                }
            }
            state.last_fingerprint = Some(snapshot.fingerprint().to_string());
        }

        if state.pending_push {
            if ctx.is_shutting_down() {
                info!(job = %ctx.job, "shutting down; push deferred to next start");
            } else {
                self.push(&mut state, ctx).await;
            }
        }
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Local};
    use marketlog_core::{LogRecord, RecordKind, VcsError};
    use marketlog_store::Snapshot;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeVcs {
        commits: std::sync::Mutex<Vec<(String, Vec<u8>)>>,
        head: std::sync::Mutex<Option<String>>,
        pushes: AtomicUsize,
        fail_commit: AtomicBool,
        fail_push: AtomicBool,
        push_delay: Option<Duration>,
    }

    impl FakeVcs {
        fn committed(&self) -> Vec<(String, Vec<u8>)> {
            self.commits.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VersionControl for FakeVcs {
        async fn commit(
            &self,
            snapshot: &Snapshot,
            message: &str,
            _author: &Signature,
            _when: DateTime<Local>,
        ) -> Result<CommitOutcome, VcsError> {
            if self.fail_commit.load(Ordering::SeqCst) {
                return Err(VcsError::Command {
                    command: "git commit-tree".into(),
                    stderr: "fatal: disk full".into(),
                });
            }
            let mut head = self.head.lock().unwrap();
            if head.as_deref() == Some(snapshot.fingerprint()) {
                return Ok(CommitOutcome::Unchanged);
            }
            *head = Some(snapshot.fingerprint().to_string());
            let mut commits = self.commits.lock().unwrap();
            commits.push((message.to_string(), snapshot.bytes().to_vec()));
            Ok(CommitOutcome::Committed(format!("c{}", commits.len())))
        }

        async fn push(&self, _remote: &str, _credentials: &GitCredentials) -> Result<(), VcsError> {
            self.pushes.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.push_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_push.load(Ordering::SeqCst) {
                return Err(VcsError::Command {
                    command: "git push origin HEAD".into(),
                    stderr: "could not resolve host".into(),
                });
            }
            Ok(())
        }
    }

    fn options(credentials: bool) -> PublisherOptions {
        PublisherOptions {
            remote: "origin".into(),
            author: Signature::new("marketlog", "marketlog@localhost"),
            credentials: credentials.then(|| GitCredentials {
                username: "bot".into(),
                password: "pw".into(),
            }),
            push_timeout: Duration::from_secs(5),
        }
    }

    async fn setup(vcs: Arc<FakeVcs>, credentials: bool) -> (tempfile::TempDir, Arc<LogStore>, SnapshotPublisher) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::open(dir.path().join("report.log")).await.unwrap());
        let publisher = SnapshotPublisher::new(Arc::clone(&store), vcs, options(credentials));
        (dir, store, publisher)
    }

    async fn append(store: &LogStore, n: usize) {
        let records: Vec<_> = (0..n)
            .map(|i| LogRecord::new(RecordKind::Quote, "test", serde_json::json!({ "i": i })))
            .collect();
        store.append(&records).await.unwrap();
    }

    fn ctx() -> TaskContext {
        TaskContext::detached("publish")
    }

    #[tokio::test]
    async fn commits_changes_and_pushes() {
        let vcs = Arc::new(FakeVcs::default());
        let (_dir, store, publisher) = setup(Arc::clone(&vcs), true).await;
        append(&store, 3).await;

        assert_eq!(publisher.execute(&ctx()).await.unwrap(), 3);
        let commits = vcs.committed();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].0, "Update report.log (3 records)");
        assert_eq!(commits[0].1, store.snapshot().await.unwrap().bytes());
        assert_eq!(vcs.pushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unchanged_log_is_not_recommitted() {
        let vcs = Arc::new(FakeVcs::default());
        let (_dir, store, publisher) = setup(Arc::clone(&vcs), true).await;
        append(&store, 1).await;

        publisher.execute(&ctx()).await.unwrap();
        assert_eq!(publisher.execute(&ctx()).await.unwrap(), 0);
        assert_eq!(vcs.committed().len(), 1);
        // Nothing pending after the first successful push.
        assert_eq!(vcs.pushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn commit_failure_is_recovered_by_next_superset_snapshot() {
        let vcs = Arc::new(FakeVcs::default());
        let (_dir, store, publisher) = setup(Arc::clone(&vcs), false).await;
        append(&store, 2).await;

        vcs.fail_commit.store(true, Ordering::SeqCst);
        let err = publisher.execute(&ctx()).await.unwrap_err();
        assert_eq!(err.code(), "VCS_ERROR");
        assert!(vcs.committed().is_empty());

        append(&store, 1).await;
        vcs.fail_commit.store(false, Ordering::SeqCst);
        assert_eq!(publisher.execute(&ctx()).await.unwrap(), 3);

        let commits = vcs.committed();
        assert_eq!(commits.len(), 1);
        let text = String::from_utf8(commits[0].1.clone()).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[tokio::test]
    async fn push_failure_keeps_commit_and_retries_without_recommit() {
        let vcs = Arc::new(FakeVcs::default());
        let (_dir, store, publisher) = setup(Arc::clone(&vcs), true).await;
        append(&store, 2).await;

        vcs.fail_push.store(true, Ordering::SeqCst);
        // Push errors never fail the cycle.
        assert_eq!(publisher.execute(&ctx()).await.unwrap(), 2);
        assert_eq!(vcs.committed().len(), 1);
        assert_eq!(vcs.pushes.load(Ordering::SeqCst), 1);

        vcs.fail_push.store(false, Ordering::SeqCst);
        assert_eq!(publisher.execute(&ctx()).await.unwrap(), 0);
        assert_eq!(vcs.committed().len(), 1);
        assert_eq!(vcs.pushes.load(Ordering::SeqCst), 2);

        publisher.execute(&ctx()).await.unwrap();
        assert_eq!(vcs.pushes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn without_credentials_push_is_skipped() {
        let vcs = Arc::new(FakeVcs::default());
        let (_dir, store, publisher) = setup(Arc::clone(&vcs), false).await;
        append(&store, 1).await;

        assert_eq!(publisher.execute(&ctx()).await.unwrap(), 1);
        assert_eq!(vcs.committed().len(), 1);
        assert_eq!(vcs.pushes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_log_commits_nothing() {
        let vcs = Arc::new(FakeVcs::default());
        let (_dir, _store, publisher) = setup(Arc::clone(&vcs), false).await;

        assert_eq!(publisher.execute(&ctx()).await.unwrap(), 0);
        assert!(vcs.committed().is_empty());
    }

    #[tokio::test]
    async fn history_that_already_matches_counts_as_published() {
        let vcs = Arc::new(FakeVcs::default());
        let (_dir, store, publisher) = setup(Arc::clone(&vcs), false).await;
        append(&store, 1).await;
        let fingerprint = store.snapshot().await.unwrap().fingerprint().to_string();
        *vcs.head.lock().unwrap() = Some(fingerprint);

        assert_eq!(publisher.execute(&ctx()).await.unwrap(), 0);
        assert!(vcs.committed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_push_is_cut_off_by_timeout() {
        let vcs = Arc::new(FakeVcs {
            push_delay: Some(Duration::from_secs(600)),
            ..Default::default()
        });
        let (_dir, store, publisher) = setup(Arc::clone(&vcs), true).await;
        append(&store, 1).await;

        let started = tokio::time::Instant::now();
        assert_eq!(publisher.execute(&ctx()).await.unwrap(), 1);
        assert!(started.elapsed() < Duration::from_secs(60));

        // Still pending: the next cycle tries again.
        publisher.execute(&ctx()).await.unwrap();
        assert_eq!(vcs.pushes.load(Ordering::SeqCst), 2);
    }
}
