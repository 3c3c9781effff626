// Publisher cycles against a real git repository with a local bare remote.
// Skipped when no `git` executable is on PATH.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use marketlog_core::{GitCredentials, LogRecord, RecordKind};
use marketlog_publisher::{GitCli, PublisherOptions, Signature, SnapshotPublisher};
use marketlog_scheduler::{Task, TaskContext};
use marketlog_store::LogStore;

fn git(dir: &Path, args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).current_dir(dir).output().ok()?;
    out.status
        .success()
        .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())
}

#[tokio::test]
async fn publishes_each_new_snapshot_once() {
    let root = tempfile::tempdir().unwrap();
    let remote = root.path().join("remote.git");
    let work = root.path().join("work");
    std::fs::create_dir_all(&work).unwrap();

    let remote_str = remote.to_str().unwrap();
    if git(root.path(), &["init", "-q", "--bare", remote_str]).is_none() {
        return;
    }
    git(&work, &["init", "-q"]).unwrap();
    git(&work, &["remote", "add", "origin", remote_str]).unwrap();

    let store = Arc::new(LogStore::open(work.join("report.log")).await.unwrap());
    let vcs = Arc::new(GitCli::new(
        &work,
        "report.log",
        Duration::from_secs(30),
        Duration::from_secs(60),
    ));
    let publisher = SnapshotPublisher::new(
        Arc::clone(&store),
        vcs,
        PublisherOptions {
            remote: "origin".into(),
            author: Signature::new("marketlog", "marketlog@localhost"),
            credentials: Some(GitCredentials {
                username: "bot".into(),
                password: "pw".into(),
            }),
            push_timeout: Duration::from_secs(60),
        },
    );
    let ctx = TaskContext::detached("publish");

    let quote = |price: f64| LogRecord::new(RecordKind::Quote, "test", serde_json::json!({ "price": price }));

    store.append(&[quote(1.0), quote(2.0)]).await.unwrap();
    assert_eq!(publisher.execute(&ctx).await.unwrap(), 2);

    // Nothing new: no commit.
    assert_eq!(publisher.execute(&ctx).await.unwrap(), 0);

    store.append(&[quote(3.0)]).await.unwrap();
    assert_eq!(publisher.execute(&ctx).await.unwrap(), 3);

    let count = git(root.path(), &["--git-dir", remote_str, "rev-list", "--count", "--all"]).unwrap();
    assert_eq!(count, "2");
    let subjects = git(root.path(), &["--git-dir", remote_str, "log", "--all", "--format=%s"]).unwrap();
    assert_eq!(
        subjects.lines().collect::<Vec<_>>(),
        ["Update report.log (3 records)", "Update report.log (2 records)"]
    );
}
