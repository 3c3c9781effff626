use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Local};
use marketlog_core::{GitCredentials, VcsError};
use marketlog_store::Snapshot;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::vcs::{CommitOutcome, Signature, VersionControl};

/// Object id git uses for "must not exist yet" in `update-ref`.
const NULL_OID: &str = "0000000000000000000000000000000000000000";

/// [`VersionControl`] backed by the `git` executable.
///
/// Commits are built with plumbing commands against a private index, so the
/// commit holds exactly the snapshot bytes regardless of what the live file
/// or the repository's own index contain at that moment.
pub struct GitCli {
    program: PathBuf,
    repo_dir: PathBuf,
    /// Path of the tracked file relative to `repo_dir`, `/`-separated.
    tracked_path: String,
    command_timeout: Duration,
    push_timeout: Duration,
}

/// One git invocation.
#[derive(Default)]
struct Call<'a> {
    args: Vec<&'a str>,
    stdin: Option<&'a [u8]>,
    env: Vec<(&'static str, String)>,
}

impl<'a> Call<'a> {
    fn new(args: &[&'a str]) -> Self {
        Self {
            args: args.to_vec(),
            ..Default::default()
        }
    }

    fn stdin(mut self, bytes: &'a [u8]) -> Self {
        self.stdin = Some(bytes);
        self
    }

    fn env(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.env.push((key, value.into()));
        self
    }

    fn index(self, index: &Path) -> Self {
        self.env("GIT_INDEX_FILE", index.to_string_lossy())
    }

    fn display(&self) -> String {
        format!("git {}", self.args.join(" "))
    }
}

impl GitCli {
    pub fn new(
        repo_dir: impl Into<PathBuf>,
        tracked_path: impl Into<String>,
        command_timeout: Duration,
        push_timeout: Duration,
    ) -> Self {
        Self {
            program: PathBuf::from("git"),
            repo_dir: repo_dir.into(),
            tracked_path: tracked_path.into().replace('\\', "/"),
            command_timeout,
            push_timeout,
        }
    }

    /// Use another git executable than the one on `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// Run git and return trimmed stdout. Non-zero exit is [`VcsError::Command`].
    async fn run(&self, call: Call<'_>, timeout: Duration) -> Result<String, VcsError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&call.args)
            .current_dir(&self.repo_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .envs(call.env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(if call.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %call.display(), "running git");

        let work = async {
            let mut child = cmd.spawn()?;
            if let (Some(bytes), Some(mut stdin)) = (call.stdin, child.stdin.take()) {
                stdin.write_all(bytes).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };
        let output = tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| VcsError::Timeout {
                ms: timeout.as_millis() as u64,
            })??;

        if !output.status.success() {
            return Err(VcsError::Command {
                command: call.display(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Current head commit, `None` on an unborn branch.
    async fn head(&self) -> Result<Option<String>, VcsError> {
        match self
            .run(Call::new(&["rev-parse", "--verify", "-q", "HEAD"]), self.command_timeout)
            .await
        {
            Ok(oid) => Ok(Some(oid)),
            Err(VcsError::Command { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn commit(
        &self,
        snapshot: &Snapshot,
        message: &str,
        author: &Signature,
        when: DateTime<Local>,
    ) -> Result<CommitOutcome, VcsError> {
        let t = self.command_timeout;
        let scratch = tempfile::tempdir()?;
        let index = scratch.path().join("index");

        let head = self.head().await?;
        if head.is_some() {
            self.run(Call::new(&["read-tree", "HEAD"]).index(&index), t).await?;
        }

        let blob = self
            .run(
                Call::new(&["hash-object", "-w", "--stdin"]).stdin(snapshot.bytes()),
                t,
            )
            .await?;
        let cacheinfo = format!("100644,{blob},{}", self.tracked_path);
        self.run(
            Call::new(&["update-index", "--add", "--cacheinfo", &cacheinfo]).index(&index),
            t,
        )
        .await?;
        let tree = self.run(Call::new(&["write-tree"]).index(&index), t).await?;

        if let Some(head) = &head {
            let head_tree = format!("{head}^{{tree}}");
            if self.run(Call::new(&["rev-parse", &head_tree]), t).await? == tree {
                return Ok(CommitOutcome::Unchanged);
            }
        }

        let date = format!("{} {}", when.timestamp(), when.format("%z"));
        let mut args = vec!["commit-tree", tree.as_str()];
        if let Some(head) = &head {
            args.extend(["-p", head.as_str()]);
        }
        args.extend(["-m", message]);
        let commit = self
            .run(
                Call::new(&args)
                    .env("GIT_AUTHOR_NAME", &author.name)
                    .env("GIT_AUTHOR_EMAIL", &author.email)
                    .env("GIT_AUTHOR_DATE", &date)
                    .env("GIT_COMMITTER_NAME", &author.name)
                    .env("GIT_COMMITTER_EMAIL", &author.email)
                    .env("GIT_COMMITTER_DATE", &date),
                t,
            )
            .await?;

        let expected = head.as_deref().unwrap_or(NULL_OID);
        self.run(
            Call::new(&["update-ref", "-m", "marketlog: snapshot", "HEAD", &commit, expected]),
            t,
        )
        .await?;

        // Keep the repository's own index in step with HEAD for the tracked file.
        if let Err(e) = self
            .run(
                Call::new(&["update-index", "--add", "--cacheinfo", &cacheinfo]),
                t,
            )
            .await
        {
            warn!("committed {commit} but could not refresh the index: {e}");
        }

        Ok(CommitOutcome::Committed(commit))
    }

    /// The auth header travels as environment-supplied config so it never
    /// shows up in the process arguments or in error messages.
    async fn push(&self, remote: &str, credentials: &GitCredentials) -> Result<(), VcsError> {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", credentials.username, credentials.password));
        self.run(
            Call::new(&["push", remote, "HEAD"])
                .env("GIT_CONFIG_COUNT", "1")
                .env("GIT_CONFIG_KEY_0", "http.extraHeader")
                .env("GIT_CONFIG_VALUE_0", format!("Authorization: Basic {token}")),
            self.push_timeout,
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketlog_core::{LogRecord, RecordKind};
    use marketlog_store::LogStore;
    use std::process::Command as StdCommand;

    fn git_available() -> bool {
        StdCommand::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) -> String {
        let out = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("git runs");
        assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    async fn snapshot_of(store: &LogStore, prices: &[f64]) -> Snapshot {
        let records: Vec<_> = prices
            .iter()
            .map(|p| LogRecord::new(RecordKind::Quote, "test", serde_json::json!({ "price": p })))
            .collect();
        store.append(&records).await.unwrap();
        store.snapshot().await.unwrap()
    }

    fn client(repo: &Path) -> GitCli {
        GitCli::new(repo, "report.log", Duration::from_secs(30), Duration::from_secs(30))
    }

    fn author() -> Signature {
        Signature::new("marketlog", "marketlog@localhost")
    }

    #[tokio::test]
    async fn commits_exact_snapshot_bytes() {
        if !git_available() {
            return;
        }
        let repo = tempfile::tempdir().unwrap();
        git(repo.path(), &["init", "-q"]);
        let store = LogStore::open(repo.path().join("report.log")).await.unwrap();
        let git_cli = client(repo.path());

        let first = snapshot_of(&store, &[1.0, 2.0]).await;
        // Written after the snapshot; must not be committed.
        store
            .append(&[LogRecord::new(RecordKind::Quote, "test", serde_json::json!({ "late": true }))])
            .await
            .unwrap();

        let outcome = git_cli
            .commit(&first, "Update report.log (2 records)", &author(), Local::now())
            .await
            .unwrap();
        let CommitOutcome::Committed(id) = outcome else {
            panic!("expected a commit, got {outcome:?}");
        };
        assert_eq!(git(repo.path(), &["rev-parse", "HEAD"]), id);

        let committed = git(repo.path(), &["show", "HEAD:report.log"]);
        assert_eq!(format!("{committed}\n").as_bytes(), first.bytes());
        assert_eq!(
            git(repo.path(), &["log", "-1", "--format=%an <%ae>|%s"]),
            "marketlog <marketlog@localhost>|Update report.log (2 records)"
        );
    }

    #[tokio::test]
    async fn same_snapshot_is_unchanged_and_next_one_chains() {
        if !git_available() {
            return;
        }
        let repo = tempfile::tempdir().unwrap();
        git(repo.path(), &["init", "-q"]);
        let store = LogStore::open(repo.path().join("report.log")).await.unwrap();
        let git_cli = client(repo.path());

        let first = snapshot_of(&store, &[1.0]).await;
        let c1 = git_cli.commit(&first, "one", &author(), Local::now()).await.unwrap();
        assert!(matches!(c1, CommitOutcome::Committed(_)));

        let again = git_cli.commit(&first, "one again", &author(), Local::now()).await.unwrap();
        assert_eq!(again, CommitOutcome::Unchanged);

        let second = snapshot_of(&store, &[2.0]).await;
        let CommitOutcome::Committed(c2) = git_cli.commit(&second, "two", &author(), Local::now()).await.unwrap()
        else {
            panic!("second snapshot should commit");
        };
        let CommitOutcome::Committed(c1) = c1 else { unreachable!() };
        assert_eq!(git(repo.path(), &["rev-parse", &format!("{c2}^")]), c1);
        assert_eq!(git(repo.path(), &["rev-list", "--count", "HEAD"]), "2");
    }

    #[tokio::test]
    async fn pushes_to_remote() {
        if !git_available() {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let remote = root.path().join("remote.git");
        let repo = root.path().join("work");
        std::fs::create_dir_all(&repo).unwrap();
        git(root.path(), &["init", "-q", "--bare", remote.to_str().unwrap()]);
        git(&repo, &["init", "-q"]);
        git(&repo, &["remote", "add", "origin", remote.to_str().unwrap()]);

        let store = LogStore::open(repo.join("report.log")).await.unwrap();
        let git_cli = client(&repo);
        let snap = snapshot_of(&store, &[3.0]).await;
        git_cli.commit(&snap, "three", &author(), Local::now()).await.unwrap();

        let creds = GitCredentials {
            username: "bot".into(),
            password: "secret".into(),
        };
        git_cli.push("origin", &creds).await.unwrap();

        let local_head = git(&repo, &["rev-parse", "HEAD"]);
        let remote_head = git(root.path(), &["--git-dir", remote.to_str().unwrap(), "log", "-1", "--all", "--format=%H"]);
        assert_eq!(local_head, remote_head);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn push_credentials_stay_out_of_argv() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("git");
        std::fs::write(
            &stub,
            "#!/bin/sh\nd=$(dirname \"$0\")\nprintf '%s\\n' \"$@\" > \"$d/argv\"\nenv > \"$d/env\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let creds = GitCredentials {
            username: "bot".into(),
            password: "hunter2".into(),
        };
        client(dir.path())
            .with_program(&stub)
            .push("origin", &creds)
            .await
            .unwrap();

        let token = base64::engine::general_purpose::STANDARD.encode("bot:hunter2");
        let argv = std::fs::read_to_string(dir.path().join("argv")).unwrap();
        assert_eq!(argv.lines().collect::<Vec<_>>(), vec!["push", "origin", "HEAD"]);
        assert!(!argv.contains(&token));

        let env = std::fs::read_to_string(dir.path().join("env")).unwrap();
        assert!(env.lines().any(|l| l == "GIT_CONFIG_COUNT=1"));
        assert!(env.lines().any(|l| l == "GIT_CONFIG_KEY_0=http.extraHeader"));
        assert!(env
            .lines()
            .any(|l| l == format!("GIT_CONFIG_VALUE_0=Authorization: Basic {token}")));
    }

    #[tokio::test]
    async fn push_to_unknown_remote_fails_without_leaking_credentials() {
        if !git_available() {
            return;
        }
        let repo = tempfile::tempdir().unwrap();
        git(repo.path(), &["init", "-q"]);
        let creds = GitCredentials {
            username: "bot".into(),
            password: "hunter2".into(),
        };
        let err = client(repo.path()).push("nowhere", &creds).await.unwrap_err();
        match err {
            VcsError::Command { command, .. } => {
                assert_eq!(command, "git push nowhere HEAD");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
