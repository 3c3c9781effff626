use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use marketlog_core::LogRecord;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::snapshot::Snapshot;
use crate::Result;

/// Append-only record sink backed by a single file.
///
/// Appends are exclusive writers and snapshots shared readers of the same
/// lock, so a snapshot always lands between two completed appends. The lock is
/// fair: a stream of snapshots cannot starve an append and vice versa.
///
/// Next to the log sits a commit mark (`<file>.commit`) holding the log's
/// length after the last completed append. A crash anywhere inside an append
/// leaves the mark at the previous length, and [`open`](Self::open) cuts the
/// log back to it, so a batch survives a crash whole or not at all.
pub struct LogStore {
    path: PathBuf,
    mark: PathBuf,
    lock: RwLock<()>,
}

impl LogStore {
    /// Open (or create) the log at `path`.
    ///
    /// Bytes past the commit mark are dropped, as is any tail that is not a
    /// complete, decodable line, so the file parses cleanly from the start.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mark = sibling(&path, ".commit");

        let dropped = repair_tail(&path, &mark).await?;
        if dropped > 0 {
            warn!(path = %path.display(), bytes = dropped, "truncated uncommitted tail of report log");
        }

        // Create the file up front so the first snapshot has something to read.
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        write_mark(&mark, file.metadata().await?.len()).await?;

        info!(path = %path.display(), "report log opened");
        Ok(Self {
            path,
            mark,
            lock: RwLock::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `records` in order as one unit. Returns the number written.
    ///
    /// If the write fails the file is truncated back to its previous length,
    /// so either every record of the batch is present or none is.
    pub async fn append(&self, records: &[LogRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        // Encode before taking the lock; serialization errors never touch the file.
        let mut buf = Vec::with_capacity(records.len() * 256);
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let _guard = self.lock.write().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let before = file.metadata().await?.len();

        let written = async {
            write_durable(&mut file, &buf).await?;
            write_mark(&self.mark, before + buf.len() as u64).await
        }
        .await;
        if let Err(e) = written {
            // The mark still holds `before`; a failed undo is finished by the next open.
            if let Err(undo) = file.set_len(before).await {
                error!(
                    path = %self.path.display(),
                    error = %undo,
                    "failed to roll back partial append"
                );
            }
            return Err(e.into());
        }

        debug!(records = records.len(), bytes = buf.len(), "appended batch");
        Ok(records.len())
    }

    /// Consistent copy of the full log as of the most recent completed append.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let _guard = self.lock.read().await;
        let bytes = fs::read(&self.path).await?;
        Ok(Snapshot::new(bytes))
    }
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

async fn write_durable(file: &mut fs::File, buf: &[u8]) -> std::io::Result<()> {
    file.write_all(buf).await?;
    file.flush().await?;
    file.sync_data().await
}

/// Record `len` as the committed length: temp file, sync, rename.
async fn write_mark(mark: &Path, len: u64) -> std::io::Result<()> {
    let tmp = sibling(mark, ".tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(len.to_string().as_bytes()).await?;
    file.sync_data().await?;
    drop(file);
    if let Err(e) = fs::rename(&tmp, mark).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

async fn read_mark(mark: &Path) -> Result<Option<u64>> {
    match fs::read_to_string(mark).await {
        Ok(text) => match text.trim().parse() {
            Ok(len) => Ok(Some(len)),
            Err(_) => {
                warn!(mark = %mark.display(), "unreadable commit mark ignored");
                Ok(None)
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Cut the log back to its committed, parseable prefix. Returns how many
/// bytes were removed.
async fn repair_tail(path: &Path, mark: &Path) -> Result<u64> {
    let bytes = match fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let committed = match read_mark(mark).await? {
        Some(len) if len <= bytes.len() as u64 => len as usize,
        Some(len) => {
            warn!(mark = len, file = bytes.len(), "commit mark past end of log ignored");
            bytes.len()
        }
        None => bytes.len(),
    };
    let keep = parseable_prefix(&bytes[..committed]);
    if keep == bytes.len() {
        return Ok(0);
    }

    let file = OpenOptions::new().write(true).open(path).await?;
    file.set_len(keep as u64).await?;
    file.sync_data().await?;
    Ok((bytes.len() - keep) as u64)
}

/// Length of the longest run of complete lines whose last line decodes.
fn parseable_prefix(bytes: &[u8]) -> usize {
    let mut end = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    while end > 0 {
        let start = bytes[..end - 1]
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |i| i + 1);
        let line = &bytes[start..end - 1];
        if line.is_empty() || serde_json::from_slice::<LogRecord>(line).is_ok() {
            break;
        }
        end = start;
    }
    end
}
