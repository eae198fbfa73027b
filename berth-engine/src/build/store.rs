//! Per-service log files
//!
//! Every file is split in two regions: the permanent prefix, which only ever
//! grows, and the ephemeral tail holding the latest rendered status block.
//! The tail is kept in memory and rewritten behind the prefix on every
//! change, and the file is truncated to the exact new length so no bytes of
//! an older, longer block survive.

use super::format_line;
use berth_common::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One open log file
struct ServiceLog {
    file: File,
    permanent_len: u64,
    tail: String,
}

impl ServiceLog {
    async fn append_permanent(&mut self, line: &str) -> std::io::Result<()> {
        let mut buf = String::with_capacity(line.len() + 1 + self.tail.len());
        buf.push_str(line);
        buf.push('\n');
        let line_len = buf.len() as u64;
        buf.push_str(&self.tail);

        self.file.seek(SeekFrom::Start(self.permanent_len)).await?;
        self.file.write_all(buf.as_bytes()).await?;
        self.file.flush().await?;
        self.file.set_len(self.permanent_len + buf.len() as u64).await?;
        self.permanent_len += line_len;
        Ok(())
    }

    async fn replace_tail(&mut self, block: String) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(self.permanent_len)).await?;
        self.file.write_all(block.as_bytes()).await?;
        self.file.flush().await?;
        self.file.set_len(self.permanent_len + block.len() as u64).await?;
        self.tail = block;
        Ok(())
    }
}

type Slot = Arc<Mutex<Option<ServiceLog>>>;

/// Owns one append-only log file per service
pub struct LogStore {
    log_dir: PathBuf,
    slots: Mutex<HashMap<String, Slot>>,
    closed: AtomicBool,
}

impl LogStore {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            slots: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Path of a service's log file
    pub fn path_for(&self, service: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", service))
    }

    /// Append a permanent `[<timestamp>] <text>` line to a service's log
    ///
    /// Leading and trailing line breaks of `text` are dropped.
    pub async fn append(&self, service: &str, when: DateTime<Utc>, text: &str) -> Result<()> {
        let line = format_line(when, text.trim_matches(|c| c == '\r' || c == '\n'));
        let slot = self.slot(service).await?;
        let mut guard = slot.lock().await;
        let log = self.open(service, &mut guard).await?;
        log.append_permanent(&line).await.map_err(|e| {
            Error::LogStore(format!("could not append to {}: {}", self.path_for(service).display(), e))
        })
    }

    /// Replace the ephemeral block at the end of a service's log
    ///
    /// `block` is written verbatim; an empty block clears the tail.
    pub async fn replace_tail(&self, service: &str, block: String) -> Result<()> {
        let slot = self.slot(service).await?;
        let mut guard = slot.lock().await;
        let log = self.open(service, &mut guard).await?;
        log.replace_tail(block).await.map_err(|e| {
            Error::LogStore(format!(
                "could not rewrite the status block of {}: {}",
                self.path_for(service).display(),
                e
            ))
        })
    }

    /// The currently rendered ephemeral block of a service, if its log is open
    pub async fn tail(&self, service: &str) -> Option<String> {
        let slot = self.slots.lock().await.get(service).cloned()?;
        let guard = slot.lock().await;
        guard.as_ref().map(|log| log.tail.clone())
    }

    /// Flush and release every open file. Calling it again is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let slots: Vec<(String, Slot)> = self.slots.lock().await.drain().collect();
        for (service, slot) in slots {
            let mut guard = slot.lock().await;
            if let Some(log) = guard.take() {
                if let Err(e) = log.file.sync_all().await {
                    warn!("Failed to sync {}'s log on close: {}", service, e);
                }
            }
        }
        debug!("Closed build logs in {}", self.log_dir.display());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn slot(&self, service: &str) -> Result<Slot> {
        if self.is_closed() {
            return Err(Error::LogStoreClosed(service.to_string()));
        }
        let mut slots = self.slots.lock().await;
        Ok(slots.entry(service.to_string()).or_default().clone())
    }

    /// Lazily create and truncate the service's file, under the slot's lock only
    async fn open<'a>(
        &self,
        service: &str,
        slot: &'a mut Option<ServiceLog>,
    ) -> Result<&'a mut ServiceLog> {
        // close() may have emptied this slot after we looked it up
        if self.is_closed() {
            return Err(Error::LogStoreClosed(service.to_string()));
        }

        if slot.is_none() {
            create_log_dir(&self.log_dir).await?;
            let path = self.path_for(service);
            let file = open_truncated(&path).await.map_err(|e| {
                Error::LogStore(format!("could not open {}: {}", path.display(), e))
            })?;
            debug!("Opened build log for {} at {}", service, path.display());
            *slot = Some(ServiceLog {
                file,
                permanent_len: 0,
                tail: String::new(),
            });
        }

        slot.as_mut()
            .ok_or_else(|| Error::LogStore(format!("log for {} vanished while opening", service)))
    }
}

async fn create_log_dir(dir: &Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(dir).await.map_err(|e| {
        Error::LogStore(format!(
            "could not make the logs output directory at {}: {}",
            dir.display(),
            e
        ))
    })
}

async fn open_truncated(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_creates_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        std::fs::create_dir_all(&log_dir).unwrap();
        std::fs::write(log_dir.join("web.log"), "stale output from the last build\n").unwrap();

        let store = LogStore::new(&log_dir);
        store.append("web", Utc::now(), "first\n").await.unwrap();
        store.append("web", Utc::now(), "second").await.unwrap();

        let content = std::fs::read_to_string(store.path_for("web")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] first"));
        assert!(lines[1].ends_with("] second"));
        assert!(!content.contains("stale"));
    }

    #[tokio::test]
    async fn test_tail_shrinks_without_residue() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path());

        store.append("api", Utc::now(), "step one").await.unwrap();
        store
            .replace_tail("api", "a very long status block line\nanother one\n".to_string())
            .await
            .unwrap();
        store.replace_tail("api", "short\n".to_string()).await.unwrap();

        let content = std::fs::read_to_string(store.path_for("api")).unwrap();
        assert!(content.ends_with("] step one\nshort\n"));
        assert_eq!(store.tail("api").await.as_deref(), Some("short\n"));
    }

    #[tokio::test]
    async fn test_permanent_lines_stay_above_tail() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path());

        store.replace_tail("db", "abc 1.00KB\n".to_string()).await.unwrap();
        store.append("db", Utc::now(), "committed").await.unwrap();

        let content = std::fs::read_to_string(store.path_for("db")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] committed"));
        assert_eq!(lines[1], "abc 1.00KB");

        store.replace_tail("db", String::new()).await.unwrap();
        let content = std::fs::read_to_string(store.path_for("db")).unwrap();
        assert!(content.ends_with("] committed\n"));
    }

    #[tokio::test]
    async fn test_append_trims_stray_bytes_past_the_tail() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path());
        store.replace_tail("db", "abc 1.00KB\n".to_string()).await.unwrap();

        // Leftovers of an interrupted write past the expected end of the file
        let mut raw = std::fs::OpenOptions::new()
            .append(true)
            .open(store.path_for("db"))
            .unwrap();
        raw.write_all(b"half-written garbage that is longer than the tail\n").unwrap();
        drop(raw);

        store.append("db", Utc::now(), "ok").await.unwrap();

        let content = std::fs::read_to_string(store.path_for("db")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] ok"));
        assert_eq!(lines[1], "abc 1.00KB");
        assert!(!content.contains("garbage"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path());
        store.append("web", Utc::now(), "hello").await.unwrap();

        store.close().await;
        store.close().await;
        assert!(store.is_closed());

        let err = store.append("web", Utc::now(), "too late").await.unwrap_err();
        assert!(matches!(err, Error::LogStoreClosed(ref s) if s == "web"));

        let content = std::fs::read_to_string(store.path_for("web")).unwrap();
        assert!(content.ends_with("] hello\n"));
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let store = LogStore::new(blocker.join("logs"));
        let err = store.append("web", Utc::now(), "hello").await.unwrap_err();
        assert!(err.to_string().contains("could not make the logs output directory"));
        assert_eq!(err.category(), berth_common::ErrorCategory::IoFailure);
    }
}
