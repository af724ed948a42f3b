//! Capped, rewrite-on-append text logs.
//!
//! Every append reads the whole file, drops the oldest lines so that the
//! result stays below the cap, and rewrites it (via a temp file + rename).
//! This is O(n) per write; the files are small and written rarely.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::Result;
use crate::utils::fs::{ensure_parent_dir, io_error};

/// Maximum number of lines kept in a bounded log file.
pub const MAX_LOG_LINE: usize = 1000;

/// Prefix `message` with a local `[YYYY-MM-DD HH:MM:SS]` timestamp.
pub fn format_entry(message: &str) -> String {
    format!("[{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), message)
}

/// Append `entry` to the file at `path`, keeping at most `max_lines` lines.
///
/// One line of headroom is always left free, so a single-line entry keeps the
/// `max_lines - 2` most recent existing lines. Entries longer than the cap
/// keep only their own tail.
pub async fn append_bounded(path: &Path, entry: &str, max_lines: usize) -> Result<()> {
    let max_lines = max_lines.max(2);
    ensure_parent_dir(path).await?;

    let existing = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
        Err(e) => return Err(io_error("reading log", path, e)),
    };

    let mut entry_lines: Vec<&str> = entry.lines().collect();
    if entry_lines.is_empty() {
        entry_lines.push("");
    }
    if entry_lines.len() > max_lines - 1 {
        entry_lines.drain(..entry_lines.len() - (max_lines - 1));
    }

    let keep = max_lines.saturating_sub(entry_lines.len() + 1);
    let existing_lines: Vec<&str> = existing.lines().collect();
    let start = existing_lines.len().saturating_sub(keep);

    let mut out = String::with_capacity(existing.len() + entry.len() + 1);
    for line in existing_lines[start..].iter().chain(entry_lines.iter()) {
        out.push_str(line);
        out.push('\n');
    }

    let tmp = path.with_extension("log.tmp");
    tokio::fs::write(&tmp, out)
        .await
        .map_err(|e| io_error("writing log", &tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_error("replacing log", path, e))
}

struct SinkInner {
    output_dir: PathBuf,
    common_path: PathBuf,
    max_lines: usize,
    /// Serializes read-modify-write cycles per file.
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

/// Writer for all bounded logs of the process.
///
/// Cheap to clone; clones share the per-file locks.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<SinkInner>,
}

impl LogSink {
    /// `output_dir` holds one directory per channel; `common_path` is the shared log.
    pub fn new(output_dir: impl Into<PathBuf>, common_path: impl Into<PathBuf>) -> Self {
        Self::with_max_lines(output_dir, common_path, MAX_LOG_LINE)
    }

    pub fn with_max_lines(
        output_dir: impl Into<PathBuf>,
        common_path: impl Into<PathBuf>,
        max_lines: usize,
    ) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                output_dir: output_dir.into(),
                common_path: common_path.into(),
                max_lines: max_lines.max(2),
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn common_path(&self) -> &Path {
        &self.inner.common_path
    }

    /// `<output_dir>/<login>/<login>.log`
    pub fn channel_log_path(&self, login: &str) -> PathBuf {
        self.inner
            .output_dir
            .join(login)
            .join(format!("{login}.log"))
    }

    pub fn channel(&self, login: &str) -> ChannelLog {
        ChannelLog {
            sink: self.clone(),
            login: login.to_string(),
            path: self.channel_log_path(login),
        }
    }

    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .locks
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    /// Append a timestamped entry to `path`.
    pub async fn append(&self, path: &Path, message: &str) -> Result<()> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;
        append_bounded(path, &format_entry(message), self.inner.max_lines).await
    }

    /// Best-effort write to the common log.
    pub async fn common(&self, message: &str) {
        info!(target: "twitch_srec::common", "{message}");
        if let Err(e) = self.append(&self.inner.common_path, message).await {
            warn!(error = %e, "Failed to write common log");
        }
    }

    /// Best-effort multi-line error record in the common log.
    pub async fn common_error(&self, context: &str, error: &(dyn std::fmt::Display + Sync)) {
        warn!(target: "twitch_srec::common", error = %error, "{context}");
        let record = format!("Error! {context}\n{error}\nError End!");
        if let Err(e) = self.append(&self.inner.common_path, &record).await {
            warn!(error = %e, "Failed to write common log");
        }
    }
}

/// Bounded log of a single channel.
#[derive(Clone)]
pub struct ChannelLog {
    sink: LogSink,
    login: String,
    path: PathBuf,
}

impl ChannelLog {
    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a lifecycle event.
    pub async fn info(&self, message: &str) {
        info!(login = %self.login, "{message}");
        self.write(message).await;
    }

    /// Record a failure.
    pub async fn warn(&self, message: &str) {
        warn!(login = %self.login, "{message}");
        self.write(message).await;
    }

    /// Record a raw inbound payload.
    pub async fn raw(&self, message: &str) {
        debug!(login = %self.login, payload = %message, "PubSub message");
        self.write(message).await;
    }

    async fn write(&self, message: &str) {
        if let Err(e) = self.sink.append(&self.path, message).await {
            self.sink
                .common_error(&format!("failed to write log of {}", self.login), &e)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_lines(path: &Path) -> Vec<String> {
        tokio::fs::read_to_string(path)
            .await
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("c.log");

        append_bounded(&path, "hello", 10).await.unwrap();

        assert_eq!(read_lines(&path).await, vec!["hello"]);
    }

    #[tokio::test]
    async fn test_keeps_most_recent_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capped.log");
        let max = 50;

        for i in 0..(max * 3) {
            append_bounded(&path, &format!("line {i}"), max).await.unwrap();
            let lines = read_lines(&path).await;
            assert!(lines.len() <= max, "{} lines after append {i}", lines.len());
        }

        let lines = read_lines(&path).await;
        assert_eq!(lines.len(), max - 1);
        let expected: Vec<String> = ((max * 3 - (max - 1))..(max * 3))
            .map(|i| format!("line {i}"))
            .collect();
        assert_eq!(lines, expected);
    }

    #[tokio::test]
    async fn test_multi_line_entry_respects_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multi.log");

        for i in 0..8 {
            append_bounded(&path, &format!("single {i}"), 10).await.unwrap();
        }
        append_bounded(&path, "Error!\ntrace 1\ntrace 2\nError End!", 10)
            .await
            .unwrap();

        let lines = read_lines(&path).await;
        assert!(lines.len() <= 10);
        assert_eq!(lines.last().map(String::as_str), Some("Error End!"));
        assert_eq!(lines.first().map(String::as_str), Some("single 3"));

        let huge: String = (0..30).map(|i| format!("t{i}\n")).collect();
        append_bounded(&path, &huge, 10).await.unwrap();
        let lines = read_lines(&path).await;
        assert_eq!(lines.len(), 9);
        assert_eq!(lines.last().map(String::as_str), Some("t29"));
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::with_max_lines(dir.path(), dir.path().join("common.log"), 500);
        let log = sink.channel("alice");

        let mut tasks = Vec::new();
        for i in 0..20 {
            let log = log.clone();
            tasks.push(tokio::spawn(async move {
                log.info(&format!("event {i}")).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let lines = read_lines(log.path()).await;
        assert_eq!(lines.len(), 20);
        for i in 0..20 {
            let suffix = format!("] event {i}");
            assert!(lines.iter().any(|l| l.ends_with(&suffix)), "missing event {i}");
        }
    }

    #[tokio::test]
    async fn test_channel_log_location_and_format() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path().join("out"), dir.path().join("log/common.log"));
        let log = sink.channel("alice");

        assert_eq!(log.path(), dir.path().join("out/alice/alice.log"));
        log.info("ID:123 Connect Success!").await;

        let lines = read_lines(log.path()).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] ID:123 Connect Success!"));
    }

    #[tokio::test]
    async fn test_common_error_record() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path(), dir.path().join("log/common.log"));

        sink.common_error("resolving bob", &"connection refused").await;

        let lines = read_lines(sink.common_path()).await;
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("Error! resolving bob"));
        assert_eq!(lines[1], "connection refused");
        assert_eq!(lines[2], "Error End!");
    }

    #[tokio::test]
    async fn test_common_error_runs_on_spawned_task() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path(), dir.path().join("log/common.log"));

        let task = tokio::spawn({
            let sink = sink.clone();
            async move {
                let err = crate::Error::Connectivity("dns failure".to_string());
                sink.common_error("resolving bob", &err).await;
            }
        });
        task.await.unwrap();

        let lines = read_lines(sink.common_path()).await;
        assert_eq!(lines[1], "Connection error: dns failure");
    }
}
