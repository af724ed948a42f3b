//! Process logging and the bounded per-channel audit logs.
//!
//! Two independent outputs exist:
//! - `tracing` events go to the console and to a daily rolling file in the
//!   log directory (`twitch-srec.log.YYYY-MM-DD`), retained for 7 days.
//! - [`LogSink`] maintains the small, capped, human-readable logs: one per
//!   channel next to its recordings plus `common.log` for failures that do
//!   not belong to a single channel.

mod bounded;

pub use bounded::{ChannelLog, LogSink, MAX_LOG_LINE, append_bounded, format_entry};

use chrono::{Local, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::utils::fs;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "twitch_srec=info,reqwest=warn,tungstenite=warn";

/// Prefix of the rolling process log files.
const LOG_FILE_PREFIX: &str = "twitch-srec.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Timer that formats timestamps in the local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Initialize process logging.
///
/// `filter` takes precedence over `RUST_LOG`, which takes precedence over
/// [`DEFAULT_LOG_FILTER`]. Keep the returned guard alive for the lifetime of
/// the process, otherwise buffered file output is lost.
pub fn init_logging(log_dir: &Path, filter: Option<&str>) -> crate::Result<WorkerGuard> {
    fs::ensure_dir_all_sync(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = match filter {
        Some(directive) => EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::config(format!("invalid log filter directive: {e}")))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    Ok(guard)
}

/// Spawn the daily task that deletes process log files older than 7 days.
pub fn start_retention_cleanup(log_dir: PathBuf, cancel_token: CancellationToken) {
    tokio::spawn(async move {
        let cleanup_interval = Duration::from_secs(24 * 60 * 60);

        loop {
            if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                warn!(error = %e, "Failed to cleanup old logs");
            }
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Log retention cleanup task shutting down");
                    break;
                }
                _ = tokio::time::sleep(cleanup_interval) => {}
            }
        }
    });
}

/// Delete rolling log files older than `retention_days`.
///
/// Only files named `twitch-srec.log.YYYY-MM-DD` are considered; the bounded
/// channel/common logs are never touched.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(LOG_FILE_PREFIX))
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };

        if date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted_count += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("twitch_srec=info"));
    }

    #[tokio::test]
    async fn test_cleanup_only_removes_old_rolling_logs() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("twitch-srec.log.2000-01-01");
        let today = dir
            .path()
            .join(format!("twitch-srec.log.{}", Utc::now().format("%Y-%m-%d")));
        let common = dir.path().join("common.log");
        for path in [&old, &today, &common] {
            tokio::fs::write(path, "x\n").await.unwrap();
        }

        let deleted = cleanup_old_logs(dir.path(), LOG_RETENTION_DAYS).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(!old.exists());
        assert!(today.exists());
        assert!(common.exists());
    }
}
