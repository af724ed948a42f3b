use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use process_utils::ExitKind;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CaptureBackend, CaptureRequest, Lookup, StreamMetadata, capture_file_stem};
use crate::config::CaptureConfig;
use crate::domain::{ChannelInfo, channel_url};
use crate::logging::{ChannelLog, LogSink};
use crate::scheduler::ChannelRegistry;
use crate::utils::fs::ensure_dir_all;
use crate::{Error, Result};

/// A capture that ran until the tool exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSummary {
    pub login: String,
    /// Output path without the extension the tool picks.
    pub output: PathBuf,
    pub started_at: DateTime<Local>,
    pub duration: Duration,
    pub exit: ExitKind,
    /// `stream-down` arrived before the tool exited.
    pub stream_ended: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Finished(CaptureSummary),
    /// Another task already records this login.
    AlreadyCapturing,
    /// Shutdown killed the capture.
    Interrupted,
}

/// Starts and tracks captures, one per login at a time.
pub struct CaptureLauncher {
    backend: Arc<dyn CaptureBackend>,
    registry: Arc<ChannelRegistry>,
    logs: LogSink,
    config: CaptureConfig,
}

impl CaptureLauncher {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        registry: Arc<ChannelRegistry>,
        logs: LogSink,
        config: CaptureConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            logs,
            config,
        }
    }

    /// Record `channel` until the capture tool exits.
    ///
    /// `on_spawned` runs once the process is up and the login is marked as
    /// capturing. An error means nothing is being recorded; on
    /// [`CaptureOutcome::AlreadyCapturing`] no process was started. Cancelling
    /// `cancel` kills a running capture.
    pub async fn capture<F>(
        &self,
        channel: &ChannelInfo,
        cancel: &CancellationToken,
        on_spawned: F,
    ) -> Result<CaptureOutcome>
    where
        F: FnOnce() + Send,
    {
        let login = channel.login.as_str();
        let log = self.logs.channel(login);
        log.info(&format!("downloading {login}...")).await;

        let metadata = self.metadata_with_retries(login, &log).await?;

        let started_at = Local::now();
        let file_stem = capture_file_stem(channel, metadata.as_ref(), started_at);
        let output_dir = self.config.output_dir.join(login);
        ensure_dir_all(&output_dir)
            .await
            .map_err(|e| Error::capture_launch(login, e.to_string()))?;
        let output = output_dir.join(&file_stem);

        let Some(guard) = self
            .registry
            .try_begin_capture(login, &channel.id, output.clone())
        else {
            debug!(login, "Capture already running");
            return Ok(CaptureOutcome::AlreadyCapturing);
        };

        let request = CaptureRequest {
            login: login.to_string(),
            url: channel_url(login),
            output_dir,
            file_stem,
        };
        let mut process = self.backend.spawn(&request).await?;
        log.info(&format!(
            "{login} capture started (pid {}) -> {}",
            process
                .id()
                .map_or_else(|| "?".to_string(), |pid| pid.to_string()),
            output.display()
        ))
        .await;

        on_spawned();

        let started = Instant::now();
        let waited = tokio::select! {
            result = process.wait() => Some(result),
            _ = cancel.cancelled() => None,
        };
        let exit = match waited {
            Some(Ok(exit)) => exit,
            None => {
                if let Err(e) = process.kill().await {
                    log.warn(&format!("failed to stop capture of {login}: {e}")).await;
                }
                log.info(&format!("{login} capture interrupted by shutdown")).await;
                return Ok(CaptureOutcome::Interrupted);
            }
            Some(Err(e)) => {
                if let Err(kill_err) = process.kill().await {
                    log.warn(&format!("failed to stop capture of {login}: {kill_err}")).await;
                }
                return Err(Error::capture_launch(
                    login,
                    format!("lost track of capture process: {e}"),
                ));
            }
        };
        let stream_ended = guard.finish().is_some_and(|record| record.stream_ended);

        let summary = CaptureSummary {
            login: login.to_string(),
            output,
            started_at,
            duration: started.elapsed(),
            exit,
            stream_ended,
        };
        if exit.success() {
            log.info(&format!("{login} capture finished after {:?}", summary.duration))
                .await;
        } else {
            log.warn(&format!(
                "{login} capture ended with {exit} after {:?}",
                summary.duration
            ))
            .await;
        }
        Ok(CaptureOutcome::Finished(summary))
    }

    /// Look up stream metadata up to `metadata_attempts` times.
    ///
    /// `Ok(None)` means every attempt failed and naming falls back to the
    /// login; an offline report aborts the capture.
    async fn metadata_with_retries(
        &self,
        login: &str,
        log: &ChannelLog,
    ) -> Result<Option<StreamMetadata>> {
        let attempts = self.config.metadata_attempts.max(1);
        for attempt in 1..=attempts {
            match self.backend.lookup_metadata(login).await {
                Ok(Lookup::Info(info)) => return Ok(Some(info)),
                Ok(Lookup::Offline) => {
                    return Err(Error::capture_launch(login, "yt-dlp reports the channel offline"));
                }
                Err(e) => {
                    log.warn(&format!("metadata lookup {attempt}/{attempts} failed: {e}")).await;
                    if attempt < attempts {
                        tokio::time::sleep(self.config.metadata_retry_delay).await;
                    }
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureProcess;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    struct ScriptedProcess {
        exit: Option<oneshot::Receiver<ExitKind>>,
        lost: bool,
    }

    #[async_trait]
    impl CaptureProcess for ScriptedProcess {
        fn id(&self) -> Option<u32> {
            Some(42)
        }

        async fn wait(&mut self) -> Result<ExitKind> {
            if self.lost {
                return Err(Error::Other("no child process".to_string()));
            }
            match self.exit.take() {
                Some(rx) => Ok(rx.await.unwrap_or(ExitKind::Unknown)),
                None => Ok(ExitKind::Unknown),
            }
        }

        async fn kill(&mut self) -> Result<()> {
            if self.lost {
                return Err(Error::Other("no such process".to_string()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedBackend {
        lookups: Mutex<Vec<Result<Lookup>>>,
        lookup_calls: AtomicUsize,
        spawned: Mutex<Vec<CaptureRequest>>,
        exits: Mutex<Vec<oneshot::Receiver<ExitKind>>>,
        fail_spawn: bool,
        lose_process: bool,
    }

    #[async_trait]
    impl CaptureBackend for ScriptedBackend {
        async fn lookup_metadata(&self, login: &str) -> Result<Lookup> {
            self.lookup_calls.fetch_add(1, Ordering::SeqCst);
            let mut lookups = self.lookups.lock();
            if lookups.is_empty() {
                Err(Error::capture_launch(login, "no script"))
            } else {
                lookups.remove(0)
            }
        }

        async fn spawn(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureProcess>> {
            if self.fail_spawn {
                return Err(Error::capture_launch(&request.login, "spawn failed"));
            }
            self.spawned.lock().push(request.clone());
            let exit = self.exits.lock().pop();
            Ok(Box::new(ScriptedProcess {
                exit,
                lost: self.lose_process,
            }))
        }
    }

    fn channel() -> ChannelInfo {
        ChannelInfo {
            id: "123".to_string(),
            login: "alice".to_string(),
            display_name: Some("Alice".to_string()),
            is_live: true,
            title: None,
        }
    }

    fn launcher(
        backend: Arc<ScriptedBackend>,
        dir: &std::path::Path,
    ) -> (CaptureLauncher, Arc<ChannelRegistry>) {
        let registry = ChannelRegistry::new();
        let config = CaptureConfig {
            output_dir: dir.join("out"),
            metadata_retry_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let logs = LogSink::new(dir.join("out"), dir.join("common.log"));
        (
            CaptureLauncher::new(backend, Arc::clone(&registry), logs, config),
            registry,
        )
    }

    #[tokio::test]
    async fn test_capture_runs_to_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = oneshot::channel();
        let backend = Arc::new(ScriptedBackend {
            lookups: Mutex::new(vec![Ok(Lookup::Info(StreamMetadata {
                is_live: Some(true),
                display_name: Some("Alice".to_string()),
                title: Some("hello".to_string()),
            }))]),
            exits: Mutex::new(vec![rx]),
            ..Default::default()
        });
        let (launcher, registry) = launcher(Arc::clone(&backend), dir.path());

        let observed = Arc::new(Mutex::new(None));
        let on_spawned = {
            let registry = Arc::clone(&registry);
            let observed = Arc::clone(&observed);
            move || *observed.lock() = Some(registry.is_capturing("alice"))
        };

        let channel = channel();
        let cancel = CancellationToken::new();
        let capture = launcher.capture(&channel, &cancel, on_spawned);
        let finish = async {
            while !registry.mark_stream_ended("alice") {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            tx.send(ExitKind::Code(0)).unwrap();
        };
        let (outcome, _) = tokio::join!(capture, finish);

        let CaptureOutcome::Finished(summary) = outcome.unwrap() else {
            panic!("expected a finished capture");
        };
        assert!(summary.exit.success());
        assert!(summary.stream_ended);
        assert_eq!(*observed.lock(), Some(true));
        assert!(!registry.is_capturing("alice"));

        let spawned = backend.spawned.lock();
        assert_eq!(spawned.len(), 1);
        assert!(spawned[0].file_stem.starts_with("live_Alice_"));
        assert!(spawned[0].file_stem.ends_with("_hello"));
        assert_eq!(spawned[0].output_dir, dir.path().join("out").join("alice"));
    }

    #[tokio::test]
    async fn test_metadata_failures_fall_back_to_login_naming() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::default());
        let (launcher, _registry) = launcher(Arc::clone(&backend), dir.path());

        let outcome = launcher
            .capture(&channel(), &CancellationToken::new(), || {})
            .await
            .unwrap();
        assert!(matches!(outcome, CaptureOutcome::Finished(_)));
        assert_eq!(backend.lookup_calls.load(Ordering::SeqCst), 3);

        let spawned = backend.spawned.lock();
        assert!(spawned[0].file_stem.starts_with("live_Alice_"));
    }

    #[tokio::test]
    async fn test_offline_lookup_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend {
            lookups: Mutex::new(vec![Ok(Lookup::Offline)]),
            ..Default::default()
        });
        let (launcher, registry) = launcher(Arc::clone(&backend), dir.path());

        let err = launcher
            .capture(&channel(), &CancellationToken::new(), || {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CaptureLaunch { .. }));
        assert!(backend.spawned.lock().is_empty());
        assert!(!registry.is_capturing("alice"));
    }

    #[tokio::test]
    async fn test_already_capturing() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::default());
        let (launcher, registry) = launcher(Arc::clone(&backend), dir.path());

        let _guard = registry
            .try_begin_capture("alice", "123", PathBuf::from("x"))
            .unwrap();
        let mut called = false;
        let outcome = launcher
            .capture(&channel(), &CancellationToken::new(), || called = true)
            .await
            .unwrap();
        assert_eq!(outcome, CaptureOutcome::AlreadyCapturing);
        assert!(!called);
        assert!(backend.spawned.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_capture() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = oneshot::channel();
        let backend = Arc::new(ScriptedBackend {
            exits: Mutex::new(vec![rx]),
            ..Default::default()
        });
        let (launcher, registry) = launcher(backend, dir.path());

        let cancel = CancellationToken::new();
        let on_spawned = {
            let cancel = cancel.clone();
            move || cancel.cancel()
        };
        let outcome = launcher.capture(&channel(), &cancel, on_spawned).await.unwrap();
        assert_eq!(outcome, CaptureOutcome::Interrupted);
        assert!(!registry.is_capturing("alice"));
    }

    #[tokio::test]
    async fn test_spawn_failure_releases_capture() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend {
            fail_spawn: true,
            ..Default::default()
        });
        let (launcher, registry) = launcher(backend, dir.path());

        let result = launcher
            .capture(&channel(), &CancellationToken::new(), || {})
            .await;
        assert!(result.is_err());
        assert!(!registry.is_capturing("alice"));
    }

    #[tokio::test]
    async fn test_lost_process_reports_failed_kill() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend {
            lose_process: true,
            ..Default::default()
        });
        let (launcher, registry) = launcher(backend, dir.path());

        let err = launcher
            .capture(&channel(), &CancellationToken::new(), || {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CaptureLaunch { .. }));
        assert!(!registry.is_capturing("alice"));

        let log = tokio::fs::read_to_string(dir.path().join("out/alice/alice.log"))
            .await
            .unwrap();
        assert!(log.contains("failed to stop capture of alice: no such process"));
    }
}
