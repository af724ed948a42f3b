//! yt-dlp backend.

use std::ffi::OsString;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{ExitKind, tokio_command};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{CaptureBackend, CaptureProcess, CaptureRequest, Lookup, StreamMetadata};
use crate::config::CaptureConfig;
use crate::domain::channel_url;
use crate::logging::{ChannelLog, LogSink};
use crate::{Error, Result};

const METADATA_TIMEOUT: Duration = Duration::from_secs(60);

/// Markers yt-dlp prints when the channel has no live stream.
const OFFLINE_MARKERS: &[&str] = &["not currently live", "is offline"];

/// Parse the output of `--print is_live --print uploader --print title`.
pub fn parse_metadata_output(stdout: &str) -> StreamMetadata {
    let mut lines = stdout.lines().map(str::trim);
    let field = |line: Option<&str>| {
        line.filter(|l| !l.is_empty() && *l != "NA")
            .map(str::to_string)
    };

    let is_live = match lines.next() {
        Some("True") => Some(true),
        Some("False") => Some(false),
        _ => None,
    };
    StreamMetadata {
        is_live,
        display_name: field(lines.next()),
        title: field(lines.next()),
    }
}

fn shared_args(config: &CaptureConfig, config_file_exists: bool) -> Vec<OsString> {
    let mut args = Vec::new();
    if let Some(browser) = &config.cookies_from_browser {
        args.push("--cookies-from-browser".into());
        args.push(browser.into());
    }
    if let Some(path) = config.config_file.as_ref().filter(|_| config_file_exists) {
        args.push("--config-locations".into());
        args.push(path.into());
    }
    args
}

/// Arguments of the recording invocation.
pub fn build_capture_args(
    config: &CaptureConfig,
    request: &CaptureRequest,
    config_file_exists: bool,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        request.url.as_str().into(),
        "--abort-on-unavailable-fragment".into(),
    ];
    args.extend(shared_args(config, config_file_exists));
    args.push("-P".into());
    args.push(request.output_dir.as_os_str().to_owned());
    args.push("-o".into());
    args.push(format!("{}.%(ext)s", request.file_stem).into());
    args
}

/// Runs the `yt-dlp` binary.
pub struct YtDlpBackend {
    config: CaptureConfig,
    logs: LogSink,
}

impl YtDlpBackend {
    pub fn new(config: CaptureConfig, logs: LogSink) -> Self {
        Self { config, logs }
    }

    async fn config_file_exists(&self) -> bool {
        match &self.config.config_file {
            Some(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            None => false,
        }
    }
}

#[async_trait]
impl CaptureBackend for YtDlpBackend {
    async fn lookup_metadata(&self, login: &str) -> Result<Lookup> {
        let mut cmd = tokio_command(&self.config.binary_path);
        cmd.arg(channel_url(login))
            .args(["--skip-download", "--no-warnings"])
            .args(["--print", "is_live", "--print", "uploader", "--print", "title"])
            .args(shared_args(&self.config, self.config_file_exists().await))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(METADATA_TIMEOUT, cmd.output())
            .await
            .map_err(|_| Error::capture_launch(login, "metadata lookup timed out"))?
            .map_err(|e| Error::capture_launch(login, format!("failed to run yt-dlp: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        trace!(login, %stdout, %stderr, "Metadata lookup output");

        if output.status.success() {
            return Ok(Lookup::Info(parse_metadata_output(&stdout)));
        }
        if OFFLINE_MARKERS
            .iter()
            .any(|marker| stderr.contains(marker) || stdout.contains(marker))
        {
            return Ok(Lookup::Offline);
        }

        let reason = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("no output");
        Err(Error::capture_launch(
            login,
            format!(
                "metadata lookup failed ({}): {reason}",
                ExitKind::from_status(output.status)
            ),
        ))
    }

    async fn spawn(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureProcess>> {
        let args = build_capture_args(&self.config, request, self.config_file_exists().await);
        debug!(login = %request.login, ?args, "Spawning yt-dlp");

        let mut child = tokio_command(&self.config.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::capture_launch(&request.login, format!("failed to spawn yt-dlp: {e}"))
            })?;

        let log = self.logs.channel(&request.login);
        let forwarder = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(forward_stderr(stderr, log)));

        Ok(Box::new(YtDlpProcess { child, forwarder }))
    }
}

/// Copy yt-dlp's errors and warnings into the channel log.
async fn forward_stderr(stderr: ChildStderr, log: ChannelLog) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.contains("ERROR") || line.contains("WARNING") {
                    log.warn(&line).await;
                } else {
                    trace!(login = %log.login(), "{line}");
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(login = %log.login(), error = %e, "Error reading yt-dlp stderr");
                break;
            }
        }
    }
}

struct YtDlpProcess {
    child: Child,
    forwarder: Option<JoinHandle<()>>,
}

#[async_trait]
impl CaptureProcess for YtDlpProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<ExitKind> {
        let status = self.child.wait().await?;
        if let Some(forwarder) = self.forwarder.take() {
            // stderr closes with the process; this only drains what is buffered.
            let _ = tokio::time::timeout(Duration::from_secs(5), forwarder).await;
        }
        Ok(ExitKind::from_status(status))
    }

    async fn kill(&mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }
}
