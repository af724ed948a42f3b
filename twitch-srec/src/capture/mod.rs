//! Capture launching.
//!
//! [`CaptureLauncher`] owns the policy (metadata retries, naming, exclusivity),
//! while a [`CaptureBackend`] owns the external tool.

mod launcher;
mod naming;
mod ytdlp;

pub use launcher::{CaptureLauncher, CaptureOutcome, CaptureSummary};
pub use naming::capture_file_stem;
pub use ytdlp::{YtDlpBackend, build_capture_args, parse_metadata_output};

use std::path::PathBuf;

use async_trait::async_trait;
use process_utils::ExitKind;

use crate::Result;

/// Metadata reported by the capture tool before recording.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamMetadata {
    pub is_live: Option<bool>,
    pub display_name: Option<String>,
    pub title: Option<String>,
}

/// Result of a metadata lookup that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Info(StreamMetadata),
    /// The tool positively reported the channel as offline.
    Offline,
}

/// What to record and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub login: String,
    pub url: String,
    /// `<output_dir>/<login>`
    pub output_dir: PathBuf,
    /// File name without extension.
    pub file_stem: String,
}

/// A running capture.
#[async_trait]
pub trait CaptureProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Wait until the process exits.
    async fn wait(&mut self) -> Result<ExitKind>;

    async fn kill(&mut self) -> Result<()>;
}

#[async_trait]
pub trait CaptureBackend: Send + Sync + 'static {
    /// Query stream metadata.
    ///
    /// An `Err` is a generic failure worth retrying; `Ok(Lookup::Offline)` is
    /// final.
    async fn lookup_metadata(&self, login: &str) -> Result<Lookup>;

    /// Start recording. Returns once the process is running.
    async fn spawn(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureProcess>>;
}
