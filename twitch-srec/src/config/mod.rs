//! Runtime configuration.
//!
//! [`AppConfig`] is assembled once at startup from the command line (see
//! [`cli::Args`], every flag also readable from the environment) and the
//! credential file, then shared read-only with every component.

pub mod cli;
mod credentials;

pub use cli::Args;
pub use credentials::{Credentials, DEFAULT_CLIENT_ID};

use std::path::PathBuf;
use std::time::Duration;

use crate::logging::MAX_LOG_LINE;
use crate::scheduler::ReconnectTrackerConfig;

/// Directory API settings.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// GraphQL endpoint.
    pub endpoint: String,
    /// Value of the `Client-ID` header.
    pub client_id: String,
    /// Per-request timeout; expiry counts as a connectivity failure.
    pub request_timeout: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://gql.twitch.tv/gql".to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// PubSub connection settings.
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    pub endpoint: String,
    /// Topic prefix; the channel id is appended after a dot.
    pub topic_prefix: String,
    /// Sent as `auth_token` in LISTEN requests.
    pub auth_token: String,
    /// Interval between client PINGs. The server drops clients that stay
    /// silent for five minutes.
    pub heartbeat_interval: Duration,
    /// How long to wait for the PONG before treating the socket as dead.
    pub pong_timeout: Duration,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://pubsub-edge.twitch.tv/".to_string(),
            topic_prefix: "video-playback-by-id".to_string(),
            auth_token: DEFAULT_CLIENT_ID.to_string(),
            heartbeat_interval: Duration::from_secs(4 * 60),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

impl PubSubConfig {
    pub fn topic_for(&self, channel_id: &str) -> String {
        format!("{}.{}", self.topic_prefix, channel_id)
    }
}

/// Watch list polling settings.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub watch_list_path: PathBuf,
    pub poll_interval: Duration,
    /// Delay before retrying a login whose lookup failed transiently.
    pub resolve_retry_delay: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            watch_list_path: PathBuf::from("twitchList.txt"),
            poll_interval: Duration::from_secs(60),
            resolve_retry_delay: Duration::from_secs(60),
        }
    }
}

/// Capture tool settings.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Path of the `yt-dlp` binary.
    pub binary_path: String,
    /// Recordings go to `<output_dir>/<login>/`.
    pub output_dir: PathBuf,
    /// Browser to borrow cookies from (`--cookies-from-browser`).
    pub cookies_from_browser: Option<String>,
    /// Extra yt-dlp config file, used only when it exists.
    pub config_file: Option<PathBuf>,
    pub metadata_attempts: u32,
    pub metadata_retry_delay: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            binary_path: "yt-dlp".to_string(),
            output_dir: PathBuf::from("twitchDownload"),
            cookies_from_browser: None,
            config_file: None,
            metadata_attempts: 3,
            metadata_retry_delay: Duration::from_secs(1),
        }
    }
}

/// How a live notification is turned into a capture.
#[derive(Debug, Clone)]
pub struct LiveTriggerPolicy {
    /// Wait after `stream-up` before polling; the directory lags behind PubSub.
    pub stream_up_delay: Duration,
    /// Wait after `viewcount` before polling.
    pub viewcount_delay: Duration,
    /// Failed launches tolerated per live occurrence.
    pub max_capture_attempts: u32,
    /// Consecutive "not live" polls tolerated per live occurrence.
    pub max_offline_polls: u32,
    pub offline_poll_backoff: Duration,
}

impl Default for LiveTriggerPolicy {
    fn default() -> Self {
        Self {
            stream_up_delay: Duration::from_secs(4),
            viewcount_delay: Duration::ZERO,
            max_capture_attempts: 3,
            max_offline_polls: 10,
            offline_poll_backoff: Duration::from_millis(500),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub credentials_path: PathBuf,
    /// Directory of the rolling process logs.
    pub log_dir: PathBuf,
    pub common_log_path: PathBuf,
    pub log_filter: Option<String>,
    pub max_log_lines: usize,
    pub directory: DirectoryConfig,
    pub pubsub: PubSubConfig,
    pub reconciler: ReconcilerConfig,
    pub capture: CaptureConfig,
    pub live: LiveTriggerPolicy,
    pub reconnect: ReconnectTrackerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from("token.toml"),
            log_dir: PathBuf::from("log"),
            common_log_path: PathBuf::from("log").join("common.log"),
            log_filter: None,
            max_log_lines: MAX_LOG_LINE,
            directory: DirectoryConfig::default(),
            pubsub: PubSubConfig::default(),
            reconciler: ReconcilerConfig::default(),
            capture: CaptureConfig::default(),
            live: LiveTriggerPolicy::default(),
            reconnect: ReconnectTrackerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Apply the credential file: a non-empty token replaces the built-in
    /// client id everywhere it is sent.
    pub fn apply_credentials(&mut self, credentials: &Credentials) {
        if let Some(token) = credentials.token() {
            self.directory.client_id = token.to_string();
            self.pubsub.auth_token = token.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.max_log_lines, 1000);
        assert_eq!(config.reconciler.poll_interval, Duration::from_secs(60));
        assert_eq!(config.live.max_capture_attempts, 3);
        assert_eq!(config.live.max_offline_polls, 10);
        assert_eq!(config.live.stream_up_delay, Duration::from_secs(4));
        assert_eq!(config.live.viewcount_delay, Duration::ZERO);
        assert_eq!(config.common_log_path, PathBuf::from("log/common.log"));
    }

    #[test]
    fn test_topic_for() {
        let pubsub = PubSubConfig::default();
        assert_eq!(pubsub.topic_for("123"), "video-playback-by-id.123");
    }

    #[test]
    fn test_apply_credentials() {
        let mut config = AppConfig::default();
        config.apply_credentials(&Credentials::default());
        assert_eq!(config.directory.client_id, DEFAULT_CLIENT_ID);

        config.apply_credentials(&Credentials::with_token("secret"));
        assert_eq!(config.directory.client_id, "secret");
        assert_eq!(config.pubsub.auth_token, "secret");
    }
}
