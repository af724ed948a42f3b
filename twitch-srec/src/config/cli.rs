//! Command line interface.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use super::AppConfig;

/// Watch Twitch channels and record them with yt-dlp while they are live.
#[derive(Parser, Debug, Clone)]
#[command(name = "twitch-srec", version, about)]
pub struct Args {
    /// Base directory for every relative path below.
    #[arg(long, env = "TWITCH_SREC_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Watch list, one login or channel URL per line.
    #[arg(long, env = "TWITCH_SREC_WATCH_LIST", default_value = "twitchList.txt")]
    pub watch_list: PathBuf,

    /// Credential file holding the API token.
    ///
    /// TOML with an `[auth_token]` table and a `token` key; it is created
    /// empty when missing. An INI-style `token.ini` (`[AUTH_TOKEN]`,
    /// `token=`) is not read: copy the value into this file, otherwise the
    /// public client id is used.
    #[arg(long, env = "TWITCH_SREC_TOKEN_FILE", default_value = "token.toml")]
    pub token_file: PathBuf,

    /// Recordings and per-channel logs are written below this directory.
    #[arg(long, env = "TWITCH_SREC_OUTPUT_DIR", default_value = "twitchDownload")]
    pub output_dir: PathBuf,

    /// Directory for the process log and `common.log`.
    #[arg(long, env = "TWITCH_SREC_LOG_DIR", default_value = "log")]
    pub log_dir: PathBuf,

    /// Log filter directive (overrides RUST_LOG).
    #[arg(long, env = "TWITCH_SREC_LOG_FILTER")]
    pub log_filter: Option<String>,

    /// Maximum number of lines kept in channel and common logs.
    #[arg(long, env = "TWITCH_SREC_MAX_LOG_LINES", default_value_t = crate::logging::MAX_LOG_LINE)]
    pub max_log_lines: usize,

    /// Seconds between watch list scans.
    #[arg(long, env = "TWITCH_SREC_POLL_INTERVAL", default_value_t = 60)]
    pub poll_interval_secs: u64,

    /// Seconds to wait before retrying a failed channel lookup.
    #[arg(long, env = "TWITCH_SREC_RESOLVE_RETRY_DELAY", default_value_t = 60)]
    pub resolve_retry_delay_secs: u64,

    /// Path of the yt-dlp binary.
    #[arg(long, env = "TWITCH_SREC_YTDLP", default_value = "yt-dlp")]
    pub ytdlp_path: String,

    /// Browser to load cookies from when capturing (e.g. `chromium`).
    ///
    /// Unset by default, so yt-dlp runs without browser cookies. Setups that
    /// relied on `--cookies-from-browser chromium` must pass `chromium` here.
    #[arg(long, env = "TWITCH_SREC_COOKIES_FROM_BROWSER")]
    pub cookies_from_browser: Option<String>,

    /// yt-dlp configuration file, passed along when it exists.
    #[arg(long, env = "TWITCH_SREC_YTDLP_CONFIG")]
    pub ytdlp_config: Option<PathBuf>,

    /// Seconds to wait after `stream-up` before checking the live status.
    #[arg(long, env = "TWITCH_SREC_STREAM_UP_DELAY", default_value_t = 4)]
    pub stream_up_delay_secs: u64,

    /// Seconds to wait after `viewcount` before checking the live status.
    #[arg(long, env = "TWITCH_SREC_VIEWCOUNT_DELAY", default_value_t = 0)]
    pub viewcount_delay_secs: u64,
}

fn resolve(base: Option<&Path>, path: PathBuf) -> PathBuf {
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    }
}

impl Args {
    pub fn into_config(self) -> AppConfig {
        let mut config = AppConfig::default();
        let base = self.work_dir.as_deref();

        config.credentials_path = resolve(base, self.token_file);
        config.log_dir = resolve(base, self.log_dir);
        config.common_log_path = config.log_dir.join("common.log");
        config.log_filter = self.log_filter;
        config.max_log_lines = self.max_log_lines;

        config.reconciler.watch_list_path = resolve(base, self.watch_list);
        config.reconciler.poll_interval = Duration::from_secs(self.poll_interval_secs.max(1));
        config.reconciler.resolve_retry_delay =
            Duration::from_secs(self.resolve_retry_delay_secs.max(1));

        config.capture.binary_path = self.ytdlp_path;
        config.capture.output_dir = resolve(base, self.output_dir);
        config.capture.cookies_from_browser = self.cookies_from_browser;
        config.capture.config_file = self.ytdlp_config.map(|p| resolve(base, p));

        config.live.stream_up_delay = Duration::from_secs(self.stream_up_delay_secs);
        config.live.viewcount_delay = Duration::from_secs(self.viewcount_delay_secs);

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_defaults() {
        let config = Args::parse_from(["twitch-srec"]).into_config();
        assert_eq!(config.reconciler.watch_list_path, PathBuf::from("twitchList.txt"));
        assert_eq!(config.capture.output_dir, PathBuf::from("twitchDownload"));
        assert_eq!(config.common_log_path, PathBuf::from("log/common.log"));
        assert_eq!(config.capture.cookies_from_browser, None);
    }

    #[test]
    fn test_work_dir_applies_to_relative_paths() {
        let config = Args::parse_from([
            "twitch-srec",
            "--work-dir",
            "/srv/rec",
            "--output-dir",
            "/mnt/media",
            "--stream-up-delay-secs",
            "0",
            "--cookies-from-browser",
            "chromium",
        ])
        .into_config();

        assert_eq!(
            config.reconciler.watch_list_path,
            PathBuf::from("/srv/rec/twitchList.txt")
        );
        assert_eq!(config.credentials_path, PathBuf::from("/srv/rec/token.toml"));
        assert_eq!(config.common_log_path, PathBuf::from("/srv/rec/log/common.log"));
        assert_eq!(config.capture.output_dir, PathBuf::from("/mnt/media"));
        assert_eq!(config.live.stream_up_delay, Duration::ZERO);
        assert_eq!(config.capture.cookies_from_browser.as_deref(), Some("chromium"));
    }

    #[test]
    fn test_long_help_documents_credential_and_cookie_migration() {
        let help = Args::command().render_long_help().to_string();
        assert!(help.contains("token.ini"));
        assert!(help.contains("[AUTH_TOKEN]"));
        assert!(help.contains("cookies-from-browser chromium"));
    }
}
