//! Channel identity and live status.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.|m\.)?twitch\.tv/([A-Za-z0-9_]+)/?(?:[?#].*)?$").unwrap()
});

static LOGIN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{1,25}$").unwrap());

const BASE_URL: &str = "https://www.twitch.tv";

/// Extract a channel login from a watch-list entry.
///
/// Accepts a bare login (`alice`) or a channel URL
/// (`https://www.twitch.tv/alice`). Logins are case-insensitive on the
/// platform and are normalized to lower case.
pub fn parse_login(entry: &str) -> Option<String> {
    let entry = entry.trim();
    let login = match URL_REGEX.captures(entry) {
        Some(caps) => caps.get(1)?.as_str(),
        None => entry,
    };
    LOGIN_REGEX
        .is_match(login)
        .then(|| login.to_ascii_lowercase())
}

/// Public page of a channel, which is also what the capture tool is given.
pub fn channel_url(login: &str) -> String {
    format!("{BASE_URL}/{login}")
}

/// Live status as last observed for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiveState {
    /// Nothing observed yet.
    #[default]
    Unknown,
    Offline,
    Live,
}

impl LiveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Offline => "OFFLINE",
            Self::Live => "LIVE",
        }
    }

    pub fn from_live(is_live: bool) -> Self {
        if is_live { Self::Live } else { Self::Offline }
    }
}

impl fmt::Display for LiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved channel as reported by the directory API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Stable numeric channel id.
    pub id: String,
    pub login: String,
    pub display_name: Option<String>,
    pub is_live: bool,
    /// Title of the current broadcast, when live.
    pub title: Option<String>,
}

impl ChannelInfo {
    pub fn live_state(&self) -> LiveState {
        LiveState::from_live(self.is_live)
    }
}

/// Outcome of a successful directory lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(ChannelInfo),
    /// The login does not belong to any channel.
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_login() {
        assert_eq!(parse_login("alice"), Some("alice".to_string()));
        assert_eq!(parse_login("  Alice_99 \r"), Some("alice_99".to_string()));
    }

    #[test]
    fn test_parse_url() {
        assert_eq!(
            parse_login("https://www.twitch.tv/Alice"),
            Some("alice".to_string())
        );
        assert_eq!(parse_login("twitch.tv/bob/"), Some("bob".to_string()));
        assert_eq!(
            parse_login("https://m.twitch.tv/carol?referrer=raid"),
            Some("carol".to_string())
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(parse_login(""), None);
        assert_eq!(parse_login("not a login"), None);
        assert_eq!(parse_login("https://youtube.com/alice"), None);
        assert_eq!(parse_login(&"a".repeat(26)), None);
    }

    #[test]
    fn test_channel_url() {
        assert_eq!(channel_url("alice"), "https://www.twitch.tv/alice");
    }

    #[test]
    fn test_live_state() {
        assert_eq!(LiveState::default(), LiveState::Unknown);
        assert_eq!(LiveState::from_live(true), LiveState::Live);
        assert_eq!(LiveState::from_live(false).to_string(), "OFFLINE");
    }
}
