//! Watch list file.
//!
//! One entry per line: a login or a channel URL. Blank lines and lines
//! starting with `//` or `#` are ignored.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::info;

use crate::Result;
use crate::domain::parse_login;
use crate::utils::fs::{create_if_missing, io_error};

/// Written when the watch list does not exist yet.
pub const PLACEHOLDER: &str = "// Input Twitch Login ID\n";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchList {
    pub logins: BTreeSet<String>,
    /// Non-comment lines that are neither a login nor a channel URL.
    pub invalid: Vec<String>,
}

pub fn parse_watch_list(contents: &str) -> WatchList {
    let mut list = WatchList::default();
    for line in contents.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("//") || line.starts_with('#') {
            continue;
        }
        match parse_login(line) {
            Some(login) => {
                list.logins.insert(login);
            }
            None => list.invalid.push(line.to_string()),
        }
    }
    list
}

/// Read the watch list, creating the placeholder file if it is missing.
pub async fn read_watch_list(path: &Path) -> Result<WatchList> {
    if create_if_missing(path, PLACEHOLDER).await? {
        info!(path = %path.display(), "Created watch list");
    }
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| io_error("reading watch list", path, e))?;
    Ok(parse_watch_list(&contents))
}
