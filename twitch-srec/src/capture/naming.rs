use chrono::{DateTime, Local};

use super::StreamMetadata;
use crate::domain::ChannelInfo;
use crate::utils::filename::sanitize_filename;

/// File name (without extension) of a new recording.
///
/// `[live_]<display name>_<YYYYmmdd_HHMMSS_mmm>[_<title>]`. Without stream
/// metadata the name falls back to the directory's display name or the
/// login, and the title is left out.
pub fn capture_file_stem(
    channel: &ChannelInfo,
    metadata: Option<&StreamMetadata>,
    started_at: DateTime<Local>,
) -> String {
    let is_live = metadata.and_then(|p| p.is_live).unwrap_or(channel.is_live);
    let display = metadata
        .and_then(|p| p.display_name.as_deref())
        .or(channel.display_name.as_deref())
        .unwrap_or(&channel.login);
    let title = metadata.and_then(|p| p.title.as_deref());

    let mut parts = Vec::with_capacity(4);
    if is_live {
        parts.push("live".to_string());
    }
    parts.push(sanitize_filename(display));
    parts.push(started_at.format("%Y%m%d_%H%M%S_%3f").to_string());
    if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
        parts.push(sanitize_filename(title));
    }
    parts.join("_")
}
