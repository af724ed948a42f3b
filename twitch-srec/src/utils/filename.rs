//! Filename sanitization for recording output names.
//!
//! Names are built from stream titles and display names, which may contain
//! anything. The result must be valid on Windows, Linux and macOS, must not
//! be interpreted by yt-dlp's output template engine, and must fit in a
//! single path component.

/// Characters that are invalid in Windows filenames, plus `%` which yt-dlp
/// would treat as an output template field.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*', '%'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Byte budget for one name component, leaving room for the extension yt-dlp appends.
pub const MAX_COMPONENT_BYTES: usize = 200;

/// Sanitize a string for use as (part of) a recording filename.
///
/// Invalid and control characters become `_` (runs collapse to one), spaces
/// become `_`, leading/trailing dots and underscores are trimmed, reserved
/// Windows names get a `_` prefix and the result is cut to
/// [`MAX_COMPONENT_BYTES`] on a char boundary. Empty input yields `"unnamed"`.
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || c.is_whitespace() || INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = c == '_';
        }
    }

    let trimmed = result.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    let reserved = WINDOWS_RESERVED_NAMES
        .iter()
        .any(|name| upper == *name || upper.starts_with(&format!("{name}.")));
    let name = if reserved {
        format!("_{trimmed}")
    } else {
        trimmed.to_string()
    };

    truncate_on_char_boundary(name, MAX_COMPONENT_BYTES)
}

fn truncate_on_char_boundary(mut s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let mut cut = max_bytes;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_only_invalid() {
        assert_eq!(sanitize_filename(""), "unnamed");
        assert_eq!(sanitize_filename("???"), "unnamed");
        assert_eq!(sanitize_filename("  .. "), "unnamed");
    }

    #[test]
    fn test_spaces_and_invalid_collapse() {
        assert_eq!(sanitize_filename("Just Chatting | late night"), "Just_Chatting_late_night");
        assert_eq!(sanitize_filename("a<>:\"b"), "a_b");
        assert_eq!(sanitize_filename("100% speedrun"), "100_speedrun");
    }

    #[test]
    fn test_reserved_names() {
        assert_eq!(sanitize_filename("con"), "_con");
        assert_eq!(sanitize_filename("NUL.txt"), "_NUL.txt");
    }

    #[test]
    fn test_unicode_preserved() {
        assert_eq!(sanitize_filename("配信 テスト"), "配信_テスト");
    }

    #[test]
    fn test_long_titles_truncated_on_char_boundary() {
        let title = "é".repeat(300);
        let name = sanitize_filename(&title);
        assert!(name.len() <= MAX_COMPONENT_BYTES);
        assert!(name.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_idempotency() {
        for input in ["hello?world", "CON", "  test  ", "100%", "配信 テスト"] {
            let once = sanitize_filename(input);
            assert_eq!(once, sanitize_filename(&once), "input: {input}");
        }
    }
}
