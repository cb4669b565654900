//! Utility helpers: path resolution, timestamps, string manipulation.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Get the data directory (e.g. `~/.dkl/`).
pub fn get_data_path() -> PathBuf {
    let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".dkl")
}

/// Format a Unix timestamp (seconds) as RFC 3339, falling back to the epoch.
pub fn rfc3339_from_unix(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .unwrap_or_default()
        .to_rfc3339()
}

/// Cut a string to at most `max_bytes` bytes without splitting a character.
pub fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Replace all but the last few characters of a secret with `*`.
pub fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return "(not set)".to_string();
    }
    let count = secret.chars().count();
    let visible = if count > 8 { 2 } else { 0 };
    let mut masked: String = "*".repeat(count - visible);
    masked.extend(secret.chars().skip(count - visible));
    masked
}

/// Expand `~` to the home directory in a path string.
pub fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path == "~" {
        let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(path.trim_start_matches('~').trim_start_matches('/'))
    } else {
        PathBuf::from(path)
    }
}


