//! Small text helpers shared by the feature workflows.

use chrono::{DateTime, Utc};

/// Default backup archive name for the given moment.
///
/// Colons are not allowed on the shared-storage filesystems Android mounts
/// at `/sdcard`, so the time part uses dashes: `chroot-backup-2024-05-01T10-20-30.tar.gz`.
pub fn backup_file_name(now: DateTime<Utc>) -> String {
    format!("chroot-backup-{}.tar.gz", now.format("%Y-%m-%dT%H-%M-%S"))
}

/// Escape `value` for use inside a double-quoted shell word.
///
/// # Returns
/// The escaped text without surrounding quotes.
pub fn escape_double_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Wrap `value` in double quotes, escaping what the shell would expand.
pub fn double_quote(value: &str) -> String {
    format!("\"{}\"", escape_double_quoted(value))
}

/// Split a comma separated script reply into trimmed, non-empty items.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

/// Normalize an `ls -lh` size column for display.
///
/// # Returns
/// * `"8GB"` for `"8G"` or `"8.0G"`
/// * `"Unknown"` when the probe produced nothing
/// * the input unchanged otherwise
pub fn format_image_size(raw: &str) -> String {
    let size = raw.trim();
    if size.is_empty() {
        return "Unknown".to_string();
    }
    match size.strip_suffix('G') {
        Some(number) => format!("{}GB", number.strip_suffix(".0").unwrap_or(number)),
        None => size.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_backup_file_name() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 20, 30).unwrap();
        assert_eq!(
            backup_file_name(now),
            "chroot-backup-2024-05-01T10-20-30.tar.gz"
        );
    }

    #[test]
    fn test_double_quote() {
        assert_eq!(double_quote("/sdcard/a b.tar.gz"), "\"/sdcard/a b.tar.gz\"");
        assert_eq!(double_quote("p\"$x`"), "\"p\\\"\\$x\\`\"");
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("alice, bob,,\n"), vec!["alice", "bob"]);
        assert!(split_list("  ").is_empty());
    }

    #[test]
    fn test_format_image_size() {
        assert_eq!(format_image_size("8G\n"), "8GB");
        assert_eq!(format_image_size("16.0G"), "16GB");
        assert_eq!(format_image_size("512M"), "512M");
        assert_eq!(format_image_size(""), "Unknown");
    }
}
