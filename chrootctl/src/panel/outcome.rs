//! Fallback classification of script output.
//!
//! Used only where a script reports through its text rather than its exit
//! status. The structured [`CommandResult::success`] always takes precedence.

use crate::bridge::CommandResult;

const FORWARDING_MARKERS: [&str; 2] = ["Localhost routing active", "Gateway:"];

/// Output mentions a warning, case-insensitively.
pub fn mentions_warning(output: &str) -> bool {
    output.to_lowercase().contains("warn")
}

/// Did the forwarding script come up?
///
/// Requires a successful result and one of the script's "routing is up"
/// markers in its output.
pub fn forwarding_started(result: &CommandResult, output: &str) -> bool {
    result.success && FORWARDING_MARKERS.iter().any(|marker| output.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_keyword() {
        assert!(mentions_warning("WARNING: hostapd not running"));
        assert!(!mentions_warning("stopped"));
    }

    #[test]
    fn test_forwarding_classification() {
        let ok = CommandResult::ok("");
        assert!(forwarding_started(&ok, "Localhost routing active"));
        assert!(forwarding_started(&ok, "Gateway: 192.168.1.1\nfailed to flush old rules"));
        assert!(!forwarding_started(&ok, "NAT configured"));
        assert!(!forwarding_started(&ok, ""));
        assert!(!forwarding_started(&ok, "  \n"));
        assert!(!forwarding_started(&ok, "error: interface down"));

        let failed = CommandResult::failure("exit code 1");
        assert!(!forwarding_started(&failed, "Gateway: 192.168.1.1"));
    }
}
