//! Small shared helpers: duration parsing and environment truthiness.

use anyhow::Result;
use std::time::Duration;

/// Parse a human duration: `"500ms"`, `"30s"`, `"5m"`, `"2h"`, or bare
/// seconds (`"30"`).
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim();

    if duration_str.ends_with("ms") {
        let ms: u64 = duration_str[..duration_str.len() - 2].parse()?;
        Ok(Duration::from_millis(ms))
    } else if duration_str.ends_with('s') {
        let secs: u64 = duration_str[..duration_str.len() - 1].parse()?;
        Ok(Duration::from_secs(secs))
    } else if duration_str.ends_with('m') {
        let mins: u64 = duration_str[..duration_str.len() - 1].parse()?;
        Ok(Duration::from_secs(mins * 60))
    } else if duration_str.ends_with('h') {
        let hours: u64 = duration_str[..duration_str.len() - 1].parse()?;
        Ok(Duration::from_secs(hours * 3600))
    } else {
        // Default to seconds if no unit specified
        let secs: u64 = duration_str.parse()?;
        Ok(Duration::from_secs(secs))
    }
}

/// Environment-variable truthiness: 1/true/yes/on, case-insensitive.
pub fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
