//! Shared utility functions
//! Timestamps and grant duration parsing

use regex::Regex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

lazy_static::lazy_static! {
    static ref DURATION_PATTERN: Regex =
        Regex::new(r"(?i)^([0-9]+)(mth|s|m|h|d|w|y)$").expect("duration pattern is valid");
}

/// Error returned for unparsable grant durations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    #[error("Invalid duration format: {0:?} (expected e.g. 10s, 5m, 2h, 1d, 1w, 1mth, 1y)")]
    InvalidFormat(String),

    #[error("Duration out of range: {0:?}")]
    OutOfRange(String),
}

/// Get current Unix timestamp in seconds
/// Consistent implementation used throughout the codebase
#[inline]
#[must_use]
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Parse a grant duration such as `10s`, `5m`, `7w` or `1mth`.
///
/// Units: `s` seconds, `m` minutes, `h` hours, `d` days, `w` weeks,
/// `mth` 30-day months and `y` 365-day years. Units are case-insensitive.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let trimmed = input.trim();
    let captures = DURATION_PATTERN
        .captures(trimmed)
        .ok_or_else(|| DurationError::InvalidFormat(input.to_string()))?;

    let amount: u64 = captures[1]
        .parse()
        .map_err(|_| DurationError::OutOfRange(input.to_string()))?;
    let unit_secs: u64 = match captures[2].to_lowercase().as_str() {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        "mth" => 2_592_000,
        "y" => 31_536_000,
        _ => return Err(DurationError::InvalidFormat(input.to_string())),
    };

    if amount == 0 {
        return Err(DurationError::InvalidFormat(input.to_string()));
    }

    amount
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| DurationError::OutOfRange(input.to_string()))
}
