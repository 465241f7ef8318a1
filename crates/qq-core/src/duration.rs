//! Walltime durations with the two wire encodings PBS/Slurm and qq directives use.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use std::sync::LazyLock;

use crate::error::CoreError;

/// A non-negative walltime duration, stored as whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Duration(u64);

static DHHMMSS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:(\d+)-)?(\d+):([0-5]?\d):([0-5]?\d)\s*$").unwrap());
static HHMMSS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+):([0-5]?\d):([0-5]?\d)\s*$").unwrap());
static WDHMS_FULL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:\d+\s*[wdhms]\s*)+$").unwrap());
static WDHMS_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*([wdhms])").unwrap());

const WEEK: u64 = 7 * 24 * 3600;
const DAY: u64 = 24 * 3600;
const HOUR: u64 = 3600;
const MINUTE: u64 = 60;

impl Duration {
    /// The zero duration.
    pub const ZERO: Duration = Duration(0);

    /// Builds a `Duration` from a whole number of seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Duration(secs)
    }

    /// Returns the duration as whole seconds.
    pub const fn as_secs(self) -> u64 {
        self.0
    }

    /// Parses `[D-]HH:MM:SS` (PBS/Slurm walltime notation). The days
    /// component is optional; hours may exceed 24.
    pub fn parse_dhhmmss(s: &str) -> Result<Self, CoreError> {
        let caps = DHHMMSS_RE
            .captures(s)
            .ok_or_else(|| CoreError::InvalidDuration(s.to_string()))?;
        let days: u64 = caps
            .get(1)
            .map(|m| m.as_str().parse().unwrap_or(0))
            .unwrap_or(0);
        let hours: u64 = caps[2].parse().unwrap();
        let minutes: u64 = caps[3].parse().unwrap();
        let seconds: u64 = caps[4].parse().unwrap();
        Ok(Duration(days * DAY + hours * HOUR + minutes * MINUTE + seconds))
    }

    /// Parses plain `HH:MM:SS` (no day component).
    pub fn parse_hhmmss(s: &str) -> Result<Self, CoreError> {
        let caps = HHMMSS_RE
            .captures(s)
            .ok_or_else(|| CoreError::InvalidDuration(s.to_string()))?;
        let hours: u64 = caps[1].parse().unwrap();
        let minutes: u64 = caps[2].parse().unwrap();
        let seconds: u64 = caps[3].parse().unwrap();
        Ok(Duration(hours * HOUR + minutes * MINUTE + seconds))
    }

    /// Renders as `H:MM:SS` (hours unpadded, matching the scheduler's own
    /// rendering of totals that may exceed 24).
    pub fn to_hhmmss(self) -> String {
        let (h, rem) = (self.0 / HOUR, self.0 % HOUR);
        let (m, s) = (rem / MINUTE, rem % MINUTE);
        format!("{h}:{m:02}:{s:02}")
    }

    /// Parses the compact `NwNdNhNmNs` form. Tokens may be compact or
    /// whitespace-separated; the empty/whitespace-only string means zero.
    pub fn parse_wdhms(s: &str) -> Result<Self, CoreError> {
        if s.trim().is_empty() {
            return Ok(Duration::ZERO);
        }
        if !WDHMS_FULL_RE.is_match(s) {
            return Err(CoreError::InvalidDuration(s.to_string()));
        }

        let mut total = 0u64;
        for caps in WDHMS_TOKEN_RE.captures_iter(s) {
            let value: u64 = caps[1].parse().unwrap();
            let unit_secs = match caps[2].to_ascii_lowercase().as_str() {
                "w" => WEEK,
                "d" => DAY,
                "h" => HOUR,
                "m" => MINUTE,
                "s" => 1,
                _ => unreachable!(),
            };
            total += value * unit_secs;
        }
        Ok(Duration(total))
    }

    /// Renders as the compact `NwNdNhNmNs` form, omitting zero components
    /// except that the zero duration renders as `0s`.
    pub fn to_wdhms(self) -> String {
        if self.0 == 0 {
            return "0s".to_string();
        }

        let mut remaining = self.0;
        let weeks = remaining / WEEK;
        remaining %= WEEK;
        let days = remaining / DAY;
        remaining %= DAY;
        let hours = remaining / HOUR;
        remaining %= HOUR;
        let minutes = remaining / MINUTE;
        let seconds = remaining % MINUTE;

        let mut out = String::new();
        for (value, unit) in [(weeks, 'w'), (days, 'd'), (hours, 'h'), (minutes, 'm'), (seconds, 's')] {
            if value > 0 {
                out.push_str(&value.to_string());
                out.push(unit);
            }
        }
        out
    }

    /// Renders as `Nw Nd HH:MM:SS` for human display: weeks/days shown
    /// only when non-zero, hours/minutes/seconds always zero-padded.
    pub fn to_display(self) -> String {
        let mut remaining = self.0;
        let weeks = remaining / WEEK;
        remaining %= WEEK;
        let days = remaining / DAY;
        remaining %= DAY;
        let hours = remaining / HOUR;
        remaining %= HOUR;
        let minutes = remaining / MINUTE;
        let seconds = remaining % MINUTE;

        let mut parts = Vec::new();
        if weeks > 0 {
            parts.push(format!("{weeks}w"));
        }
        if days > 0 {
            parts.push(format!("{days}d"));
        }
        parts.push(format!("{hours:02}:{minutes:02}:{seconds:02}"));
        parts.join(" ")
    }

    /// Total hours, rounded up, for propagation as `QQ_WALLTIME`.
    pub fn as_hours_ceil(self) -> u64 {
        self.0.div_ceil(HOUR)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hhmmss())
    }
}

impl FromStr for Duration {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Duration::parse_dhhmmss(s)
    }
}

impl TryFrom<String> for Duration {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Duration::parse_dhhmmss(&value)
    }
}

impl From<Duration> for String {
    fn from(value: Duration) -> Self {
        value.to_hhmmss()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dhhmmss_round_trip() {
        assert_eq!(Duration::parse_dhhmmss("2-12:34:56").unwrap().as_secs(), 2 * DAY + 12 * HOUR + 34 * MINUTE + 56);
        assert_eq!(Duration::parse_dhhmmss("100:00:00").unwrap().as_secs(), 100 * HOUR);
    }

    #[test]
    fn wdhms_round_trip_is_identity_on_canonical_form() {
        for canonical in ["1w2d3h4m5s", "1h30m", "0s", "2d1h"] {
            let d = Duration::parse_wdhms(canonical).unwrap();
            assert_eq!(d.to_wdhms(), canonical);
        }
    }

    #[test]
    fn wdhms_to_hhmmss_cross_conversion() {
        let d = Duration::parse_wdhms("1w2d3h4m5s").unwrap();
        assert_eq!(d.to_hhmmss(), "195:04:05");

        let back = Duration::parse_hhmmss("195:04:05").unwrap();
        assert_eq!(back.to_wdhms(), "1w2d3h4m5s");
    }

    #[test]
    fn empty_wdhms_is_zero() {
        assert_eq!(Duration::parse_wdhms("").unwrap(), Duration::ZERO);
        assert_eq!(Duration::ZERO.to_wdhms(), "0s");
    }

    #[test]
    fn malformed_input_fails_not_panics() {
        assert!(Duration::parse_dhhmmss("not-a-duration").is_err());
        assert!(Duration::parse_wdhms("3x").is_err());
        assert!(Duration::parse_hhmmss("1:99:00").is_err());
    }

    #[test]
    fn display_form_omits_zero_weeks_and_days() {
        let short = Duration::from_secs(45);
        assert_eq!(short.to_display(), "00:00:45");
        let long = Duration::from_secs(10 * DAY + 5 * HOUR + 6 * MINUTE + 7);
        assert_eq!(long.to_display(), "1w 3d 05:06:07");
    }
}
