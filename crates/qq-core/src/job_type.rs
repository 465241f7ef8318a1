//! The two job shapes qq understands: one-shot and looping.

use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

use crate::error::CoreError;

/// Whether a job runs once or as a resubmitting cycle of iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Runs once; success or failure ends the job.
    Standard,
    /// Resubmits itself for successive cycles until `loop.end` is reached.
    Loop,
}

impl JobType {
    /// Parses a job type name, case-insensitively.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        s.to_ascii_lowercase()
            .parse()
            .map_err(|_| CoreError::InvalidResources(format!("unknown job type '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(JobType::parse("LOOP").unwrap(), JobType::Loop);
        assert_eq!(JobType::parse("standard").unwrap(), JobType::Standard);
    }

    #[test]
    fn rejects_unknown() {
        assert!(JobType::parse("parallel").is_err());
    }

    #[test]
    fn displays_lowercase() {
        assert_eq!(JobType::Loop.to_string(), "loop");
    }
}
