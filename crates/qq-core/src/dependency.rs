//! Typed job-dependency edges (`after`, `afterok`, `afternotok`, `afterany`).

use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

use crate::error::CoreError;

/// The kind of dependency relationship between two jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Start once the dependency has left the queue, regardless of outcome.
    After,
    /// Start only if the dependency finished successfully.
    Afterok,
    /// Start only if the dependency finished unsuccessfully.
    Afternotok,
    /// Start once the dependency has finished, regardless of outcome.
    Afterany,
}

/// A single dependency edge: a kind plus the non-empty set of job IDs it
/// applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    /// The relationship type.
    pub kind: DependencyKind,
    /// The job IDs this dependency applies to. Never empty.
    pub job_ids: Vec<String>,
}

impl Dependency {
    /// Parses a single `<kind>=<id>[:<id>...]` dependency spec.
    pub fn parse_one(s: &str) -> Result<Self, CoreError> {
        let (kind_str, ids_str) = s
            .split_once('=')
            .ok_or_else(|| CoreError::InvalidDependency(s.to_string()))?;

        let kind: DependencyKind = kind_str
            .trim()
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| CoreError::InvalidDependency(s.to_string()))?;

        let job_ids: Vec<String> = ids_str
            .split(':')
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        if job_ids.is_empty() {
            return Err(CoreError::InvalidDependency(s.to_string()));
        }

        Ok(Dependency { kind, job_ids })
    }

    /// Parses a multi-dependency string, where individual specs are
    /// separated by commas, whitespace, or newlines.
    pub fn parse_many(s: &str) -> Result<Vec<Dependency>, CoreError> {
        s.split([',', '\n'])
            .flat_map(str::split_whitespace)
            .filter(|tok| !tok.is_empty())
            .map(Dependency::parse_one)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_dependency() {
        let dep = Dependency::parse_one("afterok=123:456").unwrap();
        assert_eq!(dep.kind, DependencyKind::Afterok);
        assert_eq!(dep.job_ids, vec!["123", "456"]);
    }

    #[test]
    fn parses_multiple_separators() {
        let deps = Dependency::parse_many("afterok=1, afterany=2:3\nafter=4").unwrap();
        assert_eq!(deps.len(), 3);
        assert_eq!(deps[1].kind, DependencyKind::Afterany);
        assert_eq!(deps[1].job_ids, vec!["2", "3"]);
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(Dependency::parse_one("maybe=1").is_err());
    }

    #[test]
    fn rejects_empty_id_list() {
        assert!(Dependency::parse_one("afterok=").is_err());
    }
}
