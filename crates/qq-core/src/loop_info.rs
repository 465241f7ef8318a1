//! Metadata for loop jobs: the cycle range and where finished cycles are archived.

use std::path::Path;
use std::path::PathBuf;

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

use crate::error::CoreError;

/// Converts a printf-style numeric pattern (`"md%04d"`, `"file%03d_part%02d"`)
/// into an equivalent regular expression, anchored for a full-string match.
pub fn printf_to_regex(pattern: &str) -> Regex {
    let escaped = regex::escape(pattern);
    let with_width = regex::Regex::new(r"%0(\d+)d")
        .unwrap()
        .replace_all(&escaped, r"\d{$1}")
        .into_owned();
    let with_any = with_width.replace("%d", r"\d+");
    Regex::new(&format!("^{with_any}$")).expect("printf-derived pattern is always valid regex")
}

/// True if `pattern` contains a printf-style numeric placeholder (`%d` or
/// `%0Nd`).
pub fn is_printf_pattern(pattern: &str) -> bool {
    pattern.contains("%d") || Regex::new(r"%0\d+d").unwrap().is_match(pattern)
}

/// Metadata describing a loop job's cycle range and archive location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopInfo {
    /// The first cycle number.
    pub start: u32,
    /// The last cycle number; the loop stops resubmitting once this cycle finishes.
    pub end: u32,
    /// The current cycle number.
    pub current: u32,
    /// Directory where completed-cycle files are archived.
    pub archive: PathBuf,
    /// printf-style naming pattern used for archived files.
    pub archive_format: String,
}

impl LoopInfo {
    /// Builds a new `LoopInfo`, validating `start <= current <= end` and that
    /// the archive directory is not the job's submission directory.
    ///
    /// If `current` is `None`, it is inferred from the highest cycle number
    /// already present in `archive` (falling back to `start` if `archive`
    /// doesn't exist or contains no matching files).
    pub fn new(
        start: u32,
        end: u32,
        archive: PathBuf,
        archive_format: String,
        current: Option<u32>,
        job_dir: Option<&Path>,
    ) -> Result<Self, CoreError> {
        if let Some(job_dir) = job_dir {
            if same_path(&archive, job_dir) {
                return Err(CoreError::InvalidLoopInfo(
                    "the job's submission directory cannot be used as its loop archive".into(),
                ));
            }
        }

        if start > end {
            return Err(CoreError::InvalidLoopInfo(format!(
                "loop-start ({start}) cannot be higher than loop-end ({end})"
            )));
        }

        let current = current.unwrap_or_else(|| detect_cycle(&archive, &archive_format, start));

        if current > end {
            return Err(CoreError::InvalidLoopInfo(format!(
                "current cycle number ({current}) cannot be higher than loop-end ({end})"
            )));
        }

        Ok(LoopInfo {
            start,
            end,
            current,
            archive,
            archive_format,
        })
    }

    /// True once `current` has reached `end`; no further resubmission should occur.
    pub fn is_final_cycle(&self) -> bool {
        self.current >= self.end
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Scans `archive` for files whose stem matches `archive_format` (converted
/// via [`printf_to_regex`]) and returns the highest embedded cycle number
/// found, or `start` if none match or `archive` does not exist.
fn detect_cycle(archive: &Path, archive_format: &str, start: u32) -> u32 {
    if !archive.is_dir() {
        return start;
    }

    let stem_pattern = printf_to_regex(archive_format);
    let digits = Regex::new(r"\d+").unwrap();

    let mut max_cycle = start;
    let Ok(entries) = std::fs::read_dir(archive) else {
        return start;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !stem_pattern.is_match(stem) {
            continue;
        }
        if let Some(m) = digits.find(stem) {
            if let Ok(number) = m.as_str().parse::<u32>() {
                max_cycle = max_cycle.max(number);
            }
        }
    }
    max_cycle
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn printf_conversion_handles_width_and_bare() {
        let re = printf_to_regex("md%04d");
        assert!(re.is_match("md0007"));
        assert!(!re.is_match("md7"));

        let re = printf_to_regex("file%d");
        assert!(re.is_match("file123"));
    }

    #[test]
    fn is_printf_pattern_detects_placeholders() {
        assert!(is_printf_pattern("+%04d"));
        assert!(!is_printf_pattern("fixed-name"));
    }

    #[test]
    fn rejects_start_after_end() {
        let dir = tempdir().unwrap();
        assert!(LoopInfo::new(5, 1, dir.path().to_path_buf(), "+%04d".into(), None, None).is_err());
    }

    #[test]
    fn rejects_archive_equal_to_job_dir() {
        let dir = tempdir().unwrap();
        let err = LoopInfo::new(
            0,
            10,
            dir.path().to_path_buf(),
            "+%04d".into(),
            Some(0),
            Some(dir.path()),
        );
        assert!(err.is_err());
    }

    #[test]
    fn detects_current_cycle_from_archive_contents() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("+0003.out"), b"").unwrap();
        std::fs::write(dir.path().join("+0007.out"), b"").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), b"").unwrap();

        let info = LoopInfo::new(0, 10, dir.path().to_path_buf(), "+%04d".into(), None, None).unwrap();
        assert_eq!(info.current, 7);
    }

    #[test]
    fn missing_archive_falls_back_to_start() {
        let info = LoopInfo::new(
            2,
            10,
            PathBuf::from("/nonexistent/archive/dir"),
            "+%04d".into(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(info.current, 2);
    }

    #[test]
    fn is_final_cycle_when_current_equals_end() {
        let info = LoopInfo::new(0, 5, PathBuf::from("/nonexistent"), "+%04d".into(), Some(5), None).unwrap();
        assert!(info.is_final_cycle());
    }
}
