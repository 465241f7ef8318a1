//! Loop-job per-cycle archival: moving a cycle's runtime outputs out of the
//! way so the next cycle starts with a clean working/submission directory,
//! and restoring a previous cycle's artifacts back when a new cycle starts.

use std::path::Path;
use std::path::PathBuf;

use regex::Regex;

use qq_core::Config;
use qq_core::loop_info::printf_to_regex;

use crate::error::RuntimeResult;

/// Renders a printf-style `%d`/`%0Nd` pattern for a concrete cycle number.
fn render_cycle(pattern: &str, cycle: u32) -> String {
    let width_re = Regex::new(r"%0(\d+)d").expect("valid regex literal");
    if let Some(caps) = width_re.captures(pattern) {
        let width: usize = caps[1].parse().unwrap_or(1);
        width_re.replace(pattern, format!("{cycle:0width$}")).into_owned()
    } else {
        pattern.replace("%d", &cycle.to_string())
    }
}

/// Moves per-cycle runtime outputs between a working/submission directory
/// and a durable archive directory, named `<script-stem><cycle-pattern><suffix>`.
pub struct Archiver {
    archive_dir: PathBuf,
    pattern: String,
    script_stem: String,
}

impl Archiver {
    /// Builds an archiver rooted at `archive_dir`, naming cycles per `pattern`
    /// (e.g. `+%04d`) and files after `script_stem` (the script's filename).
    pub fn new(archive_dir: PathBuf, pattern: String, script_stem: String) -> Self {
        Archiver { archive_dir, pattern, script_stem }
    }

    /// Idempotently creates the archive directory, retrying per the
    /// configured Archiver settings.
    pub async fn make_archive_dir(&self) -> RuntimeResult<()> {
        let dir = self.archive_dir.clone();
        let cfg = &Config::global().archiver;
        qq_core::retryer::retry(cfg.retry_tries as usize, std::time::Duration::from_secs(cfg.retry_wait), || {
            let dir = dir.clone();
            async move { std::fs::create_dir_all(&dir) }
        })
        .await?;
        Ok(())
    }

    fn runtime_suffixes(&self) -> Vec<String> {
        let suffixes = &Config::global().suffixes;
        vec![suffixes.qq_out.clone(), suffixes.stdout.clone(), suffixes.stderr.clone()]
    }

    fn archived_name(&self, suffix: &str, cycle: u32) -> String {
        format!("{}{}{}", self.script_stem, render_cycle(&self.pattern, cycle), suffix)
    }

    fn runtime_name(&self, suffix: &str) -> String {
        format!("{}{}", self.script_stem, suffix)
    }

    /// Tidies leftovers from a partial previous cycle: any runtime-suffixed
    /// file in `dir` whose stem matches `stem_regex` is moved into the
    /// archive under `previous_cycle`'s pattern-derived name.
    pub async fn archive_runtime_files(&self, dir: &Path, stem_regex: &Regex, previous_cycle: u32) -> RuntimeResult<()> {
        self.make_archive_dir().await?;
        for suffix in self.runtime_suffixes() {
            let name = self.runtime_name(&suffix);
            let path = dir.join(&name);
            if !path.is_file() {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !stem_regex.is_match(stem) {
                continue;
            }
            let dest = self.archive_dir.join(self.archived_name(&suffix, previous_cycle));
            self.move_with_retry(&path, &dest).await?;
        }
        Ok(())
    }

    /// Moves this cycle's runtime outputs from `work_dir` into the archive,
    /// renamed under `cycle`'s pattern-derived name.
    pub async fn to_archive(&self, work_dir: &Path, cycle: u32) -> RuntimeResult<()> {
        self.make_archive_dir().await?;
        for suffix in self.runtime_suffixes() {
            let src = work_dir.join(self.runtime_name(&suffix));
            if !src.is_file() {
                continue;
            }
            let dest = self.archive_dir.join(self.archived_name(&suffix, cycle));
            self.move_with_retry(&src, &dest).await?;
        }
        Ok(())
    }

    /// Copies the previous cycle's archived artifacts back into `work_dir`,
    /// renamed to the runtime filenames the script expects.
    pub async fn from_archive(&self, work_dir: &Path, current_cycle: u32) -> RuntimeResult<()> {
        if current_cycle == 0 {
            return Ok(());
        }
        let previous_cycle = current_cycle - 1;
        for suffix in self.runtime_suffixes() {
            let src = self.archive_dir.join(self.archived_name(&suffix, previous_cycle));
            if !src.is_file() {
                continue;
            }
            let dest = work_dir.join(self.runtime_name(&suffix));
            self.copy_with_retry(&src, &dest).await?;
        }
        Ok(())
    }

    async fn move_with_retry(&self, src: &Path, dest: &Path) -> RuntimeResult<()> {
        let (src, dest) = (src.to_path_buf(), dest.to_path_buf());
        let cfg = &Config::global().archiver;
        qq_core::retryer::retry(cfg.retry_tries as usize, std::time::Duration::from_secs(cfg.retry_wait), || {
            let (src, dest) = (src.clone(), dest.clone());
            async move { std::fs::rename(&src, &dest) }
        })
        .await?;
        Ok(())
    }

    async fn copy_with_retry(&self, src: &Path, dest: &Path) -> RuntimeResult<()> {
        let (src, dest) = (src.to_path_buf(), dest.to_path_buf());
        let cfg = &Config::global().archiver;
        qq_core::retryer::retry(cfg.retry_tries as usize, std::time::Duration::from_secs(cfg.retry_wait), || {
            let (src, dest) = (src.clone(), dest.clone());
            async move { std::fs::copy(&src, &dest).map(|_| ()) }
        })
        .await?;
        Ok(())
    }
}

/// Compiles the stem regex used to recognize a previous cycle's leftover
/// runtime files, from the same printf pattern used for archiving.
pub fn previous_cycle_stem_regex(script_stem: &str, pattern: &str) -> Regex {
    let combined = format!("{script_stem}{pattern}");
    printf_to_regex(&combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn archiver(dir: &Path) -> Archiver {
        Archiver::new(dir.to_path_buf(), "+%04d".to_string(), "run.sh".to_string())
    }

    #[test]
    fn render_cycle_pads_with_zeros() {
        assert_eq!(render_cycle("+%04d", 7), "+0007");
        assert_eq!(render_cycle("+%d", 7), "+7");
    }

    #[tokio::test]
    async fn to_archive_moves_runtime_files_renamed() {
        let archive = tempdir().unwrap();
        let work = tempdir().unwrap();
        std::fs::write(work.path().join("run.sh.out"), b"stdout").unwrap();

        let a = archiver(archive.path());
        a.to_archive(work.path(), 3).await.unwrap();

        assert!(archive.path().join("run.sh+0003.out").is_file());
        assert!(!work.path().join("run.sh.out").exists());
    }

    #[tokio::test]
    async fn from_archive_restores_previous_cycle() {
        let archive = tempdir().unwrap();
        let work = tempdir().unwrap();
        std::fs::write(archive.path().join("run.sh+0002.out"), b"stdout").unwrap();

        let a = archiver(archive.path());
        a.from_archive(work.path(), 3).await.unwrap();

        assert!(work.path().join("run.sh.out").is_file());
    }

    #[tokio::test]
    async fn from_archive_is_noop_at_cycle_zero() {
        let archive = tempdir().unwrap();
        let work = tempdir().unwrap();
        let a = archiver(archive.path());
        a.from_archive(work.path(), 0).await.unwrap();
        assert!(!work.path().join("run.sh.out").exists());
    }

    #[test]
    fn previous_cycle_stem_regex_matches_pattern() {
        let re = previous_cycle_stem_regex("run.sh", "+%04d");
        assert!(re.is_match("run.sh+0002"));
        assert!(!re.is_match("other+0002"));
    }
}
