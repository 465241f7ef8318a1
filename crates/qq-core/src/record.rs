//! The persisted per-job record (`.qqinfo` file): submission parameters,
//! resource allocation, and the last state qq itself observed.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DATE_FORMAT;
use crate::dependency::Dependency;
use crate::error::CoreError;
use crate::job_type::JobType;
use crate::loop_info::LoopInfo;
use crate::resources::Resources;
use crate::state::NaiveState;

fn serialize_timestamp<S: serde::Serializer>(
    value: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.format(DATE_FORMAT).to_string())
}

fn deserialize_timestamp<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<DateTime<Utc>, D::Error> {
    let s = String::deserialize(deserializer)?;
    chrono::NaiveDateTime::parse_from_str(&s, DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

fn serialize_opt_timestamp<S: serde::Serializer>(
    value: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serialize_timestamp(v, serializer),
        None => serializer.serialize_none(),
    }
}

fn deserialize_opt_timestamp<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        Some(s) => chrono::NaiveDateTime::parse_from_str(&s, DATE_FORMAT)
            .map(|naive| Some(naive.and_utc()))
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// The full, persisted state of a single qq job: submission parameters,
/// allocated resources, and qq's own view of its lifecycle state.
///
/// This is pure data; interpreting it against the live batch system (to
/// derive a [`crate::state::RealState`]) is the job of the runtime crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Name of the batch system backend this job was submitted to
    /// (`"pbs"`, `"slurm"`, `"vbs"`), resolved by the batch crate's registry.
    pub batch_system: String,
    /// Version of qq that submitted the job.
    pub qq_version: String,
    /// Name of the user who submitted the job.
    pub username: String,
    /// Job identifier inside the batch system.
    pub job_id: String,
    /// Job name.
    pub job_name: String,
    /// Name of the submitted script.
    pub script_name: String,
    /// Queue the job was submitted to.
    pub queue: String,
    /// Standard vs. loop job.
    pub job_type: JobType,
    /// Host the job was submitted from.
    pub input_machine: String,
    /// Directory the job was submitted from.
    pub input_dir: PathBuf,
    /// Last state qq itself recorded.
    pub job_state: NaiveState,
    /// Submission timestamp.
    #[serde(
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub submission_time: DateTime<Utc>,
    /// Name of the file capturing the script's stdout.
    pub stdout_file: String,
    /// Name of the file capturing the script's stderr.
    pub stderr_file: String,
    /// Resources allocated to the job.
    pub resources: Resources,

    /// Files/directories excluded from the working-directory copy.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub excluded_files: Vec<PathBuf>,
    /// Files/directories explicitly included in the working-directory copy.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub included_files: Vec<PathBuf>,
    /// Job dependencies.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub depend: Vec<Dependency>,
    /// Loop-job metadata, if this is a loop job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_info: Option<LoopInfo>,
    /// Accounting/billing account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Time the job started executing.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_timestamp",
        deserialize_with = "deserialize_opt_timestamp",
        default
    )]
    pub start_time: Option<DateTime<Utc>>,
    /// Main node assigned to the job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_node: Option<String>,
    /// All nodes assigned to the job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_nodes: Option<Vec<String>>,
    /// Working directory actually used at runtime (may differ from
    /// `input_dir` when scratch storage is used).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    /// Time the job completed.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_timestamp",
        deserialize_with = "deserialize_opt_timestamp",
        default
    )]
    pub completion_time: Option<DateTime<Utc>>,
    /// Exit code of the `qq run` process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_exit_code: Option<i32>,

    /// Backend-specific fields not modeled above, preserved verbatim
    /// across load/save round-trips.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml_ng::Value>,
}

impl Record {
    /// Loads a record from a local YAML file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::RecordRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml_ng::from_str(&text).map_err(|source| CoreError::RecordParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses a record from a YAML string already read from a remote host.
    pub fn from_yaml_str(path_for_errors: &Path, text: &str) -> Result<Self, CoreError> {
        serde_yaml_ng::from_str(text).map_err(|source| CoreError::RecordParse {
            path: path_for_errors.to_path_buf(),
            source,
        })
    }

    /// Serializes the record to a YAML string, with a header comment
    /// identifying the file, matching the format qq itself writes.
    pub fn to_yaml_string(&self) -> Result<String, CoreError> {
        let body = serde_yaml_ng::to_string(self).map_err(|source| CoreError::RecordParse {
            path: PathBuf::new(),
            source,
        })?;
        Ok(format!("# qq job info file\n{body}\n"))
    }

    /// Writes the record to `path` atomically: serialize to a sibling
    /// temporary file, then rename over the destination, so a concurrent
    /// reader never observes a partially-written record.
    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let content = self.to_yaml_string()?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| CoreError::RecordWrite {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(tmp.path(), content.as_bytes()).map_err(|source| CoreError::RecordWrite {
            path: path.to_path_buf(),
            source,
        })?;
        tmp.persist(path)
            .map_err(|e| CoreError::RecordWrite {
                path: path.to_path_buf(),
                source: e.error,
            })?;
        Ok(())
    }

    /// Reconstructs the command-line arguments needed to resubmit this job
    /// (used by the loop runtime to queue the next cycle).
    pub fn command_line_for_resubmit(&self) -> Vec<String> {
        let mut args = vec![
            self.script_name.clone(),
            "--queue".to_string(),
            self.queue.clone(),
            "--job-type".to_string(),
            self.job_type.to_string(),
            "--batch-system".to_string(),
            self.batch_system.clone(),
            "--depend".to_string(),
            format!("afterok={}", self.job_id),
        ];

        if let Some(account) = &self.account {
            args.push("--account".to_string());
            args.push(account.clone());
        }

        if !self.excluded_files.is_empty() {
            args.push("--exclude".to_string());
            args.push(join_paths(&self.excluded_files));
        }

        if !self.included_files.is_empty() {
            args.push("--include".to_string());
            args.push(join_paths(&self.included_files));
        }

        args
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_record() -> Record {
        Record {
            batch_system: "vbs".into(),
            qq_version: "1.0.0".into(),
            username: "alice".into(),
            job_id: "42".into(),
            job_name: "my-job".into(),
            script_name: "run.sh".into(),
            queue: "default".into(),
            job_type: JobType::Standard,
            input_machine: "login01".into(),
            input_dir: PathBuf::from("/home/alice/job"),
            job_state: NaiveState::Queued,
            submission_time: chrono::NaiveDate::from_ymd_opt(2026, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc(),
            stdout_file: "run.sh.out".into(),
            stderr_file: "run.sh.err".into(),
            resources: Resources::default(),
            excluded_files: Vec::new(),
            included_files: Vec::new(),
            depend: Vec::new(),
            loop_info: None,
            account: None,
            start_time: None,
            main_node: None,
            all_nodes: None,
            work_dir: None,
            completion_time: None,
            job_exit_code: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn round_trips_through_yaml() {
        let record = sample_record();
        let yaml = record.to_yaml_string().unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.qqinfo");
        std::fs::write(&path, yaml).unwrap();

        let loaded = Record::load(&path).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn save_is_atomic_and_readable() {
        let record = sample_record();
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.qqinfo");

        record.save(&path).unwrap();
        let loaded = Record::load(&path).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn resubmit_command_line_carries_dependency_on_self() {
        let record = sample_record();
        let args = record.command_line_for_resubmit();
        assert!(args.contains(&"--depend".to_string()));
        assert!(args.contains(&"afterok=42".to_string()));
    }

    #[test]
    fn missing_file_is_a_record_read_error() {
        let err = Record::load(Path::new("/nonexistent/job.qqinfo"));
        assert!(matches!(err, Err(CoreError::RecordRead { .. })));
    }
}
