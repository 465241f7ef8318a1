//! A job, as reported by `scontrol show job -o` or, as a fallback, `sacct`.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::NaiveDateTime;
use chrono::TimeZone;
use chrono::Utc;
use qq_core::BatchState;
use qq_core::Duration;
use qq_core::Size;

use crate::job::BatchJob;

/// The `sacct --format=` field list, in the exact order `fromSacctString`
/// expects to zip them against a `|`-delimited row.
pub const SACCT_FIELDS: &str = "JobID,Account,State,User,JobName,Partition,WorkDir,AllocCPUs,ReqCPUs,AllocTRES,ReqTRES,AllocNodes,ReqNodes,Submit,Start,End,TimeLimit,NodeList,Reason,ExitCode";

const SACCT_COLUMNS: &[&str] = &[
    "JobId",
    "Account",
    "JobState",
    "UserId",
    "JobName",
    "Partition",
    "WorkDir",
    "AllocCPUs",
    "ReqCPUs",
    "AllocTRES",
    "ReqTRES",
    "AllocNodes",
    "ReqNodes",
    "SubmitTime",
    "StartTime",
    "EndTime",
    "TimeLimit",
    "NodeList",
    "Reason",
    "ExitCode",
];

/// A single job's metadata, either from a `scontrol show job -o` dump or a
/// `sacct --parsable2` row normalized into the same field names.
pub struct SlurmJob {
    job_id: String,
    fields: BTreeMap<String, String>,
}

impl SlurmJob {
    /// Builds a job from `scontrol`'s `key=value` fields.
    pub fn from_fields(job_id: String, fields: BTreeMap<String, String>) -> Self {
        SlurmJob { job_id, fields }
    }

    /// The empty sentinel for a job neither `scontrol` nor `sacct` knows about.
    pub fn empty(job_id: &str) -> Self {
        SlurmJob {
            job_id: job_id.to_string(),
            fields: BTreeMap::new(),
        }
    }

    /// Parses a single `|`-delimited row from `sacct --format=SACCT_FIELDS`.
    pub fn from_sacct_row(row: &str) -> Option<Self> {
        let columns: Vec<&str> = row.split('|').collect();
        if columns.len() != SACCT_COLUMNS.len() {
            return None;
        }
        let mut fields: BTreeMap<String, String> = SACCT_COLUMNS
            .iter()
            .zip(columns)
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        if let Some(state) = fields.get("JobState").cloned() {
            fields.insert("JobState".to_string(), state.split_whitespace().next().unwrap_or("").to_string());
        }

        Self::assign_if_allocated(&mut fields, "AllocCPUs", "ReqCPUs", "NumCPUs");
        Self::assign_if_allocated(&mut fields, "AllocNodes", "ReqNodes", "NumNodes");

        let job_id = fields.get("JobId").cloned().unwrap_or_default();
        Some(SlurmJob { job_id, fields })
    }

    fn assign_if_allocated(fields: &mut BTreeMap<String, String>, alloc_key: &str, req_key: &str, target_key: &str) {
        let value = fields.get(alloc_key).cloned();
        let resolved = match value.as_deref() {
            None | Some("") | Some("0") => fields.get(req_key).cloned().unwrap_or_else(|| "0".to_string()),
            Some(v) => v.to_string(),
        };
        fields.insert(target_key.to_string(), resolved);
    }

    fn int_property(&self, key: &str) -> u32 {
        self.fields
            .get(key)
            .and_then(|raw| raw.split('-').next())
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0)
    }

    fn tres(&self) -> &str {
        match self.fields.get("AllocTRES") {
            Some(v) if !v.is_empty() && !v.contains("null") && !v.contains("None") && !v.contains("N/A") => v,
            _ => self.fields.get("ReqTRES").map(String::as_str).unwrap_or(""),
        }
    }

    fn slurm_datetime(&self, key: &str) -> Option<DateTime<Utc>> {
        let raw = self.fields.get(key)?;
        if raw.is_empty() || matches!(raw.to_ascii_lowercase().as_str(), "unknown" | "n/a" | "none") {
            return None;
        }
        let format = &qq_core::Config::global().date_formats.slurm;
        let naive = NaiveDateTime::parse_from_str(raw, format).ok()?;
        Some(Utc.from_utc_datetime(&naive))
    }
}

impl BatchJob for SlurmJob {
    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn id(&self) -> &str {
        &self.job_id
    }

    fn account(&self) -> Option<&str> {
        self.fields.get("Account").map(String::as_str)
    }

    fn state(&self) -> BatchState {
        let Some(raw) = self.fields.get("JobState") else {
            return BatchState::Unknown;
        };
        let converted = match raw.as_str() {
            "BOOT_FAIL" | "CANCELLED" | "DEADLINE" | "FAILED" | "NODE_FAIL" | "OUT_OF_MEMORY" | "TIMEOUT" => {
                BatchState::Failed
            }
            "COMPLETED" => BatchState::Finished,
            "PENDING" => BatchState::Queued,
            "PREEMPTED" | "SUSPENDED" => BatchState::Suspended,
            "RUNNING" => BatchState::Running,
            _ => BatchState::Unknown,
        };
        if converted == BatchState::Queued && self.comment().is_some_and(|c| c.contains("Dependency")) {
            return BatchState::Held;
        }
        converted
    }

    fn comment(&self) -> Option<&str> {
        match self.fields.get("Reason") {
            Some(reason) if reason != "None" => Some(reason),
            _ => None,
        }
    }

    fn estimated(&self) -> Option<(DateTime<Utc>, String)> {
        let time = self.start_time()?;
        let node_list = self.fields.get("SchedNodeList")?;
        if node_list.contains("None") {
            return None;
        }
        Some((time, node_list.clone()))
    }

    fn main_node(&self) -> Option<&str> {
        match self.fields.get("BatchHost") {
            Some(host) if !host.contains("None") => Some(host),
            _ => self.fields.get("NodeList").filter(|n| !n.contains("None")).map(String::as_str),
        }
    }

    fn nodes(&self) -> Option<&[String]> {
        None
    }

    fn user(&self) -> Option<&str> {
        self.fields.get("UserId").map(|raw| raw.split('(').next().unwrap_or(raw))
    }

    fn ncpus(&self) -> Option<u32> {
        Some(self.int_property("NumCPUs"))
    }

    fn ngpus(&self) -> Option<u32> {
        let tres = self.tres();
        tres.split(',').find_map(|item| {
            item.strip_prefix("gpu=")
                .or_else(|| item.strip_prefix("gres/gpu="))
                .and_then(|v| v.parse().ok())
        })
    }

    fn nnodes(&self) -> Option<u32> {
        Some(self.int_property("NumNodes"))
    }

    fn mem(&self) -> Option<Size> {
        self.tres()
            .split(',')
            .find_map(|item| item.strip_prefix("mem="))
            .and_then(|raw| Size::parse(raw).ok())
    }

    fn name(&self) -> Option<&str> {
        self.fields.get("JobName").map(String::as_str)
    }

    fn queue(&self) -> Option<&str> {
        self.fields.get("Partition").map(String::as_str)
    }

    fn submission_time(&self) -> Option<DateTime<Utc>> {
        self.slurm_datetime("SubmitTime")
    }

    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.slurm_datetime("StartTime")
    }

    fn completion_time(&self) -> Option<DateTime<Utc>> {
        self.slurm_datetime("EndTime")
    }

    fn walltime(&self) -> Option<Duration> {
        self.fields.get("TimeLimit").and_then(|raw| raw.parse().ok())
    }

    fn exit_code(&self) -> Option<i32> {
        let raw = self.fields.get("ExitCode")?;
        let (code, signal) = raw.split_once(':')?;
        let code: i32 = code.parse().ok()?;
        let signal: i32 = signal.parse().ok()?;
        Some(if code != 0 { code } else { signal })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(fields: &[(&str, &str)]) -> SlurmJob {
        let mut map = BTreeMap::new();
        for (k, v) in fields {
            map.insert(k.to_string(), v.to_string());
        }
        SlurmJob::from_fields("123".to_string(), map)
    }

    #[test]
    fn completed_state_maps_to_finished() {
        assert_eq!(job(&[("JobState", "COMPLETED")]).state(), BatchState::Finished);
    }

    #[test]
    fn pending_with_dependency_reason_is_held() {
        let j = job(&[("JobState", "PENDING"), ("Reason", "Dependency")]);
        assert_eq!(j.state(), BatchState::Held);
    }

    #[test]
    fn pending_without_reason_is_queued() {
        let j = job(&[("JobState", "PENDING")]);
        assert_eq!(j.state(), BatchState::Queued);
    }

    #[test]
    fn exit_code_prefers_nonzero_script_code() {
        let j = job(&[("ExitCode", "2:0")]);
        assert_eq!(j.exit_code(), Some(2));
    }

    #[test]
    fn exit_code_falls_back_to_signal() {
        let j = job(&[("ExitCode", "0:9")]);
        assert_eq!(j.exit_code(), Some(9));
    }

    #[test]
    fn sacct_row_parses_into_fields() {
        let row = "123|acct|COMPLETED|alice(1000)|myjob|batch|/home/alice|4|4|mem=8gb|mem=8gb|1|1|2026-01-01T00:00:00|2026-01-01T00:01:00|2026-01-01T01:00:00|1-00:00:00|node01|None|0:0";
        let j = SlurmJob::from_sacct_row(row).unwrap();
        assert_eq!(j.id(), "123");
        assert_eq!(j.user(), Some("alice"));
        assert_eq!(j.ncpus(), Some(4));
    }
}
