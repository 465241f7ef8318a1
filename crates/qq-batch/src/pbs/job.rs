//! A job, as reported by `qstat -f`.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::NaiveDateTime;
use chrono::TimeZone;
use chrono::Utc;
use qq_core::BatchState;
use qq_core::Duration;
use qq_core::Size;

use crate::job::BatchJob;

/// A single job's metadata, parsed from a `qstat -f` dump.
pub struct PbsJob {
    job_id: String,
    fields: BTreeMap<String, String>,
    nodes: Vec<String>,
}

impl PbsJob {
    /// Builds a job from its parsed `key = value` fields.
    pub fn from_fields(job_id: String, fields: BTreeMap<String, String>) -> Self {
        let nodes = fields
            .get("exec_host2")
            .map(|raw| raw.split('+').map(|chunk| Self::clean_node_name(chunk.trim())).collect())
            .unwrap_or_default();
        PbsJob { job_id, fields, nodes }
    }

    /// The empty sentinel for a job the scheduler has no record of.
    pub fn empty(job_id: &str) -> Self {
        PbsJob {
            job_id: job_id.to_string(),
            fields: BTreeMap::new(),
            nodes: Vec::new(),
        }
    }

    fn int_property(&self, key: &str) -> Option<u32> {
        self.fields.get(key)?.parse().ok()
    }

    fn pbs_datetime(&self, key: &str) -> Option<DateTime<Utc>> {
        let raw = self.fields.get(key)?;
        let format = &qq_core::Config::global().date_formats.pbs;
        let naive = NaiveDateTime::parse_from_str(raw, format).ok()?;
        Some(Utc.from_utc_datetime(&naive))
    }

    /// Strips trailing `:ncpus=...`/`(...)` node qualifiers PBS appends to
    /// `exec_host`/`exec_vnode` entries.
    fn clean_node_name(raw: &str) -> String {
        raw.split(':')
            .next()
            .unwrap_or(raw)
            .split('/')
            .next()
            .unwrap_or(raw)
            .replace(['(', ')'], "")
    }
}

impl BatchJob for PbsJob {
    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn id(&self) -> &str {
        &self.job_id
    }

    fn account(&self) -> Option<&str> {
        self.fields.get("Account_Name").map(String::as_str)
    }

    fn state(&self) -> BatchState {
        let Some(code) = self.fields.get("job_state") else {
            return BatchState::Unknown;
        };
        if code == "F" {
            match self.exit_code() {
                Some(0) => {}
                _ => return BatchState::Failed,
            }
        }
        BatchState::from_code(code)
    }

    fn comment(&self) -> Option<&str> {
        self.fields.get("comment").map(String::as_str)
    }

    fn estimated(&self) -> Option<(DateTime<Utc>, String)> {
        let time = self.pbs_datetime("estimated.start_time")?;
        let time = time.max(Utc::now());
        let raw_vnode = self.fields.get("estimated.exec_vnode")?;
        let vnodes: Vec<String> = raw_vnode
            .split('+')
            .map(|chunk| Self::clean_node_name(chunk.trim()))
            .collect();
        Some((time, vnodes.join(" + ")))
    }

    fn main_node(&self) -> Option<&str> {
        self.nodes.first().map(String::as_str)
    }

    fn nodes(&self) -> Option<&[String]> {
        if self.nodes.is_empty() { None } else { Some(&self.nodes) }
    }

    fn user(&self) -> Option<&str> {
        self.fields
            .get("Job_Owner")
            .map(|raw| raw.split('@').next().unwrap_or(raw))
    }

    fn ncpus(&self) -> Option<u32> {
        self.int_property("Resource_List.ncpus")
    }

    fn ngpus(&self) -> Option<u32> {
        self.int_property("Resource_List.ngpus")
    }

    fn nnodes(&self) -> Option<u32> {
        self.int_property("Resource_List.nodect")
    }

    fn mem(&self) -> Option<Size> {
        self.fields.get("Resource_List.mem").and_then(|raw| Size::parse(raw).ok())
    }

    fn name(&self) -> Option<&str> {
        self.fields.get("Job_Name").map(String::as_str)
    }

    fn queue(&self) -> Option<&str> {
        self.fields.get("queue").map(String::as_str)
    }

    fn submission_time(&self) -> Option<DateTime<Utc>> {
        self.pbs_datetime("ctime")
    }

    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.pbs_datetime("stime")
    }

    fn completion_time(&self) -> Option<DateTime<Utc>> {
        self.pbs_datetime("obittime")
    }

    fn walltime(&self) -> Option<Duration> {
        self.fields.get("Resource_List.walltime").and_then(|raw| raw.parse().ok())
    }

    fn exit_code(&self) -> Option<i32> {
        self.fields.get("Exit_status").and_then(|raw| raw.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(fields: &[(&str, &str)]) -> PbsJob {
        let mut map = BTreeMap::new();
        for (k, v) in fields {
            map.insert(k.to_string(), v.to_string());
        }
        PbsJob::from_fields("1.server".to_string(), map)
    }

    #[test]
    fn missing_state_is_unknown() {
        assert_eq!(job(&[]).state(), BatchState::Unknown);
    }

    #[test]
    fn finished_with_nonzero_exit_is_failed() {
        let j = job(&[("job_state", "F"), ("Exit_status", "1")]);
        assert_eq!(j.state(), BatchState::Failed);
    }

    #[test]
    fn finished_with_zero_exit_uses_code_mapping() {
        let j = job(&[("job_state", "F"), ("Exit_status", "0")]);
        assert_eq!(j.state(), BatchState::from_code("F"));
    }

    #[test]
    fn user_strips_host_suffix() {
        let j = job(&[("Job_Owner", "alice@submit01")]);
        assert_eq!(j.user(), Some("alice"));
    }

    #[test]
    fn empty_job_has_no_fields() {
        let j = PbsJob::empty("42.server");
        assert!(j.is_empty());
        assert_eq!(j.id(), "42.server");
    }

    #[test]
    fn nodes_split_and_clean_exec_host2() {
        let j = job(&[("exec_host2", "node01.cluster:ncpus=4+node02.cluster:ncpus=4")]);
        assert_eq!(j.nodes(), Some(&["node01.cluster".to_string(), "node02.cluster".to_string()][..]));
        assert_eq!(j.main_node(), Some("node01.cluster"));
    }
}
