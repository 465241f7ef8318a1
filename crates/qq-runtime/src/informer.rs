//! A thin façade over a persisted [`Record`], backed by a lazily-populated
//! [`BatchJob`] query cache for derived, scheduler-backed views.

use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use qq_batch::Batch;
use qq_batch::BatchJob;
use qq_core::NaiveState;
use qq_core::Record;
use qq_core::RealState;

use crate::error::RuntimeResult;

/// Loads, mutates, and derives queries against a job's persisted record.
pub struct Informer {
    path: PathBuf,
    record: Record,
    batch_job: Option<Box<dyn BatchJob>>,
}

impl Informer {
    /// Loads the record at `path`.
    pub fn load(path: &Path) -> RuntimeResult<Self> {
        let record = Record::load(path)?;
        Ok(Informer { path: path.to_path_buf(), record, batch_job: None })
    }

    /// Wraps an already-loaded record, for callers (e.g. the Runner) that
    /// hold one in memory without having just read it from disk.
    pub fn from_record(path: PathBuf, record: Record) -> Self {
        Informer { path, record, batch_job: None }
    }

    /// The underlying record.
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Persists the current record back to its file, atomically.
    pub fn save(&self) -> RuntimeResult<()> {
        self.record.save(&self.path)?;
        Ok(())
    }

    /// Re-reads the record from disk, discarding any cached batch-job query.
    pub fn reload(&mut self) -> RuntimeResult<()> {
        self.record = Record::load(&self.path)?;
        self.batch_job = None;
        Ok(())
    }

    /// True if `id`'s portion before the first `.` matches the record's job
    /// ID the same way (schedulers suffix job IDs with a server qualifier).
    pub fn is_job(&self, id: &str) -> bool {
        let bare = |s: &str| s.split('.').next().unwrap_or(s).to_string();
        bare(&self.record.job_id) == bare(id)
    }

    /// Populates (if not already cached) and returns the backend's current
    /// view of this job.
    async fn batch_job(&mut self, backend: &dyn Batch) -> RuntimeResult<&dyn BatchJob> {
        if self.batch_job.is_none() {
            self.batch_job = Some(backend.get_batch_job(&self.record.job_id).await?);
        }
        Ok(self.batch_job.as_deref().expect("just populated"))
    }

    /// The reconciled, user-facing state (§3.7). Short-circuits to `unknown`
    /// without querying the backend when the naive state is already `unknown`.
    pub async fn get_real_state(&mut self, backend: &dyn Batch) -> RuntimeResult<RealState> {
        if self.record.job_state == NaiveState::Unknown {
            return Ok(RealState::Unknown);
        }
        let batch_state = self.batch_job(backend).await?.state();
        Ok(RealState::from_states(self.record.job_state, batch_state))
    }

    /// The backend's free-text comment on the job's current status, if any.
    pub async fn get_comment(&mut self, backend: &dyn Batch) -> RuntimeResult<Option<String>> {
        Ok(self.batch_job(backend).await?.comment().map(str::to_string))
    }

    /// The estimated start time and node, if the backend has scheduled one.
    pub async fn get_estimated(&mut self, backend: &dyn Batch) -> RuntimeResult<Option<(DateTime<Utc>, String)>> {
        Ok(self.batch_job(backend).await?.estimated())
    }

    /// The job's main (first) allocated node, if running.
    pub async fn get_main_node(&mut self, backend: &dyn Batch) -> RuntimeResult<Option<String>> {
        Ok(self.batch_job(backend).await?.main_node().map(str::to_string))
    }

    /// All nodes allocated to the job, if running.
    pub async fn get_nodes(&mut self, backend: &dyn Batch) -> RuntimeResult<Option<Vec<String>>> {
        Ok(self.batch_job(backend).await?.nodes().map(<[String]>::to_vec))
    }

    /// Marks the job `running`, recording start time, main node, allocated
    /// nodes, and working directory.
    pub fn set_running(&mut self, start_time: DateTime<Utc>, main_node: String, all_nodes: Vec<String>, work_dir: PathBuf) {
        self.record.job_state = NaiveState::Running;
        self.record.start_time = Some(start_time);
        self.record.main_node = Some(main_node);
        self.record.all_nodes = Some(all_nodes);
        self.record.work_dir = Some(work_dir);
    }

    /// Marks the job `finished`, recording completion time and exit code.
    pub fn set_finished(&mut self, completion_time: DateTime<Utc>, exit_code: i32) {
        self.record.job_state = NaiveState::Finished;
        self.record.completion_time = Some(completion_time);
        self.record.job_exit_code = Some(exit_code);
    }

    /// Marks the job `failed`, recording completion time and exit code.
    pub fn set_failed(&mut self, completion_time: DateTime<Utc>, exit_code: i32) {
        self.record.job_state = NaiveState::Failed;
        self.record.completion_time = Some(completion_time);
        self.record.job_exit_code = Some(exit_code);
    }

    /// Marks the job `killed`, recording completion time. No exit code is
    /// recorded: a killed job never produced one of its own.
    pub fn set_killed(&mut self, completion_time: DateTime<Utc>) {
        self.record.job_state = NaiveState::Killed;
        self.record.completion_time = Some(completion_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qq_core::JobType;
    use qq_core::Resources;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn sample_record() -> Record {
        Record {
            batch_system: "vbs".into(),
            qq_version: "1.0.0".into(),
            username: "alice".into(),
            job_id: "42.server".into(),
            job_name: "my-job".into(),
            script_name: "run.sh".into(),
            queue: "default".into(),
            job_type: JobType::Standard,
            input_machine: "login01".into(),
            input_dir: PathBuf::from("/home/alice/job"),
            job_state: NaiveState::Queued,
            submission_time: Utc::now(),
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
    fn is_job_compares_bare_prefix() {
        let informer = Informer::from_record(PathBuf::from("/tmp/x.qqinfo"), sample_record());
        assert!(informer.is_job("42"));
        assert!(informer.is_job("42.server"));
        assert!(!informer.is_job("43"));
    }

    #[test]
    fn set_killed_records_completion_without_exit_code() {
        let mut informer = Informer::from_record(PathBuf::from("/tmp/x.qqinfo"), sample_record());
        informer.set_killed(Utc::now());
        assert_eq!(informer.record().job_state, NaiveState::Killed);
        assert!(informer.record().job_exit_code.is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.qqinfo");
        let informer = Informer::from_record(path.clone(), sample_record());
        informer.save().unwrap();

        let reloaded = Informer::load(&path).unwrap();
        assert_eq!(reloaded.record().job_id, "42.server");
    }
}
