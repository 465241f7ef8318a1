//! The virtual in-process batch backend (§4.1.3 VBS): always available,
//! always local, always shared. Jobs run as real child processes tracked in
//! an in-memory table rather than being handed off to an external
//! scheduler — primarily a deterministic stand-in for tests and for
//! single-machine use without PBS/Slurm installed.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use qq_core::BatchState;
use qq_core::Dependency;
use qq_core::Duration;
use qq_core::Resources;
use qq_core::Size;
use qq_core::WorkDir;
use tokio::sync::Notify;

use crate::backend::Batch;
use crate::error::BatchError;
use crate::error::BatchResult;
use crate::job::BatchJob;
use crate::node::BatchNode;
use crate::queue::BatchQueue;

/// The value `QQ_BATCH_SYSTEM` must hold to select this backend.
pub const ENV_NAME: &str = "VBS";

const SUPPORTED_WORK_DIRS: &[WorkDir] = &[
    WorkDir::InputDir,
    WorkDir::ScratchLocal,
    WorkDir::ScratchSsd,
    WorkDir::ScratchShared,
    WorkDir::ScratchShm,
];

/// A job tracked by the virtual batch system, mutated in place by its
/// worker task as it progresses from `Queued` to a terminal state.
struct VirtualJob {
    job_id: String,
    script: PathBuf,
    queue: String,
    name: String,
    user: String,
    resources: Resources,
    submission_time: DateTime<Utc>,
    state: Mutex<BatchState>,
    scratch: Mutex<Option<PathBuf>>,
    start_time: Mutex<Option<DateTime<Utc>>>,
    completion_time: Mutex<Option<DateTime<Utc>>>,
    exit_code: Mutex<Option<i32>>,
    pid: Mutex<Option<u32>>,
    frozen: AtomicBool,
    release: Notify,
}

/// An immutable snapshot of a [`VirtualJob`], satisfying [`BatchJob`]
/// without holding the live mutexes open across the trait's `&self` calls.
struct VirtualJobView {
    job_id: String,
    name: String,
    user: String,
    queue: String,
    resources: Resources,
    submission_time: DateTime<Utc>,
    state: BatchState,
    start_time: Option<DateTime<Utc>>,
    completion_time: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
}

impl VirtualJobView {
    fn snapshot(job: &VirtualJob) -> Self {
        VirtualJobView {
            job_id: job.job_id.clone(),
            name: job.name.clone(),
            user: job.user.clone(),
            queue: job.queue.clone(),
            resources: job.resources.clone(),
            submission_time: job.submission_time,
            state: *job.state.lock().expect("vbs job state lock poisoned"),
            start_time: *job.start_time.lock().expect("vbs job state lock poisoned"),
            completion_time: *job.completion_time.lock().expect("vbs job state lock poisoned"),
            exit_code: *job.exit_code.lock().expect("vbs job state lock poisoned"),
        }
    }

    fn empty(job_id: &str) -> Self {
        VirtualJobView {
            job_id: job_id.to_string(),
            name: String::new(),
            user: String::new(),
            queue: String::new(),
            resources: Resources::default(),
            submission_time: Utc::now(),
            state: BatchState::Unknown,
            start_time: None,
            completion_time: None,
            exit_code: None,
        }
    }
}

impl BatchJob for VirtualJobView {
    fn is_empty(&self) -> bool {
        self.name.is_empty() && self.exit_code.is_none() && self.state == BatchState::Unknown
    }

    fn id(&self) -> &str {
        &self.job_id
    }

    fn account(&self) -> Option<&str> {
        None
    }

    fn state(&self) -> BatchState {
        self.state
    }

    fn comment(&self) -> Option<&str> {
        None
    }

    fn estimated(&self) -> Option<(DateTime<Utc>, String)> {
        None
    }

    fn main_node(&self) -> Option<&str> {
        Some("localhost")
    }

    fn nodes(&self) -> Option<&[String]> {
        None
    }

    fn user(&self) -> Option<&str> {
        if self.user.is_empty() { None } else { Some(&self.user) }
    }

    fn ncpus(&self) -> Option<u32> {
        self.resources.ncpus
    }

    fn ngpus(&self) -> Option<u32> {
        self.resources.ngpus
    }

    fn nnodes(&self) -> Option<u32> {
        self.resources.nnodes
    }

    fn mem(&self) -> Option<Size> {
        self.resources.mem
    }

    fn name(&self) -> Option<&str> {
        if self.name.is_empty() { None } else { Some(&self.name) }
    }

    fn queue(&self) -> Option<&str> {
        if self.queue.is_empty() { None } else { Some(&self.queue) }
    }

    fn submission_time(&self) -> Option<DateTime<Utc>> {
        Some(self.submission_time)
    }

    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    fn completion_time(&self) -> Option<DateTime<Utc>> {
        self.completion_time
    }

    fn walltime(&self) -> Option<Duration> {
        self.resources.walltime
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }
}

type JobTable = Mutex<HashMap<String, Arc<VirtualJob>>>;

fn jobs() -> &'static JobTable {
    static JOBS: OnceLock<JobTable> = OnceLock::new();
    JOBS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn next_job_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
}

fn current_user() -> String {
    whoami::fallible::username().unwrap_or_else(|_| "unknown".to_string())
}

/// In-process batch backend: always available, always local, always on a
/// shared filesystem.
#[derive(Default)]
pub struct VirtualBackend;

impl VirtualBackend {
    /// Builds a handle to the process-wide virtual batch system.
    pub fn new() -> Self {
        VirtualBackend
    }

    /// Marks `job_id` to pause just after entering `Running`, until
    /// [`Self::release_frozen_job`] is called. Intended for deterministic
    /// test control over job lifecycle timing; has no effect once the job
    /// has already passed the freeze checkpoint.
    pub fn freeze(job_id: &str) {
        if let Some(job) = jobs().lock().expect("vbs job table lock poisoned").get(job_id) {
            job.frozen.store(true, Ordering::SeqCst);
        }
    }

    /// Releases a job previously paused via [`Self::freeze`].
    pub fn release_frozen_job(job_id: &str) {
        if let Some(job) = jobs().lock().expect("vbs job table lock poisoned").get(job_id) {
            job.frozen.store(false, Ordering::SeqCst);
            job.release.notify_waiters();
        }
    }

    async fn run_job(job: Arc<VirtualJob>) {
        *job.state.lock().expect("vbs job state lock poisoned") = BatchState::Running;
        *job.start_time.lock().expect("vbs job state lock poisoned") = Some(Utc::now());

        if job.frozen.load(Ordering::SeqCst) {
            job.release.notified().await;
        }

        let node_dir = match tempfile::Builder::new().prefix("qq-vbs-").tempdir() {
            Ok(dir) => dir,
            Err(_) => {
                *job.state.lock().expect("vbs job state lock poisoned") = BatchState::Failed;
                *job.completion_time.lock().expect("vbs job state lock poisoned") = Some(Utc::now());
                return;
            }
        };
        *job.scratch.lock().expect("vbs job state lock poisoned") = Some(node_dir.path().to_path_buf());

        let mut command = tokio::process::Command::new("bash");
        command.arg(&job.script).current_dir(node_dir.path());
        let spawned = command
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn();

        let Ok(mut child) = spawned else {
            *job.state.lock().expect("vbs job state lock poisoned") = BatchState::Failed;
            *job.completion_time.lock().expect("vbs job state lock poisoned") = Some(Utc::now());
            return;
        };
        *job.pid.lock().expect("vbs job state lock poisoned") = child.id();

        let status = child.wait().await.ok();
        let code = status.and_then(|s| s.code());
        *job.exit_code.lock().expect("vbs job state lock poisoned") = code;
        *job.completion_time.lock().expect("vbs job state lock poisoned") = Some(Utc::now());
        *job.state.lock().expect("vbs job state lock poisoned") = match code {
            Some(0) => BatchState::Finished,
            _ => BatchState::Failed,
        };
        // keeps the scratch directory alive for the lifetime of the job record
        let _ = node_dir.keep();
    }

    fn signal(job_id: &str, hard: bool) -> BatchResult<()> {
        let table = jobs().lock().expect("vbs job table lock poisoned");
        let Some(job) = table.get(job_id) else {
            return Err(BatchError::QueryFailed(format!("unknown virtual job '{job_id}'")));
        };
        let pid = *job.pid.lock().expect("vbs job state lock poisoned");
        if let Some(pid) = pid {
            #[cfg(unix)]
            {
                let sig = if hard { libc::SIGKILL } else { libc::SIGTERM };
                unsafe {
                    libc::kill(pid as libc::pid_t, sig);
                }
            }
            #[cfg(not(unix))]
            let _ = (pid, hard);
        }
        *job.state.lock().expect("vbs job state lock poisoned") = BatchState::Failed;
        *job.completion_time.lock().expect("vbs job state lock poisoned") = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl Batch for VirtualBackend {
    fn env_name(&self) -> &'static str {
        ENV_NAME
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supported_work_dirs(&self) -> &'static [WorkDir] {
        SUPPORTED_WORK_DIRS
    }

    async fn get_scratch_dir(&self, job_id: &str) -> BatchResult<PathBuf> {
        let table = jobs().lock().expect("vbs job table lock poisoned");
        let job = table
            .get(job_id)
            .ok_or_else(|| BatchError::QueryFailed(format!("unknown virtual job '{job_id}'")))?;
        job.scratch
            .lock()
            .expect("vbs job state lock poisoned")
            .clone()
            .ok_or_else(|| BatchError::QueryFailed(format!("job '{job_id}' has no scratch directory yet")))
    }

    fn transform_resources(&self, _queue: &str, provided: &Resources) -> BatchResult<Resources> {
        let defaults = Resources {
            nnodes: Some(1),
            ncpus: Some(1),
            mem_per_cpu: Some(Size::parse("1gb")?),
            work_dir: Some(WorkDir::ScratchLocal),
            work_size_per_cpu: Some(Size::parse("1gb")?),
            walltime: Some("1d".parse()?),
            ..Default::default()
        };
        Ok(Resources::merge([provided, &defaults]))
    }

    async fn job_submit(
        &self,
        resources: &Resources,
        queue: &str,
        script: &Path,
        job_name: &str,
        _depend: &[Dependency],
        _env_vars: &HashMap<String, String>,
        _account: Option<&str>,
    ) -> BatchResult<String> {
        let job_id = next_job_id();
        let job = Arc::new(VirtualJob {
            job_id: job_id.clone(),
            script: script.to_path_buf(),
            queue: queue.to_string(),
            name: job_name.to_string(),
            user: current_user(),
            resources: resources.clone(),
            submission_time: Utc::now(),
            state: Mutex::new(BatchState::Queued),
            scratch: Mutex::new(None),
            start_time: Mutex::new(None),
            completion_time: Mutex::new(None),
            exit_code: Mutex::new(None),
            pid: Mutex::new(None),
            frozen: AtomicBool::new(false),
            release: Notify::new(),
        });

        jobs()
            .lock()
            .expect("vbs job table lock poisoned")
            .insert(job_id.clone(), Arc::clone(&job));

        tokio::spawn(Self::run_job(job));
        Ok(job_id)
    }

    async fn job_kill(&self, job_id: &str) -> BatchResult<()> {
        Self::signal(job_id, false)
    }

    async fn job_kill_force(&self, job_id: &str) -> BatchResult<()> {
        Self::signal(job_id, true)
    }

    async fn get_batch_job(&self, job_id: &str) -> BatchResult<Box<dyn BatchJob>> {
        let table = jobs().lock().expect("vbs job table lock poisoned");
        Ok(match table.get(job_id) {
            Some(job) => Box::new(VirtualJobView::snapshot(job)),
            None => Box::new(VirtualJobView::empty(job_id)),
        })
    }

    async fn get_unfinished_batch_jobs(&self, user: &str) -> BatchResult<Vec<Box<dyn BatchJob>>> {
        Ok(self.filtered_jobs(Some(user), true))
    }

    async fn get_batch_jobs(&self, user: &str) -> BatchResult<Vec<Box<dyn BatchJob>>> {
        Ok(self.filtered_jobs(Some(user), false))
    }

    async fn get_all_unfinished_batch_jobs(&self) -> BatchResult<Vec<Box<dyn BatchJob>>> {
        Ok(self.filtered_jobs(None, true))
    }

    async fn get_all_batch_jobs(&self) -> BatchResult<Vec<Box<dyn BatchJob>>> {
        Ok(self.filtered_jobs(None, false))
    }

    async fn get_queues(&self) -> BatchResult<Vec<Box<dyn BatchQueue>>> {
        Ok(Vec::new())
    }

    async fn get_nodes(&self) -> BatchResult<Vec<Box<dyn BatchNode>>> {
        Ok(Vec::new())
    }

    fn is_shared(&self, _directory: &Path) -> bool {
        true
    }
}

impl VirtualBackend {
    fn filtered_jobs(&self, user: Option<&str>, unfinished_only: bool) -> Vec<Box<dyn BatchJob>> {
        jobs()
            .lock()
            .expect("vbs job table lock poisoned")
            .values()
            .map(|job| VirtualJobView::snapshot(job))
            .filter(|view| user.is_none_or(|u| view.user == u))
            .filter(|view| !unfinished_only || !matches!(view.state, BatchState::Finished | BatchState::Failed))
            .map(|view| Box::new(view) as Box<dyn BatchJob>)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submitted_job_runs_to_completion() {
        let backend = VirtualBackend::new();
        let resources = backend.transform_resources("default", &Resources::default()).unwrap();
        let mut script = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(script, "#!/bin/bash\nexit 0").unwrap();
        let job_id = backend
            .job_submit(&resources, "default", script.path(), "job", &[], &HashMap::new(), None)
            .await
            .unwrap();

        for _ in 0..50 {
            let job = backend.get_batch_job(&job_id).await.unwrap();
            if matches!(job.state(), BatchState::Finished | BatchState::Failed) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let job = backend.get_batch_job(&job_id).await.unwrap();
        assert_eq!(job.state(), BatchState::Finished);
        assert_eq!(job.exit_code(), Some(0));
    }

    #[test]
    fn unknown_job_is_empty() {
        let view = VirtualJobView::empty("999");
        assert!(view.is_empty());
    }

    #[test]
    fn is_always_available_and_shared() {
        let backend = VirtualBackend::new();
        assert!(backend.is_available());
        assert!(backend.is_shared(Path::new("/tmp")));
    }
}
