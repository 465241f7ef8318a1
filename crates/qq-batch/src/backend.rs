//! The batch-backend contract (§4.1.1) and the process-wide registry of
//! implementations (§4.1.4).

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::OnceLock;

use async_trait::async_trait;
use qq_core::Dependency;
use qq_core::Resources;
use qq_core::WorkDir;

use crate::error::BatchError;
use crate::error::BatchResult;
use crate::job::BatchJob;
use crate::node::BatchNode;
use crate::queue::BatchQueue;

/// A uniform interface over a concrete batch scheduler (PBS, Slurm, or the
/// in-process virtual backend).
///
/// Every method here is a thin wrapper over scheduler CLI tools or, for
/// [`crate::vbs`], an in-memory simulation; implementations never hold
/// mutable state shared across calls beyond what the scheduler itself
/// tracks.
#[async_trait]
pub trait Batch: Send + Sync {
    /// The name this backend registers and is selected under
    /// (`QQ_BATCH_SYSTEM`'s accepted values).
    fn env_name(&self) -> &'static str;

    /// True if this backend's scheduler tooling is present and usable on
    /// the current host.
    fn is_available(&self) -> bool;

    /// The work-directory kinds this backend can resolve a path for.
    fn supported_work_dirs(&self) -> &'static [WorkDir];

    /// Resolves the scratch directory allocated to a running job.
    async fn get_scratch_dir(&self, job_id: &str) -> BatchResult<PathBuf>;

    /// Adapts user-provided resources into a form valid for this backend and
    /// `queue`, applying backend-specific defaults (§4.1.3).
    fn transform_resources(&self, queue: &str, provided: &Resources) -> BatchResult<Resources>;

    /// Submits `script` under `job_name` to `queue` with the given resources,
    /// dependencies, and environment, returning the scheduler-assigned job ID.
    #[allow(clippy::too_many_arguments)]
    async fn job_submit(
        &self,
        resources: &Resources,
        queue: &str,
        script: &Path,
        job_name: &str,
        depend: &[Dependency],
        env_vars: &HashMap<String, String>,
        account: Option<&str>,
    ) -> BatchResult<String>;

    /// Requests a graceful termination, giving the job time to clean up.
    async fn job_kill(&self, job_id: &str) -> BatchResult<()>;

    /// Requests an immediate termination.
    async fn job_kill_force(&self, job_id: &str) -> BatchResult<()>;

    /// Looks up a single job by ID. Returns an empty [`BatchJob`]
    /// (`is_empty() == true`) rather than erroring if the scheduler has no
    /// record of it.
    async fn get_batch_job(&self, job_id: &str) -> BatchResult<Box<dyn BatchJob>>;

    /// All of `user`'s jobs that have not yet reached a terminal state.
    async fn get_unfinished_batch_jobs(&self, user: &str) -> BatchResult<Vec<Box<dyn BatchJob>>>;

    /// All of `user`'s jobs, including ones that have finished.
    async fn get_batch_jobs(&self, user: &str) -> BatchResult<Vec<Box<dyn BatchJob>>>;

    /// All unfinished jobs across all users.
    async fn get_all_unfinished_batch_jobs(&self) -> BatchResult<Vec<Box<dyn BatchJob>>>;

    /// All jobs across all users, including finished ones.
    async fn get_all_batch_jobs(&self) -> BatchResult<Vec<Box<dyn BatchJob>>>;

    /// All queues known to the scheduler.
    async fn get_queues(&self) -> BatchResult<Vec<Box<dyn BatchQueue>>>;

    /// All nodes known to the scheduler.
    async fn get_nodes(&self) -> BatchResult<Vec<Box<dyn BatchNode>>>;

    /// True if `directory` resides on a filesystem shared across nodes.
    fn is_shared(&self, directory: &Path) -> bool;
}

/// Orders a batch of jobs the way the backend's own listing tools would
/// (e.g. PBS/Slurm list running jobs before queued ones, most-recent
/// submission first within a state). The default keeps input order, which
/// is adequate for backends whose query tools already return a sensible
/// order.
pub fn sort_jobs(jobs: &mut [Box<dyn BatchJob>]) {
    jobs.sort_by(|a, b| a.id().cmp(b.id()));
}

type BatchFactory = fn() -> Box<dyn Batch>;

/// The process-wide registry of known batch backends, keyed by
/// [`Batch::env_name`] in registration order (§9, mirroring the Python
/// metaclass registry this is adapted from).
pub struct BatchRegistry {
    factories: Vec<(&'static str, BatchFactory)>,
}

impl BatchRegistry {
    /// Builds the registry of all backends this binary was compiled with,
    /// in a fixed, deterministic order.
    fn with_defaults() -> Self {
        let mut registry = BatchRegistry { factories: Vec::new() };
        registry.register(crate::pbs::ENV_NAME, || Box::new(crate::pbs::PbsBackend::new()));
        registry.register(crate::slurm::ENV_NAME, || Box::new(crate::slurm::SlurmBackend::new()));
        registry.register(crate::vbs::ENV_NAME, || Box::new(crate::vbs::VirtualBackend::new()));
        registry
    }

    fn register(&mut self, name: &'static str, factory: BatchFactory) {
        self.factories.push((name, factory));
    }

    /// The process-wide registry singleton.
    pub fn global() -> &'static BatchRegistry {
        static REGISTRY: OnceLock<BatchRegistry> = OnceLock::new();
        REGISTRY.get_or_init(BatchRegistry::with_defaults)
    }

    /// Returns the backend registered under `name`.
    pub fn from_str(&self, name: &str) -> BatchResult<Box<dyn Batch>> {
        self.factories
            .iter()
            .find(|(env_name, _)| *env_name == name)
            .map(|(_, factory)| factory())
            .ok_or_else(|| BatchError::NotAvailable(name.to_string()))
    }

    /// Scans registered backends in registration order and returns the
    /// first one that reports itself available.
    pub fn guess(&self) -> BatchResult<Box<dyn Batch>> {
        for (name, factory) in &self.factories {
            let backend = factory();
            if backend.is_available() {
                tracing::debug!(batch_system = name, "guessed batch system");
                return Ok(backend);
            }
        }
        Err(BatchError::NotAvailable(
            "could not guess a batch system; none of the registered backends are available".to_string(),
        ))
    }

    /// Checks `QQ_BATCH_SYSTEM` first, falling back to [`Self::guess`].
    pub fn from_env_var_or_guess(&self) -> BatchResult<Box<dyn Batch>> {
        match std::env::var(qq_core::constants::ENV_BATCH_SYSTEM) {
            Ok(name) if !name.is_empty() => {
                tracing::debug!(batch_system = %name, "using batch system from environment");
                self.from_str(&name)
            }
            _ => self.guess(),
        }
    }

    /// Obtains a backend by explicit `name`, falling back to
    /// [`Self::from_env_var_or_guess`] when `name` is `None`.
    pub fn obtain(&self, name: Option<&str>) -> BatchResult<Box<dyn Batch>> {
        match name {
            Some(name) => self.from_str(name),
            None => self.from_env_var_or_guess(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_name_is_rejected() {
        let registry = BatchRegistry::global();
        let result = registry.from_str("not-a-real-backend");
        assert!(matches!(result, Err(BatchError::NotAvailable(_))));
    }

    #[test]
    fn virtual_backend_is_resolvable_by_name() {
        let registry = BatchRegistry::global();
        let backend = registry.from_str(crate::vbs::ENV_NAME).unwrap();
        assert_eq!(backend.env_name(), crate::vbs::ENV_NAME);
    }

    #[test]
    fn guess_always_finds_the_virtual_backend() {
        let registry = BatchRegistry::global();
        let backend = registry.guess().unwrap();
        assert!(backend.is_available());
    }
}
