//! Implementation of the `submit` command.

use std::path::PathBuf;

use clap::Parser;
use qq_batch::BatchRegistry;
use qq_core::Dependency;
use qq_core::JobType;
use qq_core::Resources;
use qq_core::WorkDir;
use qq_runtime::RuntimeError;
use qq_runtime::RuntimeResult;
use qq_runtime::SubmitOptions;
use qq_runtime::Submitter;
use tracing::info;

/// Arguments for the `submit` command.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Path to the script to submit.
    pub script: PathBuf,

    /// Target queue.
    #[arg(long)]
    pub queue: Option<String>,

    /// Number of nodes.
    #[arg(long)]
    pub nnodes: Option<u32>,

    /// Number of CPUs.
    #[arg(long)]
    pub ncpus: Option<u32>,

    /// Number of GPUs.
    #[arg(long)]
    pub ngpus: Option<u32>,

    /// Memory (e.g. `4gb`).
    #[arg(long)]
    pub mem: Option<String>,

    /// Walltime (e.g. `1-00:00:00`).
    #[arg(long)]
    pub walltime: Option<String>,

    /// Working-directory kind (`input_dir`, `scratch_local`, `scratch_ssd`, `scratch_shared`, `scratch_shm`).
    #[arg(long)]
    pub work_dir: Option<String>,

    /// Standard vs. loop job.
    #[arg(long)]
    pub job_type: Option<String>,

    /// First loop cycle.
    #[arg(long)]
    pub loop_start: Option<u32>,

    /// Last loop cycle.
    #[arg(long)]
    pub loop_end: Option<u32>,

    /// Loop archive directory.
    #[arg(long)]
    pub archive: Option<PathBuf>,

    /// Loop archive naming pattern.
    #[arg(long)]
    pub archive_format: Option<String>,

    /// Accounting/billing account.
    #[arg(long)]
    pub account: Option<String>,

    /// Job dependency (`kind=id[:id...]`); may be given more than once.
    #[arg(long)]
    pub depend: Vec<String>,

    /// Comma-separated files/directories excluded from working-directory staging.
    #[arg(long)]
    pub exclude: Option<String>,

    /// Comma-separated files/directories explicitly staged into the working directory.
    #[arg(long)]
    pub include: Option<String>,
}

impl SubmitArgs {
    fn into_options(self) -> RuntimeResult<SubmitOptions> {
        let mut resources = Resources::default();
        resources.nnodes = self.nnodes;
        resources.ncpus = self.ncpus;
        resources.ngpus = self.ngpus;
        if let Some(mem) = &self.mem {
            resources.mem = Some(mem.parse().map_err(|_| RuntimeError::BadDirective(format!("mem={mem}")))?);
        }
        if let Some(walltime) = &self.walltime {
            resources.walltime = Some(walltime.parse().map_err(|_| RuntimeError::BadDirective(format!("walltime={walltime}")))?);
        }
        if let Some(work_dir) = &self.work_dir {
            resources.work_dir = Some(WorkDir::parse(work_dir).map_err(|_| RuntimeError::BadDirective(format!("work_dir={work_dir}")))?);
        }

        let depend = if self.depend.is_empty() {
            Vec::new()
        } else {
            Dependency::parse_many(&self.depend.join(",")).map_err(RuntimeError::from)?
        };

        Ok(SubmitOptions {
            queue: self.queue,
            resources,
            job_type: self.job_type.as_deref().map(JobType::parse).transpose().map_err(RuntimeError::from)?,
            loop_start: self.loop_start,
            loop_end: self.loop_end,
            archive: self.archive,
            archive_format: self.archive_format,
            account: self.account,
            depend,
            exclude: self.exclude.map(|s| s.split(',').map(PathBuf::from).collect()).unwrap_or_default(),
            include: self.include.map(|s| s.split(',').map(PathBuf::from).collect()).unwrap_or_default(),
            batch_system: None,
        })
    }
}

/// Validates and submits `args.script`.
pub async fn run(args: SubmitArgs, batch_system_override: Option<&str>) -> RuntimeResult<()> {
    let script = args.script.clone();
    let options = args.into_options()?;

    let backend = BatchRegistry::global().obtain(batch_system_override)?;
    let submission_dir = script.parent().unwrap_or(std::path::Path::new(".")).canonicalize().unwrap_or_default();
    let is_shared = backend.is_shared(&submission_dir);

    let submitter = Submitter::new(backend.as_ref(), env!("CARGO_PKG_VERSION"));
    let record_path = submitter.submit(&script, options, is_shared).await?;

    info!(record = %record_path.display(), "job submitted");
    Ok(())
}
