//! Implementation of the `kill` command.

use std::path::PathBuf;

use clap::Parser;
use qq_batch::BatchRegistry;
use qq_core::Config;
use qq_runtime::Informer;
use qq_runtime::RuntimeResult;
use tracing::info;

/// Arguments for the `kill` command.
#[derive(Parser, Debug)]
pub struct KillArgs {
    /// Job ID or job name; defaults to the job in the current directory.
    pub job: Option<String>,
}

/// Marks the targeted job KILLED and asks the backend to terminate it.
pub async fn run(args: KillArgs, batch_system_override: Option<&str>) -> RuntimeResult<()> {
    let record_path = resolve_record_path(args.job.as_deref())?;
    let mut informer = Informer::load(&record_path)?;

    let backend = BatchRegistry::global().obtain(batch_system_override)?;
    let job_id = informer.record().job_id.clone();

    informer.set_killed(chrono::Utc::now());
    informer.save()?;
    backend.job_kill(&job_id).await?;

    info!(job_id = %job_id, "job marked killed");
    Ok(())
}

pub(crate) fn resolve_record_path(job: Option<&str>) -> RuntimeResult<PathBuf> {
    let suffix = &Config::global().suffixes.qq_info;
    if let Some(job) = job {
        let candidate = PathBuf::from(format!("{job}{suffix}"));
        if candidate.is_file() {
            return Ok(candidate);
        }
        return find_matching_record(job, suffix);
    }
    find_single_record_in_cwd(suffix)
}

fn find_matching_record(job: &str, suffix: &str) -> RuntimeResult<PathBuf> {
    for entry in std::fs::read_dir(".")?.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if !name.ends_with(suffix) {
            continue;
        }
        if let Ok(informer) = Informer::load(&path) {
            if informer.is_job(job) {
                return Ok(path);
            }
        }
    }
    Err(qq_runtime::RuntimeError::NotSuitable(format!("no job record found matching '{job}'")))
}

fn find_single_record_in_cwd(suffix: &str) -> RuntimeResult<PathBuf> {
    for entry in std::fs::read_dir(".")?.flatten() {
        let path = entry.path();
        if path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.ends_with(suffix)) {
            return Ok(path);
        }
    }
    Err(qq_runtime::RuntimeError::NotSuitable("no job record found in the current directory".to_string()))
}
