//! Implementation of the `list` command.

use clap::Parser;
use qq_batch::BatchRegistry;
use qq_batch::sort_jobs;
use qq_runtime::RuntimeResult;

/// Arguments for the `list` command.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Include jobs that have already finished.
    #[arg(long)]
    pub all: bool,
}

/// Lists jobs known to the detected backend for the current user.
pub async fn run(args: ListArgs, batch_system_override: Option<&str>) -> RuntimeResult<()> {
    let backend = BatchRegistry::global().obtain(batch_system_override)?;
    let username = whoami::fallible::username().unwrap_or_else(|_| "unknown".to_string());

    let mut jobs = if args.all {
        backend.get_batch_jobs(&username).await?
    } else {
        backend.get_unfinished_batch_jobs(&username).await?
    };
    sort_jobs(&mut jobs);

    for job in &jobs {
        println!("{}\t{}\t{}", job.id(), job.state(), job.name().unwrap_or("-"));
    }
    Ok(())
}
