//! Implementation of the `status` command.

use clap::Parser;
use qq_batch::BatchRegistry;
use qq_runtime::Informer;
use qq_runtime::RuntimeResult;

/// Arguments for the `status` command.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Job ID or job name; defaults to the job in the current directory.
    pub job: Option<String>,
}

/// Prints the targeted job's reconciled state.
pub async fn run(args: StatusArgs, batch_system_override: Option<&str>) -> RuntimeResult<()> {
    let record_path = super::kill::resolve_record_path(args.job.as_deref())?;
    let mut informer = Informer::load(&record_path)?;

    let backend = BatchRegistry::global().obtain(batch_system_override)?;
    let state = informer.get_real_state(backend.as_ref()).await?;

    println!("{}: {state}", informer.record().job_name);
    Ok(())
}
