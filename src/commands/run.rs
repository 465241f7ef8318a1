//! Implementation of the `run` command; invoked only via a script's shebang.

use std::path::PathBuf;

use clap::Parser;
use qq_batch::BatchRegistry;
use qq_core::constants::ENV_INFO_FILE;
use qq_runtime::Runner;
use qq_runtime::RuntimeError;
use qq_runtime::RuntimeResult;

/// Arguments for the `run` command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the script being run (supplied by the shebang line).
    pub script: PathBuf,
}

/// Runs the job whose record is pointed to by `QQ_INFO`, returning the
/// process exit code the caller must terminate with.
pub async fn run(args: RunArgs) -> RuntimeResult<i32> {
    let _ = args.script;

    let record_path = std::env::var(ENV_INFO_FILE)
        .map(PathBuf::from)
        .map_err(|_| RuntimeError::Internal(format!("{ENV_INFO_FILE} is not set; qq run must be invoked via a script shebang")))?;

    let backend = BatchRegistry::global().from_env_var_or_guess()?;
    let runner = Runner::new(backend.as_ref());
    runner.run(&record_path).await
}
