//! Error taxonomy for the submission/execution layer.

use std::path::PathBuf;

use qq_batch::BatchError;
use qq_core::CoreError;

/// Errors raised by the Submitter, Runner, Archiver, and Informer.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The script's shebang is not the literal `#!/usr/bin/env -S qq run` contract.
    #[error("script '{0}' does not have the expected qq shebang")]
    BadShebang(PathBuf),

    /// A `# qq <key>=<value>` directive could not be parsed.
    #[error("malformed qq directive '{0}'")]
    BadDirective(String),

    /// The submission directory already carries qq runtime files and this
    /// submission isn't a valid loop-job continuation.
    #[error("submission directory '{0}' already contains qq runtime files")]
    DirtySubmissionDir(PathBuf),

    /// `work_dir` is `input_dir`/`job_dir` but the submission directory is
    /// not on shared storage.
    #[error("cannot use work_dir=input_dir: submission directory '{0}' is not shared")]
    UnsuitableInputDir(PathBuf),

    /// A job record could not be located, read, or parsed.
    #[error("job record unreachable: {0}")]
    Communication(#[from] CoreError),

    /// The underlying batch system rejected an operation.
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Filesystem or subprocess I/O failed outside the batch layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The job is not in a state valid for the requested operation.
    #[error("job is not in a suitable state for this operation: {0}")]
    NotSuitable(String),

    /// A caller-supplied job ID does not match the record found for it.
    #[error("job id '{given}' does not match the record found ('{recorded}')")]
    JobMismatch {
        /// The ID supplied by the caller.
        given: String,
        /// The ID actually found in the record.
        recorded: String,
    },

    /// An invariant that should be unreachable through valid user input was
    /// violated; this is a bug, not a user-facing validation failure.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

/// Convenience alias for fallible runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl RuntimeError {
    /// Maps this error to the process exit code `qq run` must terminate with (§6, §7).
    pub fn run_exit_code(&self) -> i32 {
        let cfg = qq_core::Config::global();
        match self {
            RuntimeError::Communication(_) => cfg.exit_codes.qq_run_fatal,
            RuntimeError::JobMismatch { .. } => cfg.exit_codes.qq_run_communication,
            _ => cfg.exit_codes.unexpected_error,
        }
    }

    /// Maps this error to the process exit code `qq submit` must terminate with (§6, §7).
    pub fn submit_exit_code(&self) -> i32 {
        let cfg = qq_core::Config::global();
        match self {
            RuntimeError::BadShebang(_)
            | RuntimeError::BadDirective(_)
            | RuntimeError::DirtySubmissionDir(_)
            | RuntimeError::UnsuitableInputDir(_)
            | RuntimeError::Batch(_) => cfg.exit_codes.default,
            RuntimeError::Internal(_) => cfg.exit_codes.unexpected_error,
            _ => cfg.exit_codes.unexpected_error,
        }
    }
}
