//! Compile-time default values shared across the core, batch, and runtime crates.
//!
//! These are the fallback values layered under the user's TOML configuration
//! file (see [`crate::config`]); nothing here is itself read at runtime by
//! name, it is always reached through a loaded [`crate::config::Config`].

/// Suffix for qq info files.
pub const QQ_INFO_SUFFIX: &str = ".qqinfo";
/// Suffix for qq output files.
pub const QQ_OUT_SUFFIX: &str = ".qqout";
/// Suffix for captured stdout.
pub const STDOUT_SUFFIX: &str = ".out";
/// Suffix for captured stderr.
pub const STDERR_SUFFIX: &str = ".err";

/// All reserved file suffixes used by qq.
pub const QQ_SUFFIXES: &[&str] = &[QQ_INFO_SUFFIX, QQ_OUT_SUFFIX, STDOUT_SUFFIX, STDERR_SUFFIX];

/// Indicates the current process is running inside a qq-managed job.
pub const ENV_GUARD: &str = "QQ_ENV_SET";
/// Enables debug-level logging.
pub const ENV_DEBUG_MODE: &str = "QQ_DEBUG";
/// Absolute path to the job's info file.
pub const ENV_INFO_FILE: &str = "QQ_INFO";
/// Name of the machine the job was submitted from.
pub const ENV_INPUT_MACHINE: &str = "QQ_INPUT_MACHINE";
/// Absolute path to the submission directory.
pub const ENV_INPUT_DIR: &str = "QQ_INPUT_DIR";
/// Whether the job was submitted from shared storage.
pub const ENV_SHARED_SUBMIT: &str = "QQ_SHARED_SUBMIT";
/// Name of the batch system to use.
pub const ENV_BATCH_SYSTEM: &str = "QQ_BATCH_SYSTEM";
/// Current loop-cycle index.
pub const ENV_LOOP_CURRENT: &str = "QQ_LOOP_CURRENT";
/// Starting loop-cycle index.
pub const ENV_LOOP_START: &str = "QQ_LOOP_START";
/// Final loop-cycle index.
pub const ENV_LOOP_END: &str = "QQ_LOOP_END";
/// Archive filename pattern.
pub const ENV_ARCHIVE_FORMAT: &str = "QQ_ARCHIVE_FORMAT";
/// Total CPUs allocated to the job.
pub const ENV_NCPUS: &str = "QQ_NCPUS";
/// Total GPUs allocated to the job.
pub const ENV_NGPUS: &str = "QQ_NGPUS";
/// Total nodes allocated to the job.
pub const ENV_NNODES: &str = "QQ_NNODES";
/// Walltime, in hours, allocated to the job.
pub const ENV_WALLTIME: &str = "QQ_WALLTIME";
/// Set by the user script to suppress the next loop-cycle resubmission.
pub const ENV_NO_RESUBMIT: &str = "QQ_NO_RESUBMIT";

/// Format string for persisted timestamps (`YYYY-MM-DD HH:MM:SS`).
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Name of the inner work directory created beneath a scratch root.
pub const SCRATCH_DIR_INNER: &str = "main";

/// Default SSH connection timeout, in seconds.
pub const DEFAULT_SSH_TIMEOUT_SECS: u64 = 60;
/// Default rsync operation timeout, in seconds.
pub const DEFAULT_RSYNC_TIMEOUT_SECS: u64 = 600;

/// Default number of retry attempts for Runner I/O operations.
pub const DEFAULT_RUNNER_RETRY_TRIES: u32 = 3;
/// Default wait time, in seconds, between Runner retry attempts.
pub const DEFAULT_RUNNER_RETRY_WAIT_SECS: u64 = 300;
/// Default grace period, in seconds, between SIGTERM and SIGKILL.
pub const DEFAULT_SIGTERM_TO_SIGKILL_SECS: u64 = 5;
/// Default polling interval, in seconds, while waiting on the child process.
pub const DEFAULT_SUBPROCESS_POLL_SECS: u64 = 2;

/// Default number of retry attempts for Archiver I/O operations.
pub const DEFAULT_ARCHIVER_RETRY_TRIES: u32 = 3;
/// Default wait time, in seconds, between Archiver retry attempts.
pub const DEFAULT_ARCHIVER_RETRY_WAIT_SECS: u64 = 300;

/// Default printf-style naming pattern for loop-job cycles.
pub const DEFAULT_LOOP_JOB_PATTERN: &str = "+%04d";

/// Sentinel shell exit code used by `navigateToDestination` when the remote
/// `cd` into the target directory fails, distinguishing that from an SSH
/// transport failure (exit 255).
pub const CD_FAIL_EXIT_CODE: i32 = 94;
/// Exit code used by `ssh` itself on connection failure.
pub const SSH_FAIL_EXIT_CODE: i32 = 255;

/// `qq submit` exit code for a validation/backend-rejection failure.
pub const EXIT_SUBMIT_FAILURE: i32 = 91;
/// `qq run` exit code when the job record is unreachable (Runner-fatal).
pub const EXIT_RUNNER_FATAL: i32 = 92;
/// `qq run` exit code for a Runner communication error (e.g. KILLED mid-reload).
pub const EXIT_RUNNER_COMMUNICATION: i32 = 93;
/// `qq run` exit code a user script may return to suppress the next resubmission.
pub const EXIT_NO_RESUBMIT: i32 = 95;
/// Exit code for an unexpected/internal error.
pub const EXIT_UNEXPECTED: i32 = 99;
