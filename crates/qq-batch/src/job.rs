//! The read-only contract for a single job as reported by a batch backend.

use chrono::DateTime;
use chrono::Utc;
use qq_core::BatchState;
use qq_core::Duration;
use qq_core::Size;

/// A snapshot of a job's state as known to the batch scheduler.
///
/// Implementations must tolerate the job no longer existing in the
/// scheduler's records ([`BatchJob::is_empty`]) rather than erroring —
/// a single-job lookup for an unknown ID returns the empty sentinel, per
/// the *query-failed* tag's carve-out (§4.1.5).
pub trait BatchJob: Send + Sync {
    /// True if this job carries no information (the scheduler has no record of it).
    fn is_empty(&self) -> bool;
    /// The scheduler-assigned job ID.
    fn id(&self) -> &str;
    /// Billing/accounting account, if any.
    fn account(&self) -> Option<&str>;
    /// The job's state as reported by the scheduler.
    fn state(&self) -> BatchState;
    /// A scheduler-provided human comment (e.g. PBS's `comment` attribute).
    fn comment(&self) -> Option<&str>;
    /// Estimated start time and node, if the scheduler provides one.
    fn estimated(&self) -> Option<(DateTime<Utc>, String)>;
    /// The primary node the job is/was running on.
    fn main_node(&self) -> Option<&str>;
    /// All nodes allocated to the job.
    fn nodes(&self) -> Option<&[String]>;
    /// Owning user.
    fn user(&self) -> Option<&str>;
    /// Allocated CPU count.
    fn ncpus(&self) -> Option<u32>;
    /// Allocated GPU count.
    fn ngpus(&self) -> Option<u32>;
    /// Allocated node count.
    fn nnodes(&self) -> Option<u32>;
    /// Allocated memory.
    fn mem(&self) -> Option<Size>;
    /// Job name.
    fn name(&self) -> Option<&str>;
    /// Submission queue.
    fn queue(&self) -> Option<&str>;
    /// Submission timestamp.
    fn submission_time(&self) -> Option<DateTime<Utc>>;
    /// Start timestamp.
    fn start_time(&self) -> Option<DateTime<Utc>>;
    /// Completion timestamp.
    fn completion_time(&self) -> Option<DateTime<Utc>>;
    /// Walltime limit.
    fn walltime(&self) -> Option<Duration>;
    /// Exit code, once the job has finished.
    fn exit_code(&self) -> Option<i32>;
}
