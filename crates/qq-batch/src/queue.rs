//! The read-only contract for a scheduler queue.

use qq_core::Duration;

/// A snapshot of a scheduler queue's state and job counts.
pub trait BatchQueue: Send + Sync {
    /// The queue's name.
    fn name(&self) -> &str;
    /// Scheduling priority, if the scheduler exposes one.
    fn priority(&self) -> Option<i32>;
    /// Total jobs currently associated with the queue.
    fn total_jobs(&self) -> u32;
    /// Jobs currently running.
    fn running_jobs(&self) -> u32;
    /// Jobs currently queued.
    fn queued_jobs(&self) -> u32;
    /// Jobs in any other state (held, exiting, ...).
    fn other_jobs(&self) -> u32;
    /// Maximum walltime allowed, if bounded.
    fn max_walltime(&self) -> Option<Duration>;
    /// A human-readable description of the queue.
    fn comment(&self) -> &str;
    /// True if `user` may submit to this queue.
    fn is_available_to_user(&self, user: &str) -> bool;
    /// Destination queues this route forwards to, if this is a routing queue.
    fn destinations(&self) -> &[String];
    /// True if the queue is reachable only via a routing queue, never directly.
    fn from_route_only(&self) -> bool;
}
