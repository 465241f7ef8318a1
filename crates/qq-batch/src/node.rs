//! The read-only contract for a compute node.

use qq_core::Size;

/// A snapshot of a compute node's capacity and current allocation.
pub trait BatchNode: Send + Sync {
    /// The node's hostname.
    fn name(&self) -> &str;
    /// Total CPU cores.
    fn ncpus(&self) -> u32;
    /// Currently unallocated CPU cores.
    fn nfree_cpus(&self) -> u32;
    /// Total GPUs.
    fn ngpus(&self) -> u32;
    /// Currently unallocated GPUs.
    fn nfree_gpus(&self) -> u32;
    /// Total CPU-side memory.
    fn cpu_memory(&self) -> Size;
    /// Currently unallocated CPU-side memory.
    fn free_cpu_memory(&self) -> Size;
    /// Total GPU-side memory.
    fn gpu_memory(&self) -> Size;
    /// Currently unallocated GPU-side memory.
    fn free_gpu_memory(&self) -> Size;
    /// Total node-local scratch storage.
    fn local_scratch(&self) -> Size;
    /// Free node-local scratch storage.
    fn free_local_scratch(&self) -> Size;
    /// Total node-local SSD scratch storage.
    fn ssd_scratch(&self) -> Size;
    /// Free node-local SSD scratch storage.
    fn free_ssd_scratch(&self) -> Size;
    /// Total shared scratch storage reachable from this node.
    fn shared_scratch(&self) -> Size;
    /// Free shared scratch storage reachable from this node.
    fn free_shared_scratch(&self) -> Size;
    /// Node properties/labels, for `props` matching.
    fn properties(&self) -> &[String];
    /// True if `user` may schedule work on this node.
    fn is_available_to_user(&self, user: &str) -> bool;
}
