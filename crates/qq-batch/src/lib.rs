//! Polymorphic batch-scheduler abstraction: a single [`Batch`] trait
//! implemented over PBS Pro, Slurm, and an in-process virtual backend,
//! plus the typed job/queue/node views each scheduler's CLI tools are
//! parsed into (§4.1).

mod backend;
mod error;
mod job;
mod node;
mod pbs;
mod queue;
mod remote_fs;
mod slurm;
mod vbs;

pub use backend::sort_jobs;
pub use backend::Batch;
pub use backend::BatchRegistry;
pub use error::BatchError;
pub use error::BatchResult;
pub use job::BatchJob;
pub use node::BatchNode;
pub use pbs::PbsBackend;
pub use queue::BatchQueue;
pub use remote_fs::Endpoint;
pub use remote_fs::RemoteFs;
pub use remote_fs::SshRemoteFs;
pub use slurm::SlurmBackend;
pub use vbs::VirtualBackend;
