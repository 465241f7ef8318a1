//! Core data model shared by the batch-backend and runtime crates: typed
//! resource values, job records, state derivation, and process-wide
//! configuration.

pub mod config;
pub mod constants;
pub mod dependency;
pub mod duration;
pub mod error;
pub mod job_type;
pub mod loop_info;
pub mod record;
pub mod repeater;
pub mod resources;
pub mod retryer;
pub mod size;
pub mod state;

pub use dependency::Dependency;
pub use dependency::DependencyKind;
pub use duration::Duration;
pub use error::CoreError;
pub use error::CoreResult;
pub use job_type::JobType;
pub use loop_info::LoopInfo;
pub use record::Record;
pub use resources::Resources;
pub use resources::WorkDir;
pub use size::Size;
pub use state::BatchState;
pub use state::NaiveState;
pub use state::RealState;
