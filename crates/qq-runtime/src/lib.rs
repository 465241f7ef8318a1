//! The submission and execution layer: validates and submits scripts,
//! drives their execution inside the batch system, and reconciles their
//! persisted record against the live scheduler view.

mod archiver;
mod error;
mod informer;
mod runner;
mod submitter;

pub use archiver::Archiver;
pub use error::RuntimeError;
pub use error::RuntimeResult;
pub use informer::Informer;
pub use runner::Runner;
pub use submitter::Directives;
pub use submitter::SubmitOptions;
pub use submitter::Submitter;
