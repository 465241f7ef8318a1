//! Error taxonomy for the core data model.

use std::path::PathBuf;

/// Errors raised while constructing or manipulating core value types
/// (`Size`, `Duration`, `Resources`, `Dependency`, `LoopInfo`, job records).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A `Size` or `Duration` string did not match any accepted grammar.
    #[error("invalid size string '{0}'")]
    InvalidSize(String),

    /// A duration string did not match `[D-]HH:MM:SS` or the compact `wdhms` form.
    #[error("invalid time string '{0}'")]
    InvalidDuration(String),

    /// Division by a zero-valued `Size`.
    #[error("division by zero")]
    DivisionByZero,

    /// A `Resources` bundle violated one of its invariants (§3.3).
    #[error("invalid resources: {0}")]
    InvalidResources(String),

    /// A dependency string did not match `<kind>=<id>[:<id>...]`.
    #[error("invalid dependency string '{0}'")]
    InvalidDependency(String),

    /// `LoopInfo` construction violated `0 <= start <= current <= end`, or
    /// the archive directory coincided with the submission directory.
    #[error("invalid loop info: {0}")]
    InvalidLoopInfo(String),

    /// The job record file could not be found, read, or parsed.
    #[error("could not read job record at {path}: {source}")]
    RecordRead {
        /// Path to the record file that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The job record's YAML body could not be deserialized.
    #[error("malformed job record at {path}: {source}")]
    RecordParse {
        /// Path to the malformed record.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml_ng::Error,
    },

    /// The job record could not be serialized or written back to disk.
    #[error("could not write job record at {path}: {source}")]
    RecordWrite {
        /// Path to the record file that failed to write.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A caller-supplied job ID did not match the record found for it.
    #[error("job id '{given}' does not match record job id '{recorded}'")]
    JobMismatch {
        /// The ID supplied by the caller.
        given: String,
        /// The ID actually found in the record.
        recorded: String,
    },

    /// The requested operation is not valid for the job's current state.
    #[error("job is not in a suitable state for this operation: {0}")]
    NotSuitable(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Convenience alias for fallible core operations.
pub type CoreResult<T> = Result<T, CoreError>;
