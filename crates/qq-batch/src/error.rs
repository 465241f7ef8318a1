//! Error taxonomy for the batch abstraction layer (§7).

/// Errors raised by a `Batch` backend or its remote-filesystem primitives.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// No backend is available/registered under the requested name.
    #[error("no batch system available: {0}")]
    NotAvailable(String),

    /// The backend's submit command exited non-zero.
    #[error("submission failed: {0}")]
    SubmissionFailed(String),

    /// A query command (status, queue/node listing) failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// The `ssh` transport itself failed (connection refused, auth failure, exit 255).
    #[error("ssh connection failed: {0}")]
    SshFailed(String),

    /// `ssh` connected but the remote `cd` into the target directory failed
    /// (sentinel exit code 94, distinguishing this from a transport failure).
    #[error("could not reach remote directory '{0}'")]
    CdFailed(String),

    /// An SSH/rsync operation exceeded its bounded timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A resource bundle could not be rendered for this backend.
    #[error("invalid resources for this backend: {0}")]
    InvalidResources(#[from] qq_core::CoreError),

    /// A remote-FS sync was asked to bridge two non-local, distinct endpoints.
    #[error("cannot sync between two distinct non-local endpoints")]
    BothEndpointsRemote,

    /// Underlying process-spawn or I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for fallible batch operations.
pub type BatchResult<T> = Result<T, BatchError>;
