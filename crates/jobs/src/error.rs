// crates/jobs/src/error.rs
//! Error taxonomy for job submission and control.

use thiserror::Error;

use crate::types::JobId;

/// Errors surfaced by the job manager.
///
/// Submission rejections (`Validation`, `AtCapacity`, `Dependency`, `Launch`)
/// are returned before a job record exists. A nonzero exit of the spawned
/// process is never an error here; it is recorded as the job failing.
#[derive(Debug, Error)]
pub enum JobError {
    /// The request references something that does not exist (unknown
    /// environment, image not present locally, bad credentials).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Admitting the job would exceed the concurrent build cap.
    #[error("maximum concurrent builds ({limit}) reached")]
    AtCapacity { limit: usize },

    /// A required external binary is missing or fails its version probe.
    #[error("dependency unavailable: {0}")]
    Dependency(String),

    /// The OS refused to spawn the job's process.
    #[error("failed to launch process: {0}")]
    Launch(#[source] std::io::Error),

    /// I/O failure while preparing the job (temp files, export directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job {0} not found")]
    NotFound(JobId),

    /// Cancellation (or another running-only operation) on a terminal job.
    #[error("job {0} is not running")]
    NotRunning(JobId),

    /// The process survived SIGTERM and SIGKILL; the job stays Running so
    /// the caller can retry.
    #[error("failed to cancel job {id}: {reason}")]
    CancelFailed { id: JobId, reason: String },
}
