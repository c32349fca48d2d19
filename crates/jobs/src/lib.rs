// crates/jobs/src/lib.rs
//! Asynchronous job management for long-running external processes.
//!
//! Jobs wrap container image work driven through child processes: playbook
//! builds, `save` exports, and registry pushes. Submission returns a job id
//! immediately; a pump task streams the child's merged output into the
//! job's log, a classifier extracts per-environment results from build
//! output, and the store keeps finished jobs queryable for a retention
//! window.

pub mod classify;
pub mod error;
pub mod manager;
pub mod process;
pub mod store;
pub mod types;

mod pump;

pub use error::JobError;
pub use manager::{JobManager, ManagerConfig};
pub use types::{
    BuildRequest, ExportRequest, Job, JobDetails, JobId, JobKind, JobRequest, JobStatus,
    JobSummary, PushRequest, RegistryCredentials,
};
