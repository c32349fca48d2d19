// crates/jobs/src/types.rs
//! Job records, kind-specific payloads, and submission requests.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a job, generated at submission and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, used in generated file names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Externally-visible lifecycle state of a job.
///
/// There is no pending state: a job is either admitted and running, or the
/// submission was rejected synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    /// Wire form of the status, matching its serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Build,
    Export,
    Push,
}

impl JobKind {
    /// Capitalized label used in log lines ("Build started at ...").
    pub fn label(self) -> &'static str {
        match self {
            JobKind::Build => "Build",
            JobKind::Export => "Export",
            JobKind::Push => "Push",
        }
    }
}

/// Kind-specific result fields, flattened into the job's serialized form.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobDetails {
    Build {
        /// Environment names requested for this build.
        environments: Vec<String>,
        container_runtime: String,
        /// Environments named in a success-marker log line. May overlap with
        /// `failed_builds` when markers of both polarities mention a name.
        successful_builds: Vec<String>,
        failed_builds: Vec<String>,
        /// Ephemeral playbook vars file, removed best-effort at finalization.
        #[serde(skip)]
        vars_file: Option<PathBuf>,
    },
    Export {
        image_name: String,
        file_path: PathBuf,
        /// Set once the export completed and the file was measured.
        file_size: Option<u64>,
    },
    Push {
        image_name: String,
        target_url: String,
        #[serde(skip)]
        tagged_image: String,
        #[serde(skip)]
        container_runtime: String,
    },
}

impl JobDetails {
    pub fn kind(&self) -> JobKind {
        match self {
            JobDetails::Build { .. } => JobKind::Build,
            JobDetails::Export { .. } => JobKind::Export,
            JobDetails::Push { .. } => JobKind::Push,
        }
    }

    /// Short human-readable subject for list views: the environment list for
    /// builds, the image name otherwise.
    pub fn subject(&self) -> String {
        match self {
            JobDetails::Build { environments, .. } => environments.join(", "),
            JobDetails::Export { image_name, .. } => image_name.clone(),
            JobDetails::Push { image_name, .. } => image_name.clone(),
        }
    }
}

/// One tracked invocation of an external process.
///
/// Lives in exactly one of the store's two partitions. The log grows while
/// the job runs and is frozen once a terminal status is reached.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub log: Vec<String>,
    #[serde(flatten)]
    pub details: JobDetails,
    /// OS pid of the running process; used only for cancellation signals.
    #[serde(skip)]
    pub pid: Option<u32>,
    /// Set by the first finalizer to claim the job; later claims bail out.
    #[serde(skip)]
    pub finalizing: bool,
    /// A cancel call is in flight; the pump finalizes as Cancelled, not Failed.
    #[serde(skip)]
    pub cancel_requested: bool,
}

impl Job {
    pub fn new(details: JobDetails) -> Self {
        Self {
            id: JobId::new(),
            kind: details.kind(),
            status: JobStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            exit_code: None,
            log: Vec::new(),
            details,
            pid: None,
            finalizing: false,
            cancel_requested: false,
        }
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            kind: self.kind,
            status: self.status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            subject: self.details.subject(),
        }
    }
}

/// Compact row for job listings spanning both partitions.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct JobSummary {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub subject: String,
}

/// Parameters for a playbook-driven environment build.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct BuildRequest {
    pub environments: Vec<String>,
    pub container_runtime: Option<String>,
}

/// Parameters for exporting an image to a tar archive.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct ExportRequest {
    pub image_name: String,
    pub container_runtime: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

/// Parameters for pushing an image to a remote registry.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct PushRequest {
    pub image_name: String,
    pub registry_url: String,
    pub repository: String,
    pub tag: Option<String>,
    pub credentials: RegistryCredentials,
    pub container_runtime: Option<String>,
}

/// A submission, one variant per job kind.
#[derive(Debug, Clone)]
pub enum JobRequest {
    Build(BuildRequest),
    Export(ExportRequest),
    Push(PushRequest),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_job_id_display_and_short() {
        let id = JobId::new();
        assert_eq!(id.to_string().len(), 36);
        assert_eq!(id.short().len(), 8);
        assert!(!id.short().contains('-'));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_job_serializes_flattened_details() {
        let job = Job::new(JobDetails::Build {
            environments: vec!["a".into(), "b".into()],
            container_runtime: "podman".into(),
            successful_builds: vec![],
            failed_builds: vec![],
            vars_file: None,
        });

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["kind"], "build");
        assert_eq!(value["status"], "running");
        assert_eq!(value["environments"][1], "b");
        assert_eq!(value["successful_builds"], serde_json::json!([]));
        // Internal bookkeeping must not leak into responses.
        assert!(value.get("pid").is_none());
        assert!(value.get("vars_file").is_none());
        assert!(value.get("finalizing").is_none());
    }

    #[test]
    fn test_export_details_serialization() {
        let job = Job::new(JobDetails::Export {
            image_name: "my-ee:latest".into(),
            file_path: PathBuf::from("/tmp/exports/my-ee_latest_12345678.tar"),
            file_size: Some(2048),
        });

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["kind"], "export");
        assert_eq!(value["image_name"], "my-ee:latest");
        assert_eq!(value["file_size"], 2048);
    }

    #[test]
    fn test_push_details_hide_internals() {
        let job = Job::new(JobDetails::Push {
            image_name: "my-ee:latest".into(),
            target_url: "quay.io/org/my-ee:v1".into(),
            tagged_image: "quay.io/org/my-ee:v1".into(),
            container_runtime: "podman".into(),
        });

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["target_url"], "quay.io/org/my-ee:v1");
        assert!(value.get("tagged_image").is_none());
        assert!(value.get("container_runtime").is_none());
    }

    #[test]
    fn test_summary_subject() {
        let job = Job::new(JobDetails::Build {
            environments: vec!["rhel9-ee".into(), "minimal-ee".into()],
            container_runtime: "podman".into(),
            successful_builds: vec![],
            failed_builds: vec![],
            vars_file: None,
        });
        assert_eq!(job.summary().subject, "rhel9-ee, minimal-ee");
        assert_eq!(job.summary().kind, JobKind::Build);
    }
}
