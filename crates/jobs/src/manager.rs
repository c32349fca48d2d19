// crates/jobs/src/manager.rs
//! Job manager: validates submissions, applies admission control, spawns the
//! external process, schedules the output pump, and finalizes jobs.
//!
//! Finalization runs on two triggers, the pump's own exit path and a lazy
//! check inside `status`. Both funnel into `finalize_job`, which claims
//! the job exactly once and is a no-op afterwards.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::classify::{apply_exit_fallback, Classifier};
use crate::error::JobError;
use crate::process::{pid_alive, run_capture, signal_kill, signal_terminate, ProcessCommand, ProcessHandle};
use crate::pump::pump_output;
use crate::store::{lock_job, JobStore};
use crate::types::{
    BuildRequest, ExportRequest, Job, JobDetails, JobId, JobKind, JobRequest, JobStatus,
    JobSummary, PushRequest,
};

/// Tunables for the job manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Directory containing one subdirectory per buildable environment.
    pub environments_dir: PathBuf,
    /// Playbook handed to the playbook runner for builds.
    pub playbook_path: PathBuf,
    /// Playbook runner binary.
    pub playbook_runner: String,
    /// Container runtime binary used when a request does not name one.
    pub container_runtime: String,
    /// Directory receiving exported image tars.
    pub exports_dir: PathBuf,
    /// Admission cap; applies to Build jobs only.
    pub max_concurrent_builds: usize,
    /// How long finished jobs stay queryable before eviction.
    pub retention: Duration,
    /// SIGTERM-to-SIGKILL grace period during cancellation.
    pub cancel_grace: Duration,
    /// Output pump poll interval.
    pub poll_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            environments_dir: PathBuf::from("environments"),
            playbook_path: PathBuf::from("build_environments.yml"),
            playbook_runner: "ansible-playbook".into(),
            container_runtime: "podman".into(),
            exports_dir: std::env::temp_dir().join("ee-forge-exports"),
            max_concurrent_builds: 3,
            retention: Duration::from_secs(3600),
            cancel_grace: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct JobManager {
    store: Arc<JobStore>,
    config: ManagerConfig,
}

impl JobManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            store: Arc::new(JobStore::new()),
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Validate, admit, and start a job. Returns as soon as the process is
    /// spawned; the pump task tracks it from there.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId, JobError> {
        // Opportunistic retention sweep; there is no background timer.
        self.store.evict_finished_older_than(self.config.retention);

        match request {
            JobRequest::Build(req) => self.submit_build(req).await,
            JobRequest::Export(req) => self.submit_export(req).await,
            JobRequest::Push(req) => self.submit_push(req).await,
        }
    }

    /// Snapshot of a job's current state, including its log.
    pub async fn status(&self, id: JobId) -> Result<Job, JobError> {
        let slot = self.store.get(id).ok_or(JobError::NotFound(id))?;

        // Lazy finalization: the pump records the exit code on the job as
        // soon as the process is reaped, slightly before its finalize task
        // runs. A status query landing in that window completes the
        // transition itself rather than reporting Running.
        let recorded_code = {
            let job = lock_job(&slot);
            if job.status == JobStatus::Running && !job.finalizing {
                job.exit_code
            } else {
                None
            }
        };
        if let Some(code) = recorded_code {
            finalize_job(&self.store, id, code).await;
        }

        let snapshot = lock_job(&slot).clone();
        Ok(snapshot)
    }

    /// Summaries of all known jobs, active and retained finished.
    pub fn list(&self) -> Vec<JobSummary> {
        self.store.list()
    }

    /// Cancel a running job: SIGTERM, wait out the grace period, SIGKILL if
    /// still alive. If the process survives even SIGKILL the job is left
    /// Running and an error is returned so the caller can retry.
    pub async fn cancel(&self, id: JobId) -> Result<(), JobError> {
        let slot = self.store.get(id).ok_or(JobError::NotFound(id))?;

        let pid = {
            let mut job = lock_job(&slot);
            if job.status != JobStatus::Running {
                return Err(JobError::NotRunning(id));
            }
            // The pump finalizes as Cancelled instead of Failed from here on.
            job.cancel_requested = true;
            job.pid
        };

        if let Some(pid) = pid {
            if pid_alive(pid) {
                signal_terminate(pid);
                tokio::time::sleep(self.config.cancel_grace).await;
                if pid_alive(pid) {
                    signal_kill(pid);
                    // Give the pump a moment to reap; a zombie probes alive.
                    for _ in 0..10 {
                        if !pid_alive(pid) {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    if pid_alive(pid) {
                        let mut job = lock_job(&slot);
                        job.cancel_requested = false;
                        return Err(JobError::CancelFailed {
                            id,
                            reason: "process survived SIGKILL".into(),
                        });
                    }
                }
            }
        }

        {
            let mut job = lock_job(&slot);
            if job.status == JobStatus::Running {
                let now = Utc::now();
                let label = job.kind.label();
                job.status = JobStatus::Cancelled;
                job.finished_at = Some(now);
                job.push_log(format!("{label} cancelled at {}", now.format("%H:%M:%S")));
            }
        }
        self.store.move_to_finished(id);
        tracing::info!(job_id = %id, "job cancelled");
        Ok(())
    }

    // ── Build ───────────────────────────────────────────────────────────

    async fn submit_build(&self, req: BuildRequest) -> Result<JobId, JobError> {
        if req.environments.is_empty() {
            return Err(JobError::Validation("no environments specified".into()));
        }
        if !self.config.environments_dir.is_dir() {
            return Err(JobError::Validation(
                "environments directory not found".into(),
            ));
        }
        for env in &req.environments {
            let env_path = self.config.environments_dir.join(env);
            if !env_path.is_dir() {
                return Err(JobError::Validation(format!(
                    "environment '{env}' not found"
                )));
            }
            if !env_path.join("execution-environment.yml").is_file() {
                return Err(JobError::Validation(format!(
                    "execution-environment.yml not found in '{env}'"
                )));
            }
        }

        let runtime = self.runtime_for(req.container_runtime.as_deref());
        self.probe(&runtime).await?;
        self.probe(&self.config.playbook_runner).await?;

        let vars_file = write_vars_file(&req.environments, &runtime)?;
        let argv = vec![
            self.config.playbook_runner.clone(),
            self.config.playbook_path.display().to_string(),
            "-e".into(),
            format!("@{}", vars_file.display()),
            "-v".into(),
        ];

        let mut job = Job::new(JobDetails::Build {
            environments: req.environments.clone(),
            container_runtime: runtime.clone(),
            successful_builds: vec![],
            failed_builds: vec![],
            vars_file: Some(vars_file.clone()),
        });
        job.push_log(format!(
            "Build started at {}",
            job.started_at.format("%H:%M:%S")
        ));
        job.push_log(format!(
            "Building environments: {}",
            req.environments.join(", ")
        ));
        job.push_log(format!("Container runtime: {runtime}"));
        job.push_log(format!("Starting {}...", self.config.playbook_runner));

        match self.launch(job, ProcessCommand::new(argv)).await {
            Ok(id) => Ok(id),
            Err(e) => {
                if let Err(rm) = std::fs::remove_file(&vars_file) {
                    tracing::warn!(
                        path = %vars_file.display(),
                        error = %rm,
                        "failed to remove vars file after launch failure"
                    );
                }
                Err(e)
            }
        }
    }

    // ── Export ──────────────────────────────────────────────────────────

    async fn submit_export(&self, req: ExportRequest) -> Result<JobId, JobError> {
        let runtime = self.runtime_for(req.container_runtime.as_deref());
        self.probe(&runtime).await?;
        if !self.image_exists(&runtime, &req.image_name).await {
            return Err(JobError::Validation(format!(
                "image '{}' not found locally",
                req.image_name
            )));
        }
        std::fs::create_dir_all(&self.config.exports_dir)?;

        let id = JobId::new();
        let safe_name = req.image_name.replace(['/', ':'], "_");
        let file_path = self
            .config
            .exports_dir
            .join(format!("{safe_name}_{}.tar", id.short()));

        let mut job = Job::new(JobDetails::Export {
            image_name: req.image_name.clone(),
            file_path: file_path.clone(),
            file_size: None,
        });
        job.id = id;
        job.push_log(format!(
            "Export started at {}",
            job.started_at.format("%H:%M:%S")
        ));
        job.push_log(format!("Exporting image: {}", req.image_name));
        job.push_log(format!("Export file: {}", file_path.display()));
        job.push_log("Running export command...".to_string());

        let argv = vec![
            runtime,
            "save".into(),
            "-o".into(),
            file_path.display().to_string(),
            req.image_name,
        ];
        self.launch(job, ProcessCommand::new(argv)).await
    }

    // ── Push ────────────────────────────────────────────────────────────

    async fn submit_push(&self, req: PushRequest) -> Result<JobId, JobError> {
        let runtime = self.runtime_for(req.container_runtime.as_deref());
        self.probe(&runtime).await?;
        if !self.image_exists(&runtime, &req.image_name).await {
            return Err(JobError::Validation(format!(
                "image '{}' not found locally",
                req.image_name
            )));
        }

        let tag = req.tag.as_deref().unwrap_or("latest");
        let tagged_image = format!("{}/{}:{}", req.registry_url, req.repository, tag);

        let tag_argv = vec![
            runtime.clone(),
            "tag".into(),
            req.image_name.clone(),
            tagged_image.clone(),
        ];
        let out = run_capture(&tag_argv, None).await?;
        if !out.success() {
            return Err(JobError::Validation(format!(
                "failed to tag image: {}",
                out.stderr.trim()
            )));
        }

        let login_argv = vec![
            runtime.clone(),
            "login".into(),
            req.registry_url.clone(),
            "--username".into(),
            req.credentials.username.clone(),
            "--password-stdin".into(),
        ];
        let login = run_capture(&login_argv, Some(req.credentials.password.as_bytes())).await;
        let login_failed = match &login {
            Ok(out) => !out.success(),
            Err(_) => true,
        };
        if login_failed {
            self.remove_tagged_image(&runtime, &tagged_image).await;
            let detail = match login {
                Ok(out) => out.stderr.trim().to_string(),
                Err(e) => e.to_string(),
            };
            return Err(JobError::Validation(format!(
                "failed to log in to registry {}: {detail}",
                req.registry_url
            )));
        }

        let mut job = Job::new(JobDetails::Push {
            image_name: req.image_name.clone(),
            target_url: tagged_image.clone(),
            tagged_image: tagged_image.clone(),
            container_runtime: runtime.clone(),
        });
        job.push_log(format!(
            "Push started at {}",
            job.started_at.format("%H:%M:%S")
        ));
        job.push_log(format!("Pushing image: {}", req.image_name));
        job.push_log(format!("Target: {tagged_image}"));
        job.push_log(format!("Image tagged as: {tagged_image}"));
        job.push_log(format!("Logged into registry: {}", req.registry_url));
        job.push_log("Starting push process...".to_string());

        let argv = vec![runtime.clone(), "push".into(), tagged_image.clone()];
        match self.launch(job, ProcessCommand::new(argv)).await {
            Ok(id) => Ok(id),
            Err(e) => {
                self.remove_tagged_image(&runtime, &tagged_image).await;
                Err(e)
            }
        }
    }

    // ── Shared machinery ────────────────────────────────────────────────

    /// Admit the job into the store, spawn its process, and schedule the
    /// pump task. An admission rejection never starts a process; a launch
    /// failure rolls the registration back.
    async fn launch(&self, job: Job, cmd: ProcessCommand) -> Result<JobId, JobError> {
        let id = job.id;
        let kind = job.kind;
        let cap = (kind == JobKind::Build).then_some(self.config.max_concurrent_builds);
        let slot = self.store.admit(job, cap)?;

        let (handle, output) = match ProcessHandle::spawn(&cmd).await {
            Ok(pair) => pair,
            Err(e) => {
                self.store.remove_active(id);
                return Err(JobError::Launch(e));
            }
        };
        lock_job(&slot).pid = handle.pid();

        let store = Arc::clone(&self.store);
        let classifier = Classifier::for_kind(kind);
        let poll = self.config.poll_interval;
        tokio::spawn(async move {
            let outcome = pump_output(handle, output, Arc::clone(&slot), classifier, poll).await;
            finalize_job(&store, id, outcome.exit_code).await;
        });

        tracing::info!(job_id = %id, kind = ?kind, "job started");
        Ok(id)
    }

    fn runtime_for(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_string)
            .unwrap_or_else(|| self.config.container_runtime.clone())
    }

    /// Self-check probe: the binary must exist and answer `--version`.
    async fn probe(&self, binary: &str) -> Result<(), JobError> {
        let argv = vec![binary.to_string(), "--version".to_string()];
        match run_capture(&argv, None).await {
            Ok(out) if out.success() => Ok(()),
            Ok(_) => Err(JobError::Dependency(format!(
                "{binary} is not working properly"
            ))),
            Err(_) => Err(JobError::Dependency(format!(
                "{binary} not installed or not in PATH"
            ))),
        }
    }

    async fn image_exists(&self, runtime: &str, image: &str) -> bool {
        let argv = vec![runtime.to_string(), "inspect".to_string(), image.to_string()];
        matches!(run_capture(&argv, None).await, Ok(out) if out.success())
    }

    async fn remove_tagged_image(&self, runtime: &str, tagged: &str) {
        let argv = vec![runtime.to_string(), "rmi".to_string(), tagged.to_string()];
        if let Err(e) = run_capture(&argv, None).await {
            tracing::warn!(image = tagged, error = %e, "failed to remove tagged image");
        }
    }
}

#[derive(Serialize)]
struct BuildVars<'a> {
    selected_environments: &'a [String],
    container_runtime: &'a str,
}

/// Write the ephemeral playbook vars file; removed at finalization.
fn write_vars_file(environments: &[String], runtime: &str) -> Result<PathBuf, JobError> {
    let file = tempfile::Builder::new()
        .prefix("ee-forge-vars-")
        .suffix(".yml")
        .tempfile()?;
    serde_yaml::to_writer(
        file.as_file(),
        &BuildVars {
            selected_environments: environments,
            container_runtime: runtime,
        },
    )
    .map_err(|e| JobError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    let path = file.into_temp_path().keep().map_err(|e| JobError::Io(e.error))?;
    Ok(path)
}

/// Kind-specific cleanup performed between claiming a job and sealing it.
enum Epilogue {
    Build {
        vars_file: Option<PathBuf>,
    },
    Export {
        file_path: PathBuf,
    },
    Push {
        tagged_image: String,
        container_runtime: String,
        target_url: String,
    },
}

/// Assign the terminal state for a job. At-most-once: the first caller
/// claims the job via the `finalizing` flag, later callers return
/// immediately. Cleanup failures land in the job's own log as warnings and
/// never change the terminal status.
pub(crate) async fn finalize_job(store: &JobStore, id: JobId, exit_code: i32) {
    let Some(slot) = store.get(id) else {
        return;
    };

    let epilogue = {
        let mut job = lock_job(&slot);
        if job.status.is_terminal() || job.finalizing {
            return;
        }
        job.finalizing = true;
        // A cancelled job carries no exit code; the process died to our own
        // signal, not on its own terms.
        if job.cancel_requested {
            job.exit_code = None;
        } else {
            job.exit_code = Some(exit_code);
        }
        match &job.details {
            JobDetails::Build { vars_file, .. } => Epilogue::Build {
                vars_file: vars_file.clone(),
            },
            JobDetails::Export { file_path, .. } => Epilogue::Export {
                file_path: file_path.clone(),
            },
            JobDetails::Push {
                tagged_image,
                container_runtime,
                target_url,
                ..
            } => Epilogue::Push {
                tagged_image: tagged_image.clone(),
                container_runtime: container_runtime.clone(),
                target_url: target_url.clone(),
            },
        }
    };

    let success = exit_code == 0;
    let mut extra_lines: Vec<String> = Vec::new();
    let mut measured_size: Option<u64> = None;

    match epilogue {
        Epilogue::Build { vars_file } => {
            if let Some(path) = vars_file {
                if let Err(e) = std::fs::remove_file(&path) {
                    extra_lines.push(format!(
                        "Warning: failed to remove vars file {}: {e}",
                        path.display()
                    ));
                }
            }
        }
        Epilogue::Export { file_path } => {
            if success {
                match std::fs::metadata(&file_path) {
                    Ok(meta) => measured_size = Some(meta.len()),
                    Err(e) => extra_lines.push(format!(
                        "Warning: failed to stat export file {}: {e}",
                        file_path.display()
                    )),
                }
            } else if file_path.exists() {
                if let Err(e) = std::fs::remove_file(&file_path) {
                    extra_lines.push(format!(
                        "Warning: failed to remove partial export file {}: {e}",
                        file_path.display()
                    ));
                }
            }
        }
        Epilogue::Push {
            tagged_image,
            container_runtime,
            target_url,
        } => {
            if success {
                extra_lines.push(format!("Image available at: {target_url}"));
            }
            let argv = vec![container_runtime, "rmi".to_string(), tagged_image.clone()];
            match run_capture(&argv, None).await {
                Ok(out) if out.success() => {
                    extra_lines.push("Cleaned up tagged image".to_string());
                }
                Ok(out) => extra_lines.push(format!(
                    "Warning: failed to clean up tagged image {tagged_image}: {}",
                    out.stderr.trim()
                )),
                Err(e) => extra_lines.push(format!(
                    "Warning: failed to clean up tagged image {tagged_image}: {e}"
                )),
            }
        }
    }

    {
        let mut job = lock_job(&slot);
        if let (JobDetails::Export { file_size, .. }, Some(size)) =
            (&mut job.details, measured_size)
        {
            *file_size = Some(size);
        }
        for line in extra_lines {
            job.push_log(line);
        }

        // A cancel call may have sealed the job while cleanup ran.
        if job.status == JobStatus::Running {
            let now = Utc::now();
            let label = job.kind.label();
            if job.cancel_requested {
                job.status = JobStatus::Cancelled;
                job.push_log(format!("{label} cancelled at {}", now.format("%H:%M:%S")));
            } else if success {
                job.status = JobStatus::Completed;
                apply_exit_fallback(exit_code, &mut job.details);
                job.push_log(format!(
                    "{label} completed successfully at {}",
                    now.format("%H:%M:%S")
                ));
            } else {
                job.status = JobStatus::Failed;
                apply_exit_fallback(exit_code, &mut job.details);
                job.push_log(format!(
                    "{label} failed at {} with return code {exit_code}",
                    now.format("%H:%M:%S")
                ));
            }
            job.finished_at = Some(now);
        }
    }

    store.move_to_finished(id);
    tracing::info!(job_id = %id, exit_code, "job finalized");
}
