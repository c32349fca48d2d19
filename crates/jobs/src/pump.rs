// crates/jobs/src/pump.rs
//! Output pump: drains a process's combined output into the job log.
//!
//! Reads are polled with a short timeout instead of blocking indefinitely;
//! on each empty interval the pump probes `is_alive` so process exit is
//! detected even when the stream does not signal EOF promptly. After the
//! stream drains, a final `wait` retrieves the exit code, so the code is
//! always known before finalization.

use std::time::Duration;

use tokio::time::timeout;

use crate::classify::Classifier;
use crate::process::{ProcessHandle, ProcessOutput};
use crate::store::{lock_job, JobSlot};
use crate::types::JobStatus;

/// What the pump observed; input to finalization.
#[derive(Debug)]
pub(crate) struct PumpOutcome {
    /// Exit code, or -1 when the monitor itself failed or the process died
    /// to a signal.
    pub exit_code: i32,
    /// Set when the pump hit an internal error; appended to the job log so
    /// the failure is never silently dropped.
    pub monitor_error: Option<String>,
}

/// Pump lines until EOF or process death, classifying each line before
/// appending it, then reap the process.
pub(crate) async fn pump_output(
    mut handle: ProcessHandle,
    mut output: ProcessOutput,
    slot: JobSlot,
    classifier: Classifier,
    poll_interval: Duration,
) -> PumpOutcome {
    let outcome = 'run: {
        loop {
            match timeout(poll_interval, output.next_line()).await {
                Ok(Ok(Some(line))) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let mut job = lock_job(&slot);
                    classifier.classify(line, &mut job.details);
                    job.push_log(line);
                }
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    // Reap anyway so the child does not linger as a zombie.
                    let _ = handle.wait().await;
                    break 'run PumpOutcome {
                        exit_code: -1,
                        monitor_error: Some(format!("error reading process output: {e}")),
                    };
                }
                Err(_elapsed) => {
                    if !handle.is_alive() {
                        break;
                    }
                }
            }
        }

        match handle.wait().await {
            Ok(code) => PumpOutcome {
                exit_code: code,
                monitor_error: None,
            },
            Err(e) => PumpOutcome {
                exit_code: -1,
                monitor_error: Some(format!("error waiting for process exit: {e}")),
            },
        }
    };

    // Record what was observed before finalization runs, so a status query
    // landing in between can finalize from the job record alone. A job being
    // cancelled keeps no exit code.
    {
        let mut job = lock_job(&slot);
        if job.status == JobStatus::Running && !job.cancel_requested && !job.finalizing {
            job.exit_code = Some(outcome.exit_code);
            if let Some(err) = &outcome.monitor_error {
                job.push_log(format!("Error capturing output: {err}"));
            }
        }
    }

    outcome
}
