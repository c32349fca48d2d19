// crates/jobs/src/classify.rs
//! Per-kind log line classification.
//!
//! Build output is scraped with plain substring matching: a marker line
//! mentioning a requested environment's name records that environment as
//! built or failed. This is matching against free-form playbook output, not
//! structured parsing: an environment name that is a substring of another
//! can produce a false positive, which is accepted behavior.

use crate::types::{JobDetails, JobKind};

/// Markers indicating a per-environment build succeeded.
const SUCCESS_MARKERS: [&str; 2] = ["Successfully built", "Complete!"];
/// Markers indicating a per-environment build failed.
const FAILURE_MARKERS: [&str; 2] = ["Failed to build", "Error:"];

/// Line classification strategy, one variant per job kind family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classifier {
    /// Scrape success/failure markers from playbook output (Build).
    BuildMarkers,
    /// No per-line state; the exit code alone decides (Export, Push).
    ExitCodeOnly,
}

impl Classifier {
    pub fn for_kind(kind: JobKind) -> Self {
        match kind {
            JobKind::Build => Classifier::BuildMarkers,
            JobKind::Export | JobKind::Push => Classifier::ExitCodeOnly,
        }
    }

    /// Inspect one log line and update kind-specific fields. Idempotent per
    /// line: reprocessing never duplicates an already-recorded name.
    pub fn classify(&self, line: &str, details: &mut JobDetails) {
        let Classifier::BuildMarkers = self else {
            return;
        };
        let JobDetails::Build {
            environments,
            successful_builds,
            failed_builds,
            ..
        } = details
        else {
            return;
        };

        if let Some(rest) = after_marker(line, &SUCCESS_MARKERS) {
            record_mentions(rest, environments, successful_builds);
        } else if let Some(rest) = after_marker(line, &FAILURE_MARKERS) {
            record_mentions(rest, environments, failed_builds);
        }
    }
}

/// The part of the line following the first matching marker. Names are only
/// looked for there; the marker text itself ("built", "Failed") must never
/// count as a mention.
fn after_marker<'a>(line: &'a str, markers: &[&str]) -> Option<&'a str> {
    markers
        .iter()
        .find_map(|m| line.find(m).map(|at| &line[at + m.len()..]))
}

fn record_mentions(rest: &str, environments: &[String], into: &mut Vec<String>) {
    for env in environments {
        if rest.contains(env.as_str()) && !into.contains(env) {
            into.push(env.clone());
        }
    }
}

/// All-or-nothing fallback applied at finalization: when the process exited
/// without a single marker hit, the exit code speaks for every requested
/// environment. Any partial match suppresses the fallback entirely.
pub fn apply_exit_fallback(exit_code: i32, details: &mut JobDetails) {
    let JobDetails::Build {
        environments,
        successful_builds,
        failed_builds,
        ..
    } = details
    else {
        return;
    };

    if !successful_builds.is_empty() || !failed_builds.is_empty() {
        return;
    }
    if exit_code == 0 {
        *successful_builds = environments.clone();
    } else {
        *failed_builds = environments.clone();
    }
}
