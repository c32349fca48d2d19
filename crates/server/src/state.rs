// crates/server/src/state.rs
//! Application state for the Axum server.

use std::time::Instant;

use ee_forge_jobs::JobManager;

use crate::config::Config;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Job manager owning all build/export/push jobs.
    pub manager: JobManager,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            start_time: Instant::now(),
            manager: JobManager::new(config.manager),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
