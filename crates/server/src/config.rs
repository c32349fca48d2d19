// crates/server/src/config.rs
//! Environment-driven configuration.
//!
//! Every knob has a default; `EE_FORGE_*` variables override them. Unset or
//! unparsable values silently fall back to the default.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ee_forge_jobs::ManagerConfig;

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 8000;

/// Server configuration: listen port plus the job manager's knobs.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub manager: ManagerConfig,
}

impl Config {
    /// Read configuration from the environment.
    pub fn from_env() -> Self {
        let mut manager = ManagerConfig::default();
        if let Some(dir) = env_path("EE_FORGE_ENVIRONMENTS_DIR") {
            manager.environments_dir = dir;
        }
        if let Some(path) = env_path("EE_FORGE_PLAYBOOK") {
            manager.playbook_path = path;
        }
        if let Some(bin) = env_string("EE_FORGE_PLAYBOOK_RUNNER") {
            manager.playbook_runner = bin;
        }
        if let Some(bin) = env_string("EE_FORGE_CONTAINER_RUNTIME") {
            manager.container_runtime = bin;
        }
        if let Some(dir) = env_path("EE_FORGE_EXPORTS_DIR") {
            manager.exports_dir = dir;
        }
        if let Some(n) = env_parse::<usize>("EE_FORGE_MAX_CONCURRENT_BUILDS") {
            manager.max_concurrent_builds = n;
        }
        if let Some(secs) = env_parse::<u64>("EE_FORGE_RETENTION_SECS") {
            manager.retention = Duration::from_secs(secs);
        }

        Self {
            port: env_parse("EE_FORGE_PORT")
                .or_else(|| env_parse("PORT"))
                .unwrap_or(DEFAULT_PORT),
            manager,
        }
    }

    /// Defaults without touching the environment. Used by tests.
    pub fn with_manager(manager: ManagerConfig) -> Self {
        Self {
            port: DEFAULT_PORT,
            manager,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_string(key).map(PathBuf::from)
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}
