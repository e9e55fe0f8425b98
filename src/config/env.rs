// src/config/env.rs
// Environment-based configuration for providers and supervisors

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, warn};

pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_ERROR_LOG_LINES: usize = 10;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Where provisioned binaries are cached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Root of the per-client cache directories (GRID_CACHE_DIR)
    pub cache_root: PathBuf,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
        }
    }
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source (tests pass a map)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = read_var(&lookup, "GRID_CACHE_DIR") {
            config.cache_root = PathBuf::from(dir);
        }
        debug!(cache_root = %config.cache_root.display(), "Provider config loaded");
        config
    }
}

fn default_cache_root() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("grid")
        .join("cache")
}

/// Per-supervisor tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Fail the start if no output line arrives in time. None disables.
    pub startup_timeout: Option<Duration>,
    /// Trailing log lines attached to abnormal exit errors
    pub error_log_lines: usize,
    /// Broadcast channel capacity for events
    pub event_capacity: usize,
    /// Answer informational notifications that carry an id
    pub auto_ack_notifications: bool,
    /// Overrides the client's own version requirement
    pub version_constraint: Option<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Some(DEFAULT_STARTUP_TIMEOUT),
            error_log_lines: DEFAULT_ERROR_LOG_LINES,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            auto_ack_notifications: true,
            version_constraint: None,
        }
    }
}

impl SupervisorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(secs) = read_number::<u64>(&lookup, "GRID_STARTUP_TIMEOUT_SECS") {
            config.startup_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(lines) = read_number::<usize>(&lookup, "GRID_ERROR_LOG_LINES") {
            config.error_log_lines = lines;
        }
        if let Some(capacity) = read_number::<usize>(&lookup, "GRID_EVENT_CAPACITY") {
            // broadcast::channel panics on zero
            config.event_capacity = capacity.max(1);
        }
        if let Some(ack) = read_bool(&lookup, "GRID_AUTO_ACK") {
            config.auto_ack_notifications = ack;
        }
        config.version_constraint = read_var(&lookup, "GRID_VERSION");

        debug!(
            startup_timeout = ?config.startup_timeout,
            error_log_lines = config.error_log_lines,
            event_capacity = config.event_capacity,
            "Supervisor config loaded"
        );
        config
    }

    pub fn with_startup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_version_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.version_constraint = Some(constraint.into());
        self
    }
}

fn read_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.trim().is_empty())
}

fn read_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = read_var(lookup, name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring invalid numeric value");
            None
        }
    }
}

fn read_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<bool> {
    let value = read_var(lookup, name)?.to_lowercase();
    match value.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
