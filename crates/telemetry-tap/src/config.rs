use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fragment_codec::InstallOptions;

/// Overrides [`TelemetryConfig::history_dir`].
pub const HISTORY_DIR_ENV: &str = "PAGEBRIDGE_HISTORY_DIR";

/// Runtime configuration for telemetry collection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// How often pending page-side records are drained.
    pub drain_interval_ms: u64,
    /// Host-side request history size.
    pub request_cap: usize,
    /// Host-side console history size.
    pub console_cap: usize,
    /// Page-side pending list bound, per kind.
    pub pending_cap: usize,
    /// Captured bodies are clipped to this many characters page-side.
    pub max_body_bytes: usize,
    /// Console levels the page-side observer records.
    pub console_levels: Vec<String>,
    /// Where history snapshots are persisted. `None` keeps history in memory.
    pub history_dir: Option<PathBuf>,
    /// Snapshot file stem; one history per key.
    pub history_key: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            drain_interval_ms: 2_000,
            request_cap: 100,
            console_cap: 500,
            pending_cap: 1_000,
            max_body_bytes: 64 * 1024,
            console_levels: ["log", "info", "warn", "error", "debug"]
                .into_iter()
                .map(String::from)
                .collect(),
            history_dir: None,
            history_key: "default".to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms.max(1))
    }

    /// Applies `PAGEBRIDGE_HISTORY_DIR` on top of file-provided values.
    pub fn apply_env(mut self) -> Self {
        if let Ok(dir) = std::env::var(HISTORY_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.history_dir = Some(PathBuf::from(dir));
            }
        }
        self
    }

    /// Page-side install options derived from this configuration.
    pub fn install_options(&self) -> InstallOptions {
        InstallOptions {
            pending_cap: self.pending_cap,
            max_body_bytes: self.max_body_bytes,
            console_levels: self.console_levels.clone(),
        }
    }
}
