//! Bridge configuration.
//!
//! Loaded from YAML (`--config <path>` or
//! `<config dir>/pagebridge/config.yaml`); every section falls back to its
//! defaults, and `PAGEBRIDGE_CDP_WS` / `PAGEBRIDGE_HISTORY_DIR` override the
//! file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use cdp_adapter::CdpConfig;
use fragment_codec::Capability;
use telemetry_tap::TelemetryConfig;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub cdp: CdpConfig,
    pub telemetry: TelemetryConfig,
    pub throttle: ThrottleSection,
    pub lifecycle: LifecycleSection,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSection {
    /// YAML or JSON profile bundle merged over the built-in presets.
    pub bundle: Option<PathBuf>,
    /// Applied to every session once it is armed.
    pub default_profile: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSection {
    /// Capabilities installed when content loads.
    pub capabilities: Vec<Capability>,
    /// Lifecycle signal bus capacity.
    pub signal_capacity: usize,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            capabilities: Capability::ALL.to_vec(),
            signal_capacity: 256,
        }
    }
}

impl BridgeConfig {
    /// Environment overrides, then the platform data directory for history
    /// when nothing else named one.
    pub fn with_overrides(mut self) -> Self {
        self.cdp = self.cdp.apply_env();
        self.telemetry = self.telemetry.apply_env();
        if self.telemetry.history_dir.is_none() {
            self.telemetry.history_dir = default_history_dir();
        }
        self
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).context("Failed to parse config file")
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push("pagebridge");
    path.push("config.yaml");
    Ok(path)
}

pub fn default_history_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|mut path| {
        path.push("pagebridge");
        path.push("history");
        path
    })
}

/// A missing file is not an error: defaults are used and a warning logged.
pub async fn load_config(config_path: Option<&Path>) -> Result<BridgeConfig> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    let config = if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .await
            .context("Failed to read config file")?;
        let config = BridgeConfig::from_yaml(&content)?;
        info!("Loaded configuration from: {}", config_path.display());
        config
    } else {
        warn!(
            "Config file not found, using defaults: {}",
            config_path.display()
        );
        BridgeConfig::default()
    };
    Ok(config.with_overrides())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_default_independently() {
        let config = BridgeConfig::from_yaml(
            r#"
telemetry:
  request_cap: 10
throttle:
  default_profile: fast-3g
lifecycle:
  capabilities: [networkObserver]
"#,
        )
        .unwrap();
        assert_eq!(config.telemetry.request_cap, 10);
        assert_eq!(config.telemetry.console_cap, 500);
        assert_eq!(config.telemetry.drain_interval_ms, 2_000);
        assert_eq!(config.throttle.default_profile.as_deref(), Some("fast-3g"));
        assert_eq!(config.lifecycle.capabilities, vec![Capability::NetworkObserver]);
        assert_eq!(config.cdp.heartbeat_interval_ms, 15_000);
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.yaml")))
            .await
            .unwrap();
        assert_eq!(config.lifecycle.capabilities.len(), 3);
        assert!(config.telemetry.history_dir.is_some() || dirs::data_dir().is_none());
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "telemetry: [").unwrap();
        assert!(load_config(Some(&path)).await.is_err());
    }
}
