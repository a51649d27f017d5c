use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ThrottleError;

pub const NO_THROTTLING: &str = "no-throttling";
pub const FAST_3G: &str = "fast-3g";
pub const SLOW_3G: &str = "slow-3g";
pub const OFFLINE: &str = "offline";

/// Bandwidth and latency parameters, in bytes per second and milliseconds.
/// A throughput of -1 means unlimited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleProfile {
    pub id: String,
    pub download_bps: i64,
    pub upload_bps: i64,
    #[serde(default)]
    pub latency_ms: u64,
}

impl ThrottleProfile {
    pub fn new(id: impl Into<String>, download_bps: i64, upload_bps: i64, latency_ms: u64) -> Self {
        Self {
            id: id.into(),
            download_bps,
            upload_bps,
            latency_ms,
        }
    }

    pub fn no_throttling() -> Self {
        Self::new(NO_THROTTLING, -1, -1, 0)
    }

    pub fn fast_3g() -> Self {
        Self::new(FAST_3G, 180_000, 84_375, 563)
    }

    pub fn slow_3g() -> Self {
        Self::new(SLOW_3G, 62_500, 62_500, 2_000)
    }

    pub fn offline() -> Self {
        Self::new(OFFLINE, 0, 0, 0)
    }

    pub fn presets() -> Vec<Self> {
        vec![
            Self::no_throttling(),
            Self::fast_3g(),
            Self::slow_3g(),
            Self::offline(),
        ]
    }

    /// Both throughputs zero: outbound calls are rejected.
    pub fn is_offline(&self) -> bool {
        self.download_bps == 0 && self.upload_bps == 0
    }

    /// Nothing to inject; the page-side gate forwards untouched.
    pub fn is_unlimited(&self) -> bool {
        self.download_bps < 0 && self.upload_bps < 0 && self.latency_ms == 0
    }

    pub fn validate(&self) -> Result<(), ThrottleError> {
        let invalid = |reason: String| ThrottleError::Invalid {
            id: self.id.clone(),
            reason,
        };
        if self.id.trim().is_empty() {
            return Err(invalid("profile id is empty".into()));
        }
        for (name, value) in [("downloadBps", self.download_bps), ("uploadBps", self.upload_bps)] {
            if value < -1 {
                return Err(invalid(format!("{name} must be -1 or non-negative, got {value}")));
            }
        }
        Ok(())
    }

    /// Form submitted with APPLY_THROTTLE.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "downloadBps": self.download_bps,
            "uploadBps": self.upload_bps,
            "latencyMs": self.latency_ms,
        })
    }
}

impl fmt::Display for ThrottleProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rate = |bps: i64| {
            if bps < 0 {
                "unlimited".to_string()
            } else {
                format!("{bps} B/s")
            }
        };
        write!(
            f,
            "{} (down {}, up {}, +{} ms)",
            self.id,
            rate(self.download_bps),
            rate(self.upload_bps),
            self.latency_ms
        )
    }
}
