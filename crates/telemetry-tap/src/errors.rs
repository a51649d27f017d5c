use thiserror::Error;

use pagebridge_core_types::BridgeError;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("history io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("history snapshot corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("unsupported history version {0}")]
    Version(u32),
}

impl From<TelemetryError> for BridgeError {
    fn from(value: TelemetryError) -> Self {
        BridgeError::internal(value.to_string())
    }
}
