use thiserror::Error;

use pagebridge_core_types::BridgeError;

#[derive(Debug, Error)]
pub enum ThrottleError {
    #[error("unknown throttle profile {0:?}")]
    UnknownProfile(String),
    #[error("invalid throttle profile {id:?}: {reason}")]
    Invalid { id: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to deserialize profile bundle: {0}")]
    Deserialize(String),
}

impl From<ThrottleError> for BridgeError {
    fn from(value: ThrottleError) -> Self {
        match value {
            ThrottleError::UnknownProfile(_) => BridgeError::unsupported(value.to_string()),
            ThrottleError::Invalid { .. } | ThrottleError::Deserialize(_) => {
                BridgeError::parse(value.to_string())
            }
            ThrottleError::Io(_) => BridgeError::internal(value.to_string()),
        }
    }
}
