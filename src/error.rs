use thiserror::Error;

use crate::pin::FeatureKind;

#[derive(Debug, Error)]
pub enum HalError {
    #[error("Feature {kind} not found on pin {pin}")]
    FeatureNotFound { pin: String, kind: FeatureKind },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Listener error: {0}")]
    Listener(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("GPIO error: {0}")]
    Gpio(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
}
