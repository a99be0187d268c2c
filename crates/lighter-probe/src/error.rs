//! Probe error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Nonce error: {0}")]
    Nonce(#[from] lighter_nonce::NonceError),

    #[error("Client error: {0}")]
    Client(#[from] lighter_client::ClientError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] lighter_telemetry::TelemetryError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ProbeResult<T> = Result<T, ProbeError>;
