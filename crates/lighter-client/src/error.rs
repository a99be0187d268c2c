//! Client error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
