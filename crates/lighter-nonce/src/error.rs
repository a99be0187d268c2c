//! Nonce coordination error types.

use thiserror::Error;

use crate::types::ApiKeyIndex;

/// Failure reported by a [`RemoteNonceSource`](crate::RemoteNonceSource).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Request never produced a response (connect, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(String),

    /// Venue answered with an error status or error code.
    #[error("venue error {code}: {message}")]
    Venue { code: i64, message: String },

    /// Response body could not be interpreted.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Errors returned by the nonce coordinator.
///
/// `Clone` so a single initialization outcome can be handed to every
/// concurrent waiter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NonceError {
    /// Invalid construction parameters. Not retryable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Draw attempted before any slot was populated.
    #[error("nonce coordinator not initialized")]
    NotInitialized,

    /// Slot is not configured or holds no state yet.
    #[error("nonce slot for api key index {0} is not initialized")]
    UnknownSlot(ApiKeyIndex),

    /// Remote source failed while fetching a slot's starting nonce.
    #[error("failed to fetch nonce for api key index {api_key_index}: {source}")]
    RemoteFetch {
        api_key_index: ApiKeyIndex,
        #[source]
        source: SourceError,
    },

    /// Slot sequence reached the top of the nonce range.
    #[error("nonce range exhausted for api key index {0}")]
    Exhausted(ApiKeyIndex),
}

impl NonceError {
    /// Whether retrying the enclosing operation can succeed.
    ///
    /// Only remote fetch failures are transient; everything else needs a
    /// different call or a configuration change.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, NonceError::RemoteFetch { .. })
    }
}

pub type NonceResult<T> = Result<T, NonceError>;
