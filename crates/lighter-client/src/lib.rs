//! Lighter REST client.
//!
//! Implements [`RemoteNonceSource`](lighter_nonce::RemoteNonceSource) on top
//! of the venue's `nextNonce` endpoint.

pub mod client;
pub mod error;

pub use client::{parse_next_nonce, HttpNonceSource, DEFAULT_BASE_URL};
pub use error::{ClientError, ClientResult};
