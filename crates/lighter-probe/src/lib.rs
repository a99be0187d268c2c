//! Operator CLI for Lighter nonce slots.
//!
//! Builds a [`NonceCoordinator`](lighter_nonce::NonceCoordinator) for one
//! account from a TOML config, initializes it against the venue, optionally
//! refreshes individual slots and reports the resulting slot state.

pub mod app;
pub mod config;
pub mod error;

pub use app::{Probe, ProbeOptions, ProbeReport};
pub use config::ProbeConfig;
pub use error::{ProbeError, ProbeResult};
