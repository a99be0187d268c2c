//! Per-credential nonce coordination for Lighter signed requests.
//!
//! The venue tracks one nonce counter per (account, API key index) pair and
//! rejects any signed request whose nonce is not the next one it expects.
//! [`NonceCoordinator`] keeps a local copy of each counter so nonces can be
//! drawn without a round trip, while staying consistent with the venue.
//!
//! # Key Components
//!
//! - [`NonceCoordinator`]: owns slot state, rotation and single-flight initialization
//! - [`NonceSlot`]: one credential's sequence state
//! - [`RemoteNonceSource`]: seam for fetching the venue's next nonce
//! - [`MockNonceSource`]: in-memory source for tests
//!
//! # Lifecycle
//!
//! 1. `NonceCoordinator::new` with the configured API key indices
//! 2. `initialize(false)` fetches every slot from the venue
//! 3. `draw()` / `draw_for()` hand out nonces without I/O
//! 4. `acknowledge_failure()` when a request fails before the venue accepted it
//! 5. `refresh()` / `initialize(true)` to resynchronize after suspected drift

pub mod coordinator;
pub mod error;
pub mod slot;
pub mod source;
pub mod types;

pub use coordinator::NonceCoordinator;
pub use error::{NonceError, NonceResult, SourceError};
pub use slot::{NonceSlot, SlotSnapshot};
pub use source::{BoxFuture, DynNonceSource, MockNonceSource, RemoteNonceSource};
pub use types::{AccountIndex, ApiKeyIndex, DrawnNonce, Nonce};
