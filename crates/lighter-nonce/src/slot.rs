//! Per-credential nonce slot.

use serde::Serialize;

use crate::error::{NonceError, NonceResult};
use crate::types::{ApiKeyIndex, Nonce};

/// Sequence state for one API key index.
///
/// # Invariants
/// - `next` is one past the most recently issued nonce, except right after
///   [`rollback`](Self::rollback), where it equals the rolled-back value.
/// - At most one outstanding nonce is remembered. A second `issue()` before
///   the first is resolved overwrites `last_issued`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceSlot {
    api_key_index: ApiKeyIndex,
    next: Nonce,
    last_issued: Option<Nonce>,
}

impl NonceSlot {
    /// Creates a slot starting at the venue's next accepted nonce.
    #[must_use]
    pub fn new(api_key_index: ApiKeyIndex, next: Nonce) -> Self {
        Self {
            api_key_index,
            next,
            last_issued: None,
        }
    }

    /// Hands out `next`, remembers it as outstanding and advances by one.
    pub fn issue(&mut self) -> NonceResult<Nonce> {
        let nonce = self.next;
        let following = nonce
            .checked_next()
            .ok_or(NonceError::Exhausted(self.api_key_index))?;
        self.last_issued = Some(nonce);
        self.next = following;
        Ok(nonce)
    }

    /// Rewinds `next` to the outstanding nonce so it is reissued verbatim.
    ///
    /// Returns the reclaimed nonce, or `None` if nothing was outstanding.
    pub fn rollback(&mut self) -> Option<Nonce> {
        let nonce = self.last_issued.take()?;
        self.next = nonce;
        Some(nonce)
    }

    #[must_use]
    pub fn api_key_index(&self) -> ApiKeyIndex {
        self.api_key_index
    }

    #[must_use]
    pub fn next(&self) -> Nonce {
        self.next
    }

    #[must_use]
    pub fn last_issued(&self) -> Option<Nonce> {
        self.last_issued
    }

    #[must_use]
    pub fn snapshot(&self) -> SlotSnapshot {
        SlotSnapshot {
            api_key_index: self.api_key_index,
            next: Some(self.next),
            last_issued: self.last_issued,
        }
    }
}

/// Read-only view of a configured slot.
///
/// `next` is `None` while the slot has not been fetched yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotSnapshot {
    pub api_key_index: ApiKeyIndex,
    pub next: Option<Nonce>,
    pub last_issued: Option<Nonce>,
}

impl SlotSnapshot {
    pub(crate) fn unpopulated(api_key_index: ApiKeyIndex) -> Self {
        Self {
            api_key_index,
            next: None,
            last_issued: None,
        }
    }

    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.next.is_some()
    }
}
