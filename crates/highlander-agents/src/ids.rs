//! Stable identifiers for immortals.
//!
//! Ids are handed out by an [`IdSequence`] in strictly increasing order at
//! creation time. They are the only key the combat protocol uses to order
//! lock acquisition, so they must be unique and never change for the
//! lifetime of a run.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Unique, totally ordered identifier of an immortal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImmortalId(u64);

impl ImmortalId {
    /// Wrap a raw sequence number.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Return the raw sequence number.
    pub const fn into_inner(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for ImmortalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic allocator of [`ImmortalId`]s.
///
/// Safe to share between threads; every call to [`next_id`](Self::next_id)
/// returns a value strictly greater than all previous ones.
#[derive(Debug, Default)]
pub struct IdSequence {
    next: AtomicU64,
}

impl IdSequence {
    /// Create a sequence whose first id is `#0`.
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Allocate the next id.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::IdExhausted`] once `u64::MAX` ids have been
    /// handed out.
    pub fn next_id(&self) -> Result<ImmortalId, AgentError> {
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1))
            .map(ImmortalId)
            .map_err(|_exhausted| AgentError::IdExhausted)
    }
}
