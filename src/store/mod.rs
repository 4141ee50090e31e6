//! Collaborator seams for external storage.
//!
//! The runtime does not talk to a concrete backend. It depends on two
//! narrow trait contracts - a sorted set ([`SortedSetStore`]) and a TTL
//! key-value store ([`TtlStore`]) - so production can bind them to an
//! external store while tests and the in-process bus use the provided
//! in-memory implementations.

mod kv;
mod sorted_set;

pub use kv::{MemoryTtlStore, TtlStore};
pub use sorted_set::{MemorySortedSet, ScoredMember, SortedSetStore};

use thiserror::Error;

/// Errors surfaced by storage collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the operation.
    #[error("store backend unavailable: {0}")]
    Unavailable(String),
}
