//! Edge Store
//!
//! Boundary to the record store holding relationship edges.
//!
//! Access is read-then-write per edge with no version check: if two batches
//! overlap, the last writer wins. Callers must serialize batch runs per world
//! instance. `upsert` is not idempotent across cycles (decay is applied to
//! whatever was read), so it must never be retried blindly.

use async_trait::async_trait;

use ties_events::{PairKey, RelationshipEdge};

/// A read or write of one edge failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to read edge {key}: {reason}")]
    Read { key: PairKey, reason: String },
    #[error("failed to write edge {key}: {reason}")]
    Write { key: PairKey, reason: String },
}

/// Persistent storage for relationship edges.
#[async_trait]
pub trait EdgeStore: Send + Sync {
    /// Fetches the edge for `key`, `Ok(None)` if the pair has none yet.
    async fn get(&self, key: &PairKey) -> Result<Option<RelationshipEdge>, PersistenceError>;

    /// Creates or replaces the edge stored under `edge.key`.
    async fn upsert(&self, edge: &RelationshipEdge) -> Result<(), PersistenceError>;
}
