//! Shared record types for the relationship graph updater.
//!
//! This crate contains pure data structures with no scoring or I/O logic.
//! It is a dependency for all other crates in the workspace.

pub mod citizen;
pub mod edge;
pub mod signal;
pub mod timestamp;
pub mod world;

#[cfg(feature = "test-fixtures")]
pub mod fixtures;

// Re-export timestamp helpers
pub use timestamp::{parse_timestamp, ParseTimestampError};

// Re-export citizen types
pub use citizen::{BusinessOccupancy, Citizen, BUSINESS_CATEGORY};

// Re-export signal types
pub use signal::{Contract, Loan, Message, RelevancyRecord, TargetRef, Transaction, WAGE_PAYMENT};

// Re-export edge types
pub use edge::{
    clamp_score, PairKey, ProvenanceTags, RelationshipEdge, SCORE_MAX, SCORE_MIN,
    STRENGTH_BASELINE, TRUST_BASELINE,
};

// Re-export world file types
pub use world::{RelevancyEntry, WorldRecords};
