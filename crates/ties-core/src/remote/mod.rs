//! Remote Backend
//!
//! Reads signals from and writes edges to a hosted table store over REST.
//! Requests are rate limited across the whole batch.

mod client;
pub mod formula;
mod records;
mod store;

pub use client::{RateLimiter, Record, RecordClient, RemoteError};
pub use records::RelationshipFields;
pub use store::RemoteStore;
