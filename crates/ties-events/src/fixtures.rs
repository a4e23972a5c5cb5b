//! Sample data fixtures for testing.
//!
//! This module provides a ready-made world for other crates to use.
//! Enable the `test-fixtures` feature to access these helpers.
//!
//! # Example
//!
//! ```ignore
//! // In your Cargo.toml:
//! // [dev-dependencies]
//! // ties-events = { path = "../ties-events", features = ["test-fixtures"] }
//!
//! use ties_events::fixtures;
//!
//! let world = fixtures::sample_world();
//! let now = fixtures::sample_now();
//! ```

use chrono::{DateTime, TimeZone, Utc};

use crate::WorldRecords;

/// Handle of the public authority in the sample world.
pub const PUBLIC_AUTHORITY: &str = "ConsiglioDeiDieci";

/// The cycle time the sample world was written against.
pub fn sample_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0)
        .single()
        .expect("valid fixture time")
}

/// Returns the sample world from the fixtures file.
///
/// Contains:
/// - 5 citizens: alice and carol share a guild, bob works for alice and is
///   hungry and homeless, carol works for dario, plus the public authority
/// - relevancies including an unresolvable foreign key, a resolvable one and
///   one older than the lookback window
/// - 5 recent messages between alice and bob, one stale
/// - an active and an inactive loan, a live and an ended contract
/// - a wage payment from dario to carol
/// - existing edges alice<->carol and bob<->dario
pub fn sample_world() -> WorldRecords {
    let json = include_str!("../tests/fixtures/sample_world.json");
    WorldRecords::from_json(json).expect("Failed to parse sample_world.json")
}
