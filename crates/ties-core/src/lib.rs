//! Relationship graph updater.
//!
//! Once per cycle, decays every touched relationship edge toward its baseline
//! and injects the strength and trust signals observed since the last cycle.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  signals   ┌────────────┐  upsert   ┌─────────────┐
//! │ SignalSource │ ─────────▶ │   engine   │ ────────▶ │  EdgeStore  │
//! └──────────────┘            └────────────┘           └─────────────┘
//!        relevancy + trust ──▶ scoring ──▶ RunSummary
//! ```
//!
//! # Modules
//!
//! - [`sources`]: Signal queries and the per-call timeout guard
//! - [`snapshot`]: Per-batch citizen directory and employer index
//! - [`relevancy`]: Relevancy aggregation into strength deltas
//! - [`trust`]: The seven trust channels
//! - [`scoring`]: Decay and saturating injection
//! - [`engine`]: Batch planning and the per-owner update loop
//! - [`store`]: Edge persistence boundary
//! - [`memory`]: In-memory world for offline runs and tests
//! - [`remote`]: Hosted table store over REST
//! - [`summary`]: End-of-run counters
//! - [`config`]: TOML tuning and credentials

pub mod config;
pub mod engine;
pub mod memory;
pub mod relevancy;
pub mod remote;
pub mod scoring;
pub mod snapshot;
pub mod sources;
pub mod store;
pub mod summary;
pub mod trust;

pub use config::{
    default_config_toml, BatchConfig, ConfigError, RemoteConfig, ScoringConfig, TableNames,
    TiesConfig, TrustWeights,
};
pub use engine::{BatchPlan, CancelFlag, PairPlan, UpdateEngine};
pub use memory::{MemoryWorld, WorldFileError};
pub use relevancy::{aggregate_relevancies, RelevancyReport, RelevancyScore, ResolutionError};
pub use remote::{RemoteError, RemoteStore};
pub use scoring::{decay_strength, decay_trust, next_scores, scale, PriorScores};
pub use snapshot::BatchSnapshot;
pub use sources::{FetchError, SignalSource};
pub use store::{EdgeStore, PersistenceError};
pub use summary::{EdgeOutcome, OwnerTally, RunSummary};
pub use trust::{trust_kinds, TrustAggregator, TrustAssessment, TrustChannel};
