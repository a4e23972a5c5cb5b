//! Relevancy Aggregation
//!
//! Turns a citizen's upstream relevancies into a per-target score sum plus
//! the distinct relevancy kinds seen. Targets that cannot be resolved are
//! dropped one at a time; their siblings in the same record still count.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, warn};

use ties_events::{RelevancyRecord, TargetRef};

use crate::snapshot::BatchSnapshot;
use crate::sources::{guarded, FetchError, SignalSource};

/// A relevancy target that could not be mapped to a citizen.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolutionError {
    #[error("handle '{0}' is not in the citizen directory")]
    UnknownHandle(String),
    #[error("record '{0}' does not resolve to a citizen")]
    UnknownRecord(String),
    #[error("lookup of record '{record}' failed: {source}")]
    Lookup { record: String, source: FetchError },
}

/// Accumulated relevancy towards one target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelevancyScore {
    pub score: f64,
    pub kinds: BTreeSet<String>,
}

impl RelevancyScore {
    pub fn add(&mut self, score: f64, kind: &str) {
        self.score += score;
        let kind = kind.trim();
        if !kind.is_empty() {
            self.kinds.insert(kind.to_string());
        }
    }

    pub fn merge(&mut self, other: &RelevancyScore) {
        self.score += other.score;
        self.kinds.extend(other.kinds.iter().cloned());
    }
}

/// Outcome of aggregating one citizen's relevancies.
#[derive(Debug, Clone, Default)]
pub struct RelevancyReport {
    /// Resolved target handle -> accumulated score
    pub targets: BTreeMap<String, RelevancyScore>,
    /// Relevancy records considered after the cutoff filter
    pub records: usize,
    /// Individual targets dropped because they could not be resolved
    pub dropped_targets: usize,
    /// The relevancy query itself failed
    pub fetch_failed: bool,
}

/// Resolves relevancy targets, caching foreign-key lookups for one citizen.
struct Resolver<'a> {
    source: &'a dyn SignalSource,
    snapshot: &'a BatchSnapshot,
    timeout: Duration,
    records: HashMap<String, Option<String>>,
}

impl<'a> Resolver<'a> {
    async fn resolve(&mut self, target: &TargetRef) -> Result<String, ResolutionError> {
        let handle = match target {
            TargetRef::Handle(handle) => handle.clone(),
            TargetRef::Record(record) => {
                let resolved = match self.records.get(record) {
                    Some(cached) => cached.clone(),
                    None => {
                        let looked_up = guarded(self.timeout, self.source.resolve_record(record))
                            .await
                            .map_err(|source| ResolutionError::Lookup {
                                record: record.clone(),
                                source,
                            })?;
                        self.records.insert(record.clone(), looked_up.clone());
                        looked_up
                    }
                };
                resolved.ok_or_else(|| ResolutionError::UnknownRecord(record.clone()))?
            }
        };

        if self.snapshot.contains(&handle) {
            Ok(handle)
        } else {
            Err(ResolutionError::UnknownHandle(handle))
        }
    }
}

/// Aggregates the relevancies computed for `citizen`.
pub async fn aggregate_relevancies(
    source: &dyn SignalSource,
    snapshot: &BatchSnapshot,
    citizen: &str,
    timeout: Duration,
) -> RelevancyReport {
    let mut report = RelevancyReport::default();

    let records = match guarded(timeout, source.relevancies(citizen, snapshot.since)).await {
        Ok(records) => records,
        Err(e) => {
            warn!(citizen, error = %e, "Relevancy query failed, using empty result");
            report.fetch_failed = true;
            return report;
        }
    };

    let mut resolver = Resolver {
        source,
        snapshot,
        timeout,
        records: HashMap::new(),
    };

    // The feed filters by age server-side; re-check in case it did not.
    let fresh: Vec<&RelevancyRecord> = records
        .iter()
        .filter(|r| r.created_at >= snapshot.since)
        .collect();
    report.records = fresh.len();

    for record in fresh {
        for target in TargetRef::parse_list(&record.target) {
            match resolver.resolve(&target).await {
                Ok(handle) if handle == citizen => {
                    debug!(citizen, kind = %record.kind, "Skipping self-targeted relevancy");
                }
                Ok(handle) => {
                    report
                        .targets
                        .entry(handle)
                        .or_default()
                        .add(record.score, &record.kind);
                }
                Err(e) => {
                    warn!(citizen, kind = %record.kind, error = %e, "Dropping relevancy target");
                    report.dropped_targets += 1;
                }
            }
        }
    }

    report
}
