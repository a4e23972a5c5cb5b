//! Run Summary
//!
//! Aggregate counters for one batch. Individual pair failures are never
//! surfaced on their own, only counted here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// What happened to one candidate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    /// Edge did not exist and was written (or would be, in a dry run)
    Created,
    /// Existing edge was rewritten (or would be, in a dry run)
    Updated,
    /// No signal this cycle; nothing read or written
    Untouched,
    /// Reading or writing the edge failed
    Failed,
}

/// Counters for the pairs owned by one citizen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnerTally {
    pub pairs: usize,
    pub created: usize,
    pub updated: usize,
    pub untouched: usize,
    pub failed: usize,
    pub channel_failures: BTreeMap<String, usize>,
    pub signal_counts: BTreeMap<String, usize>,
}

impl OwnerTally {
    pub fn record(&mut self, outcome: EdgeOutcome) {
        self.pairs += 1;
        match outcome {
            EdgeOutcome::Created => self.created += 1,
            EdgeOutcome::Updated => self.updated += 1,
            EdgeOutcome::Untouched => self.untouched += 1,
            EdgeOutcome::Failed => self.failed += 1,
        }
    }

    pub fn count_signal(&mut self, kind: &str) {
        *self.signal_counts.entry(kind.to_string()).or_insert(0) += 1;
    }

    pub fn count_channel_failure(&mut self, kind: String) {
        *self.channel_failures.entry(kind).or_insert(0) += 1;
    }
}

/// End-of-run totals.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    /// Stopped early between citizens
    pub cancelled: bool,
    /// Citizens in the directory
    pub citizens_scanned: usize,
    /// Citizens whose owned pairs were fully processed
    pub citizens_processed: usize,
    pub pairs_evaluated: usize,
    pub edges_created: usize,
    pub edges_updated: usize,
    pub edges_untouched: usize,
    pub edges_failed: usize,
    pub relevancy_records: usize,
    pub relevancy_targets_dropped: usize,
    pub relevancy_fetch_failures: usize,
    pub channel_failures: BTreeMap<String, usize>,
    pub signal_counts: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: None,
            dry_run,
            cancelled: false,
            citizens_scanned: 0,
            citizens_processed: 0,
            pairs_evaluated: 0,
            edges_created: 0,
            edges_updated: 0,
            edges_untouched: 0,
            edges_failed: 0,
            relevancy_records: 0,
            relevancy_targets_dropped: 0,
            relevancy_fetch_failures: 0,
            channel_failures: BTreeMap::new(),
            signal_counts: BTreeMap::new(),
        }
    }

    /// Folds one citizen's counters in.
    pub fn absorb(&mut self, tally: OwnerTally) {
        self.citizens_processed += 1;
        self.pairs_evaluated += tally.pairs;
        self.edges_created += tally.created;
        self.edges_updated += tally.updated;
        self.edges_untouched += tally.untouched;
        self.edges_failed += tally.failed;
        for (kind, n) in tally.channel_failures {
            *self.channel_failures.entry(kind).or_insert(0) += n;
        }
        for (kind, n) in tally.signal_counts {
            *self.signal_counts.entry(kind).or_insert(0) += n;
        }
    }

    /// Edges written, or that would have been written in a dry run.
    pub fn edges_written(&self) -> usize {
        self.edges_created + self.edges_updated
    }

    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.finished_at = Some(at);
    }

    /// Emits the summary as a single log line.
    pub fn log(&self) {
        info!(
            run_id = %self.run_id,
            dry_run = self.dry_run,
            cancelled = self.cancelled,
            citizens_scanned = self.citizens_scanned,
            citizens_processed = self.citizens_processed,
            pairs_evaluated = self.pairs_evaluated,
            edges_created = self.edges_created,
            edges_updated = self.edges_updated,
            edges_untouched = self.edges_untouched,
            edges_failed = self.edges_failed,
            relevancy_targets_dropped = self.relevancy_targets_dropped,
            channel_failures = self.channel_failures.values().sum::<usize>(),
            "Relationship update finished"
        );
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes the summary as JSON.
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = self.to_json()?;
        fs::write(path, json)
    }
}
