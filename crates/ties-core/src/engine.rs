//! Update Engine
//!
//! Runs one relationship batch in two phases.
//!
//! Discovery reads every citizen's relevancies and interaction partners on a
//! bounded pool and folds them into a [`BatchPlan`] of unordered pairs.
//! Employment links and shared guilds from the snapshot are added as
//! candidates too, as is each citizen's pair with the public authority. The
//! update phase then walks the plan grouped by owning citizen, so every pair
//! is read, rescored and written at most once per batch. Cancellation is
//! checked before each owner starts; owners already finished stay committed.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use ties_events::{PairKey, ProvenanceTags, RelationshipEdge};

use crate::config::TiesConfig;
use crate::relevancy::{aggregate_relevancies, RelevancyReport, RelevancyScore};
use crate::scoring::{next_scores, PriorScores};
use crate::snapshot::BatchSnapshot;
use crate::sources::{or_empty, SignalSource};
use crate::store::{EdgeStore, PersistenceError};
use crate::summary::{EdgeOutcome, OwnerTally, RunSummary};
use crate::trust::TrustAggregator;

/// Shared stop signal, set from outside the batch (e.g. on Ctrl-C).
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything known about one candidate pair before trust is assessed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairPlan {
    /// Relevancy from both directions, merged
    pub relevancy: RelevancyScore,
}

/// What one citizen contributed during discovery.
struct Discovery {
    citizen: String,
    relevancy: RelevancyReport,
    partners: Vec<String>,
}

/// Candidate pairs for one batch, keyed canonically.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    pairs: BTreeMap<PairKey, PairPlan>,
    public_authority: String,
    pub relevancy_records: usize,
    pub dropped_targets: usize,
    pub relevancy_fetch_failures: usize,
}

impl BatchPlan {
    pub fn new(public_authority: impl Into<String>) -> Self {
        Self {
            public_authority: public_authority.into(),
            ..Self::default()
        }
    }

    /// Adds a pair with no relevancy of its own. Self pairs are ignored.
    pub fn add_candidate(&mut self, a: &str, b: &str) {
        if let Some(key) = PairKey::new(a, b) {
            self.pairs.entry(key).or_default();
        }
    }

    /// Adds relevancy `a` holds towards `b`, merged with the reverse direction.
    pub fn add_relevancy(&mut self, a: &str, b: &str, score: &RelevancyScore) {
        if let Some(key) = PairKey::new(a, b) {
            self.pairs.entry(key).or_default().relevancy.merge(score);
        }
    }

    pub fn get(&self, a: &str, b: &str) -> Option<&PairPlan> {
        self.pairs.get(&PairKey::new(a, b)?)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Citizen responsible for writing `key`.
    ///
    /// The first handle of the key, except that pairs with the public
    /// authority belong to the other citizen so welfare pairs spread out.
    pub fn owner_of<'k>(&self, key: &'k PairKey) -> &'k str {
        if !self.public_authority.is_empty() && key.first() == self.public_authority {
            key.second()
        } else {
            key.first()
        }
    }

    /// Splits the plan into per-owner work units.
    pub fn into_owners(self) -> BTreeMap<String, Vec<(PairKey, PairPlan)>> {
        let mut owners: BTreeMap<String, Vec<(PairKey, PairPlan)>> = BTreeMap::new();
        for (key, plan) in self.pairs.iter() {
            owners
                .entry(self.owner_of(key).to_string())
                .or_default()
                .push((key.clone(), plan.clone()));
        }
        owners
    }

    fn absorb(&mut self, snapshot: &BatchSnapshot, discovery: Discovery) {
        let citizen = discovery.citizen.as_str();

        self.relevancy_records += discovery.relevancy.records;
        self.dropped_targets += discovery.relevancy.dropped_targets;
        if discovery.relevancy.fetch_failed {
            self.relevancy_fetch_failures += 1;
        }
        for (target, score) in &discovery.relevancy.targets {
            self.add_relevancy(citizen, target, score);
        }

        for partner in &discovery.partners {
            if snapshot.contains(partner) {
                self.add_candidate(citizen, partner);
            } else {
                debug!(citizen, partner = %partner, "Ignoring partner outside the directory");
            }
        }

        let employment: Vec<&str> = snapshot
            .employers_of(citizen)
            .chain(snapshot.employees_of(citizen))
            .collect();
        for other in employment {
            self.add_candidate(citizen, other);
        }

        for member in snapshot.guild_members_of(citizen) {
            self.add_candidate(citizen, member);
        }

        if !snapshot.public_authority.is_empty() && !snapshot.is_public_authority(citizen) {
            self.add_candidate(citizen, &snapshot.public_authority);
        }
    }
}

/// Drives one batch against a signal source and an edge store.
pub struct UpdateEngine {
    source: Arc<dyn SignalSource>,
    store: Arc<dyn EdgeStore>,
    config: TiesConfig,
    dry_run: bool,
    cancel: CancelFlag,
}

impl UpdateEngine {
    pub fn new(
        source: Arc<dyn SignalSource>,
        store: Arc<dyn EdgeStore>,
        config: TiesConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
            dry_run: false,
            cancel: CancelFlag::new(),
        }
    }

    /// Compute everything but never call `upsert`.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs one batch at cycle time `now`.
    pub async fn run(&self, now: DateTime<Utc>) -> RunSummary {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("relationship_batch", %run_id, dry_run = self.dry_run);
        self.run_batch(run_id, now).instrument(span).await
    }

    async fn run_batch(&self, run_id: Uuid, now: DateTime<Utc>) -> RunSummary {
        let mut summary = RunSummary::new(run_id, now, self.dry_run);
        let batch = &self.config.batch;
        let concurrency = batch.concurrency.max(1);

        let snapshot = BatchSnapshot::load(
            self.source.as_ref(),
            now,
            batch.lookback(),
            &batch.public_authority,
            batch.call_timeout(),
        )
        .await;
        summary.citizens_scanned = snapshot.len();
        if snapshot.is_empty() {
            warn!("Citizen directory is empty, nothing to update");
            summary.finish(Utc::now());
            return summary;
        }

        let plan = self.discover(&snapshot, concurrency).await;
        summary.relevancy_records = plan.relevancy_records;
        summary.relevancy_targets_dropped = plan.dropped_targets;
        summary.relevancy_fetch_failures = plan.relevancy_fetch_failures;
        info!(pairs = plan.len(), "Planned candidate pairs");

        let trust = TrustAggregator::new(
            self.source.as_ref(),
            &snapshot,
            &self.config.trust,
            batch.call_timeout(),
        );
        let trust = &trust;

        let tallies: Vec<Option<OwnerTally>> = stream::iter(plan.into_owners())
            .map(move |(owner, pairs)| self.process_owner(trust, owner, pairs, now))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for tally in tallies {
            match tally {
                Some(tally) => summary.absorb(tally),
                None => summary.cancelled = true,
            }
        }
        if summary.cancelled {
            warn!(
                citizens_processed = summary.citizens_processed,
                "Batch cancelled, remaining citizens skipped"
            );
        }

        summary.finish(Utc::now());
        summary
    }

    /// Phase one: read-only, one unit per citizen.
    async fn discover(&self, snapshot: &BatchSnapshot, concurrency: usize) -> BatchPlan {
        let source = self.source.as_ref();
        let timeout = self.config.batch.call_timeout();

        let discoveries: Vec<Discovery> = stream::iter(snapshot.handles())
            .map(move |citizen| async move {
                let relevancy = aggregate_relevancies(source, snapshot, citizen, timeout).await;
                let partners = or_empty(
                    "interaction_partners",
                    citizen,
                    timeout,
                    source.interaction_partners(citizen, snapshot.since, snapshot.now),
                )
                .await;
                Discovery {
                    citizen: citizen.to_string(),
                    relevancy,
                    partners,
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut plan = BatchPlan::new(snapshot.public_authority.clone());
        for discovery in discoveries {
            plan.absorb(snapshot, discovery);
        }
        plan
    }

    /// Phase two unit. `None` means the owner was skipped after cancellation.
    async fn process_owner(
        &self,
        trust: &TrustAggregator<'_>,
        owner: String,
        pairs: Vec<(PairKey, PairPlan)>,
        now: DateTime<Utc>,
    ) -> Option<OwnerTally> {
        if self.cancel.is_cancelled() {
            debug!(owner = %owner, "Skipping owner after cancellation");
            return None;
        }

        let mut tally = OwnerTally::default();
        for (key, plan) in &pairs {
            let outcome = self.process_pair(trust, key, plan, now, &mut tally).await;
            tally.record(outcome);
        }
        debug!(
            owner = %owner,
            pairs = tally.pairs,
            written = tally.created + tally.updated,
            "Finished citizen"
        );
        Some(tally)
    }

    async fn process_pair(
        &self,
        trust: &TrustAggregator<'_>,
        key: &PairKey,
        plan: &PairPlan,
        now: DateTime<Utc>,
        tally: &mut OwnerTally,
    ) -> EdgeOutcome {
        let assessment = trust.assess(key.first(), key.second()).await;
        for kind in assessment.error_kinds() {
            tally.count_channel_failure(kind);
        }

        let relevancy = &plan.relevancy;
        if relevancy.score == 0.0 && relevancy.kinds.is_empty() && !assessment.has_signal() {
            return EdgeOutcome::Untouched;
        }
        for kind in relevancy.kinds.iter().chain(assessment.kinds.iter()) {
            tally.count_signal(kind);
        }

        let timeout = self.config.batch.call_timeout();
        let read = tokio::time::timeout(timeout, self.store.get(key))
            .await
            .unwrap_or_else(|_| {
                Err(PersistenceError::Read {
                    key: key.clone(),
                    reason: format!("timed out after {timeout:?}"),
                })
            });
        let existing = match read {
            Ok(existing) => existing,
            Err(e) => {
                error!(pair = %key, error = %e, "Skipping pair");
                return EdgeOutcome::Failed;
            }
        };

        let (prior, mut tags, outcome) = match existing {
            Some(edge) => (
                PriorScores::Existing {
                    strength: edge.strength,
                    trust: edge.trust,
                },
                edge.tags,
                EdgeOutcome::Updated,
            ),
            None => (PriorScores::Absent, ProvenanceTags::new(), EdgeOutcome::Created),
        };

        let (strength, trust_score) = next_scores(
            prior,
            relevancy.score,
            assessment.raw_delta,
            &self.config.scoring,
        );
        tags.extend(relevancy.kinds.iter().map(String::as_str));
        tags.extend(assessment.kinds.iter().map(String::as_str));
        let edge = RelationshipEdge::new(key.clone(), strength, trust_score, now, tags);

        if self.dry_run {
            debug!(
                pair = %key,
                strength = edge.strength,
                trust = edge.trust,
                "Dry run, edge not written"
            );
            return outcome;
        }

        let write = tokio::time::timeout(timeout, self.store.upsert(&edge))
            .await
            .unwrap_or_else(|_| {
                Err(PersistenceError::Write {
                    key: key.clone(),
                    reason: format!("timed out after {timeout:?}"),
                })
            });
        match write {
            Ok(()) => {
                debug!(
                    pair = %key,
                    strength = edge.strength,
                    trust = edge.trust,
                    tags = edge.tags.len(),
                    "Wrote edge"
                );
                outcome
            }
            Err(e) => {
                error!(pair = %key, error = %e, "Edge write failed");
                EdgeOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWorld;
    use crate::scoring::scale;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use crate::sources::FetchError;
    use ties_events::{
        BusinessOccupancy, Citizen, Contract, Loan, Message, RelevancyEntry, RelevancyRecord,
        Transaction, WorldRecords,
    };

    const COUNCIL: &str = "council";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
    }

    fn config() -> TiesConfig {
        let mut config = TiesConfig::default();
        config.batch.public_authority = COUNCIL.into();
        config
    }

    fn relevancy(owner: &str, target: &str, score: f64, kind: &str) -> RelevancyEntry {
        RelevancyEntry {
            relevant_to: owner.into(),
            record: RelevancyRecord {
                target: target.into(),
                score,
                kind: kind.into(),
                created_at: now() - Duration::hours(1),
            },
        }
    }

    /// Everyone fed and housed so the welfare channel stays quiet.
    fn records(handles: &[&str]) -> WorldRecords {
        let mut records = WorldRecords::new();
        records.citizens = handles
            .iter()
            .map(|h| Citizen::new(*h).with_last_fed(now() - Duration::hours(1)))
            .collect();
        records.home_holders = handles.iter().map(|h| h.to_string()).collect();
        records
    }

    fn engine(world: &Arc<MemoryWorld>) -> UpdateEngine {
        UpdateEngine::new(world.clone(), world.clone(), config())
    }

    /// Fails writes for one pair, delegating everything else.
    struct FailingStore {
        inner: Arc<MemoryWorld>,
        fail_on: PairKey,
    }

    #[async_trait]
    impl EdgeStore for FailingStore {
        async fn get(&self, key: &PairKey) -> Result<Option<RelationshipEdge>, PersistenceError> {
            self.inner.get(key).await
        }

        async fn upsert(&self, edge: &RelationshipEdge) -> Result<(), PersistenceError> {
            if edge.key == self.fail_on {
                return Err(PersistenceError::Write {
                    key: edge.key.clone(),
                    reason: "service unavailable".into(),
                });
            }
            self.inner.upsert(edge).await
        }
    }

    /// Messaging queries always fail; everything else comes from the world.
    struct NoMessages(Arc<MemoryWorld>);

    #[async_trait]
    impl SignalSource for NoMessages {
        async fn citizens(&self) -> Result<Vec<Citizen>, FetchError> {
            self.0.citizens().await
        }

        async fn business_occupancy(&self) -> Result<Vec<BusinessOccupancy>, FetchError> {
            self.0.business_occupancy().await
        }

        async fn relevancies(
            &self,
            citizen: &str,
            since: DateTime<Utc>,
        ) -> Result<Vec<RelevancyRecord>, FetchError> {
            self.0.relevancies(citizen, since).await
        }

        async fn resolve_record(&self, record_id: &str) -> Result<Option<String>, FetchError> {
            self.0.resolve_record(record_id).await
        }

        async fn interaction_partners(
            &self,
            citizen: &str,
            since: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> Result<Vec<String>, FetchError> {
            self.0.interaction_partners(citizen, since, now).await
        }

        async fn messages_between(
            &self,
            _a: &str,
            _b: &str,
            _since: DateTime<Utc>,
        ) -> Result<Vec<Message>, FetchError> {
            Err(FetchError::Transport("connection refused".into()))
        }

        async fn active_loans_between(&self, a: &str, b: &str) -> Result<Vec<Loan>, FetchError> {
            self.0.active_loans_between(a, b).await
        }

        async fn contracts_between(
            &self,
            a: &str,
            b: &str,
            now: DateTime<Utc>,
        ) -> Result<Vec<Contract>, FetchError> {
            self.0.contracts_between(a, b, now).await
        }

        async fn transactions_between(
            &self,
            a: &str,
            b: &str,
            since: DateTime<Utc>,
        ) -> Result<Vec<Transaction>, FetchError> {
            self.0.transactions_between(a, b, since).await
        }

        async fn owns_home(&self, citizen: &str) -> Result<bool, FetchError> {
            self.0.owns_home(citizen).await
        }
    }

    #[test]
    fn test_plan_merges_both_directions() {
        let mut plan = BatchPlan::new(COUNCIL);
        let mut ab = RelevancyScore::default();
        ab.add(10.0, "proximity");
        let mut ba = RelevancyScore::default();
        ba.add(5.0, "same_guild");

        plan.add_relevancy("alice", "bob", &ab);
        plan.add_relevancy("bob", "alice", &ba);
        plan.add_candidate("bob", "alice");
        plan.add_candidate("alice", "alice");

        assert_eq!(plan.len(), 1);
        let pair = plan.get("bob", "alice").unwrap();
        assert_eq!(pair.relevancy.score, 15.0);
        assert_eq!(pair.relevancy.kinds.len(), 2);
    }

    #[test]
    fn test_authority_pairs_owned_by_citizen() {
        let mut plan = BatchPlan::new("Authority");
        plan.add_candidate("alice", "Authority");
        plan.add_candidate("alice", "bob");
        plan.add_candidate("bob", "Authority");

        let owners = plan.into_owners();
        assert_eq!(owners["alice"].len(), 2);
        assert_eq!(owners["bob"].len(), 1);
        assert!(!owners.contains_key("Authority"));
    }

    #[tokio::test]
    async fn test_pair_written_once_under_canonical_key() {
        let mut records = records(&["alice", "bob", COUNCIL]);
        records.relevancies = vec![
            relevancy("alice", "bob", 10.0, "proximity"),
            relevancy("bob", "alice", 5.0, "same_guild"),
        ];
        let world = Arc::new(MemoryWorld::new(records));

        let summary = engine(&world).run(now()).await;

        assert_eq!(summary.edges_created, 1);
        assert_eq!(world.write_count(), 1);
        let edge = world.edge("bob", "alice").await.unwrap();
        assert_eq!(edge.key.first(), "alice");
        assert!((edge.strength - scale(0.0, 15.0, 0.1)).abs() < 1e-9);
        assert_eq!(edge.trust, 50.0);
        assert!(edge.tags.contains("proximity") && edge.tags.contains("same_guild"));
        assert_eq!(edge.last_interaction, now());
    }

    #[tokio::test]
    async fn test_edge_without_signal_untouched() {
        let mut records = records(&["alice", "bob", COUNCIL]);
        let stale = now() - Duration::days(10);
        records.edges = vec![RelationshipEdge::new(
            PairKey::new("alice", "bob").unwrap(),
            40.0,
            70.0,
            stale,
            ProvenanceTags::from_iter(["proximity"]),
        )];
        let world = Arc::new(MemoryWorld::new(records));

        let summary = engine(&world).run(now()).await;

        assert_eq!(summary.edges_written(), 0);
        assert_eq!(world.write_count(), 0);
        let edge = world.edge("alice", "bob").await.unwrap();
        assert_eq!((edge.strength, edge.trust), (40.0, 70.0));
        assert_eq!(edge.last_interaction, stale);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let mut records = records(&["alice", "bob", COUNCIL]);
        records.messages = vec![Message {
            sender: "alice".into(),
            receiver: "bob".into(),
            created_at: now() - Duration::hours(2),
        }];
        let world = Arc::new(MemoryWorld::new(records));

        let summary = engine(&world).dry_run(true).run(now()).await;

        assert!(summary.dry_run);
        assert_eq!(summary.edges_created, 1);
        assert_eq!(world.write_count(), 0);
        assert!(world.edges().await.is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_does_not_stop_owner() {
        let mut records = records(&["alice", "bob", "carol", COUNCIL]);
        records.relevancies = vec![
            relevancy("alice", "bob", 10.0, "proximity"),
            relevancy("alice", "carol", 10.0, "proximity"),
        ];
        let world = Arc::new(MemoryWorld::new(records));
        let store = Arc::new(FailingStore {
            inner: world.clone(),
            fail_on: PairKey::new("alice", "bob").unwrap(),
        });

        let summary = UpdateEngine::new(world.clone(), store, config())
            .run(now())
            .await;

        assert_eq!(summary.edges_failed, 1);
        assert_eq!(summary.edges_created, 1);
        assert!(world.edge("alice", "bob").await.is_none());
        assert!(world.edge("alice", "carol").await.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_every_owner() {
        let mut records = records(&["alice", "bob", COUNCIL]);
        records.relevancies = vec![relevancy("alice", "bob", 10.0, "proximity")];
        let world = Arc::new(MemoryWorld::new(records));
        let cancel = CancelFlag::new();
        cancel.cancel();

        let summary = engine(&world).with_cancel(cancel).run(now()).await;

        assert!(summary.cancelled);
        assert_eq!(summary.citizens_processed, 0);
        assert_eq!(world.write_count(), 0);
    }

    #[tokio::test]
    async fn test_welfare_edge_created_for_hungry_citizen() {
        let mut records = records(&["alice", COUNCIL]);
        records.citizens[0] = Citizen::new("alice");
        let world = Arc::new(MemoryWorld::new(records));

        engine(&world).run(now()).await;

        let edge = world.edge("alice", COUNCIL).await.unwrap();
        assert!(edge.trust < 50.0);
        assert_eq!(edge.strength, 0.0);
        assert!(edge.tags.contains("welfare_hungry"));
    }

    #[tokio::test]
    async fn test_failed_messaging_is_tagged_on_the_edge() {
        let mut records = records(&["alice", "bob", COUNCIL]);
        records.relevancies = vec![relevancy("alice", "bob", 5.0, "proximity")];
        let world = Arc::new(MemoryWorld::new(records));
        let source = Arc::new(NoMessages(world.clone()));

        let summary = UpdateEngine::new(source, world.clone(), config())
            .run(now())
            .await;

        let edge = world.edge("alice", "bob").await.unwrap();
        assert!(edge.tags.contains("proximity"));
        assert!(edge.tags.contains("messaging_unavailable"));
        assert_eq!(edge.trust, 50.0);
        assert_eq!(summary.channel_failures["messaging_unavailable"], 1);
    }

    #[tokio::test]
    async fn test_guild_only_pair_is_discovered() {
        let mut records = records(&["alice", "bob", "carol", COUNCIL]);
        records.citizens[0] = records.citizens[0].clone().with_guild("glassmakers");
        records.citizens[1] = records.citizens[1].clone().with_guild("glassmakers");
        records.citizens[2] = records.citizens[2].clone().with_guild("weavers");
        let world = Arc::new(MemoryWorld::new(records));

        let summary = engine(&world).run(now()).await;

        let edge = world.edge("bob", "alice").await.unwrap();
        assert!(edge.tags.contains("guild_member"));
        assert_eq!(edge.strength, 0.0);
        assert!((edge.trust - scale(50.0, config().trust.guild, 0.1)).abs() < 1e-9);
        assert!(world.edge("alice", "carol").await.is_none());
        assert_eq!(summary.edges_created, 1);
    }

    #[tokio::test]
    async fn test_empty_directory_is_empty_batch() {
        let world = Arc::new(MemoryWorld::new(WorldRecords::new()));

        let summary = engine(&world).run(now()).await;

        assert_eq!(summary.citizens_scanned, 0);
        assert_eq!(summary.pairs_evaluated, 0);
        assert!(summary.finished_at.is_some());
    }
}
