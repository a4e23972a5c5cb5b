//! Trust Signal Aggregation
//!
//! Computes one raw trust delta for a pair from seven independent channels.
//! Each channel is evaluated on its own: if its query fails, it contributes
//! nothing and is reported as failed, and the other channels still count.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use tracing::warn;

use crate::config::TrustWeights;
use crate::snapshot::BatchSnapshot;
use crate::sources::{guarded, FetchError, SignalSource};

/// Kind tags a trust channel can contribute.
pub mod trust_kinds {
    pub const MESSAGING: &str = "messaging";
    pub const LOANS: &str = "loans";
    pub const CONTRACTS: &str = "contracts";
    pub const TRANSACTIONS: &str = "transactions";
    pub const EMPLOYEE_FED: &str = "employee_fed";
    pub const EMPLOYEE_HUNGRY: &str = "employee_hungry";
    pub const EMPLOYEE_HOUSED: &str = "employee_housed";
    pub const EMPLOYEE_HOMELESS: &str = "employee_homeless";
    pub const EMPLOYEE_PAID: &str = "employee_paid";
    pub const EMPLOYEE_UNPAID: &str = "employee_unpaid";
    pub const WELFARE_HUNGRY: &str = "welfare_hungry";
    pub const WELFARE_HOMELESS: &str = "welfare_homeless";
    pub const WELFARE_HUNGRY_AND_HOMELESS: &str = "welfare_hungry_and_homeless";
    pub const GUILD: &str = "guild_member";
}

/// The seven trust channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrustChannel {
    Messaging,
    Loans,
    Contracts,
    Transactions,
    Employment,
    PublicWelfare,
    Guild,
}

impl TrustChannel {
    pub fn name(self) -> &'static str {
        match self {
            TrustChannel::Messaging => "messaging",
            TrustChannel::Loans => "loans",
            TrustChannel::Contracts => "contracts",
            TrustChannel::Transactions => "transactions",
            TrustChannel::Employment => "employment",
            TrustChannel::PublicWelfare => "public_welfare",
            TrustChannel::Guild => "guild",
        }
    }

    /// Error kind reported when this channel could not be evaluated.
    pub fn unavailable_kind(self) -> String {
        format!("{}_unavailable", self.name())
    }
}

impl fmt::Display for TrustChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What one channel contributed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelScore {
    pub delta: f64,
    pub kinds: Vec<&'static str>,
}

impl ChannelScore {
    fn add(&mut self, delta: f64, kind: &'static str) {
        self.delta += delta;
        self.kinds.push(kind);
    }
}

/// Combined result of all channels for one pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrustAssessment {
    /// Sum of channel deltas before scaling
    pub raw_delta: f64,
    /// Kinds of every channel that contributed
    pub kinds: BTreeSet<String>,
    /// Channels whose queries failed and contributed nothing
    pub failed_channels: BTreeSet<TrustChannel>,
}

impl TrustAssessment {
    /// Folds one channel's outcome in.
    pub fn record(&mut self, channel: TrustChannel, result: Result<ChannelScore, FetchError>) {
        match result {
            Ok(score) => {
                if score.delta != 0.0 {
                    self.raw_delta += score.delta;
                }
                self.kinds.extend(score.kinds.into_iter().map(str::to_string));
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "Trust channel failed, contributing zero");
                self.kinds.insert(channel.unavailable_kind());
                self.failed_channels.insert(channel);
            }
        }
    }

    /// Error kinds for the failed channels.
    pub fn error_kinds(&self) -> Vec<String> {
        self.failed_channels
            .iter()
            .map(|c| c.unavailable_kind())
            .collect()
    }

    /// Whether any channel produced a signal.
    pub fn has_signal(&self) -> bool {
        self.raw_delta != 0.0 || !self.kinds.is_empty()
    }
}

/// Evaluates the trust channels for pairs within one batch.
pub struct TrustAggregator<'a> {
    source: &'a dyn SignalSource,
    snapshot: &'a BatchSnapshot,
    weights: &'a TrustWeights,
    timeout: Duration,
}

impl<'a> TrustAggregator<'a> {
    pub fn new(
        source: &'a dyn SignalSource,
        snapshot: &'a BatchSnapshot,
        weights: &'a TrustWeights,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            snapshot,
            weights,
            timeout,
        }
    }

    /// Computes the raw trust delta and contributing kinds for `(a, b)`.
    pub async fn assess(&self, a: &str, b: &str) -> TrustAssessment {
        let mut assessment = TrustAssessment::default();
        assessment.record(TrustChannel::Messaging, self.messaging(a, b).await);
        assessment.record(TrustChannel::Loans, self.loans(a, b).await);
        assessment.record(TrustChannel::Contracts, self.contracts(a, b).await);
        assessment.record(TrustChannel::Transactions, self.transactions(a, b).await);
        assessment.record(TrustChannel::Employment, self.employment(a, b).await);
        assessment.record(TrustChannel::PublicWelfare, self.public_welfare(a, b).await);
        assessment.record(TrustChannel::Guild, Ok(self.guild(a, b)));
        assessment
    }

    async fn messaging(&self, a: &str, b: &str) -> Result<ChannelScore, FetchError> {
        let messages = guarded(
            self.timeout,
            self.source.messages_between(a, b, self.snapshot.since),
        )
        .await?;

        let mut score = ChannelScore::default();
        if !messages.is_empty() {
            score.add(
                messages.len() as f64 * self.weights.message_weight,
                trust_kinds::MESSAGING,
            );
        }
        Ok(score)
    }

    async fn loans(&self, a: &str, b: &str) -> Result<ChannelScore, FetchError> {
        let loans = guarded(self.timeout, self.source.active_loans_between(a, b)).await?;

        let mut score = ChannelScore::default();
        let total: f64 = loans
            .iter()
            .filter(|l| l.active)
            .map(|l| l.principal / self.weights.loan_divisor)
            .sum();
        if total != 0.0 {
            score.add(total, trust_kinds::LOANS);
        }
        Ok(score)
    }

    async fn contracts(&self, a: &str, b: &str) -> Result<ChannelScore, FetchError> {
        let now = self.snapshot.now;
        let contracts = guarded(self.timeout, self.source.contracts_between(a, b, now)).await?;

        let mut score = ChannelScore::default();
        let total: f64 = contracts
            .iter()
            .filter(|c| c.ends_at > now)
            .map(|c| c.value() / self.weights.contract_divisor)
            .sum();
        if total != 0.0 {
            score.add(total, trust_kinds::CONTRACTS);
        }
        Ok(score)
    }

    async fn transactions(&self, a: &str, b: &str) -> Result<ChannelScore, FetchError> {
        let since = self.snapshot.since;
        let transactions =
            guarded(self.timeout, self.source.transactions_between(a, b, since)).await?;

        let mut score = ChannelScore::default();
        let total: f64 = transactions
            .iter()
            .filter(|t| t.executed_at >= since)
            .map(|t| t.price / self.weights.transaction_divisor)
            .sum();
        if total != 0.0 {
            score.add(total, trust_kinds::TRANSACTIONS);
        }
        Ok(score)
    }

    /// Evaluated once per direction in which one side employs the other.
    async fn employment(&self, a: &str, b: &str) -> Result<ChannelScore, FetchError> {
        let mut score = ChannelScore::default();
        for (employer, employee) in [(a, b), (b, a)] {
            if self.snapshot.is_employed_by(employee, employer) {
                self.score_employee(employer, employee, &mut score).await?;
            }
        }
        Ok(score)
    }

    async fn score_employee(
        &self,
        employer: &str,
        employee: &str,
        score: &mut ChannelScore,
    ) -> Result<(), FetchError> {
        let w = self.weights;

        if self.is_fed(employee) {
            score.add(w.employee_fed, trust_kinds::EMPLOYEE_FED);
        } else {
            score.add(w.employee_hungry, trust_kinds::EMPLOYEE_HUNGRY);
        }

        if guarded(self.timeout, self.source.owns_home(employee)).await? {
            score.add(w.employee_housed, trust_kinds::EMPLOYEE_HOUSED);
        } else {
            score.add(w.employee_homeless, trust_kinds::EMPLOYEE_HOMELESS);
        }

        let wage_since = self.snapshot.now - w.wage_window();
        let recent = guarded(
            self.timeout,
            self.source.transactions_between(employer, employee, wage_since),
        )
        .await?;
        let paid = recent
            .iter()
            .any(|t| t.executed_at >= wage_since && t.is_wage_from(employer, employee));
        if paid {
            score.add(w.employee_paid, trust_kinds::EMPLOYEE_PAID);
        } else {
            score.add(w.employee_unpaid, trust_kinds::EMPLOYEE_UNPAID);
        }

        Ok(())
    }

    /// Only when exactly one side is the public authority.
    ///
    /// Hunger and homelessness are not summed: both together score one
    /// combined penalty, otherwise whichever one applies.
    async fn public_welfare(&self, a: &str, b: &str) -> Result<ChannelScore, FetchError> {
        let mut score = ChannelScore::default();
        let citizen = match (
            self.snapshot.is_public_authority(a),
            self.snapshot.is_public_authority(b),
        ) {
            (true, false) => b,
            (false, true) => a,
            _ => return Ok(score),
        };

        let hungry = !self.is_fed(citizen);
        let homeless = !guarded(self.timeout, self.source.owns_home(citizen)).await?;

        let w = self.weights;
        match (hungry, homeless) {
            (true, true) => score.add(
                w.welfare_hungry_and_homeless,
                trust_kinds::WELFARE_HUNGRY_AND_HOMELESS,
            ),
            (true, false) => score.add(w.welfare_hungry, trust_kinds::WELFARE_HUNGRY),
            (false, true) => score.add(w.welfare_homeless, trust_kinds::WELFARE_HOMELESS),
            (false, false) => {}
        }
        Ok(score)
    }

    fn guild(&self, a: &str, b: &str) -> ChannelScore {
        let mut score = ChannelScore::default();
        if self.snapshot.is_public_authority(a) || self.snapshot.is_public_authority(b) {
            return score;
        }

        let guild_a = self.snapshot.citizen(a).and_then(|c| c.guild());
        let guild_b = self.snapshot.citizen(b).and_then(|c| c.guild());
        if let (Some(ga), Some(gb)) = (guild_a, guild_b) {
            if ga == gb {
                score.add(self.weights.guild, trust_kinds::GUILD);
            }
        }
        score
    }

    /// A citizen missing from the directory counts as hungry.
    fn is_fed(&self, handle: &str) -> bool {
        self.snapshot
            .citizen(handle)
            .is_some_and(|c| c.is_fed(self.snapshot.now, self.weights.fed_window()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWorld;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use ties_events::{
        BusinessOccupancy, Citizen, Contract, Loan, Message, Transaction, WorldRecords,
        WAGE_PAYMENT,
    };

    const COUNCIL: &str = "council";
    const TIMEOUT: Duration = Duration::from_secs(5);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
    }

    fn hours_ago(h: i64) -> DateTime<Utc> {
        now() - ChronoDuration::hours(h)
    }

    fn snapshot_of(records: &WorldRecords) -> BatchSnapshot {
        BatchSnapshot::from_records(
            now(),
            ChronoDuration::hours(24),
            COUNCIL,
            records.citizens.clone(),
            &records.occupancies,
        )
    }

    async fn assess(records: WorldRecords, a: &str, b: &str) -> TrustAssessment {
        let snapshot = snapshot_of(&records);
        let world = MemoryWorld::new(records);
        let weights = TrustWeights::default();
        TrustAggregator::new(&world, &snapshot, &weights, TIMEOUT)
            .assess(a, b)
            .await
    }

    fn message(from: &str, to: &str, h: i64) -> Message {
        Message {
            sender: from.into(),
            receiver: to.into(),
            created_at: hours_ago(h),
        }
    }

    fn base_records() -> WorldRecords {
        let mut records = WorldRecords::new();
        records.citizens = vec![
            Citizen::new("alice").with_last_fed(hours_ago(1)),
            Citizen::new("bob").with_last_fed(hours_ago(1)),
            Citizen::new(COUNCIL),
        ];
        records.home_holders = vec!["alice".into(), "bob".into()];
        records
    }

    #[tokio::test]
    async fn test_messaging_scenario() {
        let mut records = base_records();
        records.messages = vec![
            message("alice", "bob", 1),
            message("alice", "bob", 2),
            message("alice", "bob", 3),
            message("bob", "alice", 4),
            message("bob", "alice", 5),
            message("bob", "alice", 30),
        ];

        let result = assess(records, "alice", "bob").await;

        assert_eq!(result.raw_delta, 5.0);
        assert_eq!(
            result.kinds.iter().map(String::as_str).collect::<Vec<_>>(),
            vec![trust_kinds::MESSAGING]
        );
        assert!(result.failed_channels.is_empty());
    }

    #[tokio::test]
    async fn test_no_signal() {
        let result = assess(base_records(), "alice", "bob").await;
        assert!(!result.has_signal());
        assert_eq!(result.raw_delta, 0.0);
    }

    #[tokio::test]
    async fn test_loans_contracts_transactions() {
        let mut records = base_records();
        records.loans = vec![
            Loan {
                lender: "alice".into(),
                borrower: "bob".into(),
                principal: 2000.0,
                active: true,
            },
            Loan {
                lender: "bob".into(),
                borrower: "alice".into(),
                principal: 9000.0,
                active: false,
            },
        ];
        records.contracts = vec![
            Contract {
                buyer: "bob".into(),
                seller: "alice".into(),
                price_per_unit: 5.0,
                quantity: 40.0,
                ends_at: now() + ChronoDuration::hours(6),
            },
            Contract {
                buyer: "bob".into(),
                seller: "alice".into(),
                price_per_unit: 500.0,
                quantity: 40.0,
                ends_at: hours_ago(6),
            },
        ];
        records.transactions = vec![Transaction {
            seller: "alice".into(),
            buyer: "bob".into(),
            price: 250.0,
            kind: Some("bread".into()),
            executed_at: hours_ago(2),
        }];

        let result = assess(records, "bob", "alice").await;

        // 2000/1000 + 200/100 + 250/100
        assert!((result.raw_delta - 6.5).abs() < 1e-9);
        assert!(result.kinds.contains(trust_kinds::LOANS));
        assert!(result.kinds.contains(trust_kinds::CONTRACTS));
        assert!(result.kinds.contains(trust_kinds::TRANSACTIONS));
    }

    #[tokio::test]
    async fn test_hungry_homeless_employee_penalised_once_each() {
        let mut records = base_records();
        records.citizens[1] = Citizen::new("bob").with_last_fed(hours_ago(30));
        records.home_holders = vec!["alice".into()];
        records.occupancies = vec![BusinessOccupancy::business("bob", "alice")];

        let result = assess(records, "alice", "bob").await;
        let w = TrustWeights::default();

        assert!(result.kinds.contains(trust_kinds::EMPLOYEE_HUNGRY));
        assert!(result.kinds.contains(trust_kinds::EMPLOYEE_HOMELESS));
        assert!(result.kinds.contains(trust_kinds::EMPLOYEE_UNPAID));
        assert_eq!(
            result.raw_delta,
            w.employee_hungry + w.employee_homeless + w.employee_unpaid
        );
    }

    #[tokio::test]
    async fn test_hungry_only_employee_has_no_homeless_penalty() {
        let mut records = base_records();
        records.citizens[1] = Citizen::new("bob").with_last_fed(hours_ago(30));
        records.occupancies = vec![BusinessOccupancy::business("bob", "alice")];
        records.transactions = vec![Transaction {
            seller: "bob".into(),
            buyer: "alice".into(),
            price: 80.0,
            kind: Some(WAGE_PAYMENT.into()),
            executed_at: hours_ago(3),
        }];

        let result = assess(records, "alice", "bob").await;
        let w = TrustWeights::default();

        assert!(result.kinds.contains(trust_kinds::EMPLOYEE_HUNGRY));
        assert!(result.kinds.contains(trust_kinds::EMPLOYEE_HOUSED));
        assert!(!result.kinds.contains(trust_kinds::EMPLOYEE_HOMELESS));
        assert!(result.kinds.contains(trust_kinds::EMPLOYEE_PAID));
        let employment = w.employee_hungry + w.employee_housed + w.employee_paid;
        let wage_as_transaction = 80.0 / w.transaction_divisor;
        assert!((result.raw_delta - (employment + wage_as_transaction)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_employment_evaluated_in_both_directions() {
        let mut records = base_records();
        records.occupancies = vec![
            BusinessOccupancy::business("bob", "alice"),
            BusinessOccupancy::business("alice", "bob"),
        ];

        let result = assess(records, "alice", "bob").await;
        let w = TrustWeights::default();

        let per_direction = w.employee_fed + w.employee_housed + w.employee_unpaid;
        assert!((result.raw_delta - 2.0 * per_direction).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_welfare_precedence() {
        let w = TrustWeights::default();

        // Hungry and homeless: one combined penalty.
        let mut records = base_records();
        records.citizens[1] = Citizen::new("bob");
        records.home_holders = vec![];
        let both = assess(records, COUNCIL, "bob").await;
        assert_eq!(both.raw_delta, w.welfare_hungry_and_homeless);
        assert!(both.kinds.contains(trust_kinds::WELFARE_HUNGRY_AND_HOMELESS));
        assert!(!both.kinds.contains(trust_kinds::WELFARE_HUNGRY));
        assert!(!both.kinds.contains(trust_kinds::WELFARE_HOMELESS));

        // Hungry only.
        let mut records = base_records();
        records.citizens[1] = Citizen::new("bob").with_last_fed(hours_ago(40));
        let hungry = assess(records, "bob", COUNCIL).await;
        assert_eq!(hungry.raw_delta, w.welfare_hungry);

        // Homeless only.
        let mut records = base_records();
        records.home_holders = vec![];
        let homeless = assess(records, COUNCIL, "bob").await;
        assert_eq!(homeless.raw_delta, w.welfare_homeless);

        // Neither.
        let fine = assess(base_records(), COUNCIL, "bob").await;
        assert!(!fine.has_signal());
    }

    #[tokio::test]
    async fn test_welfare_ignored_between_ordinary_citizens() {
        let mut records = base_records();
        records.citizens[1] = Citizen::new("bob");
        records.home_holders = vec!["alice".into()];

        let result = assess(records, "alice", "bob").await;
        assert!(!result.has_signal());
    }

    #[tokio::test]
    async fn test_guild_co_membership() {
        let mut records = base_records();
        records.citizens[0] = records.citizens[0].clone().with_guild("glass");
        records.citizens[1] = records.citizens[1].clone().with_guild("glass");

        let result = assess(records, "alice", "bob").await;
        assert_eq!(result.raw_delta, TrustWeights::default().guild);
        assert!(result.kinds.contains(trust_kinds::GUILD));
    }

    #[tokio::test]
    async fn test_guild_ignored_for_public_authority() {
        let mut records = base_records();
        records.citizens[1] = records.citizens[1].clone().with_guild("glass");
        records.citizens[2] = Citizen::new(COUNCIL).with_guild("glass");

        let result = assess(records, "bob", COUNCIL).await;
        assert!(!result.kinds.contains(trust_kinds::GUILD));
    }

    #[test]
    fn test_failed_channel_contributes_zero_and_tags_error_kind() {
        let mut assessment = TrustAssessment::default();
        assessment.record(
            TrustChannel::Messaging,
            Ok(ChannelScore {
                delta: 3.0,
                kinds: vec![trust_kinds::MESSAGING],
            }),
        );
        assessment.record(
            TrustChannel::Loans,
            Err(FetchError::Transport("reset".into())),
        );

        assert_eq!(assessment.raw_delta, 3.0);
        assert!(assessment.failed_channels.contains(&TrustChannel::Loans));
        assert_eq!(assessment.error_kinds(), vec!["loans_unavailable".to_string()]);
        assert!(assessment.kinds.contains("loans_unavailable"));
        assert!(assessment.has_signal());
    }
}
