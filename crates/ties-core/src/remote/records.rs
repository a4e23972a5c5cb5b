//! Field layouts of the remote tables and their mapping onto domain types.
//!
//! Every field is optional: the API omits empty fields entirely. Records
//! missing a field the domain type cannot do without map to `None` and are
//! skipped by the caller.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ties_events::timestamp::deserialize_lenient;
use ties_events::{
    BusinessOccupancy, Citizen, Contract, Loan, Message, PairKey, ProvenanceTags,
    RelationshipEdge, RelevancyRecord, Transaction, STRENGTH_BASELINE, TRUST_BASELINE,
};

/// Loan status that counts as outstanding.
pub const LOAN_ACTIVE: &str = "active";
/// Building category that counts as a home.
pub const HOME_CATEGORY: &str = "home";

fn text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CitizenFields {
    #[serde(rename = "Username", default)]
    pub username: Option<String>,
    #[serde(rename = "Ducats", default)]
    pub ducats: Option<f64>,
    #[serde(rename = "AteAt", default, deserialize_with = "deserialize_lenient")]
    pub ate_at: Option<DateTime<Utc>>,
    #[serde(rename = "GuildId", default)]
    pub guild_id: Option<String>,
}

impl CitizenFields {
    pub fn into_citizen(self) -> Option<Citizen> {
        Some(Citizen {
            handle: text(self.username)?,
            wealth: self.ducats.unwrap_or(0.0),
            last_fed: self.ate_at,
            guild_id: text(self.guild_id),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildingFields {
    #[serde(rename = "Occupant", default)]
    pub occupant: Option<String>,
    #[serde(rename = "RunBy", default)]
    pub run_by: Option<String>,
    #[serde(rename = "Owner", default)]
    pub owner: Option<String>,
    #[serde(rename = "Category", default)]
    pub category: Option<String>,
}

impl BuildingFields {
    pub fn into_occupancy(self) -> BusinessOccupancy {
        BusinessOccupancy {
            occupant: text(self.occupant),
            operator: text(self.run_by),
            category: text(self.category),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelevancyFields {
    #[serde(rename = "TargetCitizen", default)]
    pub target: Option<Value>,
    #[serde(rename = "Score", default)]
    pub score: Option<f64>,
    #[serde(rename = "Type", default)]
    pub kind: Option<String>,
    #[serde(rename = "CreatedAt", default, deserialize_with = "deserialize_lenient")]
    pub created_at: Option<DateTime<Utc>>,
}

impl RelevancyFields {
    /// Linked-record targets arrive as arrays; they are kept as JSON text
    /// and split later like any other target list.
    pub fn into_record(self) -> Option<RelevancyRecord> {
        let target = match self.target? {
            Value::String(s) => s,
            Value::Null => return None,
            other => other.to_string(),
        };
        Some(RelevancyRecord {
            target,
            score: self.score.unwrap_or(0.0),
            kind: self.kind.unwrap_or_default(),
            created_at: self.created_at?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageFields {
    #[serde(rename = "Sender", default)]
    pub sender: Option<String>,
    #[serde(rename = "Receiver", default)]
    pub receiver: Option<String>,
    #[serde(rename = "CreatedAt", default, deserialize_with = "deserialize_lenient")]
    pub created_at: Option<DateTime<Utc>>,
}

impl MessageFields {
    pub fn into_message(self) -> Option<Message> {
        Some(Message {
            sender: text(self.sender)?,
            receiver: text(self.receiver)?,
            created_at: self.created_at?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoanFields {
    #[serde(rename = "Lender", default)]
    pub lender: Option<String>,
    #[serde(rename = "Borrower", default)]
    pub borrower: Option<String>,
    #[serde(rename = "PrincipalAmount", default)]
    pub principal: Option<f64>,
    #[serde(rename = "Status", default)]
    pub status: Option<String>,
}

impl LoanFields {
    pub fn into_loan(self) -> Option<Loan> {
        let active = self
            .status
            .as_deref()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case(LOAN_ACTIVE));
        Some(Loan {
            lender: text(self.lender)?,
            borrower: text(self.borrower)?,
            principal: self.principal.unwrap_or(0.0),
            active,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractFields {
    #[serde(rename = "Buyer", default)]
    pub buyer: Option<String>,
    #[serde(rename = "Seller", default)]
    pub seller: Option<String>,
    #[serde(rename = "PricePerResource", default)]
    pub price_per_resource: Option<f64>,
    #[serde(rename = "TargetAmount", default)]
    pub target_amount: Option<f64>,
    #[serde(rename = "EndAt", default, deserialize_with = "deserialize_lenient")]
    pub end_at: Option<DateTime<Utc>>,
}

impl ContractFields {
    pub fn into_contract(self) -> Option<Contract> {
        Some(Contract {
            buyer: text(self.buyer)?,
            seller: text(self.seller)?,
            price_per_unit: self.price_per_resource.unwrap_or(0.0),
            quantity: self.target_amount.unwrap_or(0.0),
            ends_at: self.end_at?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionFields {
    #[serde(rename = "Seller", default)]
    pub seller: Option<String>,
    #[serde(rename = "Buyer", default)]
    pub buyer: Option<String>,
    #[serde(rename = "Price", default)]
    pub price: Option<f64>,
    #[serde(rename = "Type", default)]
    pub kind: Option<String>,
    #[serde(rename = "ExecutedAt", default, deserialize_with = "deserialize_lenient")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl TransactionFields {
    pub fn into_transaction(self) -> Option<Transaction> {
        Some(Transaction {
            seller: text(self.seller)?,
            buyer: text(self.buyer)?,
            price: self.price.unwrap_or(0.0),
            kind: text(self.kind),
            executed_at: self.executed_at?,
        })
    }
}

/// One row of the relationships table, used for both reads and writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipFields {
    #[serde(rename = "Citizen1", default, skip_serializing_if = "Option::is_none")]
    pub citizen1: Option<String>,
    #[serde(rename = "Citizen2", default, skip_serializing_if = "Option::is_none")]
    pub citizen2: Option<String>,
    #[serde(rename = "StrengthScore", default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(rename = "TrustScore", default, skip_serializing_if = "Option::is_none")]
    pub trust: Option<f64>,
    #[serde(
        rename = "LastInteraction",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_interaction: Option<String>,
    #[serde(rename = "Notes", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl RelationshipFields {
    pub fn from_edge(edge: &RelationshipEdge) -> Self {
        Self {
            citizen1: Some(edge.key.first().to_string()),
            citizen2: Some(edge.key.second().to_string()),
            strength: Some(edge.strength),
            trust: Some(edge.trust),
            last_interaction: Some(
                edge.last_interaction
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            notes: Some(edge.tags.to_stored()),
        }
    }

    /// Rebuilds the edge stored under `key`.
    ///
    /// Missing scores read as the baselines. Stored rows may list the two
    /// citizens in either order; the key is canonical regardless.
    pub fn into_edge(self, key: PairKey) -> RelationshipEdge {
        let last_interaction = self
            .last_interaction
            .as_deref()
            .and_then(|raw| ties_events::parse_timestamp(raw).ok())
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let tags = self
            .notes
            .as_deref()
            .map(ProvenanceTags::from_stored)
            .unwrap_or_default();
        RelationshipEdge::new(
            key,
            self.strength.unwrap_or(STRENGTH_BASELINE),
            self.trust.unwrap_or(TRUST_BASELINE),
            last_interaction,
            tags,
        )
    }
}
