//! Signal Records
//!
//! Raw interaction records read from the signal sources. None of these are
//! persisted by the updater; they only feed one cycle of scoring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transaction kind for a wage paid by an employer.
pub const WAGE_PAYMENT: &str = "wage_payment";

fn pair_matches(x: &str, y: &str, a: &str, b: &str) -> bool {
    (x == a && y == b) || (x == b && y == a)
}

/// One upstream relevancy: why `target` matters to the citizen it was fetched for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevancyRecord {
    /// Raw target reference, see [`TargetRef::parse_list`]
    pub target: String,
    /// Magnitude, may be negative
    #[serde(default)]
    pub score: f64,
    /// Relevancy kind, e.g. `proximity` or `same_guild`
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

/// A parsed relevancy target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetRef {
    /// Literal citizen handle
    Handle(String),
    /// Foreign key into the citizen table that needs resolving
    Record(String),
}

impl TargetRef {
    /// Parses one reference.
    pub fn parse(raw: &str) -> Option<Self> {
        let item = raw.trim().trim_matches('"').trim();
        if item.is_empty() {
            None
        } else if is_record_id(item) {
            Some(TargetRef::Record(item.to_string()))
        } else {
            Some(TargetRef::Handle(item.to_string()))
        }
    }

    /// Parses a raw target field into individual references.
    ///
    /// The field may hold a single handle, a JSON array of references, or a
    /// comma separated list. A malformed JSON array falls back to comma
    /// splitting so that one bad element does not lose its siblings.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        if trimmed.starts_with('[') {
            if let Ok(items) = serde_json::from_str::<Vec<String>>(trimmed) {
                return items.iter().filter_map(|i| Self::parse(i)).collect();
            }
            let inner = trimmed.trim_start_matches('[').trim_end_matches(']');
            return inner.split(',').filter_map(Self::parse).collect();
        }

        trimmed.split(',').filter_map(Self::parse).collect()
    }
}

/// Record-store foreign keys look like `rec` followed by 14 alphanumerics.
fn is_record_id(s: &str) -> bool {
    s.len() == 17 && s.starts_with("rec") && s.chars().all(|c| c.is_ascii_alphanumeric())
}

/// A message between two citizens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub receiver: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        pair_matches(&self.sender, &self.receiver, a, b)
    }
}

/// A loan from one citizen to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub lender: String,
    pub borrower: String,
    #[serde(default)]
    pub principal: f64,
    #[serde(default)]
    pub active: bool,
}

impl Loan {
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        pair_matches(&self.lender, &self.borrower, a, b)
    }
}

/// A standing contract. Liveness is judged by end time alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub buyer: String,
    pub seller: String,
    #[serde(default)]
    pub price_per_unit: f64,
    #[serde(default)]
    pub quantity: f64,
    pub ends_at: DateTime<Utc>,
}

impl Contract {
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        pair_matches(&self.buyer, &self.seller, a, b)
    }

    pub fn value(&self) -> f64 {
        self.price_per_unit * self.quantity
    }
}

/// A completed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub seller: String,
    pub buyer: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub kind: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        pair_matches(&self.seller, &self.buyer, a, b)
    }

    /// Whether this is a positive wage paid by `employer` to `employee`.
    ///
    /// The employer is recorded as the buyer of the employee's labour.
    pub fn is_wage_from(&self, employer: &str, employee: &str) -> bool {
        self.kind.as_deref() == Some(WAGE_PAYMENT)
            && self.buyer == employer
            && self.seller == employee
            && self.price > 0.0
    }
}
