//! In-memory world
//!
//! Serves every signal query and stores edges from a [`WorldRecords`] dump.
//! Backs offline runs (`--fixture`) and the test suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use ties_events::{
    BusinessOccupancy, Citizen, Contract, Loan, Message, PairKey, RelationshipEdge,
    RelevancyRecord, Transaction, WorldRecords,
};

use crate::sources::{FetchError, SignalSource};
use crate::store::{EdgeStore, PersistenceError};

/// Errors loading a world file.
#[derive(Debug, thiserror::Error)]
pub enum WorldFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A world held entirely in memory.
#[derive(Debug)]
pub struct MemoryWorld {
    records: WorldRecords,
    edges: RwLock<BTreeMap<PairKey, RelationshipEdge>>,
    writes: AtomicU64,
}

impl MemoryWorld {
    pub fn new(mut records: WorldRecords) -> Self {
        let edges = std::mem::take(&mut records.edges)
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect();
        Self {
            records,
            edges: RwLock::new(edges),
            writes: AtomicU64::new(0),
        }
    }

    /// Loads a world from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, WorldFileError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::new(WorldRecords::from_json(&content)?))
    }

    /// Current edges, in key order.
    pub async fn edges(&self) -> Vec<RelationshipEdge> {
        self.edges.read().await.values().cloned().collect()
    }

    pub async fn edge(&self, a: &str, b: &str) -> Option<RelationshipEdge> {
        let key = PairKey::new(a, b)?;
        self.edges.read().await.get(&key).cloned()
    }

    /// Number of successful `upsert` calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Dumps the world, edges included, back to records.
    pub async fn to_records(&self) -> WorldRecords {
        let mut records = self.records.clone();
        records.edges = self.edges().await;
        records
    }
}

#[async_trait]
impl SignalSource for MemoryWorld {
    async fn citizens(&self) -> Result<Vec<Citizen>, FetchError> {
        Ok(self.records.citizens.clone())
    }

    async fn business_occupancy(&self) -> Result<Vec<BusinessOccupancy>, FetchError> {
        Ok(self.records.occupancies.clone())
    }

    async fn relevancies(
        &self,
        citizen: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RelevancyRecord>, FetchError> {
        Ok(self
            .records
            .relevancies
            .iter()
            .filter(|r| r.relevant_to == citizen && r.record.created_at >= since)
            .map(|r| r.record.clone())
            .collect())
    }

    async fn resolve_record(&self, record_id: &str) -> Result<Option<String>, FetchError> {
        Ok(self.records.record_aliases.get(record_id).cloned())
    }

    async fn interaction_partners(
        &self,
        citizen: &str,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, FetchError> {
        let r = &self.records;
        let mut partners = BTreeSet::new();

        for m in r.messages.iter().filter(|m| m.created_at >= since) {
            if m.sender == citizen {
                partners.insert(m.receiver.clone());
            } else if m.receiver == citizen {
                partners.insert(m.sender.clone());
            }
        }
        for l in r.loans.iter().filter(|l| l.active) {
            if l.lender == citizen {
                partners.insert(l.borrower.clone());
            } else if l.borrower == citizen {
                partners.insert(l.lender.clone());
            }
        }
        for c in r.contracts.iter().filter(|c| c.ends_at > now) {
            if c.buyer == citizen {
                partners.insert(c.seller.clone());
            } else if c.seller == citizen {
                partners.insert(c.buyer.clone());
            }
        }
        for t in r.transactions.iter().filter(|t| t.executed_at >= since) {
            if t.buyer == citizen {
                partners.insert(t.seller.clone());
            } else if t.seller == citizen {
                partners.insert(t.buyer.clone());
            }
        }

        partners.remove(citizen);
        Ok(partners.into_iter().collect())
    }

    async fn messages_between(
        &self,
        a: &str,
        b: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, FetchError> {
        Ok(self
            .records
            .messages
            .iter()
            .filter(|m| m.is_between(a, b) && m.created_at >= since)
            .cloned()
            .collect())
    }

    async fn active_loans_between(&self, a: &str, b: &str) -> Result<Vec<Loan>, FetchError> {
        Ok(self
            .records
            .loans
            .iter()
            .filter(|l| l.active && l.is_between(a, b))
            .cloned()
            .collect())
    }

    async fn contracts_between(
        &self,
        a: &str,
        b: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Contract>, FetchError> {
        Ok(self
            .records
            .contracts
            .iter()
            .filter(|c| c.is_between(a, b) && c.ends_at > now)
            .cloned()
            .collect())
    }

    async fn transactions_between(
        &self,
        a: &str,
        b: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, FetchError> {
        Ok(self
            .records
            .transactions
            .iter()
            .filter(|t| t.is_between(a, b) && t.executed_at >= since)
            .cloned()
            .collect())
    }

    async fn owns_home(&self, citizen: &str) -> Result<bool, FetchError> {
        Ok(self.records.home_holders.iter().any(|h| h == citizen))
    }
}

#[async_trait]
impl EdgeStore for MemoryWorld {
    async fn get(&self, key: &PairKey) -> Result<Option<RelationshipEdge>, PersistenceError> {
        Ok(self.edges.read().await.get(key).cloned())
    }

    async fn upsert(&self, edge: &RelationshipEdge) -> Result<(), PersistenceError> {
        self.edges
            .write()
            .await
            .insert(edge.key.clone(), edge.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
