//! Signal queries and edge persistence over the record API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use tracing::debug;

use ties_events::{
    BusinessOccupancy, Citizen, Contract, Loan, Message, PairKey, RelationshipEdge,
    RelevancyRecord, Transaction, BUSINESS_CATEGORY,
};

use super::client::{Record, RecordClient, RemoteError};
use super::formula;
use super::records::{
    BuildingFields, CitizenFields, ContractFields, LoanFields, MessageFields, RelationshipFields,
    RelevancyFields, TransactionFields, HOME_CATEGORY, LOAN_ACTIVE,
};
use crate::config::{ConfigError, RemoteConfig, TableNames};
use crate::sources::{FetchError, SignalSource};
use crate::store::{EdgeStore, PersistenceError};

/// The hosted world: every signal table plus the relationships table.
pub struct RemoteStore {
    client: RecordClient,
    tables: TableNames,
    /// Relationship row per pair; `None` once a lookup found no row
    edge_rows: DashMap<PairKey, Option<String>>,
}

impl RemoteStore {
    pub fn new(config: &RemoteConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: RecordClient::new(config)?,
            tables: config.tables.clone(),
            edge_rows: DashMap::new(),
        })
    }

    async fn list<F: DeserializeOwned>(
        &self,
        table: &str,
        formula: Option<String>,
    ) -> Result<Vec<F>, FetchError> {
        let records: Vec<Record<F>> = self.client.list(table, formula.as_deref(), None).await?;
        Ok(records.into_iter().map(|r| r.fields).collect())
    }

    async fn find_edge(
        &self,
        key: &PairKey,
    ) -> Result<Option<Record<RelationshipFields>>, RemoteError> {
        let filter = formula::between("Citizen1", "Citizen2", key.first(), key.second());
        let mut rows = self
            .client
            .list(&self.tables.relationships, Some(&filter), Some(1))
            .await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    /// Row id for `key`, looking it up if this run has not seen the pair.
    async fn edge_row(&self, key: &PairKey) -> Result<Option<String>, RemoteError> {
        if let Some(known) = self.edge_rows.get(key) {
            return Ok(known.clone());
        }
        let id = self.find_edge(key).await?.map(|row| row.id);
        self.edge_rows.insert(key.clone(), id.clone());
        Ok(id)
    }
}

#[async_trait]
impl SignalSource for RemoteStore {
    async fn citizens(&self) -> Result<Vec<Citizen>, FetchError> {
        let rows: Vec<CitizenFields> = self.list(&self.tables.citizens, None).await?;
        Ok(rows.into_iter().filter_map(CitizenFields::into_citizen).collect())
    }

    async fn business_occupancy(&self) -> Result<Vec<BusinessOccupancy>, FetchError> {
        let filter = formula::eq("Category", BUSINESS_CATEGORY);
        let rows: Vec<BuildingFields> = self.list(&self.tables.buildings, Some(filter)).await?;
        Ok(rows.into_iter().map(BuildingFields::into_occupancy).collect())
    }

    async fn relevancies(
        &self,
        citizen: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RelevancyRecord>, FetchError> {
        let filter = formula::and([
            formula::eq("RelevantToCitizen", citizen),
            formula::at_or_after("CreatedAt", since),
        ]);
        let rows: Vec<RelevancyFields> = self.list(&self.tables.relevancies, Some(filter)).await?;
        Ok(rows.into_iter().filter_map(RelevancyFields::into_record).collect())
    }

    async fn resolve_record(&self, record_id: &str) -> Result<Option<String>, FetchError> {
        let row: Option<Record<CitizenFields>> =
            self.client.get(&self.tables.citizens, record_id).await?;
        Ok(row.and_then(|r| r.fields.into_citizen()).map(|c| c.handle))
    }

    async fn interaction_partners(
        &self,
        citizen: &str,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, FetchError> {
        let mut partners = BTreeSet::new();
        let mut add = |x: String, y: String| {
            if x == citizen {
                partners.insert(y);
            } else if y == citizen {
                partners.insert(x);
            }
        };

        let messages: Vec<MessageFields> = self
            .list(
                &self.tables.messages,
                Some(formula::and([
                    formula::either("Sender", "Receiver", citizen),
                    formula::at_or_after("CreatedAt", since),
                ])),
            )
            .await?;
        for m in messages.into_iter().filter_map(MessageFields::into_message) {
            add(m.sender, m.receiver);
        }

        let loans: Vec<LoanFields> = self
            .list(
                &self.tables.loans,
                Some(formula::and([
                    formula::either("Lender", "Borrower", citizen),
                    formula::eq("Status", LOAN_ACTIVE),
                ])),
            )
            .await?;
        for l in loans.into_iter().filter_map(LoanFields::into_loan) {
            add(l.lender, l.borrower);
        }

        let contracts: Vec<ContractFields> = self
            .list(
                &self.tables.contracts,
                Some(formula::and([
                    formula::either("Buyer", "Seller", citizen),
                    formula::after("EndAt", now),
                ])),
            )
            .await?;
        for c in contracts.into_iter().filter_map(ContractFields::into_contract) {
            add(c.buyer, c.seller);
        }

        let transactions: Vec<TransactionFields> = self
            .list(
                &self.tables.transactions,
                Some(formula::and([
                    formula::either("Seller", "Buyer", citizen),
                    formula::at_or_after("ExecutedAt", since),
                ])),
            )
            .await?;
        for t in transactions
            .into_iter()
            .filter_map(TransactionFields::into_transaction)
        {
            add(t.seller, t.buyer);
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
        let filter = formula::and([
            formula::between("Sender", "Receiver", a, b),
            formula::at_or_after("CreatedAt", since),
        ]);
        let rows: Vec<MessageFields> = self.list(&self.tables.messages, Some(filter)).await?;
        Ok(rows.into_iter().filter_map(MessageFields::into_message).collect())
    }

    async fn active_loans_between(&self, a: &str, b: &str) -> Result<Vec<Loan>, FetchError> {
        let filter = formula::and([
            formula::between("Lender", "Borrower", a, b),
            formula::eq("Status", LOAN_ACTIVE),
        ]);
        let rows: Vec<LoanFields> = self.list(&self.tables.loans, Some(filter)).await?;
        Ok(rows.into_iter().filter_map(LoanFields::into_loan).collect())
    }

    async fn contracts_between(
        &self,
        a: &str,
        b: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Contract>, FetchError> {
        let filter = formula::and([
            formula::between("Buyer", "Seller", a, b),
            formula::after("EndAt", now),
        ]);
        let rows: Vec<ContractFields> = self.list(&self.tables.contracts, Some(filter)).await?;
        Ok(rows.into_iter().filter_map(ContractFields::into_contract).collect())
    }

    async fn transactions_between(
        &self,
        a: &str,
        b: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, FetchError> {
        let filter = formula::and([
            formula::between("Seller", "Buyer", a, b),
            formula::at_or_after("ExecutedAt", since),
        ]);
        let rows: Vec<TransactionFields> =
            self.list(&self.tables.transactions, Some(filter)).await?;
        Ok(rows
            .into_iter()
            .filter_map(TransactionFields::into_transaction)
            .collect())
    }

    async fn owns_home(&self, citizen: &str) -> Result<bool, FetchError> {
        let filter = formula::and([
            formula::eq("Category", HOME_CATEGORY),
            formula::either("Occupant", "Owner", citizen),
        ]);
        let rows: Vec<Record<BuildingFields>> = self
            .client
            .list(&self.tables.buildings, Some(&filter), Some(1))
            .await?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl EdgeStore for RemoteStore {
    async fn get(&self, key: &PairKey) -> Result<Option<RelationshipEdge>, PersistenceError> {
        let row = self
            .find_edge(key)
            .await
            .map_err(|e| PersistenceError::Read {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        self.edge_rows
            .insert(key.clone(), row.as_ref().map(|r| r.id.clone()));
        Ok(row.map(|r| r.fields.into_edge(key.clone())))
    }

    async fn upsert(&self, edge: &RelationshipEdge) -> Result<(), PersistenceError> {
        let write_err = |e: RemoteError| PersistenceError::Write {
            key: edge.key.clone(),
            reason: e.to_string(),
        };
        let fields = RelationshipFields::from_edge(edge);
        let table = &self.tables.relationships;

        match self.edge_row(&edge.key).await.map_err(write_err)? {
            Some(id) => {
                self.client
                    .update(table, &id, &fields)
                    .await
                    .map_err(write_err)?;
                debug!(pair = %edge.key, row = %id, "Updated relationship row");
            }
            None => {
                let id = self.client.create(table, &fields).await.map_err(write_err)?;
                debug!(pair = %edge.key, row = %id, "Created relationship row");
                self.edge_rows.insert(edge.key.clone(), Some(id));
            }
        }
        Ok(())
    }
}
