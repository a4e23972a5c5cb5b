//! World Records
//!
//! A complete, self-contained dump of every table the updater reads and
//! writes. Used for offline runs and as test data.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::citizen::{BusinessOccupancy, Citizen};
use crate::edge::RelationshipEdge;
use crate::signal::{Contract, Loan, Message, RelevancyRecord, Transaction};

/// A relevancy together with the citizen it was computed for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevancyEntry {
    /// Citizen the relevancy belongs to
    pub relevant_to: String,
    #[serde(flatten)]
    pub record: RelevancyRecord,
}

/// All records of one world instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldRecords {
    pub citizens: Vec<Citizen>,
    pub occupancies: Vec<BusinessOccupancy>,
    /// Handles of citizens that own or occupy a home
    pub home_holders: Vec<String>,
    pub relevancies: Vec<RelevancyEntry>,
    /// Foreign key -> citizen handle
    pub record_aliases: HashMap<String, String>,
    pub messages: Vec<Message>,
    pub loans: Vec<Loan>,
    pub contracts: Vec<Contract>,
    pub transactions: Vec<Transaction>,
    pub edges: Vec<RelationshipEdge>,
}

impl WorldRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a world from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serializes the world as pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
