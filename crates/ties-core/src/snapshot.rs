//! Batch Snapshot
//!
//! Immutable view of the citizen directory, employment links and guild
//! rosters, built once per batch and shared by reference with every worker.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration as StdDuration;
use tracing::info;

use ties_events::{BusinessOccupancy, Citizen};

use crate::sources::{or_empty, SignalSource};

/// Per-batch directory and employer index.
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    /// Cycle time every window is measured from
    pub now: DateTime<Utc>,
    /// Start of the lookback window
    pub since: DateTime<Utc>,
    /// Handle standing for the public authority
    pub public_authority: String,
    citizens: BTreeMap<String, Citizen>,
    /// employee -> employers
    employers: BTreeMap<String, BTreeSet<String>>,
    /// employer -> employees
    employees: BTreeMap<String, BTreeSet<String>>,
    /// guild -> members, public authority excluded
    guilds: BTreeMap<String, BTreeSet<String>>,
}

impl BatchSnapshot {
    /// Builds a snapshot from already fetched records.
    pub fn from_records(
        now: DateTime<Utc>,
        lookback: Duration,
        public_authority: impl Into<String>,
        citizens: Vec<Citizen>,
        occupancy: &[BusinessOccupancy],
    ) -> Self {
        let citizens: BTreeMap<String, Citizen> = citizens
            .into_iter()
            .filter(|c| !c.handle.trim().is_empty())
            .map(|c| (c.handle.clone(), c))
            .collect();

        let mut employers: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut employees: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (employee, employer) in occupancy.iter().filter_map(BusinessOccupancy::employment) {
            employers
                .entry(employee.to_string())
                .or_default()
                .insert(employer.to_string());
            employees
                .entry(employer.to_string())
                .or_default()
                .insert(employee.to_string());
        }

        let public_authority = public_authority.into();
        let mut guilds: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for citizen in citizens.values().filter(|c| c.handle != public_authority) {
            if let Some(guild) = citizen.guild() {
                guilds
                    .entry(guild.to_string())
                    .or_default()
                    .insert(citizen.handle.clone());
            }
        }

        Self {
            now,
            since: now - lookback,
            public_authority,
            citizens,
            employers,
            employees,
            guilds,
        }
    }

    /// Fetches the directory and builds the employer index in one pass.
    ///
    /// Either query failing leaves that part empty; the batch still runs.
    pub async fn load(
        source: &dyn SignalSource,
        now: DateTime<Utc>,
        lookback: Duration,
        public_authority: &str,
        timeout: StdDuration,
    ) -> Self {
        let citizens = or_empty("citizens", "*", timeout, source.citizens()).await;
        let occupancy =
            or_empty("business_occupancy", "*", timeout, source.business_occupancy()).await;

        let snapshot = Self::from_records(now, lookback, public_authority, citizens, &occupancy);
        info!(
            citizens = snapshot.citizens.len(),
            employed = snapshot.employers.len(),
            guilds = snapshot.guilds.len(),
            "Built batch snapshot"
        );
        snapshot
    }

    pub fn citizen(&self, handle: &str) -> Option<&Citizen> {
        self.citizens.get(handle)
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.citizens.contains_key(handle)
    }

    /// All handles in sorted order.
    pub fn handles(&self) -> impl Iterator<Item = &str> {
        self.citizens.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.citizens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.citizens.is_empty()
    }

    pub fn is_employed_by(&self, employee: &str, employer: &str) -> bool {
        self.employers
            .get(employee)
            .is_some_and(|set| set.contains(employer))
    }

    pub fn employers_of(&self, employee: &str) -> impl Iterator<Item = &str> {
        self.employers
            .get(employee)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    pub fn employees_of(&self, employer: &str) -> impl Iterator<Item = &str> {
        self.employees
            .get(employer)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Other members of `handle`'s guild.
    pub fn guild_members_of<'a>(&'a self, handle: &'a str) -> impl Iterator<Item = &'a str> {
        self.citizens
            .get(handle)
            .and_then(Citizen::guild)
            .and_then(|guild| self.guilds.get(guild))
            .into_iter()
            .flatten()
            .map(String::as_str)
            .filter(move |member| *member != handle)
    }

    pub fn is_public_authority(&self, handle: &str) -> bool {
        !self.public_authority.is_empty() && handle == self.public_authority
    }
}
