//! Citizen Types
//!
//! Directory entries and the business-occupancy facts employment is derived from.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Building category whose occupant works for its operator.
pub const BUSINESS_CATEGORY: &str = "business";

/// A citizen as listed in the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citizen {
    /// Unique handle
    pub handle: String,
    /// Current wealth, zero when unknown
    #[serde(default)]
    pub wealth: f64,
    /// Last time this citizen ate
    #[serde(default)]
    pub last_fed: Option<DateTime<Utc>>,
    /// Guild membership, if any
    #[serde(default)]
    pub guild_id: Option<String>,
}

impl Citizen {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            wealth: 0.0,
            last_fed: None,
            guild_id: None,
        }
    }

    pub fn with_last_fed(mut self, at: DateTime<Utc>) -> Self {
        self.last_fed = Some(at);
        self
    }

    pub fn with_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.guild_id = Some(guild_id.into());
        self
    }

    pub fn with_wealth(mut self, wealth: f64) -> Self {
        self.wealth = wealth;
        self
    }

    /// Whether the citizen has eaten within `window` of `now`.
    ///
    /// A missing meal record counts as hungry.
    pub fn is_fed(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.last_fed.is_some_and(|at| now - at <= window)
    }

    /// Guild id with blank values treated as no guild.
    pub fn guild(&self) -> Option<&str> {
        self.guild_id
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
    }
}

/// Occupancy of a building, as reported by the structure registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessOccupancy {
    /// Citizen working in (or living in) the building
    #[serde(default)]
    pub occupant: Option<String>,
    /// Citizen running the building
    #[serde(default)]
    pub operator: Option<String>,
    /// Building category
    #[serde(default)]
    pub category: Option<String>,
}

impl BusinessOccupancy {
    pub fn business(occupant: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            occupant: Some(occupant.into()),
            operator: Some(operator.into()),
            category: Some(BUSINESS_CATEGORY.to_string()),
        }
    }

    /// Returns `(employee, employer)` if this occupancy is an employment link.
    pub fn employment(&self) -> Option<(&str, &str)> {
        let category = self.category.as_deref()?;
        if !category.eq_ignore_ascii_case(BUSINESS_CATEGORY) {
            return None;
        }
        let employee = self.occupant.as_deref().filter(|h| !h.is_empty())?;
        let employer = self.operator.as_deref().filter(|h| !h.is_empty())?;
        (employee != employer).then_some((employee, employer))
    }
}
