//! Relationship Edges
//!
//! One persisted edge per unordered pair of citizens, stored under a
//! canonical key so that (a, b) and (b, a) always land on the same record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Lowest value either score may take.
pub const SCORE_MIN: f64 = 0.0;
/// Highest value either score may take.
pub const SCORE_MAX: f64 = 100.0;
/// StrengthScore of a pair with no history.
pub const STRENGTH_BASELINE: f64 = 0.0;
/// TrustScore of a pair with no history (neutral).
pub const TRUST_BASELINE: f64 = 50.0;

/// Canonical key for an unordered pair: lexicographically smaller handle first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    first: String,
    second: String,
}

impl PairKey {
    /// Builds the key for `{a, b}` in either order. Self pairs have no key.
    pub fn new(a: &str, b: &str) -> Option<Self> {
        match a.cmp(b) {
            std::cmp::Ordering::Less => Some(Self {
                first: a.to_string(),
                second: b.to_string(),
            }),
            std::cmp::Ordering::Greater => Some(Self {
                first: b.to_string(),
                second: a.to_string(),
            }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn first(&self) -> &str {
        &self.first
    }

    pub fn second(&self) -> &str {
        &self.second
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.first, self.second)
    }
}

/// Stored form of the provenance tags.
#[derive(Serialize, Deserialize)]
struct TagDocument {
    version: u32,
    tags: Vec<String>,
}

const TAG_DOCUMENT_VERSION: u32 = 1;
const LEGACY_PREFIX: &str = "Sources:";

/// Accumulated set of signal kinds that have contributed to an edge.
///
/// Always sorted and de-duplicated. The set only grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvenanceTags(BTreeSet<String>);

impl ProvenanceTags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        let tag = tag.trim();
        if !tag.is_empty() {
            self.0.insert(tag.to_string());
        }
    }

    pub fn extend<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            self.insert(tag);
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Serializes to the versioned stored form.
    pub fn to_stored(&self) -> String {
        let doc = TagDocument {
            version: TAG_DOCUMENT_VERSION,
            tags: self.0.iter().cloned().collect(),
        };
        // A struct of a u32 and strings always serializes.
        serde_json::to_string(&doc).unwrap_or_default()
    }

    /// Parses a stored notes field.
    ///
    /// Understands the versioned document and the legacy `Sources: a, b`
    /// free text. Anything else yields an empty set.
    pub fn from_stored(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::new();
        }

        if trimmed.starts_with('{') {
            return match serde_json::from_str::<TagDocument>(trimmed) {
                Ok(doc) if doc.version == TAG_DOCUMENT_VERSION => {
                    let mut tags = Self::new();
                    tags.extend(doc.tags);
                    tags
                }
                _ => Self::new(),
            };
        }

        Self::from_legacy(trimmed)
    }

    /// One-time migration of legacy free-text notes.
    fn from_legacy(text: &str) -> Self {
        let mut tags = Self::new();
        let Some(line) = text
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with(LEGACY_PREFIX))
        else {
            return tags;
        };

        let list = line[LEGACY_PREFIX.len()..].trim().trim_end_matches('.');
        for tag in list.split(',') {
            let tag = tag.trim();
            if tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                tags.insert(tag);
            }
        }
        tags
    }
}

impl<S: Into<String>> FromIterator<S> for ProvenanceTags {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut tags = Self::new();
        tags.extend(iter);
        tags
    }
}

/// The persisted scoring record for an unordered pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub key: PairKey,
    /// Affinity / familiarity, baseline 0
    pub strength: f64,
    /// Trust, baseline 50
    pub trust: f64,
    pub last_interaction: DateTime<Utc>,
    #[serde(default)]
    pub tags: ProvenanceTags,
}

impl RelationshipEdge {
    /// Builds an edge with both scores clamped into range.
    pub fn new(
        key: PairKey,
        strength: f64,
        trust: f64,
        last_interaction: DateTime<Utc>,
        tags: ProvenanceTags,
    ) -> Self {
        Self {
            key,
            strength: clamp_score(strength),
            trust: clamp_score(trust),
            last_interaction,
            tags,
        }
    }
}

/// Clamps a score into `[SCORE_MIN, SCORE_MAX]`; NaN maps to the minimum.
pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        SCORE_MIN
    } else {
        value.clamp(SCORE_MIN, SCORE_MAX)
    }
}
