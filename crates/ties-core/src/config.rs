//! Configuration loading for the updater.
//!
//! Tuning lives in a TOML file; every section and field falls back to its
//! default when absent. Credentials normally come from the CLI/environment
//! and are merged in by the binary.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default tuning file path
pub const DEFAULT_CONFIG_PATH: &str = "ties.toml";

/// Longest lookback or signal window accepted, one year
pub const MAX_WINDOW_HOURS: i64 = 24 * 365;

/// Complete updater configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TiesConfig {
    /// Batch orchestration settings
    #[serde(default)]
    pub batch: BatchConfig,
    /// Decay and scaling settings
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Per-channel trust weights
    #[serde(default)]
    pub trust: TrustWeights,
    /// Remote record store settings
    #[serde(default)]
    pub remote: RemoteConfig,
}

impl TiesConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parses configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the configuration as a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Rejects values that would break the score invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scoring;
        for (name, factor) in [("strength_decay", s.strength_decay), ("trust_decay", s.trust_decay)] {
            if !(0.0..=1.0).contains(&factor) {
                return Err(ConfigError::Invalid(format!(
                    "scoring.{} must be within [0, 1], got {}",
                    name, factor
                )));
            }
        }
        if !positive(s.scale_factor) {
            return Err(ConfigError::Invalid(format!(
                "scoring.scale_factor must be positive, got {}",
                s.scale_factor
            )));
        }

        let t = &self.trust;
        for (name, divisor) in [
            ("loan_divisor", t.loan_divisor),
            ("contract_divisor", t.contract_divisor),
            ("transaction_divisor", t.transaction_divisor),
        ] {
            if !positive(divisor) {
                return Err(ConfigError::Invalid(format!(
                    "trust.{} must be positive, got {}",
                    name, divisor
                )));
            }
        }

        for (name, hours) in [
            ("batch.lookback_hours", self.batch.lookback_hours),
            ("trust.fed_window_hours", t.fed_window_hours),
            ("trust.wage_window_hours", t.wage_window_hours),
        ] {
            if !(1..=MAX_WINDOW_HOURS).contains(&hours) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be within [1, {}], got {}",
                    name, MAX_WINDOW_HOURS, hours
                )));
            }
        }

        if self.batch.concurrency == 0 {
            return Err(ConfigError::Invalid("batch.concurrency must be at least 1".into()));
        }
        if !positive(self.remote.max_requests_per_second) {
            return Err(ConfigError::Invalid(format!(
                "remote.max_requests_per_second must be positive, got {}",
                self.remote.max_requests_per_second
            )));
        }
        Ok(())
    }
}

/// Finite and above zero; NaN fails.
fn positive(value: f64) -> bool {
    value > 0.0 && value.is_finite()
}

/// Batch orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// How far back signal queries look
    pub lookback_hours: i64,
    /// Citizens processed concurrently
    pub concurrency: usize,
    /// Timeout for a single signal or store call
    pub call_timeout_secs: u64,
    /// Handle of the citizen standing for the public authority
    pub public_authority: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            concurrency: 4,
            call_timeout_secs: 30,
            public_authority: "ConsiglioDeiDieci".to_string(),
        }
    }
}

impl BatchConfig {
    pub fn lookback(&self) -> Duration {
        Duration::hours(self.lookback_hours)
    }

    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.call_timeout_secs)
    }
}

/// Decay and scaling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Fraction of StrengthScore kept each cycle before new signal
    pub strength_decay: f64,
    /// Fraction of TrustScore's distance from neutral kept each cycle
    pub trust_decay: f64,
    /// Compression factor applied to raw deltas
    pub scale_factor: f64,
    /// Multiplier applied to raw deltas before scaling
    pub raw_multiplier: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            strength_decay: 0.75,
            trust_decay: 0.75,
            scale_factor: 0.1,
            raw_multiplier: 1.0,
        }
    }
}

/// Weights for the seven trust channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustWeights {
    /// Per message, either direction
    pub message_weight: f64,
    /// Active loan principal is divided by this
    pub loan_divisor: f64,
    /// Live contract value is divided by this
    pub contract_divisor: f64,
    /// Transaction price is divided by this
    pub transaction_divisor: f64,
    pub employee_fed: f64,
    pub employee_hungry: f64,
    pub employee_housed: f64,
    pub employee_homeless: f64,
    pub employee_paid: f64,
    pub employee_unpaid: f64,
    pub welfare_hungry: f64,
    pub welfare_homeless: f64,
    /// Applied instead of (not on top of) the two above
    pub welfare_hungry_and_homeless: f64,
    pub guild: f64,
    /// A citizen fed within this many hours is not hungry
    pub fed_window_hours: i64,
    /// Wages must have been paid within this many hours
    pub wage_window_hours: i64,
}

impl Default for TrustWeights {
    fn default() -> Self {
        Self {
            message_weight: 1.0,
            loan_divisor: 1000.0,
            contract_divisor: 100.0,
            transaction_divisor: 100.0,
            employee_fed: 2.0,
            employee_hungry: -15.0,
            employee_housed: 3.0,
            employee_homeless: -20.0,
            employee_paid: 5.0,
            employee_unpaid: -10.0,
            welfare_hungry: -10.0,
            welfare_homeless: -10.0,
            welfare_hungry_and_homeless: -15.0,
            guild: 1.0,
            fed_window_hours: 24,
            wage_window_hours: 24,
        }
    }
}

impl TrustWeights {
    pub fn fed_window(&self) -> Duration {
        Duration::hours(self.fed_window_hours)
    }

    pub fn wage_window(&self) -> Duration {
        Duration::hours(self.wage_window_hours)
    }
}

/// Remote record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// REST endpoint root
    pub endpoint: String,
    /// Base (database) id
    pub base_id: Option<String>,
    /// API key; prefer the environment over the file
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Request rate cap across the whole batch
    pub max_requests_per_second: f64,
    /// Timeout for one HTTP request
    pub request_timeout_secs: u64,
    pub tables: TableNames,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.airtable.com/v0".to_string(),
            base_id: None,
            api_key: None,
            max_requests_per_second: 5.0,
            request_timeout_secs: 30,
            tables: TableNames::default(),
        }
    }
}

impl RemoteConfig {
    /// Returns `(api_key, base_id)` or the first missing credential.
    pub fn credentials(&self) -> Result<(&str, &str), ConfigError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingCredential("TIES_API_KEY"))?;
        let base_id = self
            .base_id
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .ok_or(ConfigError::MissingCredential("TIES_BASE_ID"))?;
        Ok((api_key, base_id))
    }
}

/// Table names in the remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub citizens: String,
    pub buildings: String,
    pub relevancies: String,
    pub messages: String,
    pub loans: String,
    pub contracts: String,
    pub transactions: String,
    pub relationships: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            citizens: "CITIZENS".to_string(),
            buildings: "BUILDINGS".to_string(),
            relevancies: "RELEVANCIES".to_string(),
            messages: "MESSAGES".to_string(),
            loans: "LOANS".to_string(),
            contracts: "CONTRACTS".to_string(),
            transactions: "TRANSACTIONS".to_string(),
            relationships: "RELATIONSHIPS".to_string(),
        }
    }
}

/// Errors that can occur during configuration loading.
///
/// All of these are fatal: the batch does not start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("missing required credential {0}")]
    MissingCredential(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Generates a default configuration file content.
pub fn default_config_toml() -> String {
    r#"# Relationship updater configuration

[batch]
lookback_hours = 24
concurrency = 4
call_timeout_secs = 30
public_authority = "ConsiglioDeiDieci"

[scoring]
strength_decay = 0.75
trust_decay = 0.75
scale_factor = 0.1
raw_multiplier = 1.0

[trust]
message_weight = 1.0
loan_divisor = 1000.0
contract_divisor = 100.0
transaction_divisor = 100.0
employee_fed = 2.0
employee_hungry = -15.0
employee_housed = 3.0
employee_homeless = -20.0
employee_paid = 5.0
employee_unpaid = -10.0
welfare_hungry = -10.0
welfare_homeless = -10.0
welfare_hungry_and_homeless = -15.0
guild = 1.0
fed_window_hours = 24
wage_window_hours = 24

[remote]
endpoint = "https://api.airtable.com/v0"
max_requests_per_second = 5.0
request_timeout_secs = 30
"#
    .to_string()
}
