//! HTTP client for the hosted record API.
//!
//! Records live in named tables under one base. Lists are paged with an
//! opaque offset token; filters are formulas (see [`super::formula`]).

use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{ConfigError, RemoteConfig};
use crate::sources::FetchError;

/// Largest page the API hands out.
const PAGE_SIZE: usize = 100;

/// A failed call to the record API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

impl From<RemoteError> for FetchError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Timeout => FetchError::Transport("request timed out".into()),
            RemoteError::Transport(msg) => FetchError::Transport(msg),
            RemoteError::Status { status, body } => FetchError::Status { status, body },
            RemoteError::Decode(msg) => FetchError::Decode(msg),
        }
    }
}

/// One stored record.
#[derive(Debug, Clone, Deserialize)]
pub struct Record<F> {
    pub id: String,
    pub fields: F,
}

#[derive(Debug, Deserialize)]
struct Page<F> {
    records: Vec<Record<F>>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Serialize)]
struct FieldsBody<'a, F> {
    fields: &'a F,
}

/// Spaces requests at least `interval` apart across all callers.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn per_second(max_requests_per_second: f64) -> Self {
        let interval = if max_requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / max_requests_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Waits for the next free slot.
    pub async fn acquire(&self) {
        let mut next_slot = self.next_slot.lock().await;
        let now = Instant::now();
        let slot = match *next_slot {
            Some(at) if at > now => at,
            _ => now,
        };
        *next_slot = Some(slot + self.interval);
        drop(next_slot);

        if slot > now {
            tokio::time::sleep_until(slot).await;
        }
    }
}

/// Client bound to one base.
pub struct RecordClient {
    http: Client,
    base_url: String,
    limiter: RateLimiter,
}

impl RecordClient {
    /// Builds a client from the remote settings. Credentials must be present.
    pub fn new(config: &RemoteConfig) -> Result<Self, ConfigError> {
        let (api_key, base_id) = config.credentials()?;

        let mut headers = header::HeaderMap::new();
        let auth = header::HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ConfigError::Invalid("API key contains invalid characters".into()))?;
        headers.insert(header::AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("ties/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: format!("{}/{}", config.endpoint.trim_end_matches('/'), base_id),
            limiter: RateLimiter::per_second(config.max_requests_per_second),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    /// Lists every record matching `formula`, following pagination.
    ///
    /// `max_records` stops early once that many records were read.
    pub async fn list<F: DeserializeOwned>(
        &self,
        table: &str,
        formula: Option<&str>,
        max_records: Option<usize>,
    ) -> Result<Vec<Record<F>>, RemoteError> {
        let url = self.table_url(table);
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = vec![("pageSize", PAGE_SIZE.to_string())];
            if let Some(formula) = formula {
                query.push(("filterByFormula", formula.to_string()));
            }
            if let Some(max) = max_records {
                query.push(("maxRecords", max.to_string()));
            }
            if let Some(ref token) = offset {
                query.push(("offset", token.clone()));
            }

            self.limiter.acquire().await;
            let response = self.http.get(&url).query(&query).send().await?;
            let page: Page<F> = Self::decode(response).await?;

            records.extend(page.records);
            offset = page.offset;
            let full = max_records.is_some_and(|max| records.len() >= max);
            if offset.is_none() || full {
                break;
            }
        }

        debug!(table, count = records.len(), "Listed records");
        Ok(records)
    }

    /// Fetches one record by id; `Ok(None)` if it does not exist.
    pub async fn get<F: DeserializeOwned>(
        &self,
        table: &str,
        id: &str,
    ) -> Result<Option<Record<F>>, RemoteError> {
        self.limiter.acquire().await;
        let url = format!("{}/{}", self.table_url(table), id);
        let response = self.http.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::decode(response).await.map(Some)
    }

    /// Creates a record, returning its id.
    pub async fn create<F: Serialize>(&self, table: &str, fields: &F) -> Result<String, RemoteError> {
        self.limiter.acquire().await;
        let response = self
            .http
            .post(self.table_url(table))
            .json(&FieldsBody { fields })
            .send()
            .await?;
        let created: Record<serde_json::Value> = Self::decode(response).await?;
        Ok(created.id)
    }

    /// Overwrites the given fields of an existing record.
    pub async fn update<F: Serialize>(
        &self,
        table: &str,
        id: &str,
        fields: &F,
    ) -> Result<(), RemoteError> {
        self.limiter.acquire().await;
        let url = format!("{}/{}", self.table_url(table), id);
        let response = self
            .http
            .patch(&url)
            .json(&FieldsBody { fields })
            .send()
            .await?;
        let _: Record<serde_json::Value> = Self::decode(response).await?;
        Ok(())
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}
