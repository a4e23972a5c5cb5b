//! Signal Sources
//!
//! Typed queries against the upstream tables. Every query is independent:
//! a failure is reported as a [`FetchError`] and the caller substitutes an
//! empty result, so one broken table never aborts a cycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use ties_events::{BusinessOccupancy, Citizen, Contract, Loan, Message, RelevancyRecord, Transaction};

/// A signal query that did not produce a result.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed record: {0}")]
    Decode(String),
}

/// Read access to every upstream signal.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Full citizen directory.
    async fn citizens(&self) -> Result<Vec<Citizen>, FetchError>;

    /// Occupancy of every building, used once per batch to index employers.
    async fn business_occupancy(&self) -> Result<Vec<BusinessOccupancy>, FetchError>;

    /// Relevancies computed for `citizen` no older than `since`.
    async fn relevancies(
        &self,
        citizen: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RelevancyRecord>, FetchError>;

    /// Maps a foreign key to a citizen handle. `Ok(None)` when no such record.
    async fn resolve_record(&self, record_id: &str) -> Result<Option<String>, FetchError>;

    /// Handles `citizen` has messaged, traded, lent to or contracted with.
    async fn interaction_partners(
        &self,
        citizen: &str,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, FetchError>;

    /// Messages in either direction sent at or after `since`.
    async fn messages_between(
        &self,
        a: &str,
        b: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, FetchError>;

    /// Loans in either direction that are still active.
    async fn active_loans_between(&self, a: &str, b: &str) -> Result<Vec<Loan>, FetchError>;

    /// Contracts in either direction whose end time is after `now`.
    async fn contracts_between(
        &self,
        a: &str,
        b: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Contract>, FetchError>;

    /// Transactions in either direction executed at or after `since`.
    async fn transactions_between(
        &self,
        a: &str,
        b: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, FetchError>;

    /// Whether `citizen` owns or occupies a home.
    async fn owns_home(&self, citizen: &str) -> Result<bool, FetchError>;
}

/// Runs one query under the per-call timeout.
///
/// A timeout is reported as [`FetchError::Timeout`], the same as any other
/// failure.
pub async fn guarded<T, F>(timeout: Duration, query: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    match tokio::time::timeout(timeout, query).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    }
}

/// Runs one query under the timeout, logging and substituting an empty
/// result on failure.
pub async fn or_empty<T, F>(what: &str, subject: &str, timeout: Duration, query: F) -> T
where
    T: Default,
    F: Future<Output = Result<T, FetchError>>,
{
    match guarded(timeout, query).await {
        Ok(value) => value,
        Err(e) => {
            warn!(query = what, subject, error = %e, "Signal query failed, using empty result");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guarded_passes_through() {
        let result = guarded(Duration::from_secs(1), async { Ok::<_, FetchError>(3) }).await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_guarded_timeout_is_fetch_error() {
        let result: Result<u32, _> = guarded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;
        assert!(matches!(result, Err(FetchError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_or_empty_substitutes_default() {
        let messages: Vec<Message> = or_empty("messages", "alice", Duration::from_secs(1), async {
            Err(FetchError::Transport("connection reset".into()))
        })
        .await;
        assert!(messages.is_empty());
    }
}
