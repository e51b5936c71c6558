use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Infrastructure errors of the store layer. Expected business outcomes
/// never appear here; they are result enums in the owning crates.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A transaction kept colliding with concurrent writers until the
    /// retry budget ran out. Retryable by the caller's outer layer.
    #[error("transaction conflict persisted after {attempts} attempts")]
    ConflictExhausted { attempts: u32 },
    /// `update`/`increment` addressed a document that does not exist.
    #[error("document {path} does not exist")]
    MissingDocument { path: String },
    /// `increment` addressed a field that is not an integer.
    #[error("field {field} of {path} is not an integer")]
    NotAnInteger { path: String, field: String },
    #[error("document {path} failed to (de)serialize: {source}")]
    Serialization {
        path: String,
        source: serde_json::Error,
    },
}

/// Retry budget for optimistic-transaction conflicts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(640),
        }
    }
}

/// Operations available to a transaction body.
///
/// Reads are recorded in the attempt's read-set and validated at commit;
/// writes are buffered and applied atomically. A body observes its own
/// buffered writes (read-your-writes) so it stays a pure function of the
/// documents it read plus what it wrote.
pub trait TransactionOps {
    /// Read a raw document, recording it in the read-set.
    fn get_value(&mut self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Buffer a full-document write.
    fn set_value(&mut self, path: &str, value: Value);

    /// Buffer a partial merge of top-level fields into an existing document.
    fn update(&mut self, path: &str, fields: Map<String, Value>);

    /// Buffer an integer field increment. Absent fields start at zero.
    fn increment(&mut self, path: &str, field: &str, delta: i64);

    /// The attempt's candidate commit timestamp. Strictly monotonic across
    /// attempts: a retried body sees a fresh, later value.
    fn server_timestamp(&self) -> DateTime<Utc>;

    /// Typed read.
    fn get<T: DeserializeOwned>(&mut self, path: &str) -> Result<Option<T>, StoreError> {
        match self.get_value(path)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StoreError::Serialization {
                    path: path.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Typed full-document write.
    fn set<T: Serialize>(&mut self, path: &str, doc: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(doc).map_err(|source| StoreError::Serialization {
            path: path.to_string(),
            source,
        })?;
        self.set_value(path, value);
        Ok(())
    }
}

/// A transactional document store.
///
/// Implementations provide optimistic transactions: the body runs against
/// a consistent read-set, commit validates that no read document changed,
/// and the runner retries conflicted attempts from scratch. Body errors
/// abort immediately and are never retried.
pub trait DocumentStore: Clone + Send + Sync + 'static {
    /// Transaction handle passed to bodies.
    type Txn: TransactionOps;

    /// Run `body` as one atomic transaction, retrying commit conflicts up
    /// to the configured budget. Exhaustion surfaces as
    /// [`StoreError::ConflictExhausted`] through the body's error type.
    fn run_transaction<T, E, F>(&self, body: F) -> impl Future<Output = Result<T, E>> + Send
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnMut(&mut Self::Txn) -> Result<T, E> + Send;

    /// A fresh, strictly monotonic server timestamp.
    fn server_timestamp(&self) -> DateTime<Utc>;

    /// Read every document of a top-level collection, outside any
    /// transaction. Maintenance scans only; never invariant-bearing.
    fn list<T>(&self, collection: &str) -> impl Future<Output = Result<Vec<T>, StoreError>> + Send
    where
        T: DeserializeOwned + Send;
}
