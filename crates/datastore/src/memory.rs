use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::traits::{DocumentStore, RetryConfig, StoreError, TransactionOps};

#[derive(Clone)]
struct VersionedDoc {
    version: u64,
    data: Value,
}

struct Inner {
    docs: Mutex<HashMap<String, VersionedDoc>>,
    // Last issued server timestamp; issuing is monotonic even when the
    // wall clock stalls within a microsecond.
    clock: Mutex<DateTime<Utc>>,
}

/// In-process document store with optimistic transactions.
///
/// Every document carries a version. A transaction records the version of
/// each document it reads; commit validates the whole read-set under one
/// lock and applies the buffered writes atomically. Concurrent writers to
/// a shared document serialize through conflict-retry.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
    retry: RetryConfig,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("doc_count", &self.inner.docs.lock().unwrap().len())
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_retry(RetryConfig::default())
    }

    pub fn with_retry(retry: RetryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                docs: Mutex::new(HashMap::new()),
                clock: Mutex::new(DateTime::<Utc>::MIN_UTC),
            }),
            retry,
        }
    }

    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self.inner.clock.lock().unwrap();
        let now = Utc::now();
        let next = if now > *last {
            now
        } else {
            *last + TimeDelta::microseconds(1)
        };
        *last = next;
        next
    }

    /// Single-document read outside any transaction.
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StoreError> {
        let docs = self.inner.docs.lock().unwrap();
        match docs.get(path) {
            Some(doc) => serde_json::from_value(doc.data.clone()).map(Some).map_err(
                |source| StoreError::Serialization {
                    path: path.to_string(),
                    source,
                },
            ),
            None => Ok(None),
        }
    }

    /// Single-document write outside any transaction. Bumps the version,
    /// so it conflicts in-flight transactions that read the document.
    pub fn set<T: Serialize>(&self, path: &str, doc: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(doc).map_err(|source| StoreError::Serialization {
            path: path.to_string(),
            source,
        })?;
        let mut docs = self.inner.docs.lock().unwrap();
        let version = docs.get(path).map(|d| d.version).unwrap_or(0);
        docs.insert(
            path.to_string(),
            VersionedDoc {
                version: version + 1,
                data: value,
            },
        );
        Ok(())
    }

    /// Single-document partial merge outside any transaction.
    pub fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.apply_single(WriteOp::Update {
            path: path.to_string(),
            fields,
        })
    }

    /// Single-field integer increment outside any transaction.
    pub fn increment(&self, path: &str, field: &str, delta: i64) -> Result<(), StoreError> {
        self.apply_single(WriteOp::Increment {
            path: path.to_string(),
            field: field.to_string(),
            delta,
        })
    }

    fn apply_single(&self, op: WriteOp) -> Result<(), StoreError> {
        let mut docs = self.inner.docs.lock().unwrap();
        let path = op.path().to_string();
        let mut data = docs.get(&path).map(|d| d.data.clone());
        let version = docs.get(&path).map(|d| d.version).unwrap_or(0);
        op.apply_to(&mut data)?;
        if let Some(value) = data {
            docs.insert(
                path,
                VersionedDoc {
                    version: version + 1,
                    data: value,
                },
            );
        }
        Ok(())
    }
}

enum WriteOp {
    Set {
        path: String,
        value: Value,
    },
    Update {
        path: String,
        fields: Map<String, Value>,
    },
    Increment {
        path: String,
        field: String,
        delta: i64,
    },
}

impl WriteOp {
    fn path(&self) -> &str {
        match self {
            WriteOp::Set { path, .. }
            | WriteOp::Update { path, .. }
            | WriteOp::Increment { path, .. } => path,
        }
    }

    /// Apply this op to the current state of its document. `None` means
    /// the document does not exist; only `Set` may create it.
    fn apply_to(&self, doc: &mut Option<Value>) -> Result<(), StoreError> {
        match self {
            WriteOp::Set { value, .. } => {
                *doc = Some(value.clone());
                Ok(())
            }
            WriteOp::Update { path, fields } => match doc {
                Some(Value::Object(existing)) => {
                    for (key, value) in fields {
                        existing.insert(key.clone(), value.clone());
                    }
                    Ok(())
                }
                _ => Err(StoreError::MissingDocument { path: path.clone() }),
            },
            WriteOp::Increment { path, field, delta } => match doc {
                Some(Value::Object(existing)) => {
                    let current = match existing.get(field.as_str()) {
                        Some(value) => value.as_i64().ok_or_else(|| StoreError::NotAnInteger {
                            path: path.clone(),
                            field: field.clone(),
                        })?,
                        None => 0,
                    };
                    existing.insert(field.clone(), Value::from(current + delta));
                    Ok(())
                }
                _ => Err(StoreError::MissingDocument { path: path.clone() }),
            },
        }
    }
}

enum CommitError {
    Conflict,
    Store(StoreError),
}

/// One attempt of a [`MemoryStore`] transaction.
pub struct MemoryTxn {
    inner: Arc<Inner>,
    // Version of each document at first read; None = absent.
    reads: HashMap<String, Option<u64>>,
    read_cache: HashMap<String, Option<Value>>,
    writes: Vec<WriteOp>,
    timestamp: DateTime<Utc>,
}

impl fmt::Debug for MemoryTxn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTxn")
            .field("reads", &self.reads.len())
            .field("writes", &self.writes.len())
            .finish()
    }
}

impl MemoryTxn {
    fn commit(self) -> Result<(), CommitError> {
        let mut docs = self.inner.docs.lock().unwrap();
        for (path, seen) in &self.reads {
            let current = docs.get(path).map(|d| d.version);
            if current != *seen {
                return Err(CommitError::Conflict);
            }
        }
        for op in &self.writes {
            let path = op.path().to_string();
            let mut data = docs.get(&path).map(|d| d.data.clone());
            let version = docs.get(&path).map(|d| d.version).unwrap_or(0);
            op.apply_to(&mut data).map_err(CommitError::Store)?;
            if let Some(value) = data {
                docs.insert(
                    path,
                    VersionedDoc {
                        version: version + 1,
                        data: value,
                    },
                );
            }
        }
        Ok(())
    }
}

impl TransactionOps for MemoryTxn {
    fn get_value(&mut self, path: &str) -> Result<Option<Value>, StoreError> {
        if !self.read_cache.contains_key(path) {
            let docs = self.inner.docs.lock().unwrap();
            let doc = docs.get(path);
            self.reads.insert(path.to_string(), doc.map(|d| d.version));
            self.read_cache
                .insert(path.to_string(), doc.map(|d| d.data.clone()));
        }
        let mut effective = self.read_cache[path].clone();
        for op in self.writes.iter().filter(|op| op.path() == path) {
            op.apply_to(&mut effective)?;
        }
        Ok(effective)
    }

    fn set_value(&mut self, path: &str, value: Value) {
        self.writes.push(WriteOp::Set {
            path: path.to_string(),
            value,
        });
    }

    fn update(&mut self, path: &str, fields: Map<String, Value>) {
        self.writes.push(WriteOp::Update {
            path: path.to_string(),
            fields,
        });
    }

    fn increment(&mut self, path: &str, field: &str, delta: i64) {
        self.writes.push(WriteOp::Increment {
            path: path.to_string(),
            field: field.to_string(),
            delta,
        });
    }

    fn server_timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl DocumentStore for MemoryStore {
    type Txn = MemoryTxn;

    async fn run_transaction<T, E, F>(&self, mut body: F) -> Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnMut(&mut Self::Txn) -> Result<T, E> + Send,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut delay = self.retry.min_delay;
        for attempt in 1..=max_attempts {
            let mut txn = MemoryTxn {
                inner: self.inner.clone(),
                reads: HashMap::new(),
                read_cache: HashMap::new(),
                writes: Vec::new(),
                timestamp: self.next_timestamp(),
            };
            let out = body(&mut txn)?;
            match txn.commit() {
                Ok(()) => return Ok(out),
                Err(CommitError::Store(err)) => return Err(E::from(err)),
                Err(CommitError::Conflict) => {
                    debug!(
                        attempt = attempt,
                        max_attempts = max_attempts,
                        "transaction conflict, retrying body"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.retry.max_delay);
                }
            }
        }
        Err(E::from(StoreError::ConflictExhausted {
            attempts: max_attempts,
        }))
    }

    fn server_timestamp(&self) -> DateTime<Utc> {
        self.next_timestamp()
    }

    async fn list<T>(&self, collection: &str) -> Result<Vec<T>, StoreError>
    where
        T: DeserializeOwned + Send,
    {
        let prefix = format!("{collection}/");
        let docs = self.inner.docs.lock().unwrap();
        docs.iter()
            .filter(|(path, _)| {
                path.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.contains('/'))
            })
            .map(|(path, doc)| {
                serde_json::from_value(doc.data.clone()).map_err(|source| {
                    StoreError::Serialization {
                        path: path.clone(),
                        source,
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_roundtrips() {
        let store = MemoryStore::new();
        store.set("consumers/a", &json!({"tokenBalance": 3})).unwrap();
        let doc: Option<Value> = store.get("consumers/a").unwrap();
        assert_eq!(doc.unwrap()["tokenBalance"], 3);
    }

    #[test]
    fn increment_starts_absent_fields_at_zero() {
        let store = MemoryStore::new();
        store.set("listings/l", &json!({})).unwrap();
        store.increment("listings/l", "applicantCount", 1).unwrap();
        store.increment("listings/l", "applicantCount", 1).unwrap();
        let doc: Option<Value> = store.get("listings/l").unwrap();
        assert_eq!(doc.unwrap()["applicantCount"], 2);
    }

    #[test]
    fn update_of_missing_document_is_an_error() {
        let store = MemoryStore::new();
        let err = store.update("listings/nope", Map::new()).unwrap_err();
        assert!(matches!(err, StoreError::MissingDocument { .. }));
    }

    #[tokio::test]
    async fn transaction_observes_its_own_writes() {
        let store = MemoryStore::new();
        store.set("counters/c", &json!({"n": 1})).unwrap();
        let n: Result<i64, StoreError> = store
            .run_transaction(|txn| {
                txn.increment("counters/c", "n", 10);
                let doc = txn.get_value("counters/c")?.expect("doc exists");
                Ok(doc["n"].as_i64().expect("integer"))
            })
            .await;
        assert_eq!(n.unwrap(), 11);
    }

    #[tokio::test]
    async fn body_errors_abort_without_retry() {
        #[derive(Debug, thiserror::Error)]
        enum TestError {
            #[error("boom")]
            Boom,
            #[error(transparent)]
            Store(#[from] StoreError),
        }

        let store = MemoryStore::new();
        let mut attempts = 0;
        let result: Result<(), TestError> = store
            .run_transaction(|_txn| {
                attempts += 1;
                Err(TestError::Boom)
            })
            .await;
        assert!(matches!(result, Err(TestError::Boom)));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn conflicting_writer_exhausts_the_retry_budget() {
        let store = MemoryStore::with_retry(RetryConfig {
            max_attempts: 3,
            min_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
        });
        store.set("counters/c", &json!({"n": 0})).unwrap();

        let rival = store.clone();
        let mut attempts = 0;
        let result: Result<(), StoreError> = store
            .run_transaction(|txn| {
                attempts += 1;
                // Read, then invalidate our own read-set before commit.
                let _ = txn.get_value("counters/c")?;
                rival.set("counters/c", &json!({"n": attempts})).unwrap();
                txn.increment("counters/c", "n", 1);
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(StoreError::ConflictExhausted { attempts: 3 })
        ));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn server_timestamps_are_strictly_monotonic() {
        let store = MemoryStore::new();
        let mut last = store.server_timestamp();
        for _ in 0..1000 {
            let next = store.server_timestamp();
            assert!(next > last);
            last = next;
        }
    }
}
