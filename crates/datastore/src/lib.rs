//! Store adapter for the messaging core.
//!
//! The rest of the system needs exactly one primitive from its backing
//! store: [`DocumentStore::run_transaction`]. A transaction body is a pure
//! function of its reads; if any document it read changes before commit,
//! the attempt aborts and the runner retries the body from scratch with
//! bounded exponential backoff. Every ledger, gate and admission operation
//! is exactly one such transaction.
//!
//! [`MemoryStore`] is the in-process backend: per-document versions,
//! commit-time validation, monotonic server timestamps.

pub mod memory;
pub mod paths;
pub mod traits;

pub use memory::{MemoryStore, MemoryTxn};
pub use paths::DocKey;
pub use traits::{DocumentStore, RetryConfig, StoreError, TransactionOps};
