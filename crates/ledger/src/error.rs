use intro_core::{SessionId, UserId};
use intro_datastore::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Fatal ledger failures. Business outcomes like an insufficient balance
/// are not errors; see [`crate::DeductOutcome`] and [`crate::RefundOutcome`].
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("consumer {0} not found")]
    ConsumerNotFound(UserId),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
