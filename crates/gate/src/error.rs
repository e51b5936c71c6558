use intro_core::{SessionId, UserId};
use intro_datastore::StoreError;
use intro_ledger::LedgerError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GateError>;

/// Fatal gate failures. Billing rejections are not errors; they surface
/// as [`crate::BillingOutcome`] variants on a recorded message.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("consumer {0} not found")]
    ConsumerNotFound(UserId),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<LedgerError> for GateError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::ConsumerNotFound(id) => Self::ConsumerNotFound(id),
            LedgerError::SessionNotFound(id) => Self::SessionNotFound(id),
            LedgerError::Store(err) => Self::Store(err),
        }
    }
}
