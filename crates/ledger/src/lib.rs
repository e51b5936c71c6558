//! Token ledger for the messaging core.
//!
//! Owns the per-consumer interview-token balance. Every operation is one
//! optimistic transaction; expected business outcomes ([`DeductOutcome`],
//! [`RefundOutcome`]) are reported results, never errors. The transaction-
//! body helpers let the session gate fold a charge or refund into its own
//! single transaction while this crate remains the only writer of
//! `token_balance`.

pub mod error;
pub mod ledger;

pub use error::{LedgerError, Result};
pub use ledger::{DeductOutcome, RefundOutcome, TokenLedger, deduct_in_txn, refund_in_txn};
