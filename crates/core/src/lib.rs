//! Core domain types for the first-contact messaging core.
//!
//! Everything billing-relevant is modeled here: participant identities,
//! deterministic aggregate keys, and the aggregates themselves with their
//! closed status enums. The crates that own the mutations (`intro-ledger`,
//! `intro-gate`, `intro-admission`) all build on these types.

pub mod keys;
pub mod types;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use keys::{application_key, session_key};
pub use types::{
    Application, ApplicationId, ApplicationStatus, BillingState, Consumer, FundingSource, Listing,
    ListingId, Message, MessageId, SenderRole, Session, SessionId, Subscription, UserId,
    APPLICANT_CAP,
};
