//! Deterministic aggregate keys.
//!
//! Keys are derived purely from business identities so that creation is
//! naturally idempotent: two racing writers derive the same document key
//! and the store's transaction layer resolves the race, with no
//! query-then-create window.

use crate::types::{ApplicationId, ListingId, SessionId, UserId};

/// Canonical session key for an unordered participant pair.
///
/// Lexicographically sorts the two ids and joins them, so
/// `session_key(a, b) == session_key(b, a)` for every pair.
pub fn session_key(a: &UserId, b: &UserId) -> SessionId {
    let (lo, hi) = if a.as_str() <= b.as_str() { (a, b) } else { (b, a) };
    SessionId::new(format!("{lo}_{hi}"))
}

/// Composite application key for `(listing, applicant)`.
pub fn application_key(listing_id: &ListingId, applicant_id: &UserId) -> ApplicationId {
    ApplicationId::new(format!("{listing_id}_{applicant_id}"))
}
