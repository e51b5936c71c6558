use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::keys::session_key;

/// Opaque participant identity. Issued by the auth layer; this core never
/// creates or destroys accounts, it only references them.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Session identity, derived commutatively from the participant pair via
/// [`session_key`]. Both participants always resolve to the same aggregate.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Listing identity.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(String);

impl ListingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Application identity, derived from `(listing, applicant)` via
/// [`crate::application_key`]. Existence check and creation are the same
/// point read.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationId(String);

impl ApplicationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message identity.
pub type MessageId = Uuid;

/// Subscription entitlement embedded in the consumer account. Free units
/// are consumed before tokens when funding a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub active: bool,
    pub expires_at: DateTime<Utc>,
    pub remaining_free_units: u32,
}

impl Subscription {
    /// Whether this subscription can fund a session at `now`.
    pub fn usable_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at > now && self.remaining_free_units > 0
    }
}

/// Consumer account. `token_balance` is only ever written by the token
/// ledger; the subscription quota only by the session gate's funding
/// transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consumer {
    pub id: UserId,
    pub token_balance: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
}

/// Billing state machine of a session.
///
/// `Open → Funded → Responded → Closed | Cancelled`; `Closed` and
/// `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BillingState {
    Open,
    Funded,
    Responded,
    Closed,
    Cancelled,
}

impl BillingState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }
}

/// Which entitlement funded the session's billing cycle. Set at most once
/// per cycle; cleared again only by a token refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FundingSource {
    None,
    Token,
    Subscription,
}

/// Which side of the conversation a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SenderRole {
    Consumer,
    Provider,
}

/// The billing-relevant conversation aggregate. Created lazily on first
/// contact between a pair; never deleted, only moved to a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub consumer_id: UserId,
    pub provider_id: UserId,
    pub billing_state: BillingState,
    pub funding_source: FundingSource,
    pub refunded: bool,
    /// Amount originally deducted, so a refund restores exactly what was
    /// taken. Zero until a token charge lands.
    pub charged_amount: u32,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn new(consumer_id: UserId, provider_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: session_key(&consumer_id, &provider_id),
            consumer_id,
            provider_id,
            billing_state: BillingState::Open,
            funding_source: FundingSource::None,
            refunded: false,
            charged_amount: 0,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Role of `sender` within this session, if they are a participant.
    pub fn role_of(&self, sender: &UserId) -> Option<SenderRole> {
        if sender == &self.consumer_id {
            Some(SenderRole::Consumer)
        } else if sender == &self.provider_id {
            Some(SenderRole::Provider)
        } else {
            None
        }
    }
}

/// One chat message. Append-only; ordering is the server-assigned
/// timestamp, never the client clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub sender_id: UserId,
    pub sender_role: SenderRole,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// Hard cap on concurrent applicants per listing.
pub const APPLICANT_CAP: u32 = 2;

/// A tutoring listing. `applicant_count` is only ever written by the
/// admission controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: ListingId,
    pub author_id: UserId,
    pub applicant_cap: u32,
    pub applicant_count: u32,
}

impl Listing {
    pub fn new(id: ListingId, author_id: UserId) -> Self {
        Self {
            id,
            author_id,
            applicant_cap: APPLICANT_CAP,
            applicant_count: 0,
        }
    }

    pub const fn is_full(&self) -> bool {
        self.applicant_count >= self.applicant_cap
    }
}

/// Review status of an application. Review transitions are owned by the
/// admin workflows, not by this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
    Withdrawn,
}

/// One applicant's application to one listing, keyed by the composite
/// `(listing, applicant)` id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: ApplicationId,
    pub listing_id: ListingId,
    pub applicant_id: UserId,
    pub message: String,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
}
