use intro_core::{ApplicationId, ListingId, SessionId, UserId};
use serde::{Deserialize, Serialize};

/// Post-commit notification events. Delivery mechanics (push, in-app
/// banners) live entirely outside this core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum IntroEvent {
    TokenDeducted {
        consumer_id: UserId,
        session_id: SessionId,
        amount: u32,
        balance_after: u32,
    },
    TokenRefunded {
        consumer_id: UserId,
        session_id: SessionId,
        amount: u32,
        reason: String,
    },
    FirstResponseReceived {
        session_id: SessionId,
        provider_id: UserId,
    },
    ApplicationAccepted {
        application_id: ApplicationId,
        listing_id: ListingId,
        applicant_id: UserId,
    },
}

impl IntroEvent {
    /// Partition/routing key: the aggregate the event is about.
    pub fn key(&self) -> String {
        match self {
            IntroEvent::TokenDeducted { session_id, .. }
            | IntroEvent::TokenRefunded { session_id, .. }
            | IntroEvent::FirstResponseReceived { session_id, .. } => session_id.to_string(),
            IntroEvent::ApplicationAccepted { application_id, .. } => application_id.to_string(),
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            IntroEvent::TokenDeducted { .. } => "token_deducted",
            IntroEvent::TokenRefunded { .. } => "token_refunded",
            IntroEvent::FirstResponseReceived { .. } => "first_response_received",
            IntroEvent::ApplicationAccepted { .. } => "application_accepted",
        }
    }
}
