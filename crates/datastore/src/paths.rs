//! Document keys for every collection the core touches.

use intro_core::{ApplicationId, ListingId, MessageId, SessionId, UserId};
use std::fmt;

/// Top-level collection of consumer accounts.
pub const CONSUMERS: &str = "consumers";
/// Top-level collection of conversation sessions.
pub const SESSIONS: &str = "sessions";
/// Top-level collection of listings.
pub const LISTINGS: &str = "listings";
/// Top-level collection of applications, keyed by composite id.
pub const APPLICATIONS: &str = "applications";

/// Typed document key. `Display` renders the store path, so a key is
/// always built from business identities rather than spliced strings.
#[derive(Debug)]
pub enum DocKey<'a> {
    Consumer(&'a UserId),
    Session(&'a SessionId),
    Message {
        session_id: &'a SessionId,
        message_id: &'a MessageId,
    },
    Listing(&'a ListingId),
    Application(&'a ApplicationId),
}

impl fmt::Display for DocKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocKey::Consumer(id) => write!(f, "{CONSUMERS}/{id}"),
            DocKey::Session(id) => write!(f, "{SESSIONS}/{id}"),
            DocKey::Message {
                session_id,
                message_id,
            } => write!(f, "{SESSIONS}/{session_id}/messages/{message_id}"),
            DocKey::Listing(id) => write!(f, "{LISTINGS}/{id}"),
            DocKey::Application(id) => write!(f, "{APPLICATIONS}/{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intro_core::{application_key, session_key};

    #[test]
    fn keys_render_store_paths() {
        let consumer = UserId::from("student-1");
        let provider = UserId::from("tutor-9");
        let session = session_key(&consumer, &provider);
        let listing = ListingId::new("listing-5");
        let application = application_key(&listing, &consumer);

        assert_eq!(
            DocKey::Consumer(&consumer).to_string(),
            "consumers/student-1"
        );
        assert_eq!(
            DocKey::Session(&session).to_string(),
            "sessions/student-1_tutor-9"
        );
        assert_eq!(DocKey::Listing(&listing).to_string(), "listings/listing-5");
        assert_eq!(
            DocKey::Application(&application).to_string(),
            "applications/listing-5_student-1"
        );
    }

    #[test]
    fn message_keys_nest_under_their_session() {
        let session = SessionId::new("a_b");
        let message_id = uuid::Uuid::new_v4();
        let key = DocKey::Message {
            session_id: &session,
            message_id: &message_id,
        }
        .to_string();
        assert_eq!(key, format!("sessions/a_b/messages/{message_id}"));
    }
}
