//! Builders for test fixtures. Consumers, listings and subscriptions are
//! owned by external lifecycles in production; tests seed them directly.

use chrono::{TimeDelta, Utc};

use crate::types::{Consumer, Listing, ListingId, Subscription, UserId};

pub fn consumer_with_balance(id: &str, token_balance: u32) -> Consumer {
    Consumer {
        id: UserId::from(id),
        token_balance,
        subscription: None,
    }
}

/// A consumer with an active subscription expiring 30 days from now.
pub fn consumer_with_subscription(id: &str, remaining_free_units: u32) -> Consumer {
    Consumer {
        id: UserId::from(id),
        token_balance: 0,
        subscription: Some(Subscription {
            active: true,
            expires_at: Utc::now() + TimeDelta::days(30),
            remaining_free_units,
        }),
    }
}

/// A consumer whose subscription exists but can no longer fund anything.
pub fn consumer_with_expired_subscription(id: &str, token_balance: u32) -> Consumer {
    Consumer {
        id: UserId::from(id),
        token_balance,
        subscription: Some(Subscription {
            active: true,
            expires_at: Utc::now() - TimeDelta::days(1),
            remaining_free_units: 5,
        }),
    }
}

pub fn empty_listing(id: &str, author_id: &str) -> Listing {
    Listing::new(ListingId::new(id), UserId::from(author_id))
}
