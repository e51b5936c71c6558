//! Notification sink for the messaging core.
//!
//! Events describe billing-relevant facts that already committed; they are
//! published strictly after the owning transaction and a publish failure
//! is logged and dropped, never propagated back into billing.

pub mod publisher;
pub mod types;

pub use publisher::{
    EventPublisher, InMemoryEventPublisher, KafkaEventPublisher, publish_or_log,
};
pub use types::IntroEvent;
