//! Test environment wiring every component of the messaging core against
//! the in-memory store and publisher.

use chrono::TimeDelta;
use intro_admission::AdmissionController;
use intro_core::{Consumer, Listing, Session, SessionId, UserId};
use intro_datastore::{DocKey, MemoryStore, RetryConfig};
use intro_events::InMemoryEventPublisher;
use intro_gate::SessionGate;
use intro_ledger::TokenLedger;
use intro_maintenance::SessionSweeper;
use std::sync::Once;
use std::time::Duration;

static INIT_TRACING: Once = Once::new();

/// Install a fmt subscriber once per test binary. `RUST_LOG` filters.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// The whole core wired over one shared store and publisher.
#[derive(Debug)]
pub struct TestEnv {
    pub store: MemoryStore,
    pub publisher: InMemoryEventPublisher,
    pub ledger: TokenLedger<MemoryStore, InMemoryEventPublisher>,
    pub gate: SessionGate<MemoryStore, InMemoryEventPublisher>,
    pub admission: AdmissionController<MemoryStore, InMemoryEventPublisher>,
    pub sweeper: SessionSweeper<MemoryStore, InMemoryEventPublisher>,
}

impl TestEnv {
    pub fn new() -> Self {
        init_tracing();
        // Generous retry budget: end-to-end tests race many writers.
        let store = MemoryStore::with_retry(RetryConfig {
            max_attempts: 64,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(16),
        });
        let publisher = InMemoryEventPublisher::new();
        let gate = SessionGate::new(store.clone(), publisher.clone());
        Self {
            ledger: TokenLedger::new(store.clone(), publisher.clone()),
            admission: AdmissionController::new(store.clone(), publisher.clone()),
            sweeper: SessionSweeper::new(store.clone(), gate.clone(), TimeDelta::hours(48)),
            gate,
            store,
            publisher,
        }
    }

    pub fn seed_consumer(&self, consumer: &Consumer) {
        self.store
            .set(&DocKey::Consumer(&consumer.id).to_string(), consumer)
            .expect("seed consumer");
    }

    pub fn seed_listing(&self, listing: &Listing) {
        self.store
            .set(&DocKey::Listing(&listing.id).to_string(), listing)
            .expect("seed listing");
    }

    pub fn consumer(&self, id: &UserId) -> Consumer {
        self.store
            .get(&DocKey::Consumer(id).to_string())
            .expect("read consumer")
            .expect("consumer exists")
    }

    pub fn session(&self, id: &SessionId) -> Session {
        self.store
            .get(&DocKey::Session(id).to_string())
            .expect("read session")
            .expect("session exists")
    }

    /// Rewind a session's last activity, simulating elapsed time.
    pub fn age_session(&self, id: &SessionId, by: TimeDelta) {
        let path = DocKey::Session(id).to_string();
        let mut session: Session = self
            .store
            .get(&path)
            .expect("read session")
            .expect("session exists");
        session.last_activity_at -= by;
        self.store.set(&path, &session).expect("write session");
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
