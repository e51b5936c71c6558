use anyhow::Result;
use chrono::TimeDelta;
use intro_core::{BillingState, Session};
use intro_datastore::{DocumentStore, paths};
use intro_events::EventPublisher;
use intro_gate::{CancelOutcome, SessionGate};
use tracing::{debug, info};

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub cancelled: usize,
}

/// Cancels funded sessions whose provider never responded within the
/// timeout. The scan itself is not transactional and does not need to be:
/// each cancellation re-validates the session state inside the gate's own
/// transaction, so racing a late provider reply is safe either way.
#[derive(Debug)]
pub struct SessionSweeper<S, P> {
    store: S,
    gate: SessionGate<S, P>,
    response_timeout: TimeDelta,
}

impl<S, P> SessionSweeper<S, P>
where
    S: DocumentStore,
    P: EventPublisher,
{
    pub fn new(store: S, gate: SessionGate<S, P>, response_timeout: TimeDelta) -> Self {
        Self {
            store,
            gate,
            response_timeout,
        }
    }

    /// One pass over all sessions. Driven externally (scheduler or admin).
    pub async fn run_once(&self) -> Result<SweepReport> {
        let now = self.store.server_timestamp();
        let sessions: Vec<Session> = self.store.list(paths::SESSIONS).await?;
        let scanned = sessions.len();
        let mut cancelled = 0;

        for session in sessions {
            if session.billing_state != BillingState::Funded {
                continue;
            }
            if now - session.last_activity_at < self.response_timeout {
                continue;
            }
            match self
                .gate
                .cancel(&session.id, "provider response timed out")
                .await?
            {
                CancelOutcome::Cancelled { refunded } => {
                    debug!(
                        session_id = %session.id,
                        refunded = refunded,
                        "swept stale session"
                    );
                    cancelled += 1;
                }
                // The provider replied, or another sweeper got here first.
                CancelOutcome::Closed | CancelOutcome::AlreadyTerminal => {}
            }
        }

        info!(
            scanned = scanned,
            cancelled = cancelled,
            "session sweep complete"
        );
        Ok(SweepReport { scanned, cancelled })
    }
}
