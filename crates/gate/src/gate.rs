use intro_core::{
    BillingState, Consumer, FundingSource, Message, MessageId, SenderRole, Session, SessionId,
    UserId, session_key,
};
use intro_datastore::{DocKey, DocumentStore, TransactionOps};
use intro_events::{EventPublisher, IntroEvent, publish_or_log};
use intro_ledger::{DeductOutcome, RefundOutcome, deduct_in_txn, refund_in_txn};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{GateError, Result};
use crate::metrics::Metrics;

/// Tokens one billable first contact costs.
const FIRST_CONTACT_COST: u32 = 1;

/// How the gate settled billing for one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingOutcome {
    /// Subscription quota consumed; tokens untouched.
    FundedBySubscription { remaining_free_units: u32 },
    /// A token was deducted.
    FundedByToken { balance_after: u32 },
    /// A funding source was already committed for this session.
    AlreadyFunded,
    /// Funding failed; the message was still recorded and the session
    /// stays open. A warning for the caller, not a send error.
    InsufficientBalance { balance: u32 },
    /// The provider's first reply; the charge is now final. Carries the
    /// balance after a retroactive deduction when the provider replied
    /// before funding was established.
    FirstResponse { retro_charge: Option<u32> },
    /// No billing evaluation applied to this message.
    PassThrough,
}

/// Result of recording one message.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message_id: MessageId,
    pub session_id: SessionId,
    pub session_state: BillingState,
    pub billing: BillingOutcome,
}

/// Result of a cancellation attempt. Terminal sessions make repeat
/// cancellations no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled { refunded: bool },
    /// The provider had already responded; the service was rendered, so
    /// the session closes without a refund.
    Closed,
    AlreadyTerminal,
}

enum CancelTxn {
    Cancelled {
        consumer_id: UserId,
        refund: Option<(u32, u32)>,
    },
    Closed,
    AlreadyTerminal,
}

/// The session gate. One instance serves all sessions; every operation is
/// a single optimistic transaction followed by post-commit events.
#[derive(Clone)]
pub struct SessionGate<S, P> {
    store: S,
    publisher: P,
    metrics: Metrics,
}

impl<S: std::fmt::Debug, P: std::fmt::Debug> std::fmt::Debug for SessionGate<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGate")
            .field("store", &self.store)
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}

impl<S, P> SessionGate<S, P>
where
    S: DocumentStore,
    P: EventPublisher,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self {
            store,
            publisher,
            metrics: Metrics::default(),
        }
    }

    /// Record an inbound message and apply the billing transition it
    /// triggers, all in one transaction.
    ///
    /// The session is created lazily; both participants derive the same
    /// deterministic key, so racing first messages settle on one aggregate.
    pub async fn send_message(
        &self,
        consumer_id: &UserId,
        provider_id: &UserId,
        sender_role: SenderRole,
        body: &str,
    ) -> Result<SendOutcome> {
        let started = Instant::now();
        let outcome = self
            .store
            .run_transaction(|txn| send_txn(txn, consumer_id, provider_id, sender_role, body))
            .await?;

        match outcome.billing {
            BillingOutcome::FundedByToken { balance_after } => {
                self.metrics.funded_token.increment(1);
                info!(
                    session_id = %outcome.session_id,
                    consumer_id = %consumer_id,
                    balance_after = balance_after,
                    "session funded by token"
                );
                publish_or_log(
                    &self.publisher,
                    IntroEvent::TokenDeducted {
                        consumer_id: consumer_id.clone(),
                        session_id: outcome.session_id.clone(),
                        amount: FIRST_CONTACT_COST,
                        balance_after,
                    },
                )
                .await;
            }
            BillingOutcome::FundedBySubscription {
                remaining_free_units,
            } => {
                self.metrics.funded_subscription.increment(1);
                info!(
                    session_id = %outcome.session_id,
                    consumer_id = %consumer_id,
                    remaining_free_units = remaining_free_units,
                    "session funded from subscription quota"
                );
            }
            BillingOutcome::InsufficientBalance { balance } => {
                self.metrics.insufficient_balance.increment(1);
                warn!(
                    session_id = %outcome.session_id,
                    consumer_id = %consumer_id,
                    balance = balance,
                    "message recorded without funding"
                );
            }
            BillingOutcome::FirstResponse { retro_charge } => {
                self.metrics.first_responses.increment(1);
                info!(
                    session_id = %outcome.session_id,
                    provider_id = %provider_id,
                    "first provider response received"
                );
                if let Some(balance_after) = retro_charge {
                    publish_or_log(
                        &self.publisher,
                        IntroEvent::TokenDeducted {
                            consumer_id: consumer_id.clone(),
                            session_id: outcome.session_id.clone(),
                            amount: FIRST_CONTACT_COST,
                            balance_after,
                        },
                    )
                    .await;
                }
                publish_or_log(
                    &self.publisher,
                    IntroEvent::FirstResponseReceived {
                        session_id: outcome.session_id.clone(),
                        provider_id: provider_id.clone(),
                    },
                )
                .await;
            }
            BillingOutcome::AlreadyFunded | BillingOutcome::PassThrough => {}
        }

        self.metrics
            .send_message_duration
            .record(started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Cancel a session (admin action or non-response timeout). Refunds
    /// the token charge iff no first response was recorded.
    pub async fn cancel(&self, session_id: &SessionId, reason: &str) -> Result<CancelOutcome> {
        let started = Instant::now();
        let txn_outcome = self
            .store
            .run_transaction(|txn| cancel_txn(txn, session_id))
            .await?;

        let outcome = match txn_outcome {
            CancelTxn::Cancelled {
                consumer_id,
                refund,
            } => {
                info!(
                    session_id = %session_id,
                    reason = reason,
                    refunded = refund.is_some(),
                    "session cancelled"
                );
                if let Some((amount, _)) = refund {
                    publish_or_log(
                        &self.publisher,
                        IntroEvent::TokenRefunded {
                            consumer_id,
                            session_id: session_id.clone(),
                            amount,
                            reason: reason.to_string(),
                        },
                    )
                    .await;
                }
                CancelOutcome::Cancelled {
                    refunded: refund.is_some(),
                }
            }
            CancelTxn::Closed => {
                info!(
                    session_id = %session_id,
                    reason = reason,
                    "responded session closed without refund"
                );
                CancelOutcome::Closed
            }
            CancelTxn::AlreadyTerminal => CancelOutcome::AlreadyTerminal,
        };

        self.metrics
            .cancel_duration
            .record(started.elapsed().as_secs_f64());
        Ok(outcome)
    }
}

fn send_txn<T: TransactionOps>(
    txn: &mut T,
    consumer_id: &UserId,
    provider_id: &UserId,
    sender_role: SenderRole,
    body: &str,
) -> Result<SendOutcome> {
    let session_id = session_key(consumer_id, provider_id);
    let session_path = DocKey::Session(&session_id).to_string();
    let now = txn.server_timestamp();

    let session: Session = match txn.get(&session_path)? {
        Some(session) => session,
        None => {
            let session = Session::new(consumer_id.clone(), provider_id.clone(), now);
            txn.set(&session_path, &session)?;
            session
        }
    };

    let billing = match (sender_role, session.billing_state) {
        // First consumer message: decide the funding source.
        (SenderRole::Consumer, BillingState::Open) => {
            if session.funding_source == FundingSource::None {
                fund_session(txn, consumer_id, &session_id, now)?
            } else {
                BillingOutcome::AlreadyFunded
            }
        }
        // First provider message after funding: the billable event.
        (SenderRole::Provider, BillingState::Funded) => {
            BillingOutcome::FirstResponse { retro_charge: None }
        }
        // Provider replied before the consumer side ever funded. Charge
        // retroactively; only a settled charge may finalize the response.
        (SenderRole::Provider, BillingState::Open) => {
            if session.funding_source == FundingSource::None {
                match deduct_in_txn(txn, consumer_id, &session_id, FIRST_CONTACT_COST)? {
                    DeductOutcome::Charged { balance_after } => BillingOutcome::FirstResponse {
                        retro_charge: Some(balance_after),
                    },
                    DeductOutcome::AlreadyCharged => {
                        BillingOutcome::FirstResponse { retro_charge: None }
                    }
                    DeductOutcome::InsufficientBalance { balance, .. } => {
                        BillingOutcome::InsufficientBalance { balance }
                    }
                }
            } else {
                BillingOutcome::FirstResponse { retro_charge: None }
            }
        }
        _ => BillingOutcome::PassThrough,
    };

    // The in-transaction funding helpers rewrite the session document;
    // re-read before applying the state transition.
    let mut session: Session = txn
        .get(&session_path)?
        .ok_or_else(|| GateError::SessionNotFound(session_id.clone()))?;
    match billing {
        BillingOutcome::FundedBySubscription { .. } => {
            session.funding_source = FundingSource::Subscription;
            session.billing_state = BillingState::Funded;
        }
        BillingOutcome::FundedByToken { .. } | BillingOutcome::AlreadyFunded => {
            session.billing_state = BillingState::Funded;
        }
        BillingOutcome::FirstResponse { .. } => {
            session.billing_state = BillingState::Responded;
        }
        BillingOutcome::InsufficientBalance { .. } | BillingOutcome::PassThrough => {}
    }
    session.last_activity_at = now;
    txn.set(&session_path, &session)?;

    let message = Message {
        id: Uuid::new_v4(),
        session_id: session_id.clone(),
        sender_id: match sender_role {
            SenderRole::Consumer => consumer_id.clone(),
            SenderRole::Provider => provider_id.clone(),
        },
        sender_role,
        body: body.to_string(),
        timestamp: now,
    };
    txn.set(
        &DocKey::Message {
            session_id: &session_id,
            message_id: &message.id,
        }
        .to_string(),
        &message,
    )?;

    Ok(SendOutcome {
        message_id: message.id,
        session_id,
        session_state: session.billing_state,
        billing,
    })
}

/// Evaluate funding for the first consumer message: subscription quota
/// first, then a token deduction.
fn fund_session<T: TransactionOps>(
    txn: &mut T,
    consumer_id: &UserId,
    session_id: &SessionId,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<BillingOutcome> {
    let consumer_path = DocKey::Consumer(consumer_id).to_string();
    let mut consumer: Consumer = txn
        .get(&consumer_path)?
        .ok_or_else(|| GateError::ConsumerNotFound(consumer_id.clone()))?;

    if let Some(subscription) = consumer.subscription.as_mut() {
        if subscription.usable_at(now) {
            subscription.remaining_free_units -= 1;
            let remaining_free_units = subscription.remaining_free_units;
            txn.set(&consumer_path, &consumer)?;
            return Ok(BillingOutcome::FundedBySubscription {
                remaining_free_units,
            });
        }
    }

    match deduct_in_txn(txn, consumer_id, session_id, FIRST_CONTACT_COST)? {
        DeductOutcome::Charged { balance_after } => {
            Ok(BillingOutcome::FundedByToken { balance_after })
        }
        DeductOutcome::AlreadyCharged => Ok(BillingOutcome::AlreadyFunded),
        DeductOutcome::InsufficientBalance { balance, .. } => {
            Ok(BillingOutcome::InsufficientBalance { balance })
        }
    }
}

fn cancel_txn<T: TransactionOps>(txn: &mut T, session_id: &SessionId) -> Result<CancelTxn> {
    let session_path = DocKey::Session(session_id).to_string();
    let now = txn.server_timestamp();
    let session: Session = txn
        .get(&session_path)?
        .ok_or_else(|| GateError::SessionNotFound(session_id.clone()))?;

    match session.billing_state {
        BillingState::Closed | BillingState::Cancelled => Ok(CancelTxn::AlreadyTerminal),
        BillingState::Responded => {
            let mut session = session;
            session.billing_state = BillingState::Closed;
            session.last_activity_at = now;
            txn.set(&session_path, &session)?;
            Ok(CancelTxn::Closed)
        }
        BillingState::Open | BillingState::Funded => {
            let consumer_id = session.consumer_id.clone();
            let mut refund = None;
            if session.funding_source == FundingSource::Token {
                if let RefundOutcome::Refunded {
                    amount,
                    balance_after,
                } = refund_in_txn(txn, &consumer_id, session_id)?
                {
                    refund = Some((amount, balance_after));
                }
            }
            // Refunding rewrites the session; re-read before the final
            // transition.
            let mut session: Session = txn
                .get(&session_path)?
                .ok_or_else(|| GateError::SessionNotFound(session_id.clone()))?;
            session.billing_state = BillingState::Cancelled;
            session.last_activity_at = now;
            txn.set(&session_path, &session)?;
            Ok(CancelTxn::Cancelled {
                consumer_id,
                refund,
            })
        }
    }
}
