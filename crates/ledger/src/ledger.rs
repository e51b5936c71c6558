use intro_core::{BillingState, Consumer, FundingSource, Session, SessionId, UserId};
use intro_datastore::{DocKey, DocumentStore, TransactionOps};
use intro_events::{EventPublisher, IntroEvent, publish_or_log};
use tracing::info;

use crate::error::{LedgerError, Result};

/// Result of a deduction attempt. `AlreadyCharged` makes the operation
/// idempotent: calling twice for one session never double-charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeductOutcome {
    Charged { balance_after: u32 },
    AlreadyCharged,
    InsufficientBalance { balance: u32, required: u32 },
}

/// Result of a refund attempt. `refunded` is tracked separately from the
/// funding source so a second refund sees it and becomes a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundOutcome {
    Refunded { amount: u32, balance_after: u32 },
    NotRefundable,
}

/// Charge a session against the consumer's token balance, inside an open
/// transaction.
///
/// Reads the session's funding source first: if any funding is already
/// committed the call is an idempotent no-op. Does not touch
/// `billing_state`; the state transition belongs to the session gate.
pub fn deduct_in_txn<T: TransactionOps>(
    txn: &mut T,
    consumer_id: &UserId,
    session_id: &SessionId,
    amount: u32,
) -> Result<DeductOutcome> {
    let session_path = DocKey::Session(session_id).to_string();
    let mut session: Session = txn
        .get(&session_path)?
        .ok_or_else(|| LedgerError::SessionNotFound(session_id.clone()))?;

    if session.funding_source != FundingSource::None {
        return Ok(DeductOutcome::AlreadyCharged);
    }

    let consumer_path = DocKey::Consumer(consumer_id).to_string();
    let mut consumer: Consumer = txn
        .get(&consumer_path)?
        .ok_or_else(|| LedgerError::ConsumerNotFound(consumer_id.clone()))?;

    if consumer.token_balance < amount {
        return Ok(DeductOutcome::InsufficientBalance {
            balance: consumer.token_balance,
            required: amount,
        });
    }

    consumer.token_balance -= amount;
    session.funding_source = FundingSource::Token;
    session.charged_amount = amount;
    txn.set(&consumer_path, &consumer)?;
    txn.set(&session_path, &session)?;

    Ok(DeductOutcome::Charged {
        balance_after: consumer.token_balance,
    })
}

/// Reverse a token charge, inside an open transaction.
///
/// Refundable only while the charge is still provisional: funded by a
/// token, no first response recorded, not refunded before. Subscription
/// quota is never restored here.
pub fn refund_in_txn<T: TransactionOps>(
    txn: &mut T,
    consumer_id: &UserId,
    session_id: &SessionId,
) -> Result<RefundOutcome> {
    let session_path = DocKey::Session(session_id).to_string();
    let mut session: Session = txn
        .get(&session_path)?
        .ok_or_else(|| LedgerError::SessionNotFound(session_id.clone()))?;

    let service_rendered = matches!(
        session.billing_state,
        BillingState::Responded | BillingState::Closed
    );
    if session.funding_source != FundingSource::Token || session.refunded || service_rendered {
        return Ok(RefundOutcome::NotRefundable);
    }

    let consumer_path = DocKey::Consumer(consumer_id).to_string();
    let mut consumer: Consumer = txn
        .get(&consumer_path)?
        .ok_or_else(|| LedgerError::ConsumerNotFound(consumer_id.clone()))?;

    let amount = session.charged_amount;
    consumer.token_balance += amount;
    session.funding_source = FundingSource::None;
    session.refunded = true;
    txn.set(&consumer_path, &consumer)?;
    txn.set(&session_path, &session)?;

    Ok(RefundOutcome::Refunded {
        amount,
        balance_after: consumer.token_balance,
    })
}

/// Token ledger service. Each public operation runs exactly one
/// transaction and emits its notification event only after commit.
#[derive(Debug, Clone)]
pub struct TokenLedger<S, P> {
    store: S,
    publisher: P,
}

impl<S, P> TokenLedger<S, P>
where
    S: DocumentStore,
    P: EventPublisher,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self { store, publisher }
    }

    /// Deduct `amount` tokens from the consumer to fund `session_id`.
    pub async fn deduct(
        &self,
        consumer_id: &UserId,
        session_id: &SessionId,
        amount: u32,
    ) -> Result<DeductOutcome> {
        let outcome = self
            .store
            .run_transaction(|txn| deduct_in_txn(txn, consumer_id, session_id, amount))
            .await?;

        if let DeductOutcome::Charged { balance_after } = outcome {
            info!(
                consumer_id = %consumer_id,
                session_id = %session_id,
                amount = amount,
                balance_after = balance_after,
                "deducted tokens"
            );
            publish_or_log(
                &self.publisher,
                IntroEvent::TokenDeducted {
                    consumer_id: consumer_id.clone(),
                    session_id: session_id.clone(),
                    amount,
                    balance_after,
                },
            )
            .await;
        }
        Ok(outcome)
    }

    /// Reverse the session's token charge, if it is still reversible.
    pub async fn refund(
        &self,
        consumer_id: &UserId,
        session_id: &SessionId,
        reason: &str,
    ) -> Result<RefundOutcome> {
        let outcome = self
            .store
            .run_transaction(|txn| refund_in_txn(txn, consumer_id, session_id))
            .await?;

        if let RefundOutcome::Refunded { amount, .. } = outcome {
            info!(
                consumer_id = %consumer_id,
                session_id = %session_id,
                amount = amount,
                reason = reason,
                "refunded tokens"
            );
            publish_or_log(
                &self.publisher,
                IntroEvent::TokenRefunded {
                    consumer_id: consumer_id.clone(),
                    session_id: session_id.clone(),
                    amount,
                    reason: reason.to_string(),
                },
            )
            .await;
        }
        Ok(outcome)
    }

    /// Administrative or quota top-up. Pure additive transaction; returns
    /// the new balance.
    pub async fn grant(&self, consumer_id: &UserId, amount: u32, reason: &str) -> Result<u32> {
        let balance_after = self
            .store
            .run_transaction(|txn| {
                let consumer_path = DocKey::Consumer(consumer_id).to_string();
                let mut consumer: Consumer = txn
                    .get(&consumer_path)?
                    .ok_or_else(|| LedgerError::ConsumerNotFound(consumer_id.clone()))?;
                consumer.token_balance += amount;
                txn.set(&consumer_path, &consumer)?;
                Ok::<_, LedgerError>(consumer.token_balance)
            })
            .await?;

        info!(
            consumer_id = %consumer_id,
            amount = amount,
            reason = reason,
            balance_after = balance_after,
            "granted tokens"
        );
        Ok(balance_after)
    }
}
