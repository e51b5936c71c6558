//! Session gate: the per-conversation billing state machine.
//!
//! Every inbound chat message passes through [`SessionGate::send_message`],
//! which decides in one transaction whether the message is the billable
//! event, which funding source to draw from, and which state transition to
//! apply. Cancellation (admin action or the maintenance sweeper) goes
//! through [`SessionGate::cancel`]. Message delivery is deliberately not
//! conditioned on successful billing: a funding failure surfaces as a
//! warning in the outcome, never as a send error.

pub mod error;
pub mod gate;
pub mod metrics;

pub use error::GateError;
pub use gate::{BillingOutcome, CancelOutcome, SendOutcome, SessionGate};
