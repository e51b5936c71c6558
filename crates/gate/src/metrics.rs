use metrics::{Counter, Histogram};
use metrics_derive::Metrics;

/// Metrics for the `intro_gate` component.
/// Conventions:
/// - Durations are recorded in seconds (histograms).
/// - Counters are monotonic event counts.
#[derive(Metrics, Clone)]
#[metrics(scope = "intro_gate")]
pub struct Metrics {
    #[metric(describe = "Duration of send_message")]
    pub send_message_duration: Histogram,

    #[metric(describe = "Duration of cancel")]
    pub cancel_duration: Histogram,

    #[metric(describe = "Sessions funded from subscription quota")]
    pub funded_subscription: Counter,

    #[metric(describe = "Sessions funded by token deduction")]
    pub funded_token: Counter,

    #[metric(describe = "Funding attempts rejected for insufficient balance")]
    pub insufficient_balance: Counter,

    #[metric(describe = "First provider responses recorded")]
    pub first_responses: Counter,
}
