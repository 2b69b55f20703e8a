use std::time::Duration;

use thiserror::Error;

/// Error taxonomy for the requestor engine.
///
/// Everything except `Configuration` is recoverable at the layer that owns
/// it: a rejected or timed-out negotiation moves on to the next proposal, a
/// pool failure discards the agreement and obtains a new one, a batch
/// failure feeds the retry/redundancy policies.
#[derive(Error, Debug, Clone)]
pub enum MarketError {
    #[error("proposal rejected by negotiation: {reason}")]
    NegotiationRejected { reason: String },

    #[error("no counter-proposal response within {timeout:?}")]
    NegotiationTimedOut { timeout: Duration },

    #[error("resource pool exhausted: {0}")]
    ResourceExhausted(String),

    #[error("agreement was not approved by the provider")]
    AgreementNotApproved,

    #[error("failed to create activity: {0}")]
    ActivityCreationFailed(String),

    #[error("batch execution failed: {0}")]
    BatchFailed(String),

    #[error("batch did not complete within {timeout:?}")]
    BatchTimedOut { timeout: Duration },

    #[error("claimed amount {claimed} exceeds maximum expected cost {max}")]
    CostExceeded { claimed: f64, max: f64 },

    #[error("resource is already closed")]
    AlreadyClosed,

    #[error("marketplace api error: {0}")]
    Api(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl MarketError {
    /// Fatal errors are surfaced immediately and never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MarketError::Configuration(_))
    }
}
