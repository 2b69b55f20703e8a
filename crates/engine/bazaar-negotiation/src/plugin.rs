use async_trait::async_trait;

use bazaar_types::{DemandState, ProposalData};

/// A plugin's veto of the offer under negotiation.
#[derive(Debug, Clone)]
pub struct ProposalRejection {
    pub reason: String,
}

impl ProposalRejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ProposalRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// One step in the negotiation chain.
///
/// A plugin inspects the provider's offer and may mutate the demand (the
/// engine counter-proposes until no plugin changes it), do nothing, or veto
/// the offer by returning a rejection.
#[async_trait]
pub trait NegotiationPlugin: Send + Sync {
    async fn negotiate(
        &self,
        demand: &mut DemandState,
        offer: &ProposalData,
    ) -> Result<(), ProposalRejection>;
}
