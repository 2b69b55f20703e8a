use std::collections::HashSet;

use async_trait::async_trait;

use bazaar_types::{DemandState, ProposalData, ProviderId};

use crate::plugin::{NegotiationPlugin, ProposalRejection};

/// Vetoes every offer issued by a blacklisted provider.
pub struct BlacklistProvider {
    ids: HashSet<ProviderId>,
}

impl BlacklistProvider {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(|s| ProviderId(s.into())).collect(),
        }
    }
}

#[async_trait]
impl NegotiationPlugin for BlacklistProvider {
    async fn negotiate(
        &self,
        _demand: &mut DemandState,
        offer: &ProposalData,
    ) -> Result<(), ProposalRejection> {
        if self.ids.contains(&offer.issuer) {
            return Err(ProposalRejection::new(format!(
                "provider {} is blacklisted",
                offer.issuer
            )));
        }
        Ok(())
    }
}

/// Unconditionally pins one demand property to a fixed value.
pub struct PropertyOverride {
    key: String,
    value: serde_json::Value,
}

impl PropertyOverride {
    pub fn new(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

#[async_trait]
impl NegotiationPlugin for PropertyOverride {
    async fn negotiate(
        &self,
        demand: &mut DemandState,
        _offer: &ProposalData,
    ) -> Result<(), ProposalRejection> {
        demand.set_property(&self.key, self.value.clone());
        Ok(())
    }
}
