use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use bazaar_types::{DemandState, MarketError, NegotiationSettings, Offer};

use crate::plugin::NegotiationPlugin;

/// Negotiates incoming offers against a demand by running a plugin chain
/// each round and counter-proposing until the demand stabilizes.
pub struct NegotiationEngine {
    plugins: Vec<Arc<dyn NegotiationPlugin>>,
    settings: NegotiationSettings,
}

impl NegotiationEngine {
    pub fn new(plugins: Vec<Arc<dyn NegotiationPlugin>>, settings: NegotiationSettings) -> Self {
        Self { plugins, settings }
    }

    /// Drives one offer to a negotiated proposal.
    ///
    /// Per round: run every plugin over the demand and the current offer.
    /// A veto rejects the offer (informing the provider unless the offer is
    /// still initial). If the offer is past its initial state and no plugin
    /// changed the demand, the negotiation has converged and the current
    /// offer is returned. Otherwise the demand is counter-proposed and one
    /// provider response awaited, bounded by the response timeout.
    pub async fn negotiate_proposal(
        &self,
        mut offer: Offer,
        mut demand: DemandState,
    ) -> Result<Offer, MarketError> {
        loop {
            let snapshot = demand.clone();

            for plugin in &self.plugins {
                if let Err(rejection) = plugin.negotiate(&mut demand, &offer.data).await {
                    tracing::debug!(
                        proposal_id = %offer.id(),
                        issuer = %offer.issuer(),
                        reason = %rejection,
                        "plugin vetoed the offer"
                    );
                    // Initial offers were never responded to, so there is
                    // nothing to inform the provider about.
                    if !offer.data.is_initial() {
                        if let Err(e) = offer.handle.reject(&rejection.reason).await {
                            tracing::warn!(proposal_id = %offer.id(), error = %e, "reject failed");
                        }
                    }
                    return Err(MarketError::NegotiationRejected {
                        reason: rejection.reason,
                    });
                }
            }

            if !offer.data.is_initial() && demand == snapshot {
                tracing::debug!(proposal_id = %offer.id(), issuer = %offer.issuer(), "negotiation converged");
                return Ok(offer);
            }

            let demand_proposal = offer
                .handle
                .respond(&demand.properties, &demand.constraints)
                .await?;

            let timeout = self.settings.response_timeout();
            let response = tokio::time::timeout(timeout, demand_proposal.wait_for_response())
                .await
                .map_err(|_| MarketError::NegotiationTimedOut { timeout })??;

            let data = response.data().await?;
            offer = Offer::new(response, data);
        }
    }

    /// Turns a stream of initial offers into a stream of negotiated offers.
    ///
    /// Every offer negotiates in its own task, bounded by the configured
    /// concurrency limit; failures are logged and dropped.
    pub fn run(
        self: Arc<Self>,
        demand: DemandState,
        mut offers: mpsc::Receiver<Offer>,
    ) -> mpsc::Receiver<Offer> {
        let (tx, negotiated_rx) = mpsc::channel(32);
        let limit = self.settings.max_concurrent_negotiations.max(1);
        let semaphore = Arc::new(Semaphore::new(limit));

        tokio::spawn(async move {
            while let Some(offer) = offers.recv().await {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let engine = Arc::clone(&self);
                let tx = tx.clone();
                let demand = demand.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    match engine.negotiate_proposal(offer, demand).await {
                        Ok(negotiated) => {
                            let _ = tx.send(negotiated).await;
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "negotiation failed");
                        }
                    }
                });
            }
        });

        negotiated_rx
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use bazaar_types::testing::{props, MockProvider, ProviderReply};
    use bazaar_types::ProposalData;

    use super::*;
    use crate::plugin::ProposalRejection;
    use crate::plugins::{BlacklistProvider, PropertyOverride};

    fn engine_with(plugins: Vec<Arc<dyn NegotiationPlugin>>) -> NegotiationEngine {
        NegotiationEngine::new(
            plugins,
            NegotiationSettings {
                response_timeout_secs: 1,
                max_concurrent_negotiations: 4,
            },
        )
    }

    async fn initial_offer(provider: &MockProvider) -> Offer {
        let handle = provider.initial_proposal();
        let data = handle.data().await.unwrap();
        Offer::new(handle, data)
    }

    #[tokio::test]
    async fn converges_when_the_provider_accepts_the_demand() {
        let provider = MockProvider::new("provider-1");
        let engine = engine_with(vec![Arc::new(PropertyOverride::new(
            "golem.com.payment.interval",
            json!(600),
        ))]);

        let negotiated = engine
            .negotiate_proposal(initial_offer(&provider).await, DemandState::default())
            .await
            .unwrap();

        assert!(!negotiated.data.is_initial());
        assert_eq!(
            negotiated.data.property_f64("golem.com.payment.interval"),
            Some(600.0)
        );
    }

    #[tokio::test]
    async fn convergence_takes_one_round_when_no_plugin_mutates() {
        struct CountingPlugin(AtomicU32);

        #[async_trait]
        impl NegotiationPlugin for CountingPlugin {
            async fn negotiate(
                &self,
                _demand: &mut DemandState,
                _offer: &ProposalData,
            ) -> Result<(), ProposalRejection> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let provider = MockProvider::new("provider-1");
        let plugin = Arc::new(CountingPlugin(AtomicU32::new(0)));
        let engine = engine_with(vec![Arc::clone(&plugin) as Arc<dyn NegotiationPlugin>]);

        engine
            .negotiate_proposal(initial_offer(&provider).await, DemandState::default())
            .await
            .unwrap();

        // One round on the initial offer, one on the provider's response.
        assert_eq!(plugin.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn veto_on_an_initial_offer_does_not_inform_the_provider() {
        let provider = MockProvider::new("banned");
        let engine = engine_with(vec![Arc::new(BlacklistProvider::new(["banned"]))]);

        let result = engine
            .negotiate_proposal(initial_offer(&provider).await, DemandState::default())
            .await;

        assert!(matches!(
            result,
            Err(MarketError::NegotiationRejected { .. })
        ));
        assert!(provider.rejections().is_empty());
    }

    #[tokio::test]
    async fn veto_on_a_counter_offer_informs_the_provider() {
        struct RejectDrafts;

        #[async_trait]
        impl NegotiationPlugin for RejectDrafts {
            async fn negotiate(
                &self,
                demand: &mut DemandState,
                offer: &ProposalData,
            ) -> Result<(), ProposalRejection> {
                if offer.is_initial() {
                    demand.set_property("probe", json!(1));
                    Ok(())
                } else {
                    Err(ProposalRejection::new("not good enough"))
                }
            }
        }

        let provider = MockProvider::new("provider-1");
        let engine = engine_with(vec![Arc::new(RejectDrafts)]);

        let result = engine
            .negotiate_proposal(initial_offer(&provider).await, DemandState::default())
            .await;

        assert!(matches!(
            result,
            Err(MarketError::NegotiationRejected { .. })
        ));
        assert_eq!(provider.rejections(), vec!["not good enough".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_provider_times_out_this_negotiation_only() {
        let provider = MockProvider::new("provider-1");
        provider.set_reply(|_, _| ProviderReply::Silent);
        let engine = engine_with(vec![]);

        let result = engine
            .negotiate_proposal(initial_offer(&provider).await, DemandState::default())
            .await;

        assert!(matches!(
            result,
            Err(MarketError::NegotiationTimedOut { .. })
        ));
    }

    #[tokio::test]
    async fn run_negotiates_offers_independently() {
        let good = MockProvider::new("good");
        let banned = MockProvider::new("banned");
        banned.set_initial_properties(props(&[("who", json!("banned"))]));

        let engine = Arc::new(engine_with(vec![Arc::new(BlacklistProvider::new([
            "banned",
        ]))]));

        let (tx, rx) = mpsc::channel(4);
        tx.send(initial_offer(&banned).await).await.unwrap();
        tx.send(initial_offer(&good).await).await.unwrap();
        drop(tx);

        let mut negotiated = engine.run(DemandState::default(), rx);

        let offer = tokio::time::timeout(Duration::from_secs(5), negotiated.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(offer.issuer().0, "good");
        assert!(negotiated.recv().await.is_none());
    }
}
