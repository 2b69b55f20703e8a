use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Mutex};

use bazaar_types::{
    Agreement, AgreementId, EventBus, MarketError, MarketEvent, Offer, PoolSettings,
    ResourceRegistry,
};

/// Turns a stream of negotiated proposals into approved agreements.
///
/// Each `get_agreement` call walks the proposal stream until one proposal
/// survives create, confirm and provider approval; failures along the way
/// discard that proposal and move on. Approved agreements are announced as
/// `NewAgreement` and tracked in a registry of live agreements; a release
/// listener terminates each exactly once when `AgreementReleased` for its
/// id later appears on the bus.
pub struct AgreementPool {
    offers: Mutex<mpsc::Receiver<Offer>>,
    live: Arc<ResourceRegistry<AgreementId, Agreement>>,
    settings: PoolSettings,
    bus: EventBus,
}

impl AgreementPool {
    pub fn new(offers: mpsc::Receiver<Offer>, settings: PoolSettings, bus: EventBus) -> Self {
        let live = Arc::new(ResourceRegistry::new());
        Self::spawn_release_listener(Arc::clone(&live), bus.clone());
        Self {
            offers: Mutex::new(offers),
            live,
            settings,
            bus,
        }
    }

    /// Agreements approved through this pool and not yet terminated.
    pub fn live_agreements(&self) -> usize {
        self.live.len()
    }

    pub async fn get_agreement(&self) -> Result<Agreement, MarketError> {
        loop {
            let offer = { self.offers.lock().await.recv().await }.ok_or_else(|| {
                MarketError::ResourceExhausted("negotiated proposal stream closed".into())
            })?;

            match self.try_agreement(&offer).await {
                Ok(agreement) => {
                    tracing::info!(
                        agreement_id = %agreement.id(),
                        provider = %agreement.provider(),
                        "agreement approved"
                    );
                    self.live
                        .get_or_create(&agreement.id(), || agreement.clone());
                    self.bus.emit(MarketEvent::NewAgreement {
                        agreement_id: agreement.id(),
                        provider: agreement.provider(),
                        proposal: agreement.proposal().clone(),
                        started_at: agreement.started_at(),
                    });
                    return Ok(agreement);
                }
                Err(e) => {
                    tracing::debug!(
                        proposal_id = %offer.id(),
                        issuer = %offer.issuer(),
                        error = %e,
                        "proposal did not become an agreement, trying the next"
                    );
                }
            }
        }
    }

    async fn try_agreement(&self, offer: &Offer) -> Result<Agreement, MarketError> {
        let handle = offer.handle.create_agreement().await?;
        handle.confirm().await?;
        if !handle
            .wait_for_approval(self.settings.approval_timeout())
            .await?
        {
            return Err(MarketError::AgreementNotApproved);
        }
        Ok(Agreement::new(handle, offer.data.clone(), self.bus.clone()))
    }

    /// One listener for the whole pool. Removing an agreement from the
    /// registry before terminating it makes the terminate-on-release
    /// exactly-once: a second release for the same id finds nothing.
    fn spawn_release_listener(
        live: Arc<ResourceRegistry<AgreementId, Agreement>>,
        bus: EventBus,
    ) {
        let mut events = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(MarketEvent::AgreementReleased { agreement_id }) => {
                        let Some(agreement) = live.remove(&agreement_id) else {
                            continue;
                        };
                        if let Err(e) = agreement.terminate("released").await {
                            tracing::warn!(%agreement_id, error = %e, "terminate on release failed");
                        }
                    }
                    // Terminated through some other path: just stop tracking.
                    Ok(MarketEvent::AgreementTerminated { agreement_id, .. }) => {
                        live.remove(&agreement_id);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "release listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
}
