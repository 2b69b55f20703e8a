//! Full requestor-side flow against an in-memory market: initial offers
//! are negotiated, reordered by score, promoted to agreements and used to
//! run work, with retry on top.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use bazaar_dispatch::{work, DoWork, PoolDispatcher, Retry, WorkError, WorkResult};
use bazaar_negotiation::{NegotiationEngine, PropertyOverride};
use bazaar_pools::{AgreementPool, SingleUseActivityPool};
use bazaar_selection::{PropertyLerpScorer, ScoringBuffer, WeightedScorer};
use bazaar_types::testing::{props, MockProvider};
use bazaar_types::{
    Command, DemandState, DispatchSettings, EventBus, NegotiationSettings, Offer, PoolSettings,
};

async fn offer_from(provider: &MockProvider) -> Offer {
    let handle = provider.initial_proposal();
    let data = handle.data().await.unwrap();
    Offer::new(handle, data)
}

#[tokio::test]
async fn negotiated_scored_agreement_runs_work() {
    let bus = EventBus::new();

    // Two providers; the pricier one scores lower and should lose.
    let cheap = MockProvider::new("cheap");
    cheap.set_initial_properties(props(&[("quality", json!(0.9))]));
    let pricey = MockProvider::new("pricey");
    pricey.set_initial_properties(props(&[("quality", json!(0.2))]));

    let (offers_tx, offers_rx) = mpsc::channel(4);
    offers_tx.send(offer_from(&pricey).await).await.unwrap();
    offers_tx.send(offer_from(&cheap).await).await.unwrap();
    drop(offers_tx);

    let engine = Arc::new(NegotiationEngine::new(
        vec![Arc::new(PropertyOverride::new("runtime", json!("vm")))],
        NegotiationSettings::default(),
    ));
    let negotiated = engine.run(DemandState::default(), offers_rx);

    let selected = ScoringBuffer::new(
        vec![WeightedScorer::new(PropertyLerpScorer::new(
            "quality", -1.0, 0.0, 1.0,
        ))],
        2,
        Duration::from_secs(5),
        Duration::ZERO,
    )
    .run(negotiated);

    let settings = PoolSettings::default();
    let agreements = Arc::new(AgreementPool::new(selected, settings.clone(), bus.clone()));
    let activities = Arc::new(SingleUseActivityPool::new(agreements, &settings, bus));

    let dispatcher = Retry::from_settings(
        PoolDispatcher::new(activities),
        &DispatchSettings {
            retries: 2,
            ..DispatchSettings::default()
        },
    );
    let unit = work(|ctx| async move {
        let batch = match ctx
            .activity
            .execute_batch(vec![Command::Run {
                command: "compute".into(),
                args: vec![],
            }])
            .await
        {
            Ok(batch) => batch,
            Err(e) => return WorkResult::failed(WorkError::Market(e)),
        };
        match batch.wait(Duration::from_secs(5)).await {
            Ok(_) => WorkResult::ok(json!({"provider": ctx.activity.provider().to_string()})),
            Err(e) => WorkResult::failed(WorkError::Market(e)),
        }
    });

    let result = dispatcher.do_work(&unit).await;
    assert!(result.is_ok(), "work failed: {:?}", result.error);
    // The better-scored provider won the work.
    assert_eq!(result.result, Some(json!({"provider": "cheap"})));
    assert_eq!(result.extras["retry"]["attempts"], json!(1));
}
