//! Shared wiring for dispatcher tests: a single-use activity source fed
//! from a fixed number of offers by one mock provider.

use std::sync::Arc;

use tokio::sync::mpsc;

use bazaar_pools::{AgreementPool, SingleUseActivityPool};
use bazaar_types::testing::MockProvider;
use bazaar_types::{ActivitySource, EventBus, Offer, PoolSettings};

pub async fn single_use_source(provider: &MockProvider, offers: usize) -> Arc<dyn ActivitySource> {
    let (tx, rx) = mpsc::channel(offers.max(1));
    for _ in 0..offers {
        let handle = provider.initial_proposal();
        let data = handle.data().await.unwrap();
        tx.send(Offer::new(handle, data)).await.unwrap();
    }
    // Keep the stream open for the test's lifetime.
    std::mem::forget(tx);

    let bus = EventBus::new();
    let settings = PoolSettings::default();
    let agreements = Arc::new(AgreementPool::new(rx, settings.clone(), bus.clone()));
    Arc::new(SingleUseActivityPool::new(agreements, &settings, bus))
}

/// One offer per named provider; the stream closes after the last offer so
/// consumers observe exhaustion instead of blocking.
pub async fn multi_provider_source(
    names: &[&str],
) -> (Arc<dyn ActivitySource>, Vec<MockProvider>) {
    let (tx, rx) = mpsc::channel(names.len().max(1));
    let mut mocks = Vec::new();
    for name in names {
        let provider = MockProvider::new(name);
        let handle = provider.initial_proposal();
        let data = handle.data().await.unwrap();
        tx.send(Offer::new(handle, data)).await.unwrap();
        mocks.push(provider);
    }
    drop(tx);

    let bus = EventBus::new();
    let settings = PoolSettings::default();
    let agreements = Arc::new(AgreementPool::new(rx, settings.clone(), bus.clone()));
    (
        Arc::new(SingleUseActivityPool::new(agreements, &settings, bus)),
        mocks,
    )
}
