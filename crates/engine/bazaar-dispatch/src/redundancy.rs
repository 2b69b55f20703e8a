use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use bazaar_types::DispatchSettings;

use crate::dowork::{DoWork, Work};
use crate::result::{WorkError, WorkResult};

/// Launches `size` concurrent attempts of the same unit of work and returns
/// whichever finishes first. The losers are aborted and awaited before
/// returning, so no stray attempt outlives the call.
pub struct Redundancy<D> {
    inner: Arc<D>,
    size: usize,
}

impl<D> Redundancy<D> {
    pub fn new(inner: D, size: usize) -> Self {
        Self {
            inner: Arc::new(inner),
            size: size.max(1),
        }
    }

    pub fn from_settings(inner: D, settings: &DispatchSettings) -> Self {
        Self::new(inner, settings.redundancy_size)
    }
}

#[async_trait]
impl<D: DoWork + 'static> DoWork for Redundancy<D> {
    async fn do_work(&self, work: &Work) -> WorkResult {
        let mut attempts = JoinSet::new();
        for _ in 0..self.size {
            let inner = Arc::clone(&self.inner);
            let work = Arc::clone(work);
            attempts.spawn(async move { inner.do_work(&work).await });
        }

        let winner = loop {
            match attempts.join_next().await {
                Some(Ok(result)) => break result,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "redundant attempt panicked");
                }
                None => {
                    return WorkResult::failed(WorkError::Execution(
                        "every redundant attempt panicked".into(),
                    ))
                }
            }
        };

        // First completion wins; cancel the rest and drain them, swallowing
        // their cancellation.
        attempts.abort_all();
        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::warn!(error = %e, "redundant attempt panicked"),
            }
        }

        winner
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use bazaar_types::testing::MockProvider;

    use crate::dowork::PoolDispatcher;
    use crate::testing_support::single_use_source;
    use crate::work;

    use super::*;

    struct StaggeredDispatcher {
        launched: AtomicU32,
        finished: Arc<AtomicU32>,
    }

    #[async_trait]
    impl DoWork for StaggeredDispatcher {
        async fn do_work(&self, _work: &Work) -> WorkResult {
            let attempt = self.launched.fetch_add(1, Ordering::SeqCst) + 1;
            // Attempt #2 is the fast one.
            let delay_ms = if attempt == 2 { 10 } else { 1_000 };
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            WorkResult::ok(serde_json::json!(attempt))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_completion_wins_and_the_rest_are_cancelled() {
        let finished = Arc::new(AtomicU32::new(0));
        let redundancy = Redundancy::new(
            StaggeredDispatcher {
                launched: AtomicU32::new(0),
                finished: Arc::clone(&finished),
            },
            3,
        );

        let unit = work(|_ctx| async move { WorkResult::default() });
        let result = redundancy.do_work(&unit).await;

        assert_eq!(result.result, Some(serde_json::json!(2)));
        // The two slow attempts were aborted before completing.
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn an_aborted_attempt_still_disposes_of_its_activity() {
        let provider = MockProvider::new("provider-1");
        let settings = DispatchSettings {
            redundancy_size: 2,
            ..DispatchSettings::default()
        };
        let redundancy = Redundancy::from_settings(
            PoolDispatcher::new(single_use_source(&provider, 4).await),
            &settings,
        );

        let launched = Arc::new(AtomicU32::new(0));
        let unit = {
            let launched = Arc::clone(&launched);
            work(move |_ctx| {
                let attempt = launched.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    // The first attempt to start is the slow one and loses.
                    let delay = if attempt == 1 {
                        Duration::from_secs(60)
                    } else {
                        Duration::from_millis(10)
                    };
                    tokio::time::sleep(delay).await;
                    WorkResult::ok(serde_json::json!(attempt))
                }
            })
        };

        let result = redundancy.do_work(&unit).await;
        assert!(result.is_ok());

        // The winner's activity is released (and destroyed by the
        // single-use source); the aborted loser's must be torn down too.
        for _ in 0..100 {
            if provider.destroyed_activities().len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(provider.destroyed_activities().len(), 2);
    }
}
