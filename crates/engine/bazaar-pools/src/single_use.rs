use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use bazaar_types::{
    Activity, ActivitySource, Command, EventBus, MarketError, MarketEvent, PoolSettings,
};

use crate::agreement::AgreementPool;

/// Caller-supplied preparation or release step run against an activity.
pub type ActivityRoutine =
    Arc<dyn Fn(Activity) -> BoxFuture<'static, Result<(), MarketError>> + Send + Sync>;

/// Deploy-and-start preparation, the usual provider-side warmup.
pub fn default_prepare(timeout: Duration) -> ActivityRoutine {
    Arc::new(move |activity: Activity| {
        Box::pin(async move {
            let batch = activity
                .execute_batch(vec![Command::Deploy, Command::Start])
                .await?;
            let results = batch.wait(timeout).await?;
            if let Some(failed) = results.iter().find(|r| !r.success) {
                return Err(MarketError::BatchFailed(format!(
                    "prepare command {} failed",
                    failed.index
                )));
            }
            Ok(())
        })
    })
}

fn default_release() -> ActivityRoutine {
    Arc::new(|activity: Activity| Box::pin(async move { activity.destroy().await }))
}

/// Hands out one prepared activity per agreement; a released activity is
/// permanently retired along with its agreement.
pub struct SingleUseActivityPool {
    agreements: Arc<AgreementPool>,
    prepare: ActivityRoutine,
    release: ActivityRoutine,
    bus: EventBus,
}

impl SingleUseActivityPool {
    pub fn new(agreements: Arc<AgreementPool>, settings: &PoolSettings, bus: EventBus) -> Self {
        Self {
            agreements,
            prepare: default_prepare(settings.prepare_timeout()),
            release: default_release(),
            bus,
        }
    }

    pub fn with_prepare(mut self, prepare: ActivityRoutine) -> Self {
        self.prepare = prepare;
        self
    }

    pub fn with_release(mut self, release: ActivityRoutine) -> Self {
        self.release = release;
        self
    }

    fn release_agreement(&self, activity: &Activity) {
        self.bus.emit(MarketEvent::AgreementReleased {
            agreement_id: activity.agreement_id().clone(),
        });
    }
}

#[async_trait]
impl ActivitySource for SingleUseActivityPool {
    /// Acquires an agreement, creates an activity on it and runs the
    /// prepare routine. Any failure releases that agreement and retries
    /// with the next one.
    async fn get_activity(&self) -> Result<Activity, MarketError> {
        loop {
            let agreement = self.agreements.get_agreement().await?;
            let activity = match agreement.create_activity().await {
                Ok(activity) => activity,
                Err(e) => {
                    tracing::debug!(
                        agreement_id = %agreement.id(),
                        error = %e,
                        "activity creation failed, releasing agreement"
                    );
                    self.bus.emit(MarketEvent::AgreementReleased {
                        agreement_id: agreement.id(),
                    });
                    continue;
                }
            };

            match (self.prepare)(activity.clone()).await {
                Ok(()) => {
                    tracing::debug!(activity_id = %activity.id(), "activity prepared");
                    return Ok(activity);
                }
                Err(e) => {
                    tracing::warn!(
                        activity_id = %activity.id(),
                        error = %e,
                        "prepare failed, releasing agreement"
                    );
                    if let Err(e) = activity.destroy().await {
                        tracing::debug!(activity_id = %activity.id(), error = %e, "destroy after failed prepare");
                    }
                    self.release_agreement(&activity);
                }
            }
        }
    }

    async fn release_activity(&self, activity: Activity) -> Result<(), MarketError> {
        if let Err(e) = (self.release)(activity.clone()).await {
            tracing::warn!(activity_id = %activity.id(), error = %e, "release routine failed");
        }
        self.release_agreement(&activity);
        Ok(())
    }

    async fn teardown(&self, activity: Activity) -> Result<(), MarketError> {
        if let Err(e) = activity.destroy().await {
            tracing::debug!(activity_id = %activity.id(), error = %e, "destroy during teardown");
        }
        self.release_agreement(&activity);
        Ok(())
    }
}
