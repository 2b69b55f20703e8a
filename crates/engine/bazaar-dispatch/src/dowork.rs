use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use bazaar_types::{Activity, ActivitySource};

use crate::result::{WorkError, WorkResult};

/// Everything a unit of work gets to touch: the activity it runs on.
#[derive(Clone)]
pub struct WorkContext {
    pub activity: Activity,
}

/// A shareable async unit of work.
pub type Work = Arc<dyn Fn(WorkContext) -> BoxFuture<'static, WorkResult> + Send + Sync>;

/// Wraps an async closure into a [`Work`].
pub fn work<F, Fut>(f: F) -> Work
where
    F: Fn(WorkContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WorkResult> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

#[async_trait]
pub trait DoWork: Send + Sync {
    async fn do_work(&self, work: &Work) -> WorkResult;
}

/// Runs each unit of work on a fresh activity from the source.
///
/// A failed or panicked unit becomes a failed [`WorkResult`]; its activity
/// is torn down rather than returned, so no later unit inherits a provider
/// in an unknown state.
pub struct PoolDispatcher {
    source: Arc<dyn ActivitySource>,
}

impl PoolDispatcher {
    pub fn new(source: Arc<dyn ActivitySource>) -> Self {
        Self { source }
    }

    async fn dispose(&self, activity: Activity, healthy: bool) {
        let outcome = if healthy {
            self.source.release_activity(activity).await
        } else {
            self.source.teardown(activity).await
        };
        if let Err(e) = outcome {
            tracing::warn!(error = %e, healthy, "disposing of activity failed");
        }
    }
}

/// Aborts the spawned unit of work and tears its activity down if the
/// dispatcher future is dropped before it could dispose of the activity
/// itself. A redundant attempt that loses the race gets cancelled at the
/// await below; without this its activity would stay checked out forever.
struct AbandonGuard {
    armed: Option<(tokio::task::AbortHandle, Activity, Arc<dyn ActivitySource>)>,
}

impl AbandonGuard {
    fn disarm(&mut self) {
        self.armed = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if let Some((abort, activity, source)) = self.armed.take() {
            abort.abort();
            tokio::spawn(async move {
                let id = activity.id();
                if let Err(e) = source.teardown(activity).await {
                    tracing::warn!(activity_id = %id, error = %e, "teardown of abandoned activity failed");
                }
            });
        }
    }
}

#[async_trait]
impl DoWork for PoolDispatcher {
    async fn do_work(&self, work: &Work) -> WorkResult {
        let activity = match self.source.get_activity().await {
            Ok(activity) => activity,
            Err(e) => return WorkResult::failed(WorkError::Market(e)),
        };

        let ctx = WorkContext {
            activity: activity.clone(),
        };
        // Run in a task of its own so a panicking unit of work surfaces as
        // a failed result instead of unwinding through the dispatcher.
        let task = tokio::spawn((work)(ctx));
        let mut guard = AbandonGuard {
            armed: Some((
                task.abort_handle(),
                activity.clone(),
                Arc::clone(&self.source),
            )),
        };
        let result = match task.await {
            Ok(result) => result,
            Err(e) => WorkResult::failed(WorkError::Execution(format!("work panicked: {e}"))),
        };
        guard.disarm();

        self.dispose(activity, result.is_ok()).await;
        result
    }
}
