use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::agreement::AgreementId;
use crate::api::{ActivityHandle, BatchHandle, Command, CommandResult};
use crate::error::MarketError;
use crate::events::{EventBus, MarketEvent};
use crate::proposal::ProviderId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub String);

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ActivityState {
    running_batches: watch::Sender<u32>,
    destroyed: watch::Sender<bool>,
}

/// A live execution context bound to exactly one agreement.
///
/// Three mutually exclusive derived states: *idle* (no running batches),
/// *busy* (at least one running batch), *destroyed* (terminal, one-way).
/// The running-batch counter changes by exactly one per transition and
/// never goes negative.
#[derive(Clone)]
pub struct Activity {
    handle: Arc<dyn ActivityHandle>,
    agreement_id: AgreementId,
    provider: ProviderId,
    state: Arc<ActivityState>,
    event_bus: EventBus,
}

impl Activity {
    pub fn new(
        handle: Arc<dyn ActivityHandle>,
        agreement_id: AgreementId,
        provider: ProviderId,
        event_bus: EventBus,
    ) -> Self {
        let (running_batches, _) = watch::channel(0u32);
        let (destroyed, _) = watch::channel(false);
        Self {
            handle,
            agreement_id,
            provider,
            state: Arc::new(ActivityState {
                running_batches,
                destroyed,
            }),
            event_bus,
        }
    }

    pub fn id(&self) -> ActivityId {
        self.handle.id()
    }

    pub fn agreement_id(&self) -> &AgreementId {
        &self.agreement_id
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn running_batches(&self) -> u32 {
        *self.state.running_batches.borrow()
    }

    pub fn is_idle(&self) -> bool {
        !self.is_destroyed() && self.running_batches() == 0
    }

    pub fn is_busy(&self) -> bool {
        !self.is_destroyed() && self.running_batches() > 0
    }

    pub fn is_destroyed(&self) -> bool {
        *self.state.destroyed.borrow()
    }

    pub async fn wait_idle(&self) {
        let mut rx = self.state.running_batches.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub async fn wait_busy(&self) {
        let mut rx = self.state.running_batches.subscribe();
        let _ = rx.wait_for(|n| *n > 0).await;
    }

    pub async fn wait_destroyed(&self) {
        let mut rx = self.state.destroyed.subscribe();
        let _ = rx.wait_for(|d| *d).await;
    }

    /// Starts a batch of commands. The activity counts as busy until the
    /// returned [`Batch`] is dropped.
    pub async fn execute_batch(&self, commands: Vec<Command>) -> Result<Batch, MarketError> {
        if self.is_destroyed() {
            return Err(MarketError::AlreadyClosed);
        }

        let handle = self
            .handle
            .execute_batch(commands)
            .await
            .map_err(|e| MarketError::BatchFailed(e.to_string()))?;

        self.state.running_batches.send_modify(|n| *n += 1);

        Ok(Batch {
            handle,
            state: Arc::clone(&self.state),
        })
    }

    /// Destroys the activity, exactly once. Later calls are no-ops, and a
    /// destroyed activity never becomes idle or busy again.
    pub async fn destroy(&self) -> Result<(), MarketError> {
        if self.state.destroyed.send_replace(true) {
            tracing::debug!(activity_id = %self.id(), "activity already destroyed");
            return Ok(());
        }

        match self.handle.destroy().await {
            Ok(()) | Err(MarketError::AlreadyClosed) => {}
            Err(e) => {
                tracing::warn!(activity_id = %self.id(), error = %e, "destroy failed");
                return Err(e);
            }
        }

        tracing::info!(activity_id = %self.id(), "activity destroyed");
        self.event_bus.emit(MarketEvent::ActivityDestroyed {
            activity_id: self.id(),
            agreement_id: self.agreement_id.clone(),
        });

        Ok(())
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("id", &self.id())
            .field("agreement_id", &self.agreement_id)
            .field("running_batches", &self.running_batches())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// One running batch. Dropping the batch returns the activity toward idle.
pub struct Batch {
    handle: Arc<dyn BatchHandle>,
    state: Arc<ActivityState>,
}

impl Batch {
    /// Waits for the batch to complete, bounding the wait with `timeout`.
    pub async fn wait(self, timeout: Duration) -> Result<Vec<CommandResult>, MarketError> {
        match tokio::time::timeout(timeout, self.handle.wait()).await {
            Ok(Ok(results)) => Ok(results),
            Ok(Err(e)) => Err(MarketError::BatchFailed(e.to_string())),
            Err(_) => Err(MarketError::BatchTimedOut { timeout }),
        }
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        self.state
            .running_batches
            .send_modify(|n| *n = n.saturating_sub(1));
    }
}
