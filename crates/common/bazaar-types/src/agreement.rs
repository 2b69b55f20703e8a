use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::Activity;
use crate::api::AgreementHandle;
use crate::error::MarketError;
use crate::events::{EventBus, MarketEvent};
use crate::proposal::{ProposalData, ProviderId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgreementId(pub String);

impl fmt::Display for AgreementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A confirmed, provider-approved commitment derived from a proposal.
///
/// The agreement keeps a snapshot of the proposal it was promoted from (a
/// non-owning back-reference; the proposal itself is owned by its demand).
/// Termination is idempotent: the first call terminates and emits
/// `AgreementTerminated`, later calls are no-ops.
#[derive(Clone)]
pub struct Agreement {
    handle: Arc<dyn AgreementHandle>,
    proposal: Arc<ProposalData>,
    started_at: DateTime<Utc>,
    terminated: Arc<AtomicBool>,
    event_bus: EventBus,
}

impl Agreement {
    pub fn new(
        handle: Arc<dyn AgreementHandle>,
        proposal: ProposalData,
        event_bus: EventBus,
    ) -> Self {
        Self {
            handle,
            proposal: Arc::new(proposal),
            started_at: Utc::now(),
            terminated: Arc::new(AtomicBool::new(false)),
            event_bus,
        }
    }

    pub fn id(&self) -> AgreementId {
        self.handle.id()
    }

    pub fn provider(&self) -> ProviderId {
        self.handle.provider()
    }

    /// The proposal this agreement was created from.
    pub fn proposal(&self) -> &ProposalData {
        &self.proposal
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub async fn create_activity(&self) -> Result<Activity, MarketError> {
        if self.is_terminated() {
            return Err(MarketError::AlreadyClosed);
        }

        let handle = self
            .handle
            .create_activity()
            .await
            .map_err(|e| MarketError::ActivityCreationFailed(e.to_string()))?;

        let activity = Activity::new(
            handle,
            self.id(),
            self.provider(),
            self.event_bus.clone(),
        );

        self.event_bus.emit(MarketEvent::NewActivity {
            activity_id: activity.id(),
            agreement_id: self.id(),
        });

        Ok(activity)
    }

    /// Terminates the agreement on the provider side, exactly once.
    ///
    /// A remote "already terminated" response is treated as success so that
    /// races with provider-side termination do not surface as errors.
    pub async fn terminate(&self, reason: &str) -> Result<(), MarketError> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            tracing::debug!(agreement_id = %self.id(), "agreement already terminated");
            return Ok(());
        }

        match self.handle.terminate(reason).await {
            Ok(()) | Err(MarketError::AlreadyClosed) => {}
            Err(e) => {
                tracing::warn!(agreement_id = %self.id(), error = %e, "terminate failed");
                return Err(e);
            }
        }

        tracing::info!(agreement_id = %self.id(), reason, "agreement terminated");
        self.event_bus.emit(MarketEvent::AgreementTerminated {
            agreement_id: self.id(),
            reason: reason.to_string(),
        });

        Ok(())
    }
}

impl fmt::Debug for Agreement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agreement")
            .field("id", &self.id())
            .field("provider", &self.provider())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
