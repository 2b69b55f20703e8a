use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::activity::ActivityId;
use crate::agreement::AgreementId;
use crate::payment::{DebitNote, Invoice};
use crate::proposal::{ProposalData, ProviderId};

const DEFAULT_BUS_CAPACITY: usize = 256;

/// Events exchanged between the engine's components.
///
/// Delivery is at-least-once to every live subscriber, per-subscriber FIFO;
/// there is no ordering guarantee across subscribers.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    NewAgreement {
        agreement_id: AgreementId,
        provider: ProviderId,
        proposal: ProposalData,
        started_at: DateTime<Utc>,
    },
    /// The owner of an agreement is done with it; whoever registered the
    /// termination listener reacts exactly once.
    AgreementReleased {
        agreement_id: AgreementId,
    },
    AgreementTerminated {
        agreement_id: AgreementId,
        reason: String,
    },
    NewActivity {
        activity_id: ActivityId,
        agreement_id: AgreementId,
    },
    ActivityDestroyed {
        activity_id: ActivityId,
        agreement_id: AgreementId,
    },
    NewDebitNote(DebitNote),
    NewInvoice(Invoice),
    TaskRetired {
        task_id: String,
    },
}

/// Broadcast-based in-process event bus.
///
/// The underlying transport is a collaborator concern; this implementation
/// exists so the engine's components can be wired together in one process.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MarketEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emits an event to all current subscribers. An event with no
    /// subscribers is dropped silently.
    pub fn emit(&self, event: MarketEvent) {
        tracing::trace!(?event, "emitting event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
