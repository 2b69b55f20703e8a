use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::activity::{Activity, ActivityId};
use crate::agreement::AgreementId;
use crate::error::MarketError;
use crate::payment::{DebitNote, Invoice};
use crate::proposal::{Properties, ProposalData, ProposalId, ProviderId};

/// One command executed inside an activity. The concrete execution protocol
/// is the activity collaborator's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    Deploy,
    Start,
    Run { command: String, args: Vec<String> },
    Transfer { from: String, to: String },
    Stop,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandResult {
    pub index: usize,
    pub success: bool,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub message: Option<String>,
}

/// Market collaborator view of one proposal.
#[async_trait]
pub trait ProposalHandle: Send + Sync {
    fn id(&self) -> ProposalId;

    async fn data(&self) -> Result<ProposalData, MarketError>;

    /// Sends the requestor's (counter-)proposal in response to this offer.
    async fn respond(
        &self,
        properties: &Properties,
        constraints: &str,
    ) -> Result<Arc<dyn ProposalHandle>, MarketError>;

    /// Waits for exactly one provider response to this demand proposal.
    /// Callers bound this with their own timeout.
    async fn wait_for_response(&self) -> Result<Arc<dyn ProposalHandle>, MarketError>;

    async fn reject(&self, reason: &str) -> Result<(), MarketError>;

    async fn create_agreement(&self) -> Result<Arc<dyn AgreementHandle>, MarketError>;
}

/// Market collaborator view of one agreement.
#[async_trait]
pub trait AgreementHandle: Send + Sync {
    fn id(&self) -> AgreementId;

    fn provider(&self) -> ProviderId;

    async fn confirm(&self) -> Result<(), MarketError>;

    /// Resolves to `true` once the provider approves, `false` on explicit
    /// rejection. A timeout is converted into `Ok(false)` by implementors
    /// or surfaced as `MarketError::Api`.
    async fn wait_for_approval(&self, timeout: Duration) -> Result<bool, MarketError>;

    /// Terminating an already-terminated agreement yields
    /// `MarketError::AlreadyClosed`, which callers treat as success.
    async fn terminate(&self, reason: &str) -> Result<(), MarketError>;

    async fn create_activity(&self) -> Result<Arc<dyn ActivityHandle>, MarketError>;
}

/// Activity collaborator view of one execution context.
#[async_trait]
pub trait ActivityHandle: Send + Sync {
    fn id(&self) -> ActivityId;

    async fn execute_batch(
        &self,
        commands: Vec<Command>,
    ) -> Result<Arc<dyn BatchHandle>, MarketError>;

    async fn destroy(&self) -> Result<(), MarketError>;
}

/// One batch of commands running inside an activity.
#[async_trait]
pub trait BatchHandle: Send + Sync {
    /// Waits for the whole batch to finish. Callers bound this with their
    /// own timeout and convert elapsed time into `BatchTimedOut`.
    async fn wait(&self) -> Result<Vec<CommandResult>, MarketError>;
}

/// Payment collaborator: accepting validated cost documents.
#[async_trait]
pub trait PaymentApi: Send + Sync {
    async fn accept_debit_note(&self, note: &DebitNote, amount: f64) -> Result<(), MarketError>;

    async fn accept_invoice(&self, invoice: &Invoice, amount: f64) -> Result<(), MarketError>;
}

/// A source of prepared activities, as consumed by the work dispatcher.
///
/// `release_activity` hands a healthy activity back for reuse; `teardown`
/// destroys the activity and releases its agreement, for use after a failure
/// or when the provider is no longer useful.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    async fn get_activity(&self) -> Result<Activity, MarketError>;

    async fn release_activity(&self, activity: Activity) -> Result<(), MarketError>;

    async fn teardown(&self, activity: Activity) -> Result<(), MarketError>;
}
