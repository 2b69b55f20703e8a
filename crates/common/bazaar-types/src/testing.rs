//! In-memory market, activity and payment collaborators for tests.
//!
//! `MockProvider` plays the provider side of the negotiation protocol with a
//! scripted reply strategy, approves (or rejects) agreements, runs batches
//! and records every reject/terminate/destroy call for assertions.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::activity::ActivityId;
use crate::agreement::AgreementId;
use crate::api::{
    ActivityHandle, AgreementHandle, BatchHandle, Command, CommandResult, PaymentApi,
    ProposalHandle,
};
use crate::error::MarketError;
use crate::payment::{DebitNote, Invoice};
use crate::proposal::{Properties, ProposalData, ProposalId, ProposalState, ProviderId};

/// What the scripted provider does with the requestor's demand proposal.
pub enum ProviderReply {
    /// Echo the demanded properties back: the negotiation converges.
    Accept,
    /// Counter with the given properties (overlaid on the provider's
    /// initial properties).
    Counter(Properties),
    /// Never answer; the requestor's response wait times out.
    Silent,
}

type ReplyFn = Box<dyn Fn(u32, &Properties) -> ProviderReply + Send + Sync>;

enum BatchBehavior {
    Succeed,
    Fail(String),
    Hang,
}

struct ProviderInner {
    id: ProviderId,
    initial_properties: Mutex<Properties>,
    reply: Mutex<ReplyFn>,
    approve_agreements: AtomicBool,
    fail_confirms: AtomicU32,
    fail_activity_creations: AtomicU32,
    batch_behavior: Mutex<BatchBehavior>,
    rejections: Mutex<Vec<String>>,
    terminations: Mutex<Vec<(AgreementId, String)>>,
    destroyed_activities: Mutex<Vec<ActivityId>>,
    seq: AtomicU64,
}

impl ProviderInner {
    fn next_id(&self, prefix: &str) -> String {
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{}-{n}", self.id)
    }
}

#[derive(Clone)]
pub struct MockProvider {
    inner: Arc<ProviderInner>,
}

impl MockProvider {
    pub fn new(id: &str) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                id: ProviderId(id.to_string()),
                initial_properties: Mutex::new(Properties::new()),
                reply: Mutex::new(Box::new(|_, _| ProviderReply::Accept)),
                approve_agreements: AtomicBool::new(true),
                fail_confirms: AtomicU32::new(0),
                fail_activity_creations: AtomicU32::new(0),
                batch_behavior: Mutex::new(BatchBehavior::Succeed),
                rejections: Mutex::new(Vec::new()),
                terminations: Mutex::new(Vec::new()),
                destroyed_activities: Mutex::new(Vec::new()),
                seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> ProviderId {
        self.inner.id.clone()
    }

    pub fn set_initial_properties(&self, properties: Properties) {
        *self.inner.initial_properties.lock().unwrap() = properties;
    }

    pub fn set_reply(
        &self,
        reply: impl Fn(u32, &Properties) -> ProviderReply + Send + Sync + 'static,
    ) {
        *self.inner.reply.lock().unwrap() = Box::new(reply);
    }

    pub fn reject_approvals(&self) {
        self.inner.approve_agreements.store(false, Ordering::SeqCst);
    }

    /// The next `n` agreement confirmations fail with an api error.
    pub fn fail_confirms(&self, n: u32) {
        self.inner.fail_confirms.store(n, Ordering::SeqCst);
    }

    /// The next `n` activity creations fail with an api error.
    pub fn fail_activity_creations(&self, n: u32) {
        self.inner
            .fail_activity_creations
            .store(n, Ordering::SeqCst);
    }

    pub fn fail_batches(&self, message: &str) {
        *self.inner.batch_behavior.lock().unwrap() = BatchBehavior::Fail(message.to_string());
    }

    pub fn hang_batches(&self) {
        *self.inner.batch_behavior.lock().unwrap() = BatchBehavior::Hang;
    }

    /// A fresh initial proposal from this provider.
    pub fn initial_proposal(&self) -> Arc<dyn ProposalHandle> {
        let data = ProposalData {
            id: ProposalId(self.inner.next_id("proposal")),
            issuer: self.inner.id.clone(),
            state: ProposalState::Initial,
            properties: self.inner.initial_properties.lock().unwrap().clone(),
            constraints: String::new(),
            prev_proposal_id: None,
            timestamp: Utc::now(),
        };
        Arc::new(MockProposal {
            provider: Arc::clone(&self.inner),
            data,
            demanded: None,
            round: 0,
        })
    }

    pub fn rejections(&self) -> Vec<String> {
        self.inner.rejections.lock().unwrap().clone()
    }

    pub fn terminations(&self) -> Vec<(AgreementId, String)> {
        self.inner.terminations.lock().unwrap().clone()
    }

    pub fn destroyed_activities(&self) -> Vec<ActivityId> {
        self.inner.destroyed_activities.lock().unwrap().clone()
    }
}

struct MockProposal {
    provider: Arc<ProviderInner>,
    data: ProposalData,
    /// Present on demand-side proposals: the properties the requestor asked
    /// for, which the reply strategy answers to.
    demanded: Option<(Properties, String)>,
    round: u32,
}

#[async_trait]
impl ProposalHandle for MockProposal {
    fn id(&self) -> ProposalId {
        self.data.id.clone()
    }

    async fn data(&self) -> Result<ProposalData, MarketError> {
        Ok(self.data.clone())
    }

    async fn respond(
        &self,
        properties: &Properties,
        constraints: &str,
    ) -> Result<Arc<dyn ProposalHandle>, MarketError> {
        let data = ProposalData {
            id: ProposalId(self.provider.next_id("demand")),
            issuer: ProviderId("requestor".to_string()),
            state: ProposalState::Draft,
            properties: properties.clone(),
            constraints: constraints.to_string(),
            prev_proposal_id: Some(self.data.id.clone()),
            timestamp: Utc::now(),
        };
        Ok(Arc::new(MockProposal {
            provider: Arc::clone(&self.provider),
            data,
            demanded: Some((properties.clone(), constraints.to_string())),
            round: self.round + 1,
        }))
    }

    async fn wait_for_response(&self) -> Result<Arc<dyn ProposalHandle>, MarketError> {
        let (demanded_props, _) = self
            .demanded
            .as_ref()
            .ok_or_else(|| MarketError::Api("not a demand proposal".to_string()))?;

        let reply = (self.provider.reply.lock().unwrap())(self.round, demanded_props);

        let mut properties = self.provider.initial_properties.lock().unwrap().clone();
        match reply {
            ProviderReply::Accept => {
                properties.extend(demanded_props.clone());
            }
            ProviderReply::Counter(counter) => {
                properties.extend(counter);
            }
            ProviderReply::Silent => return std::future::pending().await,
        }

        let data = ProposalData {
            id: ProposalId(self.provider.next_id("proposal")),
            issuer: self.provider.id.clone(),
            state: ProposalState::Draft,
            properties,
            constraints: String::new(),
            prev_proposal_id: Some(self.data.id.clone()),
            timestamp: Utc::now(),
        };
        Ok(Arc::new(MockProposal {
            provider: Arc::clone(&self.provider),
            data,
            demanded: None,
            round: self.round,
        }))
    }

    async fn reject(&self, reason: &str) -> Result<(), MarketError> {
        self.provider
            .rejections
            .lock()
            .unwrap()
            .push(reason.to_string());
        Ok(())
    }

    async fn create_agreement(&self) -> Result<Arc<dyn AgreementHandle>, MarketError> {
        Ok(Arc::new(MockAgreement {
            provider: Arc::clone(&self.provider),
            id: AgreementId(self.provider.next_id("agreement")),
            terminated: AtomicBool::new(false),
        }))
    }
}

struct MockAgreement {
    provider: Arc<ProviderInner>,
    id: AgreementId,
    terminated: AtomicBool,
}

#[async_trait]
impl AgreementHandle for MockAgreement {
    fn id(&self) -> AgreementId {
        self.id.clone()
    }

    fn provider(&self) -> ProviderId {
        self.provider.id.clone()
    }

    async fn confirm(&self) -> Result<(), MarketError> {
        let remaining = self.provider.fail_confirms.load(Ordering::SeqCst);
        if remaining > 0 {
            self.provider
                .fail_confirms
                .store(remaining - 1, Ordering::SeqCst);
            return Err(MarketError::Api("confirm failed".to_string()));
        }
        Ok(())
    }

    async fn wait_for_approval(&self, _timeout: Duration) -> Result<bool, MarketError> {
        Ok(self.provider.approve_agreements.load(Ordering::SeqCst))
    }

    async fn terminate(&self, reason: &str) -> Result<(), MarketError> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Err(MarketError::AlreadyClosed);
        }
        self.provider
            .terminations
            .lock()
            .unwrap()
            .push((self.id.clone(), reason.to_string()));
        Ok(())
    }

    async fn create_activity(&self) -> Result<Arc<dyn ActivityHandle>, MarketError> {
        let remaining = self.provider.fail_activity_creations.load(Ordering::SeqCst);
        if remaining > 0 {
            self.provider
                .fail_activity_creations
                .store(remaining - 1, Ordering::SeqCst);
            return Err(MarketError::Api("activity creation failed".to_string()));
        }
        Ok(Arc::new(MockActivity {
            provider: Arc::clone(&self.provider),
            id: ActivityId(self.provider.next_id("activity")),
            destroyed: AtomicBool::new(false),
        }))
    }
}

struct MockActivity {
    provider: Arc<ProviderInner>,
    id: ActivityId,
    destroyed: AtomicBool,
}

#[async_trait]
impl ActivityHandle for MockActivity {
    fn id(&self) -> ActivityId {
        self.id.clone()
    }

    async fn execute_batch(
        &self,
        commands: Vec<Command>,
    ) -> Result<Arc<dyn BatchHandle>, MarketError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(MarketError::AlreadyClosed);
        }
        Ok(Arc::new(MockBatch {
            provider: Arc::clone(&self.provider),
            command_count: commands.len(),
        }))
    }

    async fn destroy(&self) -> Result<(), MarketError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Err(MarketError::AlreadyClosed);
        }
        self.provider
            .destroyed_activities
            .lock()
            .unwrap()
            .push(self.id.clone());
        Ok(())
    }
}

struct MockBatch {
    provider: Arc<ProviderInner>,
    command_count: usize,
}

#[async_trait]
impl BatchHandle for MockBatch {
    async fn wait(&self) -> Result<Vec<CommandResult>, MarketError> {
        // Resolve the verdict in a scope of its own; the lock must not be
        // held across an await.
        let verdict = {
            let behavior = self.provider.batch_behavior.lock().unwrap();
            match &*behavior {
                BatchBehavior::Succeed => Some(Ok((0..self.command_count)
                    .map(|index| CommandResult {
                        index,
                        success: true,
                        stdout: Some(String::new()),
                        stderr: None,
                        message: None,
                    })
                    .collect())),
                BatchBehavior::Fail(message) => {
                    Some(Err(MarketError::BatchFailed(message.clone())))
                }
                BatchBehavior::Hang => None,
            }
        };
        match verdict {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }
}

/// Payment collaborator that records every accepted document.
#[derive(Default)]
pub struct MockPaymentApi {
    pub accepted_debit_notes: Mutex<Vec<(String, f64)>>,
    pub accepted_invoices: Mutex<Vec<(String, f64)>>,
}

#[async_trait]
impl PaymentApi for MockPaymentApi {
    async fn accept_debit_note(&self, note: &DebitNote, amount: f64) -> Result<(), MarketError> {
        self.accepted_debit_notes
            .lock()
            .unwrap()
            .push((note.id.clone(), amount));
        Ok(())
    }

    async fn accept_invoice(&self, invoice: &Invoice, amount: f64) -> Result<(), MarketError> {
        self.accepted_invoices
            .lock()
            .unwrap()
            .push((invoice.id.clone(), amount));
        Ok(())
    }
}

/// Convenience constructor for property maps in tests.
pub fn props(pairs: &[(&str, serde_json::Value)]) -> Properties {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Convenience constructor for a draft proposal snapshot in scorer tests.
pub fn proposal_data(issuer: &str, properties: Properties) -> ProposalData {
    ProposalData {
        id: ProposalId::generate(),
        issuer: ProviderId(issuer.to_string()),
        state: ProposalState::Draft,
        properties,
        constraints: String::new(),
        prev_proposal_id: Some(ProposalId::generate()),
        timestamp: Utc::now(),
    }
}
