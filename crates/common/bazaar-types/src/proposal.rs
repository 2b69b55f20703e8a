use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::ProposalHandle;

/// Requestor/provider property map. Values are JSON scalars or lists.
pub type Properties = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalId(pub String);

impl ProposalId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Proposal lifecycle. `Rejected`, `Accepted` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalState {
    Initial,
    Draft,
    Rejected,
    Accepted,
    Expired,
}

/// One offer/counter-offer exchanged while negotiating a demand.
///
/// An `Initial` proposal is a direct child of a demand and carries no
/// `prev_proposal_id`; every later proposal points at the proposal it
/// responds to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalData {
    pub id: ProposalId,
    pub issuer: ProviderId,
    pub state: ProposalState,
    pub properties: Properties,
    pub constraints: String,
    pub prev_proposal_id: Option<ProposalId>,
    pub timestamp: DateTime<Utc>,
}

impl ProposalData {
    pub fn is_initial(&self) -> bool {
        self.state == ProposalState::Initial
    }

    /// Checks the parent-link invariant: an initial proposal has no parent
    /// proposal, every other proposal has exactly one.
    pub fn is_well_formed(&self) -> bool {
        match self.state {
            ProposalState::Initial => self.prev_proposal_id.is_none(),
            _ => self.prev_proposal_id.is_some(),
        }
    }

    /// Numeric property lookup, used by scorers and the payment guard.
    pub fn property_f64(&self, key: &str) -> Option<f64> {
        self.properties.get(key).and_then(|v| v.as_f64())
    }
}

/// A negotiated proposal flowing through the pipeline: the remote handle
/// paired with a local snapshot of its data.
#[derive(Clone)]
pub struct Offer {
    pub handle: Arc<dyn ProposalHandle>,
    pub data: ProposalData,
}

impl Offer {
    pub fn new(handle: Arc<dyn ProposalHandle>, data: ProposalData) -> Self {
        Self { handle, data }
    }

    pub fn id(&self) -> &ProposalId {
        &self.data.id
    }

    pub fn issuer(&self) -> &ProviderId {
        &self.data.issuer
    }
}

impl fmt::Debug for Offer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Offer")
            .field("id", &self.data.id)
            .field("issuer", &self.data.issuer)
            .field("state", &self.data.state)
            .finish()
    }
}
