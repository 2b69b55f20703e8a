use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityId;
use crate::agreement::AgreementId;

/// A periodic partial charge issued by a provider mid-agreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebitNote {
    pub id: String,
    pub agreement_id: AgreementId,
    pub activity_id: Option<ActivityId>,
    /// Running total claimed by the provider, not the increment.
    pub total_amount_due: f64,
    pub timestamp: DateTime<Utc>,
}

/// The final charge for an agreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub agreement_id: AgreementId,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}
