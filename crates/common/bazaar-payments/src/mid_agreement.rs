use async_trait::async_trait;
use serde_json::json;

use bazaar_negotiation::{NegotiationPlugin, ProposalRejection};
use bazaar_types::{DemandState, PaymentSettings, ProposalData};

pub const DEBIT_NOTE_INTERVAL_SEC: &str = "golem.com.scheme.payu.debit-note.interval-sec?";
pub const PAYMENT_TIMEOUT_SEC: &str = "golem.com.scheme.payu.payment-timeout-sec?";

/// Negotiates the mid-agreement payment cadence: how often the provider may
/// send debit notes and how long it gives the requestor to pay.
///
/// Starting from the requestor's optimal values, each round steps the demand
/// toward the provider's offer by a shrinking fraction of the gap, never
/// below the configured floor.
pub struct MidAgreementPaymentsNegotiator {
    settings: PaymentSettings,
    required: bool,
}

impl MidAgreementPaymentsNegotiator {
    pub fn new(settings: PaymentSettings) -> Self {
        Self {
            settings,
            required: true,
        }
    }

    /// Tolerates providers without mid-agreement payment support instead of
    /// vetoing them.
    pub fn optional(settings: PaymentSettings) -> Self {
        Self {
            settings,
            required: false,
        }
    }

    fn negotiate_field(
        &self,
        demand: &mut DemandState,
        offer: &ProposalData,
        key: &str,
        floor: i64,
        optimal: i64,
    ) -> Result<(), ProposalRejection> {
        let offered = offer.properties.get(key).and_then(|v| v.as_i64());
        let Some(offered) = offered else {
            if self.required {
                return Err(ProposalRejection::new(format!(
                    "offer does not support mid-agreement payments ({key} missing)"
                )));
            }
            demand.properties.remove(key);
            return Ok(());
        };

        let Some(demanded) = demand.property_i64(key) else {
            // First round: open at our optimal, or the provider's value when
            // it is already more generous.
            demand.set_property(key, json!(offered.max(optimal)));
            return Ok(());
        };

        if offered >= demanded {
            demand.set_property(key, json!(offered));
            return Ok(());
        }
        if demanded <= floor {
            return Err(ProposalRejection::new(format!(
                "{key}: provider offers {offered}, below our minimum {floor}"
            )));
        }

        let step = self
            .settings
            .min_adjustment_secs
            .max((demanded - offered) / self.settings.adjustment_factor);
        let next = (demanded - step).max(floor).max(offered);
        tracing::debug!(key, demanded, offered, next, "stepping payment cadence demand down");
        demand.set_property(key, json!(next));
        Ok(())
    }
}

#[async_trait]
impl NegotiationPlugin for MidAgreementPaymentsNegotiator {
    async fn negotiate(
        &self,
        demand: &mut DemandState,
        offer: &ProposalData,
    ) -> Result<(), ProposalRejection> {
        self.negotiate_field(
            demand,
            offer,
            DEBIT_NOTE_INTERVAL_SEC,
            self.settings.min_debit_note_interval_secs,
            self.settings.optimal_debit_note_interval_secs,
        )?;
        self.negotiate_field(
            demand,
            offer,
            PAYMENT_TIMEOUT_SEC,
            self.settings.min_payment_timeout_secs,
            self.settings.optimal_payment_timeout_secs,
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use bazaar_types::{Properties, ProposalId, ProposalState, ProviderId};

    use super::*;

    fn settings() -> PaymentSettings {
        PaymentSettings {
            min_debit_note_interval_secs: 60,
            optimal_debit_note_interval_secs: 1800,
            min_payment_timeout_secs: 120,
            optimal_payment_timeout_secs: 86_400,
            min_adjustment_secs: 1,
            adjustment_factor: 3,
            ..PaymentSettings::default()
        }
    }

    fn offer_with(interval: Option<i64>, timeout: Option<i64>) -> ProposalData {
        let mut properties = Properties::new();
        if let Some(interval) = interval {
            properties.insert(DEBIT_NOTE_INTERVAL_SEC.into(), json!(interval));
        }
        if let Some(timeout) = timeout {
            properties.insert(PAYMENT_TIMEOUT_SEC.into(), json!(timeout));
        }
        ProposalData {
            id: ProposalId::generate(),
            issuer: ProviderId("provider-1".into()),
            state: ProposalState::Draft,
            properties,
            constraints: String::new(),
            prev_proposal_id: Some(ProposalId::generate()),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn first_round_demands_the_optimal_not_the_offer() {
        let plugin = MidAgreementPaymentsNegotiator::new(settings());
        let mut demand = DemandState::default();

        plugin
            .negotiate(&mut demand, &offer_with(Some(120), Some(86_400)))
            .await
            .unwrap();

        assert_eq!(demand.property_i64(DEBIT_NOTE_INTERVAL_SEC), Some(1800));
        assert_eq!(demand.property_i64(PAYMENT_TIMEOUT_SEC), Some(86_400));
    }

    #[tokio::test]
    async fn generous_offers_are_accepted_as_is() {
        let plugin = MidAgreementPaymentsNegotiator::new(settings());
        let mut demand = DemandState::default();
        demand.set_property(DEBIT_NOTE_INTERVAL_SEC, json!(1800));
        demand.set_property(PAYMENT_TIMEOUT_SEC, json!(86_400));

        plugin
            .negotiate(&mut demand, &offer_with(Some(3600), Some(86_400)))
            .await
            .unwrap();

        assert_eq!(demand.property_i64(DEBIT_NOTE_INTERVAL_SEC), Some(3600));
    }

    #[tokio::test]
    async fn steps_down_by_a_third_of_the_gap() {
        let plugin = MidAgreementPaymentsNegotiator::new(settings());
        let mut demand = DemandState::default();
        demand.set_property(DEBIT_NOTE_INTERVAL_SEC, json!(1800));
        demand.set_property(PAYMENT_TIMEOUT_SEC, json!(86_400));

        plugin
            .negotiate(&mut demand, &offer_with(Some(120), Some(86_400)))
            .await
            .unwrap();

        // step = max(1, (1800 - 120) / 3) = 560.
        assert_eq!(demand.property_i64(DEBIT_NOTE_INTERVAL_SEC), Some(1240));
    }

    #[tokio::test]
    async fn rejects_once_the_demand_hits_the_floor() {
        let plugin = MidAgreementPaymentsNegotiator::new(settings());
        let mut demand = DemandState::default();
        demand.set_property(DEBIT_NOTE_INTERVAL_SEC, json!(60));

        let result = plugin
            .negotiate(&mut demand, &offer_with(Some(30), Some(86_400)))
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_fields_reject_when_required_and_pass_when_optional() {
        let mut demand = DemandState::default();

        let required = MidAgreementPaymentsNegotiator::new(settings());
        assert!(required
            .negotiate(&mut demand, &offer_with(None, None))
            .await
            .is_err());

        let optional = MidAgreementPaymentsNegotiator::optional(settings());
        demand.set_property(DEBIT_NOTE_INTERVAL_SEC, json!(1800));
        optional
            .negotiate(&mut demand, &offer_with(None, None))
            .await
            .unwrap();
        assert_eq!(demand.property_i64(DEBIT_NOTE_INTERVAL_SEC), None);
    }
}
