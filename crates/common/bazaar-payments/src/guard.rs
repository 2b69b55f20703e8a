use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;

use bazaar_types::{
    AgreementId, DebitNote, EventBus, Invoice, MarketEvent, PaymentApi, PaymentSettings,
    Properties,
};

use crate::costs::{validate_max_cost, InfraProps, LinearCoeffs};

struct CostEnvelope {
    coeffs: LinearCoeffs,
    infra: InfraProps,
    started_at: DateTime<Utc>,
    /// Last accepted charge: (running total, elapsed duration at acceptance).
    last: Option<(f64, Duration)>,
}

#[derive(Default)]
struct GuardState {
    envelopes: HashMap<AgreementId, CostEnvelope>,
    accepted_total: f64,
}

/// Validates incoming cost documents against each agreement's linear cost
/// bound and the overall budget, accepting what passes and releasing the
/// agreement behind anything that does not.
pub struct PaymentGuard {
    state: Arc<Mutex<GuardState>>,
    bus: EventBus,
    settings: PaymentSettings,
    task: tokio::task::JoinHandle<()>,
}

impl PaymentGuard {
    pub fn spawn(bus: EventBus, api: Arc<dyn PaymentApi>, settings: PaymentSettings) -> Self {
        let state = Arc::new(Mutex::new(GuardState::default()));
        // Subscribe before the task starts so no event slips past it.
        let events = bus.subscribe();
        let task = tokio::spawn(Self::run(
            Arc::clone(&state),
            bus.clone(),
            events,
            api,
            settings.clone(),
        ));
        Self {
            state,
            bus,
            settings,
            task,
        }
    }

    async fn run(
        state: Arc<Mutex<GuardState>>,
        bus: EventBus,
        mut events: tokio::sync::broadcast::Receiver<MarketEvent>,
        api: Arc<dyn PaymentApi>,
        settings: PaymentSettings,
    ) {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "payment guard lagged behind the event bus");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            match event {
                MarketEvent::NewAgreement {
                    agreement_id,
                    proposal,
                    started_at,
                    ..
                } => {
                    Self::track(&state, &bus, agreement_id, &proposal.properties, started_at)
                        .await;
                }
                MarketEvent::NewDebitNote(note) => {
                    Self::on_debit_note(&state, &bus, api.as_ref(), &settings, note).await;
                }
                MarketEvent::NewInvoice(invoice) => {
                    Self::on_invoice(&state, &bus, api.as_ref(), &settings, invoice).await;
                }
                _ => {}
            }
        }
    }

    async fn track(
        state: &Mutex<GuardState>,
        bus: &EventBus,
        agreement_id: AgreementId,
        properties: &Properties,
        started_at: DateTime<Utc>,
    ) {
        let Some(coeffs) = LinearCoeffs::from_properties(properties) else {
            tracing::warn!(%agreement_id, "agreement has no linear pricing, releasing it");
            bus.emit(MarketEvent::AgreementReleased { agreement_id });
            return;
        };
        let infra = InfraProps::from_properties(properties);
        tracing::debug!(%agreement_id, ?coeffs, "tracking agreement costs");
        state.lock().await.envelopes.insert(
            agreement_id,
            CostEnvelope {
                coeffs,
                infra,
                started_at,
                last: None,
            },
        );
    }

    async fn on_debit_note(
        state: &Mutex<GuardState>,
        bus: &EventBus,
        api: &dyn PaymentApi,
        settings: &PaymentSettings,
        note: DebitNote,
    ) {
        let mut guard = state.lock().await;
        let state = &mut *guard;
        let Some(envelope) = state.envelopes.get_mut(&note.agreement_id) else {
            tracing::debug!(agreement_id = %note.agreement_id, "debit note for unknown agreement");
            return;
        };

        let elapsed = elapsed_since(envelope.started_at, note.timestamp);
        let verdict = validate_max_cost(
            &envelope.coeffs,
            &envelope.infra,
            elapsed,
            note.total_amount_due,
            envelope.last,
        );

        let increment = note.total_amount_due - envelope.last.map_or(0.0, |(amount, _)| amount);
        if verdict.is_ok() && state.accepted_total + increment > settings.budget {
            tracing::warn!(
                agreement_id = %note.agreement_id,
                accepted_total = state.accepted_total,
                budget = settings.budget,
                "debit note would exceed the budget, releasing agreement"
            );
            drop(guard);
            bus.emit(MarketEvent::AgreementReleased {
                agreement_id: note.agreement_id,
            });
            return;
        }

        match verdict {
            Ok(()) => {
                envelope.last = Some((note.total_amount_due, elapsed));
                state.accepted_total += increment;
                drop(guard);
                if let Err(e) = api.accept_debit_note(&note, note.total_amount_due).await {
                    tracing::warn!(note_id = %note.id, error = %e, "accepting debit note failed");
                }
            }
            Err(e) => {
                tracing::warn!(
                    agreement_id = %note.agreement_id,
                    note_id = %note.id,
                    error = %e,
                    "rejecting debit note, releasing agreement"
                );
                drop(guard);
                bus.emit(MarketEvent::AgreementReleased {
                    agreement_id: note.agreement_id,
                });
            }
        }
    }

    async fn on_invoice(
        state: &Mutex<GuardState>,
        bus: &EventBus,
        api: &dyn PaymentApi,
        settings: &PaymentSettings,
        invoice: Invoice,
    ) {
        let mut guard = state.lock().await;
        // An invoice is the agreement's final document; it retires the
        // envelope whatever the verdict.
        let Some(envelope) = guard.envelopes.remove(&invoice.agreement_id) else {
            tracing::debug!(agreement_id = %invoice.agreement_id, "invoice for unknown agreement");
            return;
        };

        let elapsed = elapsed_since(envelope.started_at, invoice.timestamp);
        let verdict = validate_max_cost(
            &envelope.coeffs,
            &envelope.infra,
            elapsed,
            invoice.amount,
            None,
        );

        let increment = invoice.amount - envelope.last.map_or(0.0, |(amount, _)| amount);
        let over_budget = guard.accepted_total + increment > settings.budget;

        match verdict {
            Ok(()) if !over_budget => {
                guard.accepted_total += increment;
                drop(guard);
                if let Err(e) = api.accept_invoice(&invoice, invoice.amount).await {
                    tracing::warn!(invoice_id = %invoice.id, error = %e, "accepting invoice failed");
                }
            }
            verdict => {
                drop(guard);
                tracing::warn!(
                    agreement_id = %invoice.agreement_id,
                    invoice_id = %invoice.id,
                    over_budget,
                    ?verdict,
                    "rejecting invoice, releasing agreement"
                );
                bus.emit(MarketEvent::AgreementReleased {
                    agreement_id: invoice.agreement_id,
                });
            }
        }
    }

    /// Number of agreements still awaiting their final invoice.
    pub async fn outstanding(&self) -> usize {
        self.state.lock().await.envelopes.len()
    }

    /// Waits (bounded by the configured shutdown timeout) for outstanding
    /// invoices, then releases whatever agreements remain tracked.
    pub async fn shutdown(self) {
        let deadline = tokio::time::Instant::now() + self.settings.shutdown_timeout();
        let mut tick = tokio::time::interval(Duration::from_millis(100));
        loop {
            tick.tick().await;
            if self.state.lock().await.envelopes.is_empty() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("shutdown timed out waiting for invoices");
                break;
            }
        }

        self.task.abort();
        let remaining: Vec<AgreementId> =
            self.state.lock().await.envelopes.drain().map(|(id, _)| id).collect();
        for agreement_id in remaining {
            tracing::warn!(%agreement_id, "no invoice before shutdown, releasing agreement");
            self.bus
                .emit(MarketEvent::AgreementReleased { agreement_id });
        }
    }
}

fn elapsed_since(started_at: DateTime<Utc>, timestamp: DateTime<Utc>) -> Duration {
    (timestamp - started_at).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use bazaar_types::testing::{props, MockPaymentApi};
    use bazaar_types::{ProposalData, ProposalId, ProposalState, ProviderId};

    use crate::costs::{
        COUNTER_CPU_SEC, COUNTER_DURATION_SEC, CPU_THREADS, PRICING_COEFFS, PRICING_MODEL,
        USAGE_VECTOR,
    };

    use super::*;

    fn linear_proposal() -> ProposalData {
        ProposalData {
            id: ProposalId::generate(),
            issuer: ProviderId("provider-1".into()),
            state: ProposalState::Draft,
            properties: props(&[
                (PRICING_MODEL, json!("linear")),
                (USAGE_VECTOR, json!([COUNTER_CPU_SEC, COUNTER_DURATION_SEC])),
                (PRICING_COEFFS, json!([1.0, 1.0, 1.0])),
                (CPU_THREADS, json!(2)),
            ]),
            constraints: String::new(),
            prev_proposal_id: Some(ProposalId::generate()),
            timestamp: Utc::now(),
        }
    }

    fn debit_note(agreement_id: &AgreementId, amount: f64, at_secs: i64) -> DebitNote {
        DebitNote {
            id: format!("note-{amount}"),
            agreement_id: agreement_id.clone(),
            activity_id: None,
            total_amount_due: amount,
            timestamp: Utc::now() + chrono::Duration::seconds(at_secs),
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn guard_setup(budget: f64) -> (EventBus, Arc<MockPaymentApi>, PaymentGuard, AgreementId) {
        let bus = EventBus::new();
        let api = Arc::new(MockPaymentApi::default());
        let guard = PaymentGuard::spawn(
            bus.clone(),
            Arc::clone(&api) as Arc<dyn PaymentApi>,
            PaymentSettings {
                budget,
                ..PaymentSettings::default()
            },
        );
        let agreement_id = AgreementId("agr-1".into());
        bus.emit(MarketEvent::NewAgreement {
            agreement_id: agreement_id.clone(),
            provider: ProviderId("provider-1".into()),
            proposal: linear_proposal(),
            started_at: Utc::now(),
        });
        (bus, api, guard, agreement_id)
    }

    #[tokio::test]
    async fn accepts_a_note_at_the_maximum_and_rejects_above_it() {
        let (bus, api, guard, agreement_id) = guard_setup(1_000.0);
        let mut events = bus.subscribe();
        settle().await;

        bus.emit(MarketEvent::NewDebitNote(debit_note(&agreement_id, 181.0, 60)));
        settle().await;
        assert_eq!(api.accepted_debit_notes.lock().unwrap().len(), 1);

        bus.emit(MarketEvent::NewDebitNote(debit_note(&agreement_id, 190.0, 60)));
        settle().await;
        assert_eq!(api.accepted_debit_notes.lock().unwrap().len(), 1);

        let released = loop {
            match events.recv().await.unwrap() {
                MarketEvent::AgreementReleased { agreement_id } => break agreement_id,
                _ => continue,
            }
        };
        assert_eq!(released, agreement_id);
        assert_eq!(guard.outstanding().await, 1);
    }

    #[tokio::test]
    async fn exceeding_the_budget_releases_the_agreement() {
        let (bus, api, _guard, agreement_id) = guard_setup(50.0);
        let mut events = bus.subscribe();
        settle().await;

        // Within the cost bound (max 181) but over the 50 budget.
        bus.emit(MarketEvent::NewDebitNote(debit_note(&agreement_id, 100.0, 60)));
        settle().await;

        assert!(api.accepted_debit_notes.lock().unwrap().is_empty());
        // The subscriber also sees the debit note event itself; skip ahead
        // to the release.
        let released = loop {
            match events.recv().await.unwrap() {
                MarketEvent::AgreementReleased { agreement_id } => break agreement_id,
                _ => continue,
            }
        };
        assert_eq!(released, agreement_id);
    }

    #[tokio::test]
    async fn an_invoice_retires_the_agreement() {
        let (bus, api, guard, agreement_id) = guard_setup(1_000.0);
        settle().await;
        assert_eq!(guard.outstanding().await, 1);

        bus.emit(MarketEvent::NewInvoice(Invoice {
            id: "inv-1".into(),
            agreement_id: agreement_id.clone(),
            amount: 100.0,
            timestamp: Utc::now() + chrono::Duration::seconds(60),
        }));
        settle().await;

        assert_eq!(api.accepted_invoices.lock().unwrap().len(), 1);
        assert_eq!(guard.outstanding().await, 0);
    }

    #[tokio::test]
    async fn unknown_agreements_are_ignored() {
        let (bus, api, guard, _agreement_id) = guard_setup(1_000.0);
        settle().await;

        bus.emit(MarketEvent::NewDebitNote(debit_note(
            &AgreementId("stranger".into()),
            10.0,
            60,
        )));
        settle().await;

        assert!(api.accepted_debit_notes.lock().unwrap().is_empty());
        assert_eq!(guard.outstanding().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_whatever_never_got_invoiced() {
        let (bus, _api, guard, agreement_id) = guard_setup(1_000.0);
        let mut events = bus.subscribe();
        settle().await;

        guard.shutdown().await;

        let released = loop {
            match events.recv().await.unwrap() {
                MarketEvent::AgreementReleased { agreement_id } => break agreement_id,
                _ => continue,
            }
        };
        assert_eq!(released, agreement_id);
    }
}
