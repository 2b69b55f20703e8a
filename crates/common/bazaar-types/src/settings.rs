use std::time::Duration;

use serde::Deserialize;

/// Settings for the proposal negotiation engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NegotiationSettings {
    /// How long to wait for a provider's counter-proposal response.
    pub response_timeout_secs: u64,
    /// Upper bound on negotiations running in parallel.
    pub max_concurrent_negotiations: usize,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            response_timeout_secs: 30,
            max_concurrent_negotiations: 16,
        }
    }
}

impl NegotiationSettings {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

/// Settings for the agreement/activity pools.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub target_size: usize,
    pub approval_timeout_secs: u64,
    /// Deploy/start preparation deadline for a fresh activity.
    pub prepare_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            target_size: 3,
            approval_timeout_secs: 60,
            prepare_timeout_secs: 300,
        }
    }
}

impl PoolSettings {
    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_secs(self.prepare_timeout_secs)
    }
}

/// Settings for the work dispatcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub retries: u32,
    pub redundancy_size: usize,
    pub min_repeat: usize,
    pub min_success_ratio: f64,
    pub worker_count: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            retries: 3,
            redundancy_size: 3,
            min_repeat: 3,
            min_success_ratio: 0.7,
            worker_count: 4,
        }
    }
}

/// Settings for the payment guard and mid-agreement payment negotiation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentSettings {
    pub budget: f64,
    /// How long to keep waiting for outstanding invoices on shutdown.
    pub shutdown_timeout_secs: u64,
    pub min_debit_note_interval_secs: i64,
    pub optimal_debit_note_interval_secs: i64,
    pub min_payment_timeout_secs: i64,
    pub optimal_payment_timeout_secs: i64,
    /// Smallest step taken toward the provider's offer per round.
    pub min_adjustment_secs: i64,
    /// The gap to the provider's offer shrinks by this factor per round.
    pub adjustment_factor: i64,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            budget: 10.0,
            shutdown_timeout_secs: 150,
            min_debit_note_interval_secs: 60,
            optimal_debit_note_interval_secs: 600,
            min_payment_timeout_secs: 120,
            optimal_payment_timeout_secs: 86_400,
            min_adjustment_secs: 1,
            adjustment_factor: 3,
        }
    }
}

impl PaymentSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Aggregate engine configuration, loadable from the environment
/// (`BAZAAR_NEGOTIATION__RESPONSE_TIMEOUT_SECS=10` etc.).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub negotiation: NegotiationSettings,
    pub pool: PoolSettings,
    pub dispatch: DispatchSettings,
    pub payment: PaymentSettings,
}

impl EngineSettings {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("BAZAAR").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = EngineSettings::default();
        assert!(settings.dispatch.min_success_ratio > 0.5);
        assert!(
            settings.payment.min_debit_note_interval_secs
                <= settings.payment.optimal_debit_note_interval_secs
        );
        assert_eq!(
            settings.negotiation.response_timeout(),
            Duration::from_secs(30)
        );
    }
}
