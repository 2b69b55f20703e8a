use std::time::Duration;

use bazaar_types::{MarketError, Properties};

pub const PRICING_MODEL: &str = "golem.com.pricing.model";
pub const PRICING_COEFFS: &str = "golem.com.pricing.model.linear.coeffs";
pub const USAGE_VECTOR: &str = "golem.com.usage.vector";

pub const CPU_THREADS: &str = "golem.inf.cpu.threads";
pub const MEM_GIB: &str = "golem.inf.mem.gib";
pub const STORAGE_GIB: &str = "golem.inf.storage.gib";

pub const COUNTER_CPU_SEC: &str = "golem.usage.cpu_sec";
pub const COUNTER_DURATION_SEC: &str = "golem.usage.duration_sec";
pub const COUNTER_MEM_GIB: &str = "golem.usage.gib";
pub const COUNTER_STORAGE_GIB: &str = "golem.usage.storage_gib";

/// Per-unit prices of a linear pricing model, one per known usage counter,
/// plus the one-off initial price.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinearCoeffs {
    pub price_cpu_sec: f64,
    pub price_duration_sec: f64,
    pub price_mem_gib: f64,
    pub price_storage_gib: f64,
    pub price_initial: f64,
}

impl LinearCoeffs {
    /// Parses the pricing coefficients out of an offer's property map.
    ///
    /// Returns `None` unless the pricing model is "linear", the coefficient
    /// vector is exactly one longer than the usage vector (the surplus entry
    /// is the initial price), and every usage counter is one we can bound.
    pub fn from_properties(properties: &Properties) -> Option<Self> {
        if properties.get(PRICING_MODEL)?.as_str()? != "linear" {
            return None;
        }
        let usage: Vec<&str> = properties
            .get(USAGE_VECTOR)?
            .as_array()?
            .iter()
            .map(|v| v.as_str())
            .collect::<Option<_>>()?;
        let coeffs: Vec<f64> = properties
            .get(PRICING_COEFFS)?
            .as_array()?
            .iter()
            .map(|v| v.as_f64())
            .collect::<Option<_>>()?;
        if coeffs.len() != usage.len() + 1 {
            return None;
        }

        let mut parsed = Self {
            price_initial: *coeffs.last()?,
            ..Self::default()
        };
        for (counter, price) in usage.iter().zip(&coeffs) {
            match *counter {
                COUNTER_CPU_SEC => parsed.price_cpu_sec = *price,
                COUNTER_DURATION_SEC => parsed.price_duration_sec = *price,
                COUNTER_MEM_GIB => parsed.price_mem_gib = *price,
                COUNTER_STORAGE_GIB => parsed.price_storage_gib = *price,
                other => {
                    tracing::debug!(counter = other, "unknown usage counter, cannot bound cost");
                    return None;
                }
            }
        }
        Some(parsed)
    }

    /// The theoretical maximum a provider may charge after `duration` of
    /// full utilization of the offered infrastructure.
    pub fn max_cost(&self, infra: &InfraProps, duration: Duration) -> f64 {
        let secs = duration.as_secs_f64();
        infra.storage_gib * self.price_storage_gib
            + infra.memory_gib * self.price_mem_gib
            + infra.cpu_threads * secs * self.price_cpu_sec
            + secs * self.price_duration_sec
            + self.price_initial
    }

    /// Expected cost of a workload with the given average cpu load over the
    /// given wall time, used by the cost scorer.
    pub fn expected_cost(&self, average_cpu_load: f64, duration_secs: f64) -> f64 {
        self.price_initial
            + duration_secs * self.price_duration_sec
            + average_cpu_load * duration_secs * self.price_cpu_sec
    }
}

/// Offered infrastructure dimensions. Missing properties count as zero,
/// which only ever tightens the cost bound.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InfraProps {
    pub cpu_threads: f64,
    pub memory_gib: f64,
    pub storage_gib: f64,
}

impl InfraProps {
    pub fn from_properties(properties: &Properties) -> Self {
        let get = |key: &str| properties.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0);
        Self {
            cpu_threads: get(CPU_THREADS),
            memory_gib: get(MEM_GIB),
            storage_gib: get(STORAGE_GIB),
        }
    }
}

/// Checks a claimed amount against the theoretical maximum for the elapsed
/// agreement duration. With a previous accepted charge known, the increment
/// is additionally bounded against the maximum accruable over the interval
/// between the two charges.
pub fn validate_max_cost(
    coeffs: &LinearCoeffs,
    infra: &InfraProps,
    duration: Duration,
    amount: f64,
    previous: Option<(f64, Duration)>,
) -> Result<(), MarketError> {
    let max = coeffs.max_cost(infra, duration);
    if amount > max {
        return Err(MarketError::CostExceeded {
            claimed: amount,
            max,
        });
    }

    if let Some((prev_amount, prev_duration)) = previous {
        let incremental = amount - prev_amount;
        let incremental_max = max - coeffs.max_cost(infra, prev_duration);
        if incremental > incremental_max {
            return Err(MarketError::CostExceeded {
                claimed: incremental,
                max: incremental_max,
            });
        }
    }

    Ok(())
}
