use bazaar_payments::costs::CPU_THREADS;
use bazaar_payments::LinearCoeffs;
use bazaar_types::ProposalData;

use crate::scorer::ProposalScorer;

/// Expected cost of a reference workload under each proposal's linear
/// pricing. Raw output is the cost itself (lower is cheaper), so this is
/// normally wrapped in a flipped [`NormalizingScorer`]. Proposals without a
/// parsable linear pricing model are disqualified.
pub struct LinearCostScorer {
    pub average_cpu_load: f64,
    pub average_duration_secs: f64,
    /// Scale the cpu load by the offered thread count, for workloads that
    /// saturate every core they get.
    pub per_cpu: bool,
}

impl LinearCostScorer {
    pub fn new(average_cpu_load: f64, average_duration_secs: f64) -> Self {
        Self {
            average_cpu_load,
            average_duration_secs,
            per_cpu: false,
        }
    }

    pub fn per_cpu(average_cpu_load: f64, average_duration_secs: f64) -> Self {
        Self {
            average_cpu_load,
            average_duration_secs,
            per_cpu: true,
        }
    }
}

impl ProposalScorer for LinearCostScorer {
    fn score(&self, batch: &[ProposalData]) -> Vec<Option<f64>> {
        batch
            .iter()
            .map(|proposal| {
                let coeffs = LinearCoeffs::from_properties(&proposal.properties)?;
                let mut load = self.average_cpu_load;
                if self.per_cpu {
                    load *= proposal.property_f64(CPU_THREADS)?;
                }
                Some(coeffs.expected_cost(load, self.average_duration_secs))
            })
            .collect()
    }
}

/// Min/max-rescales an inner scorer's output across the batch to [0, 1],
/// optionally flipped so that the lowest raw value maps to 1.
///
/// An empty or constant-valued batch is returned raw: there is no spread to
/// rescale against.
pub struct NormalizingScorer {
    pub inner: Box<dyn ProposalScorer>,
    pub flip: bool,
}

impl NormalizingScorer {
    pub fn new(inner: impl ProposalScorer + 'static, flip: bool) -> Self {
        Self {
            inner: Box::new(inner),
            flip,
        }
    }
}

impl ProposalScorer for NormalizingScorer {
    fn score(&self, batch: &[ProposalData]) -> Vec<Option<f64>> {
        let raw = self.inner.score(batch);

        let qualified: Vec<f64> = raw.iter().filter_map(|s| *s).collect();
        let (Some(min), Some(max)) = (
            qualified.iter().copied().reduce(f64::min),
            qualified.iter().copied().reduce(f64::max),
        ) else {
            return raw;
        };
        if max == min {
            return raw;
        }

        raw.into_iter()
            .map(|score| {
                score.map(|s| {
                    let normalized = (s - min) / (max - min);
                    if self.flip {
                        1.0 - normalized
                    } else {
                        normalized
                    }
                })
            })
            .collect()
    }
}

/// Linear interpolation of a named numeric property between three anchors
/// mapping to scores −1, 0 and +1, clamped at the outer anchors. Proposals
/// missing the property are disqualified.
pub struct PropertyLerpScorer {
    pub property: String,
    pub minus_one_at: f64,
    pub zero_at: f64,
    pub one_at: f64,
}

impl PropertyLerpScorer {
    pub fn new(property: impl Into<String>, minus_one_at: f64, zero_at: f64, one_at: f64) -> Self {
        Self {
            property: property.into(),
            minus_one_at,
            zero_at,
            one_at,
        }
    }

    fn interpolate(&self, value: f64) -> f64 {
        let ascending = self.one_at >= self.minus_one_at;
        let before_start = if ascending {
            value <= self.minus_one_at
        } else {
            value >= self.minus_one_at
        };
        let past_end = if ascending {
            value >= self.one_at
        } else {
            value <= self.one_at
        };
        if before_start {
            return -1.0;
        }
        if past_end {
            return 1.0;
        }

        let within_lower = if ascending {
            value <= self.zero_at
        } else {
            value >= self.zero_at
        };
        let (x0, y0, x1, y1) = if within_lower {
            (self.minus_one_at, -1.0, self.zero_at, 0.0)
        } else {
            (self.zero_at, 0.0, self.one_at, 1.0)
        };
        if x1 == x0 {
            return y1;
        }
        y0 + (value - x0) * (y1 - y0) / (x1 - x0)
    }
}

impl ProposalScorer for PropertyLerpScorer {
    fn score(&self, batch: &[ProposalData]) -> Vec<Option<f64>> {
        batch
            .iter()
            .map(|proposal| {
                proposal
                    .property_f64(&self.property)
                    .map(|v| self.interpolate(v))
            })
            .collect()
    }
}

/// Uniform random score in [0, 1), for tie-breaking and exploration.
pub struct RandomScorer;

impl ProposalScorer for RandomScorer {
    fn score(&self, batch: &[ProposalData]) -> Vec<Option<f64>> {
        batch.iter().map(|_| Some(rand::random::<f64>())).collect()
    }
}
