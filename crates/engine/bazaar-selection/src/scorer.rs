use bazaar_types::ProposalData;

/// Rates a batch of proposals. One entry per proposal, higher is better;
/// `None` disqualifies the proposal as far as this scorer is concerned.
pub trait ProposalScorer: Send + Sync {
    fn score(&self, batch: &[ProposalData]) -> Vec<Option<f64>>;
}

/// A scorer with its non-negative weight in the combined score.
pub struct WeightedScorer {
    pub weight: f64,
    pub scorer: Box<dyn ProposalScorer>,
}

impl WeightedScorer {
    pub fn new(scorer: impl ProposalScorer + 'static) -> Self {
        Self {
            weight: 1.0,
            scorer: Box::new(scorer),
        }
    }

    pub fn with_weight(weight: f64, scorer: impl ProposalScorer + 'static) -> Self {
        debug_assert!(weight >= 0.0);
        Self {
            weight,
            scorer: Box::new(scorer),
        }
    }
}

/// Combines weighted scorers into one score per proposal.
///
/// Per proposal: the weighted average over the scorers that did not
/// disqualify it; a disqualifying scorer's weight leaves the denominator.
/// A proposal every scorer disqualifies gets `None` (ordered as score 0;
/// callers wanting hard exclusion add a veto scorer).
pub fn combine_scores(scorers: &[WeightedScorer], batch: &[ProposalData]) -> Vec<Option<f64>> {
    let mut numerators = vec![0.0f64; batch.len()];
    let mut denominators = vec![0.0f64; batch.len()];

    for weighted in scorers {
        let scores = weighted.scorer.score(batch);
        debug_assert_eq!(scores.len(), batch.len());
        for (i, score) in scores.into_iter().enumerate() {
            if let Some(score) = score {
                numerators[i] += weighted.weight * score;
                denominators[i] += weighted.weight;
            }
        }
    }

    numerators
        .into_iter()
        .zip(denominators)
        .map(|(num, den)| (den > 0.0).then(|| num / den))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use bazaar_types::testing::{proposal_data, props};

    use super::*;

    struct FixedScorer(Vec<Option<f64>>);

    impl ProposalScorer for FixedScorer {
        fn score(&self, _batch: &[ProposalData]) -> Vec<Option<f64>> {
            self.0.clone()
        }
    }

    fn batch(n: usize) -> Vec<ProposalData> {
        (0..n)
            .map(|i| proposal_data(&format!("p-{i}"), props(&[("n", json!(i))])))
            .collect()
    }

    #[test]
    fn weighted_average_over_non_disqualifying_scorers() {
        let scorers = vec![
            WeightedScorer::with_weight(3.0, FixedScorer(vec![Some(1.0), Some(0.0)])),
            WeightedScorer::with_weight(1.0, FixedScorer(vec![Some(0.0), Some(1.0)])),
        ];

        let combined = combine_scores(&scorers, &batch(2));
        assert_eq!(combined, vec![Some(0.75), Some(0.25)]);
    }

    #[test]
    fn a_disqualifying_scorer_leaves_the_denominator() {
        let scorers = vec![
            WeightedScorer::with_weight(3.0, FixedScorer(vec![None, Some(0.0)])),
            WeightedScorer::with_weight(1.0, FixedScorer(vec![Some(0.4), Some(1.0)])),
        ];

        // First proposal: only the second scorer counts, full weight to it.
        let combined = combine_scores(&scorers, &batch(2));
        assert_eq!(combined, vec![Some(0.4), Some(0.25)]);
    }

    #[test]
    fn disqualified_by_everyone_yields_none() {
        let scorers = vec![
            WeightedScorer::new(FixedScorer(vec![None, Some(0.5)])),
            WeightedScorer::new(FixedScorer(vec![None, Some(0.5)])),
        ];

        let combined = combine_scores(&scorers, &batch(2));
        assert_eq!(combined, vec![None, Some(0.5)]);
    }
}
