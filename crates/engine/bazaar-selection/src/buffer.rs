use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use bazaar_types::{Offer, ProposalData};

use crate::scorer::{combine_scores, WeightedScorer};

const STAGE_CAPACITY: usize = 32;

/// Deadline/size selection policy.
///
/// Buffers negotiated proposals until `min_elements` of them carry a
/// non-disqualified combined score or `max_wait` elapses (never yielding
/// before `min_wait`), then yields best-first, re-scoring the whole buffer
/// before every yield so batch-relative scorers see current competition.
/// Fully disqualified proposals are kept and ordered as score 0.
pub struct ScoringBuffer {
    scorers: Vec<WeightedScorer>,
    min_elements: usize,
    max_wait: Duration,
    min_wait: Duration,
}

impl ScoringBuffer {
    pub fn new(
        scorers: Vec<WeightedScorer>,
        min_elements: usize,
        max_wait: Duration,
        min_wait: Duration,
    ) -> Self {
        Self {
            scorers,
            min_elements,
            max_wait,
            min_wait,
        }
    }

    pub fn run(self, mut rx: mpsc::Receiver<Offer>) -> mpsc::Receiver<Offer> {
        let (tx, out_rx) = mpsc::channel(STAGE_CAPACITY);

        tokio::spawn(async move {
            let start = Instant::now();
            let deadline = start + self.max_wait;
            let floor = start + self.min_wait;

            let mut buffer: Vec<Offer> = Vec::new();
            let mut upstream_open = true;

            // Gather until enough scored proposals arrived or time runs out.
            loop {
                let target = if self.scored_count(&buffer) >= self.min_elements {
                    floor
                } else {
                    deadline
                };
                if Instant::now() >= target {
                    break;
                }
                match timeout_at(target, rx.recv()).await {
                    Ok(Some(offer)) => buffer.push(offer),
                    Ok(None) => {
                        upstream_open = false;
                        tokio::time::sleep_until(floor).await;
                        break;
                    }
                    Err(_) => {}
                }
            }

            tracing::debug!(buffered = buffer.len(), "scoring buffer starts yielding");

            loop {
                while let Ok(offer) = rx.try_recv() {
                    buffer.push(offer);
                }
                if buffer.is_empty() {
                    if !upstream_open {
                        return;
                    }
                    match rx.recv().await {
                        Some(offer) => buffer.push(offer),
                        None => upstream_open = false,
                    }
                    continue;
                }

                let best = self.take_best(&mut buffer);
                if tx.send(best).await.is_err() {
                    return;
                }
            }
        });

        out_rx
    }

    fn scored_count(&self, buffer: &[Offer]) -> usize {
        let batch: Vec<ProposalData> = buffer.iter().map(|o| o.data.clone()).collect();
        combine_scores(&self.scorers, &batch)
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    fn take_best(&self, buffer: &mut Vec<Offer>) -> Offer {
        let batch: Vec<ProposalData> = buffer.iter().map(|o| o.data.clone()).collect();
        let scores = combine_scores(&self.scorers, &batch);

        let mut best = 0usize;
        let mut best_score = f64::MIN;
        for (i, score) in scores.iter().enumerate() {
            let score = score.unwrap_or(0.0);
            // Strict comparison keeps the earliest arrival on ties.
            if score > best_score {
                best = i;
                best_score = score;
            }
        }
        buffer.remove(best)
    }
}
