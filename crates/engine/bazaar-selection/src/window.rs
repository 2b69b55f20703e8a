use std::sync::Arc;

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

use bazaar_types::{Offer, ProposalData};

use crate::scorer::{combine_scores, WeightedScorer};

const STAGE_CAPACITY: usize = 4;

/// A checked-out window slot. Dropping the candidate releases its slot back
/// to the window, letting the next-best proposal through.
pub struct Candidate {
    pub offer: Offer,
    _permit: OwnedSemaphorePermit,
}

struct Slot {
    offer: Offer,
    seq: u64,
    score: f64,
}

/// Sliding admission-control selection policy.
///
/// Keeps a window of `[min_size, max_size]` proposals, fully re-scored on
/// every arrival, and hands out at most `concurrency_size` best candidates
/// at a time. Arrivals beyond `max_size` are left in the upstream channel
/// (backpressure) until a slot frees up.
pub struct SlidingScoringWindow {
    scorers: Vec<WeightedScorer>,
    min_size: usize,
    max_size: usize,
    concurrency_size: usize,
}

impl SlidingScoringWindow {
    pub fn new(
        scorers: Vec<WeightedScorer>,
        min_size: usize,
        max_size: usize,
        concurrency_size: usize,
    ) -> Self {
        debug_assert!(min_size <= max_size);
        Self {
            scorers,
            min_size,
            max_size,
            concurrency_size: concurrency_size.max(1),
        }
    }

    pub fn run(self, mut rx: mpsc::Receiver<Offer>) -> mpsc::Receiver<Candidate> {
        let (tx, out_rx) = mpsc::channel(STAGE_CAPACITY);
        let semaphore = Arc::new(Semaphore::new(self.concurrency_size));

        tokio::spawn(async move {
            let mut window: Vec<Slot> = Vec::new();
            let mut seq = 0u64;
            let mut upstream_open = true;

            loop {
                if !upstream_open && window.is_empty() {
                    break;
                }
                let want_more = upstream_open && window.len() < self.max_size;
                let can_yield = !window.is_empty()
                    && (window.len() >= self.min_size || !upstream_open);

                tokio::select! {
                    arrival = rx.recv(), if want_more => {
                        match arrival {
                            Some(offer) => {
                                window.push(Slot { offer, seq, score: 0.0 });
                                seq += 1;
                                self.rescore(&mut window);
                            }
                            None => upstream_open = false,
                        }
                    }
                    permit = Arc::clone(&semaphore).acquire_owned(), if can_yield => {
                        let Ok(permit) = permit else { break };
                        let best = take_best(&mut window);
                        if tx
                            .send(Candidate { offer: best, _permit: permit })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    else => break,
                }
            }
        });

        out_rx
    }

    fn rescore(&self, window: &mut [Slot]) {
        let batch: Vec<ProposalData> = window.iter().map(|s| s.offer.data.clone()).collect();
        let scores = combine_scores(&self.scorers, &batch);
        for (slot, score) in window.iter_mut().zip(scores) {
            slot.score = score.unwrap_or(0.0);
        }
    }
}

fn take_best(window: &mut Vec<Slot>) -> Offer {
    let mut best = 0usize;
    for i in 1..window.len() {
        let (a, b) = (&window[i], &window[best]);
        if a.score > b.score || (a.score == b.score && a.seq < b.seq) {
            best = i;
        }
    }
    window.remove(best).offer
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use bazaar_types::testing::{props, MockProvider};

    use crate::scorers::PropertyLerpScorer;

    use super::*;

    async fn offer(name: &str, quality: f64) -> Offer {
        let provider = MockProvider::new(name);
        provider.set_initial_properties(props(&[("quality", json!(quality))]));
        let handle = provider.initial_proposal();
        let data = handle.data().await.unwrap();
        Offer::new(handle, data)
    }

    fn window(min: usize, max: usize, concurrency: usize) -> SlidingScoringWindow {
        SlidingScoringWindow::new(
            vec![WeightedScorer::new(PropertyLerpScorer::new(
                "quality", -1.0, 0.0, 1.0,
            ))],
            min,
            max,
            concurrency,
        )
    }

    #[tokio::test]
    async fn hands_out_the_best_of_the_window() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(offer("low", 0.1).await).await.unwrap();
        tx.send(offer("high", 0.9).await).await.unwrap();
        drop(tx);

        let mut out = window(2, 4, 2).run(rx);
        let first = out.recv().await.unwrap();
        assert_eq!(first.offer.issuer().0, "high");
        let second = out.recv().await.unwrap();
        assert_eq!(second.offer.issuer().0, "low");
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn waits_for_min_size_before_yielding() {
        let (tx, rx) = mpsc::channel(8);
        let mut out = window(2, 4, 1).run(rx);

        tx.send(offer("first", 0.5).await).await.unwrap();
        // One proposal is below min_size; nothing may come out yet.
        assert!(
            tokio::time::timeout(Duration::from_millis(50), out.recv())
                .await
                .is_err()
        );

        tx.send(offer("second", 0.9).await).await.unwrap();
        let first = out.recv().await.unwrap();
        assert_eq!(first.offer.issuer().0, "second");
        drop(tx);
    }

    #[tokio::test]
    async fn concurrency_size_bounds_checked_out_candidates() {
        let (tx, rx) = mpsc::channel(8);
        for i in 0..3 {
            tx.send(offer(&format!("p-{i}"), 0.5).await).await.unwrap();
        }
        drop(tx);

        // Output channel capacity would let more through; the permit must
        // not.
        let mut out = window(1, 4, 1).run(rx);
        let first = out.recv().await.unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(50), out.recv())
                .await
                .is_err()
        );

        drop(first);
        let second = out.recv().await.unwrap();
        assert_eq!(second.offer.issuer().0, "p-1");
    }
}
