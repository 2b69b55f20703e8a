use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use crate::STAGE_CAPACITY;

struct Entry<T> {
    score: f64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Highest score pops first; ties resolve to the earlier arrival.
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Time/size-windowed sort.
///
/// Accumulates upstream values into a max-heap keyed by `score` until
/// `min_elements` scored values arrived or `max_wait` elapsed, never yielding
/// before `min_wait`. Then yields best-first while still accepting arrivals
/// between yields. Values `score` disqualifies (returns `None` for) are
/// dropped.
pub fn sort<T, F>(
    mut rx: mpsc::Receiver<T>,
    score: F,
    min_elements: usize,
    max_wait: Duration,
    min_wait: Duration,
) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    F: Fn(&T) -> Option<f64> + Send + Sync + 'static,
{
    let (tx, out_rx) = mpsc::channel(STAGE_CAPACITY);

    tokio::spawn(async move {
        let start = Instant::now();
        let deadline = start + max_wait;
        let floor = start + min_wait;

        let mut heap: BinaryHeap<Entry<T>> = BinaryHeap::new();
        let mut seq = 0u64;
        let mut upstream_open = true;

        let mut push = |heap: &mut BinaryHeap<Entry<T>>, seq: &mut u64, item: T| -> bool {
            match score(&item) {
                Some(s) => {
                    heap.push(Entry {
                        score: s,
                        seq: *seq,
                        item,
                    });
                    *seq += 1;
                    true
                }
                None => {
                    tracing::debug!("sort stage dropped a disqualified item");
                    false
                }
            }
        };

        // Gather until enough scored elements arrived or time runs out.
        loop {
            let target = if heap.len() >= min_elements {
                floor
            } else {
                deadline
            };
            if Instant::now() >= target {
                break;
            }
            match timeout_at(target, rx.recv()).await {
                Ok(Some(item)) => {
                    push(&mut heap, &mut seq, item);
                }
                Ok(None) => {
                    upstream_open = false;
                    tokio::time::sleep_until(floor).await;
                    break;
                }
                Err(_) => {} // window boundary reached, re-check
            }
        }

        tracing::debug!(gathered = heap.len(), "sort stage starts yielding");

        // Drain best-first, folding in whatever arrived in the meantime.
        loop {
            while let Ok(item) = rx.try_recv() {
                push(&mut heap, &mut seq, item);
            }
            match heap.pop() {
                Some(entry) => {
                    if tx.send(entry.item).await.is_err() {
                        return;
                    }
                }
                None => {
                    if !upstream_open {
                        return;
                    }
                    match rx.recv().await {
                        Some(item) => {
                            push(&mut heap, &mut seq, item);
                        }
                        None => upstream_open = false,
                    }
                }
            }
        }
    });

    out_rx
}
