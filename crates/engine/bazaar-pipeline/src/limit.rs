use tokio::sync::mpsc;

use crate::STAGE_CAPACITY;

/// Passes through at most `max_items` values, then closes the stream.
/// Closing drops the upstream receiver, which tears the upstream down.
pub fn limit<T: Send + 'static>(
    mut rx: mpsc::Receiver<T>,
    max_items: usize,
) -> mpsc::Receiver<T> {
    let (tx, out_rx) = mpsc::channel(STAGE_CAPACITY.min(max_items.max(1)));

    tokio::spawn(async move {
        let mut forwarded = 0usize;
        while forwarded < max_items {
            let Some(item) = rx.recv().await else { break };
            if tx.send(item).await.is_err() {
                break;
            }
            forwarded += 1;
        }
        tracing::debug!(forwarded, max_items, "limit stage closing");
    });

    out_rx
}
