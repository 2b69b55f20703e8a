use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;

use crate::STAGE_CAPACITY;

/// Reordering buffer: drives up to `size` upstream futures concurrently and
/// yields their outputs in completion order.
pub fn buffered<Fut>(mut rx: mpsc::Receiver<Fut>, size: usize) -> mpsc::Receiver<Fut::Output>
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let size = size.max(1);
    let (tx, out_rx) = mpsc::channel(STAGE_CAPACITY);

    tokio::spawn(async move {
        let mut in_flight = FuturesUnordered::new();
        let mut upstream_open = true;

        loop {
            tokio::select! {
                next = rx.recv(), if upstream_open && in_flight.len() < size => {
                    match next {
                        Some(fut) => in_flight.push(fut),
                        None => upstream_open = false,
                    }
                }
                Some(output) = in_flight.next() => {
                    if tx.send(output).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    out_rx
}
