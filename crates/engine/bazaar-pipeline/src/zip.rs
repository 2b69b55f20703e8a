use tokio::sync::mpsc;

use crate::STAGE_CAPACITY;

/// Pairs two channels element-wise. The output ends as soon as either side
/// closes; a surplus on the other side is dropped with its stage.
pub fn zip<A, B>(mut rx_a: mpsc::Receiver<A>, mut rx_b: mpsc::Receiver<B>) -> mpsc::Receiver<(A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    let (tx, out_rx) = mpsc::channel(STAGE_CAPACITY);

    tokio::spawn(async move {
        loop {
            let Some(a) = rx_a.recv().await else { break };
            let Some(b) = rx_b.recv().await else { break };
            if tx.send((a, b)).await.is_err() {
                break;
            }
        }
    });

    out_rx
}
