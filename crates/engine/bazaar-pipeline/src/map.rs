use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::STAGE_CAPACITY;

/// Applies an async fallible function to every upstream value with at most
/// `concurrency` invocations in flight.
///
/// `Ok` values flow to the first returned receiver in completion order.
/// `Err` values are routed to the second receiver and never stop the stage;
/// an error sink nobody reads from is drained silently.
pub fn map<T, U, E, F, Fut>(
    rx: mpsc::Receiver<T>,
    concurrency: usize,
    f: F,
) -> (mpsc::Receiver<U>, mpsc::Receiver<E>)
where
    T: Send + 'static,
    U: Send + 'static,
    E: Send + std::fmt::Display + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<U, E>> + Send,
{
    let concurrency = concurrency.max(1);
    let (ok_tx, ok_rx) = mpsc::channel(STAGE_CAPACITY);
    let (err_tx, err_rx) = mpsc::channel(STAGE_CAPACITY);

    let upstream = Arc::new(Mutex::new(rx));
    let f = Arc::new(f);

    for worker in 0..concurrency {
        let upstream = Arc::clone(&upstream);
        let f = Arc::clone(&f);
        let ok_tx = ok_tx.clone();
        let err_tx = err_tx.clone();

        tokio::spawn(async move {
            loop {
                // Hold the upstream lock only for the receive itself so the
                // other workers keep pulling while this one runs `f`.
                let item = { upstream.lock().await.recv().await };
                let Some(item) = item else { break };

                match f(item).await {
                    Ok(value) => {
                        if ok_tx.send(value).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(worker, error = %e, "map stage dropped an item");
                        if err_tx.send(e).await.is_err() && ok_tx.is_closed() {
                            break;
                        }
                    }
                }
            }
        });
    }

    (ok_rx, err_rx)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn ok_values_flow_and_errors_are_routed_aside() {
        let (tx, rx) = mpsc::channel(8);
        for n in 0..6u32 {
            tx.send(n).await.unwrap();
        }
        drop(tx);

        let (mut ok_rx, mut err_rx) = map(rx, 2, |n| async move {
            if n % 2 == 0 {
                Ok(n * 10)
            } else {
                Err(format!("odd: {n}"))
            }
        });

        let mut oks = Vec::new();
        while let Some(v) = ok_rx.recv().await {
            oks.push(v);
        }
        oks.sort_unstable();
        assert_eq!(oks, vec![0, 20, 40]);

        let mut errs = Vec::new();
        while let Some(e) = err_rx.recv().await {
            errs.push(e);
        }
        assert_eq!(errs.len(), 3);
    }

    #[tokio::test]
    async fn in_flight_invocations_never_exceed_concurrency() {
        static RUNNING: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);

        let (tx, rx) = mpsc::channel(16);
        for n in 0..12u32 {
            tx.send(n).await.unwrap();
        }
        drop(tx);

        let (mut ok_rx, _err_rx) = map(rx, 3, |n| async move {
            let now = RUNNING.fetch_add(1, Ordering::SeqCst) + 1;
            PEAK.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            RUNNING.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, String>(n)
        });

        let mut count = 0;
        while ok_rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 12);
        assert!(PEAK.load(Ordering::SeqCst) <= 3);
    }
}
