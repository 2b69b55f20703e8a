use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinSet;

use bazaar_types::{Activity, ActivitySource, MarketError};

use crate::metrics::record_pool_sizes;

const CONTROL_TICK: Duration = Duration::from_millis(100);

struct PoolState {
    idle: Mutex<VecDeque<Activity>>,
    borrowed: AtomicUsize,
    target: AtomicUsize,
    /// Wakes the control loop when the pool shape changed.
    wake_control: Notify,
    /// Wakes getters when the idle queue gained an entry.
    idle_ready: Notify,
}

impl PoolState {
    async fn sizes(&self) -> (usize, usize) {
        let idle = self.idle.lock().await.len();
        (idle + self.borrowed.load(Ordering::SeqCst), idle)
    }
}

/// Keeps `target_size` prepared activities available behind an idle queue.
///
/// A background control loop converges the owned size (idle plus checked
/// out) toward the target: deficits are acquired concurrently from the
/// underlying source, surpluses drained from the idle queue and torn down.
pub struct ActivityPool {
    source: Arc<dyn ActivitySource>,
    state: Arc<PoolState>,
    shutdown_tx: watch::Sender<bool>,
    control: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ActivityPool {
    pub fn spawn(source: Arc<dyn ActivitySource>, target_size: usize) -> Self {
        let state = Arc::new(PoolState {
            idle: Mutex::new(VecDeque::new()),
            borrowed: AtomicUsize::new(0),
            target: AtomicUsize::new(target_size),
            wake_control: Notify::new(),
            idle_ready: Notify::new(),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let control = tokio::spawn(control_loop(
            Arc::clone(&source),
            Arc::clone(&state),
            shutdown_rx,
        ));
        Self {
            source,
            state,
            shutdown_tx,
            control: Mutex::new(Some(control)),
        }
    }

    pub fn set_target_size(&self, target: usize) {
        self.state.target.store(target, Ordering::SeqCst);
        self.state.wake_control.notify_one();
    }

    pub async fn current_size(&self) -> usize {
        self.state.sizes().await.0
    }

    pub async fn idle_size(&self) -> usize {
        self.state.sizes().await.1
    }

    /// Stops the control loop and tears down everything in the idle queue,
    /// logging and continuing past individual failures.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(control) = self.control.lock().await.take() {
            if let Err(e) = control.await {
                tracing::warn!(error = %e, "pool control loop ended abnormally");
            }
        }

        let drained: Vec<Activity> = self.state.idle.lock().await.drain(..).collect();
        tracing::info!(count = drained.len(), "draining activity pool");
        for activity in drained {
            let id = activity.id();
            if let Err(e) = self.source.teardown(activity).await {
                tracing::warn!(activity_id = %id, error = %e, "teardown during shutdown failed");
            }
        }
        let (current, idle) = self.state.sizes().await;
        record_pool_sizes(current, idle, 0);
    }
}

#[async_trait]
impl ActivitySource for ActivityPool {
    /// Takes a prepared activity out of the idle queue, waiting for the
    /// control loop to stock it when empty. Activities found destroyed in
    /// the queue are torn down and skipped.
    async fn get_activity(&self) -> Result<Activity, MarketError> {
        loop {
            let next = self.state.idle.lock().await.pop_front();
            match next {
                Some(activity) if !activity.is_destroyed() => {
                    self.state.borrowed.fetch_add(1, Ordering::SeqCst);
                    return Ok(activity);
                }
                Some(dead) => {
                    tracing::debug!(activity_id = %dead.id(), "skipping destroyed pooled activity");
                    let _ = self.source.teardown(dead).await;
                    self.state.wake_control.notify_one();
                }
                None => {
                    self.state.wake_control.notify_one();
                    self.state.idle_ready.notified().await;
                }
            }
        }
    }

    /// Returns a borrowed activity to the idle queue. A destroyed activity
    /// cannot be pooled again and is torn down instead.
    async fn release_activity(&self, activity: Activity) -> Result<(), MarketError> {
        self.state.borrowed.fetch_sub(1, Ordering::SeqCst);
        if activity.is_destroyed() {
            let _ = self.source.teardown(activity).await;
            self.state.wake_control.notify_one();
            return Ok(());
        }
        self.state.idle.lock().await.push_back(activity);
        self.state.idle_ready.notify_one();
        self.state.wake_control.notify_one();
        Ok(())
    }

    async fn teardown(&self, activity: Activity) -> Result<(), MarketError> {
        self.state.borrowed.fetch_sub(1, Ordering::SeqCst);
        self.source.teardown(activity).await?;
        self.state.wake_control.notify_one();
        Ok(())
    }
}

async fn control_loop(
    source: Arc<dyn ActivitySource>,
    state: Arc<PoolState>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let target = state.target.load(Ordering::SeqCst);
        let (current, idle) = state.sizes().await;
        record_pool_sizes(current, idle, target);

        if current < target {
            let deficit = target - current;
            tracing::debug!(current, target, deficit, "growing activity pool");
            let mut acquisitions = JoinSet::new();
            for _ in 0..deficit {
                let source = Arc::clone(&source);
                acquisitions.spawn(async move { source.get_activity().await });
            }
            loop {
                tokio::select! {
                    joined = acquisitions.join_next() => {
                        match joined {
                            None => break,
                            Some(Ok(Ok(activity))) => {
                                state.idle.lock().await.push_back(activity);
                                state.idle_ready.notify_one();
                            }
                            Some(Ok(Err(e))) => {
                                tracing::warn!(error = %e, "pool could not acquire an activity");
                            }
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "pool acquisition task panicked");
                            }
                        }
                    }
                    // An acquisition can block indefinitely on a dry offer
                    // stream; shutdown must not wait for it.
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            acquisitions.abort_all();
                            while let Some(joined) = acquisitions.join_next().await {
                                if let Ok(Ok(activity)) = joined {
                                    state.idle.lock().await.push_back(activity);
                                    state.idle_ready.notify_one();
                                }
                            }
                            return;
                        }
                    }
                }
            }
        } else if current > target {
            let mut surplus = Vec::new();
            {
                let mut idle = state.idle.lock().await;
                for _ in 0..(current - target).min(idle.len()) {
                    if let Some(activity) = idle.pop_back() {
                        surplus.push(activity);
                    }
                }
            }
            tracing::debug!(current, target, draining = surplus.len(), "shrinking activity pool");
            let mut teardowns = JoinSet::new();
            for activity in surplus {
                let source = Arc::clone(&source);
                teardowns.spawn(async move { source.teardown(activity).await });
            }
            while let Some(joined) = teardowns.join_next().await {
                if let Ok(Err(e)) = joined {
                    tracing::warn!(error = %e, "pool teardown failed");
                }
            }
        }

        let (current, idle) = state.sizes().await;
        record_pool_sizes(current, idle, target);

        tokio::select! {
            _ = state.wake_control.notified() => {}
            _ = tokio::time::sleep(CONTROL_TICK) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use bazaar_types::testing::MockProvider;
    use bazaar_types::{EventBus, Offer, PoolSettings};

    use crate::agreement::AgreementPool;
    use crate::single_use::SingleUseActivityPool;

    use super::*;

    async fn offer_stream(provider: &MockProvider, count: usize) -> mpsc::Receiver<Offer> {
        let (tx, rx) = mpsc::channel(count.max(1));
        for _ in 0..count {
            let handle = provider.initial_proposal();
            let data = handle.data().await.unwrap();
            tx.send(Offer::new(handle, data)).await.unwrap();
        }
        // Leak the sender so the stream stays open for the pool's lifetime.
        std::mem::forget(tx);
        rx
    }

    fn single_use(rx: mpsc::Receiver<Offer>) -> Arc<dyn ActivitySource> {
        let bus = EventBus::new();
        let settings = PoolSettings::default();
        let agreements = Arc::new(AgreementPool::new(rx, settings.clone(), bus.clone()));
        Arc::new(SingleUseActivityPool::new(agreements, &settings, bus))
    }

    async fn wait_for_size(pool: &ActivityPool, size: usize) {
        for _ in 0..1000 {
            if pool.current_size().await == size {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!(
            "pool never reached size {size}, stuck at {}",
            pool.current_size().await
        );
    }

    #[tokio::test]
    async fn converges_up_to_the_target_size() {
        let provider = MockProvider::new("provider-1");
        let pool = ActivityPool::spawn(single_use(offer_stream(&provider, 8).await), 3);

        wait_for_size(&pool, 3).await;
        assert_eq!(pool.idle_size().await, 3);
    }

    #[tokio::test]
    async fn converges_down_when_the_target_shrinks() {
        let provider = MockProvider::new("provider-1");
        let pool = ActivityPool::spawn(single_use(offer_stream(&provider, 8).await), 3);
        wait_for_size(&pool, 3).await;

        pool.set_target_size(1);
        wait_for_size(&pool, 1).await;
        assert_eq!(provider.destroyed_activities().len(), 2);
    }

    #[tokio::test]
    async fn get_and_release_keep_the_size_stable() {
        let provider = MockProvider::new("provider-1");
        let pool = ActivityPool::spawn(single_use(offer_stream(&provider, 8).await), 2);
        wait_for_size(&pool, 2).await;

        let activity = pool.get_activity().await.unwrap();
        assert_eq!(pool.current_size().await, 2);
        assert_eq!(pool.idle_size().await, 1);

        pool.release_activity(activity).await.unwrap();
        assert_eq!(pool.idle_size().await, 2);
    }

    #[tokio::test]
    async fn shutdown_drains_everything_it_owns() {
        let provider = MockProvider::new("provider-1");
        let pool = ActivityPool::spawn(single_use(offer_stream(&provider, 8).await), 3);
        wait_for_size(&pool, 3).await;

        pool.shutdown().await;
        assert_eq!(pool.current_size().await, 0);
        assert_eq!(provider.destroyed_activities().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_returns_while_acquisitions_are_still_pending() {
        // An open stream with nothing in it: the control loop's
        // acquisitions block on it forever.
        let (_tx, rx) = mpsc::channel::<Offer>(1);
        let pool = ActivityPool::spawn(single_use(rx), 2);
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .unwrap();
        assert_eq!(pool.current_size().await, 0);
    }
}
