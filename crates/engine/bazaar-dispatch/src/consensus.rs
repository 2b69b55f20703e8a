use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use bazaar_types::{
    ActivitySource, DispatchSettings, EventBus, MarketEvent, Offer, ProviderId,
};

use crate::dowork::WorkContext;
use crate::result::WorkError;

/// Executes one task on one activity.
pub type TaskExecutor<T, R> =
    Arc<dyn Fn(WorkContext, T) -> BoxFuture<'static, Result<R, WorkError>> + Send + Sync>;

struct ConsensusState<T, R> {
    /// Tasks still waiting for a consensus result.
    remaining: Vec<T>,
    /// Successful attempts per task, in completion order.
    attempts: HashMap<T, Vec<(ProviderId, R)>>,
    /// Every task a provider has been handed, attempted or in flight.
    provider_tasks: HashMap<ProviderId, HashSet<T>>,
    useless: HashSet<ProviderId>,
    results: HashMap<T, R>,
}

/// Task-level redundancy with majority consensus.
///
/// Every task is handed to several independent providers, never twice to
/// the same one. A task retires, exactly once, when it has at least
/// `min_repeat` successful attempts and the most frequent result accounts
/// for at least `min_success_ratio` of them. A provider that has been
/// handed every remaining task is useless: its proposals are filtered out
/// and its agreement released.
pub struct ConsensusDispatcher<T, R> {
    state: Mutex<ConsensusState<T, R>>,
    settings: DispatchSettings,
    bus: EventBus,
}

impl<T, R> ConsensusDispatcher<T, R>
where
    T: Clone + Eq + Hash + Display + Send + Sync + 'static,
    R: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(tasks: Vec<T>, settings: DispatchSettings, bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ConsensusState {
                remaining: tasks,
                attempts: HashMap::new(),
                provider_tasks: HashMap::new(),
                useless: HashSet::new(),
                results: HashMap::new(),
            }),
            settings,
            bus,
        })
    }

    /// Picks a remaining task this provider has not been handed yet and
    /// records the hand-out. `None` with tasks remaining means the provider
    /// is of no further use and is marked as such.
    pub async fn next_task_for(&self, provider: &ProviderId) -> Option<T> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        if state.remaining.is_empty() {
            return None;
        }

        let handed = state.provider_tasks.entry(provider.clone()).or_default();
        let task = state
            .remaining
            .iter()
            .find(|t| !handed.contains(*t))
            .cloned();

        match task {
            Some(task) => {
                handed.insert(task.clone());
                Some(task)
            }
            None => {
                tracing::debug!(%provider, "provider has attempted every remaining task");
                state.useless.insert(provider.clone());
                None
            }
        }
    }

    /// Records a successful attempt and retires the task if consensus is
    /// reached. Results for already-retired tasks are discarded. Returns
    /// the consensus result when this attempt retired the task.
    pub async fn record_success(&self, provider: &ProviderId, task: &T, result: R) -> Option<R> {
        let mut state = self.state.lock().await;
        if !state.remaining.contains(task) {
            tracing::debug!(%provider, task = %task, "late result for a retired task, discarding");
            return None;
        }

        let attempts = state.attempts.entry(task.clone()).or_default();
        attempts.push((provider.clone(), result));

        let total = attempts.len();
        let mut histogram: HashMap<&R, usize> = HashMap::new();
        for (_, r) in attempts.iter() {
            *histogram.entry(r).or_insert(0) += 1;
        }
        // Never empty: the attempt above was just pushed.
        let Some((majority, frequency)) = histogram.into_iter().max_by_key(|(_, count)| *count)
        else {
            return None;
        };

        if total < self.settings.min_repeat
            || (frequency as f64) / (total as f64) < self.settings.min_success_ratio
        {
            tracing::debug!(task = %task, total, frequency, "no consensus yet");
            return None;
        }

        let majority = majority.clone();
        state.remaining.retain(|t| t != task);
        state.results.insert(task.clone(), majority.clone());
        tracing::info!(task = %task, attempts = total, "task retired by consensus");
        self.bus.emit(MarketEvent::TaskRetired {
            task_id: task.to_string(),
        });
        Some(majority)
    }

    /// Forgets that the provider was handed this task, so another provider
    /// (or a later attempt) can pick it up.
    pub async fn record_failure(&self, provider: &ProviderId, task: &T) {
        let mut state = self.state.lock().await;
        if let Some(handed) = state.provider_tasks.get_mut(provider) {
            handed.remove(task);
        }
    }

    pub async fn is_done(&self) -> bool {
        self.state.lock().await.remaining.is_empty()
    }

    pub async fn is_useless(&self, provider: &ProviderId) -> bool {
        self.state.lock().await.useless.contains(provider)
    }

    pub async fn results(&self) -> HashMap<T, R> {
        self.state.lock().await.results.clone()
    }

    /// Attempt history of one task, for inspection and tests.
    pub async fn attempts_for(&self, task: &T) -> Vec<(ProviderId, R)> {
        self.state
            .lock()
            .await
            .attempts
            .get(task)
            .cloned()
            .unwrap_or_default()
    }

    /// Drops proposals from providers already known to be useless.
    pub fn filter_providers(self: &Arc<Self>, mut rx: mpsc::Receiver<Offer>) -> mpsc::Receiver<Offer> {
        let (tx, out_rx) = mpsc::channel(32);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(offer) = rx.recv().await {
                if this.is_useless(offer.issuer()).await {
                    tracing::debug!(issuer = %offer.issuer(), "dropping offer from useless provider");
                    continue;
                }
                if tx.send(offer).await.is_err() {
                    break;
                }
            }
        });
        out_rx
    }

    /// Runs the task set to completion over `worker_count` workers, each
    /// holding one activity at a time. Returns the consensus results
    /// gathered (all tasks, unless providers ran out first).
    pub async fn run(
        self: &Arc<Self>,
        source: Arc<dyn ActivitySource>,
        executor: TaskExecutor<T, R>,
    ) -> HashMap<T, R> {
        let mut workers = JoinSet::new();
        for worker in 0..self.settings.worker_count.max(1) {
            let this = Arc::clone(self);
            let source = Arc::clone(&source);
            let executor = Arc::clone(&executor);
            workers.spawn(async move { this.worker(worker, source, executor).await });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "consensus worker panicked");
            }
        }
        self.results().await
    }

    async fn worker(
        &self,
        worker: usize,
        source: Arc<dyn ActivitySource>,
        executor: TaskExecutor<T, R>,
    ) {
        'providers: loop {
            if self.is_done().await {
                return;
            }
            let activity = match source.get_activity().await {
                Ok(activity) => activity,
                Err(e) => {
                    tracing::warn!(worker, error = %e, "no more activities for consensus work");
                    return;
                }
            };
            let provider = activity.provider().clone();

            loop {
                if self.is_done().await {
                    if let Err(e) = source.release_activity(activity).await {
                        tracing::debug!(worker, error = %e, "release after completion failed");
                    }
                    return;
                }
                let Some(task) = self.next_task_for(&provider).await else {
                    // Useless here (or the task set emptied between checks);
                    // this provider's agreement is done either way.
                    if let Err(e) = source.teardown(activity).await {
                        tracing::debug!(worker, error = %e, "teardown of useless provider failed");
                    }
                    continue 'providers;
                };

                let ctx = WorkContext {
                    activity: activity.clone(),
                };
                match executor(ctx, task.clone()).await {
                    Ok(result) => {
                        self.record_success(&provider, &task, result).await;
                    }
                    Err(e) => {
                        tracing::warn!(worker, %provider, task = %task, error = %e, "attempt failed");
                        self.record_failure(&provider, &task).await;
                        if let Err(e) = source.teardown(activity).await {
                            tracing::debug!(worker, error = %e, "teardown after failure failed");
                        }
                        continue 'providers;
                    }
                }
            }
        }
    }
}
