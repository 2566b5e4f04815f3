//! The dispatcher task that drives a running job.
//!
//! It is the only owner of the data source cursor, the retry queue and the
//! set of in-flight tasks, and the only writer of the job's counters.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::checkpoint::CheckpointStore;
use super::events::JobEvent;
use super::orchestrator::Shared;
use super::proxies::{ProxyOutcome, ProxySource};
use super::state::JobState;
use crate::bot::{BotExecutor, BotLog, CheckResult, Status, Task, TaskOutcome};
use crate::data::DataSource;
use crate::error::{DataError, JobError};
use crate::http::Proxy;

enum Dispatch {
    Sent,
    /// No proxy free; try again after a wait.
    NoProxy,
    Exhausted,
}

pub(super) struct Dispatcher {
    shared: Arc<Shared>,
    source: Box<dyn DataSource>,
    executor: Arc<BotExecutor>,
    proxies: Option<Arc<dyn ProxySource>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    tasks: JoinSet<TaskOutcome>,
    /// What each in-flight task was given, for tasks that end without an
    /// outcome.
    leases: HashMap<task::Id, Task>,
    /// Requeued items, dispatched ahead of fresh source items.
    retries: VecDeque<Task>,
    exhausted: bool,
}

impl Dispatcher {
    pub fn new(
        shared: Arc<Shared>,
        source: Box<dyn DataSource>,
        executor: Arc<BotExecutor>,
        proxies: Option<Arc<dyn ProxySource>>,
        checkpoints: Option<Arc<dyn CheckpointStore>>,
    ) -> Self {
        Self {
            shared,
            source,
            executor,
            proxies,
            checkpoints,
            tasks: JoinSet::new(),
            leases: HashMap::new(),
            retries: VecDeque::new(),
            exhausted: false,
        }
    }

    pub async fn run(mut self) {
        let stop_ticker = CancellationToken::new();
        let ticker = tokio::spawn(run_ticker(
            Arc::clone(&self.shared),
            self.checkpoints.clone(),
            stop_ticker.clone(),
        ));

        let aborted = self.dispatch_loop().await;

        stop_ticker.cancel();
        if let Err(e) = ticker.await {
            warn!(job_id = %self.shared.id, error = %e, "Checkpoint ticker ended abnormally");
        }
        self.teardown(aborted).await;
    }

    /// Returns `true` when the job was aborted.
    async fn dispatch_loop(&mut self) -> bool {
        let mut state_rx = self.shared.state.subscribe();
        let mut bots_rx = self.shared.bots.subscribe();
        let mut skip_rx = self.shared.skip_wait.subscribe();
        let mut backoff: Option<Instant> = None;

        loop {
            if self.shared.cancel.is_cancelled() {
                return true;
            }
            let state = *state_rx.borrow_and_update();
            if self.tasks.is_empty() {
                match state {
                    JobState::Pausing => {
                        if self.shared.transition(JobState::Paused).is_ok() {
                            info!(job_id = %self.shared.id, "Job paused");
                        }
                        continue;
                    }
                    JobState::Stopping => return false,
                    JobState::Running if self.exhausted && self.retries.is_empty() => {
                        return false;
                    }
                    _ => {}
                }
            }

            let capacity = *bots_rx.borrow_and_update();
            let wants_dispatch = state == JobState::Running
                && self.tasks.len() < capacity
                && (!self.exhausted || !self.retries.is_empty());
            let now = Instant::now();

            if wants_dispatch && backoff.is_none_or(|at| at <= now) {
                backoff = None;
                match self.dispatch().await {
                    Ok(Dispatch::Sent) => {
                        let delay = self.shared.config.dispatch_delay;
                        if !delay.is_zero() {
                            skip_rx.borrow_and_update();
                            backoff = Some(Instant::now() + delay);
                        }
                        continue;
                    }
                    Ok(Dispatch::Exhausted) => continue,
                    Ok(Dispatch::NoProxy) => {
                        debug!(job_id = %self.shared.id, "No proxy available, waiting");
                        skip_rx.borrow_and_update();
                        backoff = Some(Instant::now() + self.shared.config.proxy_wait);
                    }
                    Err(e) => {
                        self.shared.fail(format!("Data source failed: {e}"));
                        return true;
                    }
                }
            }

            let wake_at = backoff.filter(|_| wants_dispatch);
            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => return true,
                Some(joined) = self.tasks.join_next_with_id() => self.on_joined(joined).await,
                _ = state_rx.changed() => {}
                _ = bots_rx.changed() => {}
                _ = tokio::time::sleep_until(wake_at.unwrap_or(now)), if wake_at.is_some() => {
                    backoff = None;
                }
                Ok(()) = skip_rx.changed(), if wake_at.is_some() => {
                    debug!(job_id = %self.shared.id, "Wait skipped");
                    backoff = None;
                }
            }
        }
    }

    async fn dispatch(&mut self) -> Result<Dispatch, DataError> {
        let proxy = match &self.proxies {
            Some(pool) => match pool.lease().await {
                Some(proxy) => Some(proxy),
                None => return Ok(Dispatch::NoProxy),
            },
            None => None,
        };

        let mut fresh = false;
        let task = match self.retries.pop_front() {
            Some(task) => task,
            None => match self.source.next_item() {
                Ok(Some(item)) => {
                    fresh = true;
                    Task::new(item)
                }
                Ok(None) => {
                    debug!(job_id = %self.shared.id, "Data source exhausted");
                    self.exhausted = true;
                    release(self.proxies.as_ref(), proxy, ProxyOutcome::Healthy).await;
                    return Ok(Dispatch::Exhausted);
                }
                Err(e) => {
                    release(self.proxies.as_ref(), proxy, ProxyOutcome::Healthy).await;
                    return Err(e);
                }
            },
        };
        let task = task.with_proxy(proxy);

        {
            let mut progress = self.shared.progress.write().await;
            if fresh {
                progress.consumed += 1;
            }
            progress.stats.in_flight += 1;
            progress.stats.queued_retries = self.retries.len();
        }

        debug!(
            job_id = %self.shared.id,
            item = %task.item,
            attempt = task.attempt,
            proxy = ?task.proxy.as_ref().map(Proxy::to_string),
            "Dispatching task"
        );
        let executor = Arc::clone(&self.executor);
        let cancel = self.shared.cancel.child_token();
        let lease = task.clone();
        let handle = self.tasks.spawn(async move { executor.run(task, cancel).await });
        self.leases.insert(handle.id(), lease);
        Ok(Dispatch::Sent)
    }

    async fn on_joined(&mut self, joined: Result<(task::Id, TaskOutcome), JoinError>) {
        let outcome = match joined {
            Ok((id, outcome)) => {
                self.leases.remove(&id);
                outcome
            }
            Err(e) => {
                error!(job_id = %self.shared.id, error = %e, "Task ended without an outcome");
                self.on_lost(e).await;
                return;
            }
        };

        match outcome {
            TaskOutcome::Checked(result) => self.on_checked(result).await,
            TaskOutcome::Failed { result, error } => {
                release(self.proxies.as_ref(), result.proxy.clone(), ProxyOutcome::Healthy).await;
                let result = Arc::new(result);
                {
                    let mut progress = self.shared.progress.write().await;
                    progress.stats.in_flight = progress.stats.in_flight.saturating_sub(1);
                    progress.confirm(&result);
                }
                self.shared.emit(JobEvent::TaskError {
                    job_id: self.shared.id,
                    item: result.item.clone(),
                    proxy: result.proxy.as_ref().map(Proxy::to_string),
                    error: error.to_string(),
                });
            }
            TaskOutcome::Cancelled { item, proxy } => {
                debug!(job_id = %self.shared.id, item = %item, "Task cancelled");
                release(self.proxies.as_ref(), proxy, ProxyOutcome::Healthy).await;
                let mut progress = self.shared.progress.write().await;
                progress.stats.in_flight = progress.stats.in_flight.saturating_sub(1);
            }
        }
    }

    /// A task that panicked past the executor or was torn down by the
    /// runtime: free its proxy and record the item as an error.
    async fn on_lost(&mut self, e: JoinError) {
        let Some(task) = self.leases.remove(&e.id()) else {
            let mut progress = self.shared.progress.write().await;
            progress.stats.in_flight = progress.stats.in_flight.saturating_sub(1);
            return;
        };
        release(self.proxies.as_ref(), task.proxy.clone(), ProxyOutcome::Healthy).await;
        let result = Arc::new(lost_result(task));
        {
            let mut progress = self.shared.progress.write().await;
            progress.stats.in_flight = progress.stats.in_flight.saturating_sub(1);
            progress.confirm(&result);
        }
        self.shared.emit(JobEvent::TaskError {
            job_id: self.shared.id,
            item: result.item.clone(),
            proxy: result.proxy.as_ref().map(Proxy::to_string),
            error: e.to_string(),
        });
    }

    async fn on_checked(&mut self, mut result: CheckResult) {
        let config = &self.shared.config;
        let banned = result.status == Status::Ban;
        let requeue = match result.status {
            Status::Retry if result.attempt < config.max_retries => true,
            Status::Retry => {
                debug!(job_id = %self.shared.id, item = %result.item, "Retries exhausted");
                result.status = Status::Fail;
                false
            }
            Status::Ban => config.retry_on_ban && result.attempt < config.max_retries,
            _ => false,
        };
        let outcome = if banned {
            ProxyOutcome::Banned
        } else {
            ProxyOutcome::Healthy
        };
        release(self.proxies.as_ref(), result.proxy.clone(), outcome).await;

        if requeue {
            self.retries
                .push_back(Task::requeued(result.item.clone(), result.attempt));
        }
        let result = Arc::new(result);

        let pause = {
            let mut progress = self.shared.progress.write().await;
            progress.stats.in_flight = progress.stats.in_flight.saturating_sub(1);
            progress.stats.queued_retries = self.retries.len();
            if banned {
                progress.stats.bans += 1;
                progress.recent_bans += 1;
            }
            if requeue {
                if result.status == Status::Retry {
                    progress.stats.retries += 1;
                }
            } else {
                progress.confirm(&result);
            }
            banned
                && config
                    .ban_pause_threshold
                    .is_some_and(|threshold| progress.recent_bans >= threshold)
        };

        self.shared.emit(JobEvent::Result {
            job_id: self.shared.id,
            result,
        });

        if pause && self.shared.transition(JobState::Pausing).is_ok() {
            warn!(job_id = %self.shared.id, "Ban threshold reached, pausing");
        }
    }

    async fn teardown(mut self, aborted: bool) {
        let id = self.shared.id;
        if aborted {
            self.discard_in_flight().await;
        }
        self.retries.clear();
        {
            let mut progress = self.shared.progress.write().await;
            progress.stats.in_flight = 0;
            progress.stats.queued_retries = 0;
        }

        let state = self.shared.finish(aborted);

        let checkpoint = self.shared.checkpoint().await;
        if let Some(store) = &self.checkpoints {
            if let Err(e) = store.save(&checkpoint).await {
                warn!(job_id = %id, error = %e, "Final checkpoint save failed");
            }
        }

        let stats = self.shared.progress.write().await.snapshot();
        info!(
            job_id = %id,
            state = %state,
            tested = stats.tested,
            hits = stats.hits,
            offset = checkpoint.offset,
            "Job finished"
        );
        self.shared.emit(JobEvent::Completed {
            job_id: id,
            state,
            stats,
        });
        self.shared.finished.send_replace(true);
    }

    /// Give cancelled tasks the grace window to wind down, then drop the rest.
    async fn discard_in_flight(&mut self) {
        let grace = self.shared.config.abort_grace;
        let proxies = self.proxies.clone();
        let tasks = &mut self.tasks;
        let leases = &mut self.leases;
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = tasks.join_next_with_id().await {
                let proxy = match joined {
                    Ok((id, TaskOutcome::Checked(result) | TaskOutcome::Failed { result, .. })) => {
                        leases.remove(&id);
                        result.proxy
                    }
                    Ok((id, TaskOutcome::Cancelled { proxy, .. })) => {
                        leases.remove(&id);
                        proxy
                    }
                    Err(e) => leases.remove(&e.id()).and_then(|task| task.proxy),
                };
                release(proxies.as_ref(), proxy, ProxyOutcome::Healthy).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                job_id = %self.shared.id,
                remaining = self.tasks.len(),
                "Abort grace elapsed, dropping tasks"
            );
            self.tasks.shutdown().await;
        }
        for (_, task) in self.leases.drain() {
            release(self.proxies.as_ref(), task.proxy, ProxyOutcome::Healthy).await;
        }
    }
}

async fn release(
    proxies: Option<&Arc<dyn ProxySource>>,
    proxy: Option<Proxy>,
    outcome: ProxyOutcome,
) {
    if let (Some(pool), Some(proxy)) = (proxies, proxy) {
        pool.release(proxy, outcome).await;
    }
}

fn lost_result(task: Task) -> CheckResult {
    CheckResult {
        item: task.item,
        proxy: task.proxy,
        status: Status::Error,
        attempt: task.attempt,
        captures: BTreeMap::new(),
        log: BotLog::default(),
        finished_at: Utc::now(),
    }
}

/// Periodic checkpoint and timer tick, for as long as the dispatcher runs.
async fn run_ticker(
    shared: Arc<Shared>,
    store: Option<Arc<dyn CheckpointStore>>,
    stop: CancellationToken,
) {
    let mut interval = tokio::time::interval(shared.config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    interval.tick().await;

    let max_failures = shared.config.max_checkpoint_failures.max(1);
    let mut failures = 0u32;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {}
        }

        let checkpoint = shared.checkpoint().await;
        if let Some(store) = &store {
            match store.save(&checkpoint).await {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures += 1;
                    warn!(job_id = %shared.id, failures, error = %e, "Checkpoint save failed");
                    if failures >= max_failures {
                        let error = JobError::CheckpointExhausted {
                            id: shared.id,
                            failures,
                        };
                        shared.fail(error.to_string());
                        break;
                    }
                }
            }
        }

        let stats = shared.progress.write().await.snapshot();
        shared.emit(JobEvent::TimerTick {
            job_id: shared.id,
            offset: checkpoint.offset,
            stats,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::bot::{CheckRoutine, TaskContext};
    use crate::config::JobConfig;
    use crate::data::{ListSource, WorkItem};
    use crate::error::CheckError;
    use crate::http::ProxyKind;
    use crate::job::{Job, ProxyPool};

    struct Accept;

    #[async_trait]
    impl CheckRoutine for Accept {
        async fn check(&self, _ctx: &mut TaskContext) -> Result<Status, CheckError> {
            Ok(Status::Success)
        }
    }

    #[tokio::test]
    async fn lost_task_frees_its_proxy_and_counts_as_an_error() {
        let routine: Arc<dyn CheckRoutine> = Arc::new(Accept);
        let job = Job::new(JobConfig::default(), ListSource::new(["a"]), Arc::clone(&routine));
        let pool = Arc::new(ProxyPool::new([Proxy::new(ProxyKind::Http, "10.0.0.1", 8080)]));
        let proxies: Arc<dyn ProxySource> = pool.clone();
        let mut dispatcher = Dispatcher::new(
            Arc::clone(job.shared()),
            Box::new(ListSource::new(["a"])),
            Arc::new(BotExecutor::new(routine, Duration::from_secs(1))),
            Some(Arc::clone(&proxies)),
            None,
        );

        let proxy = proxies.lease().await;
        assert!(proxy.is_some());
        let handle = dispatcher.tasks.spawn(async { panic!("task lost") });
        let task = Task::new(WorkItem::new("a", "Default", 0)).with_proxy(proxy);
        dispatcher.leases.insert(handle.id(), task);
        dispatcher.shared.progress.write().await.stats.in_flight = 1;

        let joined = dispatcher.tasks.join_next_with_id().await.unwrap();
        assert!(joined.is_err());
        dispatcher.on_joined(joined).await;

        assert_eq!(pool.available().await, 1);
        assert_eq!(pool.leased().await, 0);
        assert!(dispatcher.leases.is_empty());
        let stats = job.stats().await;
        assert_eq!(stats.tested, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.in_flight, 0);
    }
}
