//! The job: control surface, status surface and the state shared with its
//! dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::checkpoint::{CheckpointStore, JobCheckpoint};
use super::dispatcher::Dispatcher;
use super::events::{self, JobEvent};
use super::inputs::{self, InputProvider};
use super::proxies::ProxySource;
use super::state::JobState;
use super::stats::{HitFilter, JobStats, Progress};
use crate::bot::{BotExecutor, CheckResult, CheckRoutine};
use crate::config::JobConfig;
use crate::data::{DataSource, SourceRef, SourceSize};
use crate::error::{ConfigError, JobError, Result};
use crate::http::HttpSettings;

/// State shared between a [`Job`] and its dispatcher task.
pub(super) struct Shared {
    pub id: Uuid,
    pub config: JobConfig,
    /// Offset the job started from.
    pub skip: u64,
    pub size: SourceSize,
    pub source_ref: SourceRef,
    pub state: watch::Sender<JobState>,
    pub bots: watch::Sender<usize>,
    /// Set once teardown has finished.
    pub finished: watch::Sender<bool>,
    pub progress: RwLock<Progress>,
    pub events: broadcast::Sender<JobEvent>,
    /// Job-wide abort signal. Every task runs under a child token.
    pub cancel: CancellationToken,
    /// Bumped on every skip request. The dispatcher marks the current value
    /// seen when it starts a wait, so only skips during that wait count.
    pub skip_wait: watch::Sender<u64>,
}

impl Shared {
    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Move to `target` if the state machine allows it.
    pub fn transition(&self, target: JobState) -> std::result::Result<JobState, JobError> {
        let mut outcome = Err(JobState::Idle);
        self.state.send_if_modified(|state| {
            if state.can_transition_to(target) {
                outcome = Ok(*state);
                *state = target;
                true
            } else {
                outcome = Err(*state);
                false
            }
        });
        outcome.map_err(|state| JobError::InvalidTransition {
            id: self.id,
            state: state.to_string(),
            target: target.to_string(),
        })
    }

    /// Settle the terminal state at teardown. A pause or stop requested
    /// while the last tasks drained is overridden.
    pub fn finish(&self, aborted: bool) -> JobState {
        let mut terminal = JobState::Completed;
        self.state.send_modify(|state| {
            if aborted || *state == JobState::Aborted {
                *state = JobState::Aborted;
            } else {
                *state = JobState::Completed;
            }
            terminal = *state;
        });
        terminal
    }

    pub fn emit(&self, event: JobEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    pub async fn resume_offset(&self) -> u64 {
        if self.state() == JobState::Idle {
            return self.skip;
        }
        self.skip + self.progress.read().await.consumed
    }

    pub async fn checkpoint(&self) -> JobCheckpoint {
        JobCheckpoint {
            job_id: self.id,
            source: self.source_ref.clone(),
            offset: self.resume_offset().await,
            saved_at: Utc::now(),
        }
    }

    /// Report an orchestrator-fatal condition and abort.
    pub fn fail(&self, reason: String) {
        error!(job_id = %self.id, reason = %reason, "Job failed");
        self.emit(JobEvent::FatalError {
            job_id: self.id,
            error: reason,
        });
        let _ = self.transition(JobState::Aborted);
        self.cancel.cancel();
    }
}

/// Everything consumed when the job starts.
struct Setup {
    source: Box<dyn DataSource>,
    routine: Arc<dyn CheckRoutine>,
    inputs: Option<Arc<dyn InputProvider>>,
    proxies: Option<Arc<dyn ProxySource>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    http: Arc<HttpSettings>,
    /// Source the resumed checkpoint was taken against.
    resume_source: Option<SourceRef>,
}

/// Builder for [`Job`].
pub struct JobBuilder {
    config: JobConfig,
    id: Uuid,
    skip: u64,
    setup: Setup,
}

impl JobBuilder {
    pub fn proxies(mut self, proxies: Arc<dyn ProxySource>) -> Self {
        self.setup.proxies = Some(proxies);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.setup.checkpoints = Some(store);
        self
    }

    pub fn input_provider(mut self, provider: Arc<dyn InputProvider>) -> Self {
        self.setup.inputs = Some(provider);
        self
    }

    pub fn http_settings(mut self, settings: HttpSettings) -> Self {
        self.setup.http = Arc::new(settings);
        self
    }

    /// Start from `offset` instead of the beginning of the source.
    pub fn skip(mut self, offset: u64) -> Self {
        self.skip = offset;
        self
    }

    /// Continue a previous run: same job id, starting at its saved offset.
    /// `start` refuses to run if the checkpoint was taken against a
    /// different source.
    pub fn resume_from(mut self, checkpoint: &JobCheckpoint) -> Self {
        self.id = checkpoint.job_id;
        self.skip = checkpoint.offset;
        self.setup.resume_source = Some(checkpoint.source.clone());
        self
    }

    pub fn build(self) -> Job {
        let (state, _) = watch::channel(JobState::Idle);
        let (bots, _) = watch::channel(self.config.bots);
        let (finished, _) = watch::channel(false);
        let (skip_wait, _) = watch::channel(0);
        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));
        let shared = Shared {
            id: self.id,
            skip: self.skip,
            size: self.setup.source.size(),
            source_ref: self.setup.source.reference(),
            config: self.config,
            state,
            bots,
            finished,
            progress: RwLock::new(Progress::default()),
            events,
            cancel: CancellationToken::new(),
            skip_wait,
        };
        Job {
            shared: Arc::new(shared),
            setup: Mutex::new(Some(self.setup)),
            driver: Mutex::new(None),
        }
    }
}

/// A run over one data source with a pool of bots.
///
/// Control operations take `&self`, so a job can be shared behind an `Arc`
/// between the code driving it and the code watching it.
pub struct Job {
    shared: Arc<Shared>,
    setup: Mutex<Option<Setup>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Job {
    pub fn builder(
        config: JobConfig,
        source: impl DataSource + 'static,
        routine: Arc<dyn CheckRoutine>,
    ) -> JobBuilder {
        JobBuilder {
            config,
            id: Uuid::new_v4(),
            skip: 0,
            setup: Setup {
                source: Box::new(source),
                routine,
                inputs: None,
                proxies: None,
                checkpoints: None,
                http: Arc::new(HttpSettings::default()),
                resume_source: None,
            },
        }
    }

    pub fn new(
        config: JobConfig,
        source: impl DataSource + 'static,
        routine: Arc<dyn CheckRoutine>,
    ) -> Self {
        Self::builder(config, source, routine).build()
    }

    // ── Control ─────────────────────────────────────────────────────

    /// Collect inputs, validate, seek the source and begin dispatching.
    ///
    /// On any validation failure the job returns to Idle and can be started
    /// again once the cause is fixed.
    pub async fn start(&self) -> Result<()> {
        let shared = &self.shared;
        shared.transition(JobState::Starting)?;

        let mut guard = self.setup.lock().await;
        let Some(mut setup) = guard.take() else {
            let _ = shared.transition(JobState::Idle);
            return Err(JobError::Fatal {
                id: shared.id,
                reason: "job was already started".into(),
            }
            .into());
        };

        let answers = match self.prepare(&mut setup).await {
            Ok(answers) => answers,
            Err(e) => {
                warn!(job_id = %shared.id, error = %e, "Job failed to start");
                *guard = Some(setup);
                let _ = shared.transition(JobState::Idle);
                return Err(e);
            }
        };

        let executor = BotExecutor::new(setup.routine, shared.config.task_timeout)
            .with_http_settings(setup.http)
            .with_inputs(Arc::new(answers))
            .with_bot_log(shared.config.bot_log);
        let proxies = setup.proxies.filter(|_| shared.config.use_proxies);
        let dispatcher = Dispatcher::new(
            Arc::clone(shared),
            setup.source,
            Arc::new(executor),
            proxies,
            setup.checkpoints,
        );

        shared.progress.write().await.recent_bans = 0;
        shared.transition(JobState::Running)?;
        info!(
            job_id = %shared.id,
            bots = self.bots(),
            skip = shared.skip,
            "Job started"
        );
        *self.driver.lock().await = Some(tokio::spawn(dispatcher.run()));
        Ok(())
    }

    async fn prepare(&self, setup: &mut Setup) -> Result<HashMap<String, String>> {
        let config = &self.shared.config;
        config.validate()?;
        if config.use_proxies && setup.proxies.is_none() {
            return Err(ConfigError::InvalidValue {
                key: "use_proxies".into(),
                message: "no proxy source configured".into(),
            }
            .into());
        }
        if let Some(saved) = &setup.resume_source {
            let actual = setup.source.reference();
            if *saved != actual {
                return Err(ConfigError::CheckpointSource {
                    saved: saved.clone(),
                    actual,
                }
                .into());
            }
        }
        let answers = inputs::collect(&config.inputs, setup.inputs.as_deref()).await?;
        setup.source.seek(self.shared.skip)?;
        Ok(answers)
    }

    /// Soft stop: no new dispatch, in-flight tasks finish. Returns once the
    /// job has completed.
    pub async fn stop(&self) -> std::result::Result<(), JobError> {
        self.shared.transition(JobState::Stopping)?;
        info!(job_id = %self.shared.id, "Job stopping");
        self.wait().await;
        Ok(())
    }

    /// Hard abort: cancel every in-flight task. Their work is discarded.
    pub async fn abort(&self) -> std::result::Result<(), JobError> {
        self.shared.transition(JobState::Aborted)?;
        warn!(job_id = %self.shared.id, "Job aborted");
        self.shared.cancel.cancel();
        self.wait().await;
        Ok(())
    }

    /// Halt dispatch and wait for in-flight tasks to drain. Also returns if
    /// the job finishes while pausing.
    pub async fn pause(&self) -> std::result::Result<(), JobError> {
        self.shared.transition(JobState::Pausing)?;
        info!(job_id = %self.shared.id, "Job pausing");
        let mut state_rx = self.shared.state.subscribe();
        let mut finished_rx = self.shared.finished.subscribe();
        tokio::select! {
            _ = state_rx.wait_for(|s| !matches!(s, JobState::Pausing)) => {}
            _ = finished_rx.wait_for(|done| *done) => {}
        }
        Ok(())
    }

    pub async fn resume(&self) -> std::result::Result<(), JobError> {
        self.shared.transition(JobState::Resuming)?;
        self.shared.progress.write().await.recent_bans = 0;
        self.shared.transition(JobState::Running)?;
        info!(job_id = %self.shared.id, "Job resumed");
        Ok(())
    }

    /// Resize the bot pool. Extra capacity dispatches immediately; removed
    /// capacity drains without replacement.
    pub fn change_bots(&self, bots: usize) -> std::result::Result<(), JobError> {
        if bots == 0 {
            return Err(JobError::InvalidBots(bots));
        }
        let previous = self.shared.bots.send_replace(bots);
        info!(job_id = %self.shared.id, from = previous, to = bots, "Bot count changed");
        Ok(())
    }

    /// Cut short a pending dispatch delay or proxy wait. No-op when nothing
    /// is waiting.
    pub fn skip_wait(&self) {
        self.shared.skip_wait.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Resolve once a started job has torn down. Returns immediately for a
    /// job that was never started.
    pub async fn wait(&self) {
        if self.state() == JobState::Idle {
            return;
        }
        let mut rx = self.shared.finished.subscribe();
        let _ = rx.wait_for(|done| *done).await;
        if let Some(handle) = self.driver.lock().await.take() {
            let _ = handle.await;
        }
    }

    // ── Status ──────────────────────────────────────────────────────

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> JobState {
        self.shared.state()
    }

    pub fn bots(&self) -> usize {
        *self.shared.bots.borrow()
    }

    pub fn skip(&self) -> u64 {
        self.shared.skip
    }

    pub fn config(&self) -> &JobConfig {
        &self.shared.config
    }

    pub async fn stats(&self) -> JobStats {
        self.shared.progress.write().await.snapshot()
    }

    pub async fn hits(&self, filter: HitFilter) -> Vec<Arc<CheckResult>> {
        self.shared.progress.read().await.hits(filter)
    }

    /// Offset a fresh job should start from to continue this one.
    pub async fn resume_offset(&self) -> u64 {
        self.shared.resume_offset().await
    }

    pub async fn checkpoint(&self) -> JobCheckpoint {
        self.shared.checkpoint().await
    }

    /// Fraction of a finite source consumed; `None` for unbounded sources.
    pub async fn progress(&self) -> Option<f64> {
        match self.shared.size {
            SourceSize::Unbounded => None,
            SourceSize::Finite(0) => Some(1.0),
            SourceSize::Finite(size) => {
                Some((self.resume_offset().await as f64 / size as f64).min(1.0))
            }
        }
    }

    // ── Events ──────────────────────────────────────────────────────

    /// Subscribe to events. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }

    /// Events as a stream that ends when the job is gone.
    pub fn event_stream(&self) -> impl futures::Stream<Item = JobEvent> + Send + use<> {
        events::into_stream(self.subscribe())
    }
}

#[cfg(test)]
impl Job {
    pub(super) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if self.shared.state().is_active() && self.shared.transition(JobState::Aborted).is_ok() {
            warn!(job_id = %self.shared.id, "Job dropped while active, aborting");
            self.shared.cancel.cancel();
        }
    }
}
