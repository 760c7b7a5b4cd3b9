/*!
 * Worker pool scheduler.
 *
 * Decides the initial fan-out of a run, staggers session worker start-up,
 * hot-adds session workers when new credentials appear mid-run and reports
 * when the run is over.
 *
 * Sizing:
 * - api workers: the configured fixed fan-out
 * - token workers: `min(distinct active credentials, session channel capacity)`,
 *   taken in registry order
 *
 * The first token worker starts at once; each following one waits an extra
 * random delay, cumulative across the cohort. Hot-added workers start at
 * once and ignore the capacity clamp.
 */

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::app_config::{Config, TranslateMode};
use crate::book::Unit;
use crate::credentials::{Credential, CredentialRegistry};
use crate::errors::{BatchError, ConfigError};
use crate::providers::TranslationBackend;
use crate::session::ConversationContextStore;
use crate::validation::CompletionMarker;

use super::batch::{BatchProgress, BatchState, ProcessingEntry, RunStatus, wait_until_idle};
use super::dispatch::UnitDispatcher;
use super::prompts::PromptPreparer;
use super::results::TranslationResults;
use super::retry::RetryPolicy;
use super::worker::{Worker, WorkerContext, WorkerSummary};

/// Settings of the worker pool
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub mode: TranslateMode,
    pub api_workers: usize,
    pub stagger_min: Duration,
    pub stagger_max: Duration,
    pub policy: RetryPolicy,
    pub marker: CompletionMarker,
    pub model: String,
    pub source_language: String,
    pub target_language: String,
    pub use_proxy: bool,
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let batch = &config.batch;
        if batch.stagger_min_ms > batch.stagger_max_ms {
            return Err(ConfigError::Invalid(format!(
                "stagger_min_ms ({}) exceeds stagger_max_ms ({})",
                batch.stagger_min_ms, batch.stagger_max_ms
            )));
        }
        let marker = CompletionMarker::new(&batch.completion_marker).map_err(|e| ConfigError::InvalidMarker {
            pattern: batch.completion_marker.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            mode: config.mode,
            api_workers: batch.api_workers,
            stagger_min: Duration::from_millis(batch.stagger_min_ms),
            stagger_max: Duration::from_millis(batch.stagger_max_ms),
            policy: RetryPolicy::from_config(batch),
            marker,
            model: config.model.clone(),
            source_language: config.source_language.clone(),
            target_language: config.target_language.clone(),
            use_proxy: batch.use_proxy,
        })
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        // The default config carries a valid stagger range and marker
        Self::from_config(&Config::default()).expect("default config yields a valid scheduler config")
    }
}

/// Final tallies of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub total: usize,
    pub completed: usize,
    pub abandoned: usize,
    pub discarded: usize,
    pub workers_started: usize,
    pub stopped: bool,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl RunReport {
    /// Units without a result after this run
    pub fn missing(&self) -> usize {
        self.total.saturating_sub(self.completed)
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

type WorkerHandles = Arc<Mutex<Vec<JoinHandle<WorkerSummary>>>>;

/// Handle on an active run
pub struct RunHandle {
    state: Arc<BatchState>,
    handles: WorkerHandles,
    watcher: Option<JoinHandle<()>>,
}

impl RunHandle {
    pub fn state(&self) -> &Arc<BatchState> {
        &self.state
    }

    pub fn progress(&self) -> BatchProgress {
        self.state.progress()
    }

    pub fn subscribe_progress(&self) -> tokio::sync::watch::Receiver<BatchProgress> {
        self.state.subscribe_progress()
    }

    pub fn stop(&self) -> bool {
        self.state.stop()
    }

    /// Wait until the run is idle and every worker has returned
    pub async fn wait(self) -> RunReport {
        self.state.wait_idle().await;

        let mut workers_started = 0;
        loop {
            let pending: Vec<JoinHandle<WorkerSummary>> = self.handles.lock().drain(..).collect();
            if pending.is_empty() {
                break;
            }
            for joined in join_all(pending).await {
                match joined {
                    Ok(summary) if summary.started => workers_started += 1,
                    Ok(_) => {}
                    Err(e) => error!("Worker task failed: {}", e),
                }
            }
        }

        if let Some(watcher) = self.watcher {
            watcher.abort();
        }

        let progress = self.state.progress();
        RunReport {
            run_id: self.state.run_id(),
            total: progress.total,
            completed: progress.completed,
            abandoned: progress.abandoned,
            discarded: progress.discarded,
            workers_started,
            stopped: self.state.is_stopped(),
            elapsed: self.state.elapsed(),
        }
    }
}

/// Cumulative start delays for `count` session workers.
///
/// The first is zero; each next one adds a uniform draw from `[min, max]`.
pub fn stagger_delays<R: Rng>(count: usize, min: Duration, max: Duration, rng: &mut R) -> Vec<Duration> {
    let (min_ms, max_ms) = (min.as_millis() as u64, max.as_millis() as u64);
    let mut total = Duration::ZERO;
    (0..count)
        .map(|i| {
            if i > 0 {
                total += Duration::from_millis(rng.random_range(min_ms..=max_ms));
            }
            total
        })
        .collect()
}

/// Starts, grows and stops batch runs
pub struct WorkerPoolScheduler {
    backend: Arc<dyn TranslationBackend>,
    registry: Arc<CredentialRegistry>,
    contexts: Arc<ConversationContextStore>,
    results: Arc<TranslationResults>,
    preparer: Arc<dyn PromptPreparer>,
    config: SchedulerConfig,
    current: Mutex<Option<Arc<BatchState>>>,
    starting: tokio::sync::Mutex<()>,
}

impl WorkerPoolScheduler {
    pub fn new(
        backend: Arc<dyn TranslationBackend>,
        registry: Arc<CredentialRegistry>,
        contexts: Arc<ConversationContextStore>,
        results: Arc<TranslationResults>,
        preparer: Arc<dyn PromptPreparer>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            contexts,
            results,
            preparer,
            config,
            current: Mutex::new(None),
            starting: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn results(&self) -> &Arc<TranslationResults> {
        &self.results
    }

    /// `Running` while a run is active
    pub fn status(&self) -> RunStatus {
        self.current
            .lock()
            .as_ref()
            .map_or(RunStatus::Idle, |state| state.status())
    }

    /// Progress of the current (or last) run
    pub fn progress(&self) -> Option<BatchProgress> {
        self.current.lock().as_ref().map(|state| state.progress())
    }

    /// Units in flight in the current run
    pub fn processing(&self) -> Vec<ProcessingEntry> {
        self.current
            .lock()
            .as_ref()
            .map(|state| state.processing())
            .unwrap_or_default()
    }

    /// Set the stop flag of the current run
    pub fn stop(&self) -> bool {
        match self.current.lock().as_ref() {
            Some(state) => state.stop(),
            None => false,
        }
    }

    /// Start a run over `units`.
    ///
    /// Configuration problems are returned before any worker is spawned.
    /// A run that is still active, or stopped with workers finishing their
    /// calls, blocks a new one.
    pub async fn start_run(&self, units: Vec<Unit>) -> Result<RunHandle, BatchError> {
        let _starting = self.starting.lock().await;
        self.ensure_drained()?;
        if units.is_empty() {
            return Err(ConfigError::EmptyBatch.into());
        }

        let mode = self.config.mode;
        let mut cohort: Vec<Credential> = Vec::new();
        let mut passed_over: HashSet<String> = HashSet::new();
        let mut session_capacity = 0;

        // Subscribed before any await so changes during the capacity probe reach the watcher
        let events = mode.uses_token().then(|| self.registry.subscribe());

        if mode.uses_token() {
            let distinct = self.registry.active();
            if distinct.is_empty() {
                return Err(ConfigError::NoUsableCredential.into());
            }

            if let Err(e) = self.backend.release_all_session_channels().await {
                warn!("Failed to release session channels: {}", e);
            }
            session_capacity = match self.backend.max_concurrent_session_channels().await {
                Ok(capacity) => capacity,
                Err(e) => {
                    warn!("Session channel capacity probe failed ({}), assuming no limit", e);
                    usize::MAX
                }
            };

            if distinct.len() > session_capacity {
                info!(
                    "{} distinct credentials exceed the session channel capacity of {}, starting the first {}",
                    distinct.len(),
                    session_capacity,
                    session_capacity
                );
            }
            let mut distinct = distinct.into_iter();
            cohort = distinct.by_ref().take(session_capacity).collect();
            passed_over = distinct.map(|c| c.identity_key()).collect();
        }

        let api_count = if mode.uses_api() { self.config.api_workers } else { 0 };
        if api_count + cohort.len() == 0 {
            return Err(ConfigError::NoWorkers {
                api_workers: api_count,
                session_capacity,
            }
            .into());
        }

        let total = units.len();
        let state = Arc::new(BatchState::new(units));
        let ctx = Arc::new(WorkerContext {
            state: state.clone(),
            dispatcher: Arc::new(UnitDispatcher::new(
                self.backend.clone(),
                self.contexts.clone(),
                &self.config.model,
                self.config.use_proxy,
            )),
            preparer: self.preparer.clone(),
            results: self.results.clone(),
            policy: self.config.policy,
            marker: self.config.marker.clone(),
            source_language: self.config.source_language.clone(),
            target_language: self.config.target_language.clone(),
        });

        // Cohort identities are held before anything runs so hot-add never doubles them
        for credential in &cohort {
            state.reserve(&credential.identity_key());
        }

        *self.current.lock() = Some(state.clone());
        info!(
            "Starting batch run {} ({} mode): {} units, {} api worker(s), {} token worker(s)",
            state.run_id(),
            mode,
            total,
            api_count,
            cohort.len()
        );

        let handles: WorkerHandles = Arc::new(Mutex::new(Vec::new()));

        for n in 1..=api_count {
            let worker = Worker::api(n, ctx.clone());
            handles.lock().push(tokio::spawn(worker.run()));
        }

        let delays = stagger_delays(
            cohort.len(),
            self.config.stagger_min,
            self.config.stagger_max,
            &mut rand::rng(),
        );
        for (credential, delay) in cohort.into_iter().zip(delays) {
            let worker = Worker::token(credential, ctx.clone());
            let handle = if delay.is_zero() {
                tokio::spawn(worker.run())
            } else {
                debug!("Worker {} scheduled to start in {:?}", worker.id(), delay);
                tokio::spawn(start_after(worker, state.clone(), delay))
            };
            handles.lock().push(handle);
        }

        let watcher = events.map(|events| {
            tokio::spawn(watch_credentials(
                events,
                self.registry.clone(),
                ctx.clone(),
                handles.clone(),
                passed_over,
            ))
        });

        Ok(RunHandle {
            state,
            handles,
            watcher,
        })
    }

    fn ensure_drained(&self) -> Result<(), BatchError> {
        let current = self.current.lock();
        let Some(previous) = current.as_ref() else {
            return Ok(());
        };
        if previous.status() == RunStatus::Running {
            return Err(BatchError::AlreadyRunning);
        }
        let live = previous.live_count();
        if live > 0 {
            debug!("Run {} still has {} live worker(s)", previous.run_id(), live);
            return Err(BatchError::PreviousRunDraining { live });
        }
        Ok(())
    }
}

/// Start `worker` after `delay` unless the run goes idle first
async fn start_after(worker: Worker, state: Arc<BatchState>, delay: Duration) -> WorkerSummary {
    let mut status = state.status_watch();
    let idle = tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = wait_until_idle(&mut status) => true,
    };

    if idle || state.is_stopped() {
        debug!("Delayed start of worker {} cancelled", worker.id());
        state.release(worker.key());
        return WorkerSummary::default();
    }
    worker.run().await
}

/// Hot-add token workers for credentials that appear while the run is active.
///
/// Credentials left out by the capacity clamp at start stay out.
async fn watch_credentials(
    mut events: tokio::sync::broadcast::Receiver<crate::credentials::CredentialsChanged>,
    registry: Arc<CredentialRegistry>,
    ctx: Arc<WorkerContext>,
    handles: WorkerHandles,
    passed_over: HashSet<String>,
) {
    let mut status = ctx.state.status_watch();
    loop {
        let distinct = tokio::select! {
            event = events.recv() => match event {
                Ok(changed) => changed.distinct_active,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Credential watcher lagged by {} events, rereading registry", skipped);
                    registry.active()
                }
                Err(RecvError::Closed) => break,
            },
            _ = wait_until_idle(&mut status) => break,
        };

        hot_add(&distinct, &passed_over, &ctx, &handles);
    }
    debug!("Credential watcher for run {} exited", ctx.state.run_id());
}

fn hot_add(
    distinct: &[Credential],
    passed_over: &HashSet<String>,
    ctx: &Arc<WorkerContext>,
    handles: &WorkerHandles,
) {
    let state = &ctx.state;
    if state.status() != RunStatus::Running || !state.has_remaining() {
        return;
    }

    let fresh: Vec<&Credential> = distinct
        .iter()
        .filter(|c| {
            let key = c.identity_key();
            !passed_over.contains(&key) && !state.is_bound(&key)
        })
        .collect();
    if fresh.is_empty() {
        return;
    }

    info!("Hot-adding {} token worker(s) to run {}", fresh.len(), state.run_id());
    for credential in fresh {
        if !state.reserve(&credential.identity_key()) {
            continue;
        }
        info!("Hot-starting worker for {}", credential.display_name());
        let worker = Worker::token(credential.clone(), ctx.clone());
        handles.lock().push(tokio::spawn(worker.run()));
    }
}
