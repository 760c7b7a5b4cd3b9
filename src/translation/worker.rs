/*!
 * Batch worker.
 *
 * A worker is one sequential stream of unit translations on a fixed
 * channel. Token workers own exactly one credential for their whole life.
 * All workers of a run share the run's `BatchState` cursor and counters.
 */

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::book::{Unit, extract_translated_title};
use crate::credentials::Credential;
use crate::errors::CallError;
use crate::providers::Channel;
use crate::validation::CompletionMarker;

use super::batch::{BatchState, ProcessingEntry, UnitOutcome};
use super::dispatch::{CallTarget, UnitDispatcher};
use super::prompts::PromptPreparer;
use super::results::{TranslationResult, TranslationResults};
use super::retry::{RetryError, RetryPolicy};

/// Everything a run's workers share
pub struct WorkerContext {
    pub state: Arc<BatchState>,
    pub dispatcher: Arc<UnitDispatcher>,
    pub preparer: Arc<dyn PromptPreparer>,
    pub results: Arc<TranslationResults>,
    pub policy: RetryPolicy,
    pub marker: CompletionMarker,
    pub source_language: String,
    pub target_language: String,
}

/// Per-worker tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Whether the worker registered and entered its loop
    pub started: bool,
    pub completed: usize,
    pub abandoned: usize,
    pub discarded: usize,
}

impl WorkerSummary {
    fn add(&mut self, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Completed => self.completed += 1,
            UnitOutcome::Abandoned => self.abandoned += 1,
            UnitOutcome::Discarded => self.discarded += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.completed + self.abandoned + self.discarded
    }
}

/// Releases the worker's live-set entry however `run` ends
struct LiveGuard {
    state: Arc<BatchState>,
    key: String,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.state.release(&self.key);
    }
}

/// One execution stream bound to a channel
pub struct Worker {
    id: String,
    key: String,
    channel: Channel,
    credential: Option<Credential>,
    ctx: Arc<WorkerContext>,
}

impl Worker {
    /// Stateless api worker number `n`
    pub fn api(n: usize, ctx: Arc<WorkerContext>) -> Self {
        let key = api_worker_key(n);
        Self {
            id: key.clone(),
            key,
            channel: Channel::Api,
            credential: None,
            ctx,
        }
    }

    /// Session worker bound to `credential`
    pub fn token(credential: Credential, ctx: Arc<WorkerContext>) -> Self {
        Self {
            id: format!("token-{}", credential.display_name()),
            key: credential.identity_key(),
            channel: Channel::Token,
            credential: Some(credential),
            ctx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Live-set key: `api-<n>` or the credential identity key
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Claim and translate units until the cursor is exhausted or the run stops
    pub async fn run(self) -> WorkerSummary {
        let mut summary = WorkerSummary::default();
        let state = self.ctx.state.clone();

        if !state.activate(&self.key) {
            debug!("Worker {} not started: identity already bound or run over", self.id);
            return summary;
        }
        let _guard = LiveGuard {
            state: state.clone(),
            key: self.key.clone(),
        };

        summary.started = true;
        info!("Worker {} started ({})", self.id, self.channel);

        loop {
            if state.is_stopped() {
                break;
            }
            let Some(claim) = state.claim_next() else {
                break;
            };

            if claim.first {
                info!("Worker {} took the first unit: {}", self.id, claim.unit.title);
            } else {
                debug!(
                    "Worker {} took unit {}/{}: {}",
                    self.id,
                    claim.index + 1,
                    state.total(),
                    claim.unit.title
                );
            }

            let outcome = self.process(&claim.unit).await;
            summary.add(outcome);
            state.record(outcome);
        }

        info!(
            "Worker {} finished: {} completed, {} abandoned, {} discarded",
            self.id, summary.completed, summary.abandoned, summary.discarded
        );
        summary
    }

    async fn process(&self, unit: &Unit) -> UnitOutcome {
        let state = &self.ctx.state;
        state.begin_processing(ProcessingEntry {
            unit_id: unit.id.clone(),
            start_time: Utc::now(),
            worker_id: self.id.clone(),
            channel: self.channel,
        });

        let outcome = self.translate(unit).await;
        state.end_processing(&unit.id);
        outcome
    }

    async fn translate(&self, unit: &Unit) -> UnitOutcome {
        let ctx = &self.ctx;
        let dispatcher = &ctx.dispatcher;

        let prompt = match ctx
            .preparer
            .prepare_prompt(
                &unit.content,
                &ctx.source_language,
                &ctx.target_language,
                Some(dispatcher.model()),
            )
            .await
        {
            Ok(prompt) => prompt,
            Err(e) => {
                error!("Failed to prepare prompt for unit {}: {}", unit.id, e);
                return UnitOutcome::Abandoned;
            }
        };

        let target = match &self.credential {
            Some(credential) => CallTarget::token(credential),
            None => CallTarget::api(),
        };

        let result = dispatcher
            .call_with_retry(
                &ctx.policy,
                Some(ctx.state.stop_signal()),
                &prompt,
                unit,
                &target,
                &ctx.marker,
            )
            .await;

        match result {
            Ok(response) => {
                let Some(text) = response.text() else {
                    return UnitOutcome::Abandoned;
                };
                let title = extract_translated_title(text, &unit.id);
                ctx.results.insert(TranslationResult::new(
                    &unit.id,
                    title,
                    text,
                    dispatcher.model(),
                    self.channel,
                ));
                dispatcher.commit_context(&target, &response);
                info!("Unit {} translated by {}", unit.id, self.id);
                UnitOutcome::Completed
            }
            Err(RetryError::Stopped) | Err(RetryError::Fatal(CallError::Stopped)) => {
                debug!("Unit {} dropped: run stopped", unit.id);
                UnitOutcome::Discarded
            }
            Err(RetryError::Fatal(CallError::Mismatch { .. })) => UnitOutcome::Discarded,
            Err(RetryError::Fatal(e)) => {
                warn!("Unit {} abandoned: {}", unit.id, e);
                UnitOutcome::Abandoned
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                error!("Unit {} abandoned after {} attempts: {}", unit.id, attempts, last);
                UnitOutcome::Abandoned
            }
        }
    }
}

/// Live-set key of api worker `n`
pub fn api_worker_key(n: usize) -> String {
    format!("api-{}", n)
}
