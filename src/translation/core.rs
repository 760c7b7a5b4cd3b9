/*!
 * Single-unit translation and summary service.
 *
 * Used outside batch runs: a user re-translates one unit or asks for the
 * summary of a translated one. Calls go through the same dispatcher as the
 * batch workers, so correlation, context continuity and retry rules are
 * identical. There is no batch state and no stop flag here.
 */

use std::sync::Arc;

use log::{info, warn};

use crate::app_config::{Config, TranslateMode};
use crate::book::{Unit, extract_translated_title};
use crate::credentials::{Credential, CredentialRegistry};
use crate::errors::{CallError, ConfigError, TranslationError};
use crate::providers::{Channel, TranslationBackend};
use crate::session::ConversationContextStore;
use crate::validation::CompletionMarker;

use super::dispatch::{CallTarget, UnitDispatcher};
use super::prompts::PromptPreparer;
use super::results::{TranslationResult, TranslationResults};
use super::retry::{RetryError, RetryPolicy};

/// One-off translate and summarise operations
pub struct TranslationService {
    dispatcher: UnitDispatcher,
    registry: Arc<CredentialRegistry>,
    preparer: Arc<dyn PromptPreparer>,
    translations: Arc<TranslationResults>,
    summaries: Arc<TranslationResults>,
    policy: RetryPolicy,
    marker: CompletionMarker,
    summary_marker: CompletionMarker,
    mode: TranslateMode,
    source_language: String,
    target_language: String,
}

impl TranslationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        backend: Arc<dyn TranslationBackend>,
        registry: Arc<CredentialRegistry>,
        contexts: Arc<ConversationContextStore>,
        preparer: Arc<dyn PromptPreparer>,
        translations: Arc<TranslationResults>,
        summaries: Arc<TranslationResults>,
    ) -> Result<Self, ConfigError> {
        let batch = &config.batch;
        let marker = compile_marker(&batch.completion_marker)?;
        let summary_marker = compile_marker(&batch.summary_marker)?;

        Ok(Self {
            dispatcher: UnitDispatcher::new(backend, contexts, &config.model, batch.use_proxy),
            registry,
            preparer,
            translations,
            summaries,
            policy: RetryPolicy::from_config(batch),
            marker,
            summary_marker,
            mode: config.mode,
            source_language: config.source_language.clone(),
            target_language: config.target_language.clone(),
        })
    }

    pub fn translations(&self) -> &Arc<TranslationResults> {
        &self.translations
    }

    pub fn summaries(&self) -> &Arc<TranslationResults> {
        &self.summaries
    }

    /// Translate `unit` and store the result.
    ///
    /// The session channel is used only in `token` mode, through the
    /// preferred credential.
    pub async fn translate_one(&self, unit: &Unit) -> Result<TranslationResult, TranslationError> {
        let prompt = self
            .preparer
            .prepare_prompt(
                &unit.content,
                &self.source_language,
                &self.target_language,
                Some(self.dispatcher.model()),
            )
            .await?;

        let credential = self.session_credential()?;
        let target = target_for(credential.as_ref());

        let response = self
            .dispatcher
            .call_with_retry(&self.policy, None, &prompt, unit, &target, &self.marker)
            .await
            .map_err(|e| retry_error(&unit.id, e))?;

        let text = response.text().unwrap_or_default();
        let result = TranslationResult::new(
            &unit.id,
            extract_translated_title(text, &unit.id),
            text,
            self.dispatcher.model(),
            target.channel,
        );
        self.translations.insert(result.clone());
        self.dispatcher.commit_context(&target, &response);

        info!("Unit {} translated ({})", unit.id, target.channel);
        Ok(result)
    }

    /// Summarise the stored translation of `unit`.
    ///
    /// The summary takes the translated title.
    pub async fn summarize_one(&self, unit: &Unit) -> Result<TranslationResult, TranslationError> {
        let translation = self
            .translations
            .get(&unit.id)
            .ok_or_else(|| TranslationError::MissingTranslation(unit.id.clone()))?;

        let prompt = self
            .preparer
            .prepare_summary_prompt(&translation.text, &self.source_language, &self.target_language)
            .await?;

        let credential = self.session_credential()?;
        let target = target_for(credential.as_ref());
        let source = Unit::new(&unit.id, &translation.title, &translation.text);

        let response = self
            .dispatcher
            .call_with_retry(&self.policy, None, &prompt, &source, &target, &self.summary_marker)
            .await
            .map_err(|e| retry_error(&unit.id, e))?;

        let summary = TranslationResult::new(
            &unit.id,
            &translation.title,
            response.text().unwrap_or_default(),
            self.dispatcher.model(),
            target.channel,
        );
        self.summaries.insert(summary.clone());
        self.dispatcher.commit_context(&target, &response);

        info!("Unit {} summarised ({})", unit.id, target.channel);
        Ok(summary)
    }

    fn session_credential(&self) -> Result<Option<Credential>, TranslationError> {
        if single_unit_channel(self.mode) != Channel::Token {
            return Ok(None);
        }
        match self.registry.preferred() {
            Some(credential) => Ok(Some(credential)),
            None => Err(ConfigError::NoUsableCredential.into()),
        }
    }
}

fn target_for(credential: Option<&Credential>) -> CallTarget<'_> {
    match credential {
        Some(credential) => CallTarget::token(credential),
        None => CallTarget::api(),
    }
}

fn compile_marker(pattern: &str) -> Result<CompletionMarker, ConfigError> {
    CompletionMarker::new(pattern).map_err(|e| ConfigError::InvalidMarker {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn retry_error(unit_id: &str, error: RetryError<CallError>) -> TranslationError {
    let error = match error {
        RetryError::Exhausted { attempts, last } => {
            warn!("Unit {} failed after {} attempts", unit_id, attempts);
            last
        }
        RetryError::Fatal(e) => e,
        RetryError::Stopped => CallError::Stopped,
    };

    match error {
        CallError::Backend(e) => TranslationError::Backend(e),
        CallError::Rejected { message, .. } => TranslationError::Failed {
            unit_id: unit_id.to_string(),
            message,
        },
        CallError::Mismatch { expected, received } => TranslationError::RaceCondition { expected, received },
        CallError::Stopped => TranslationError::Failed {
            unit_id: unit_id.to_string(),
            message: "stopped".to_string(),
        },
    }
}

/// Channel a single-unit call would use in `mode`
pub fn single_unit_channel(mode: TranslateMode) -> Channel {
    match mode {
        TranslateMode::Token => Channel::Token,
        TranslateMode::Api | TranslateMode::Both => Channel::Api,
    }
}
