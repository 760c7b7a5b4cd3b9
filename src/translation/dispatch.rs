/*!
 * One unit, one backend call.
 *
 * Builds the request envelope, correlates the echoed unit id, and applies
 * the retry policy and the completion-marker re-issue. Shared by batch
 * workers and single-unit operations so both follow the same rules.
 */

use std::sync::Arc;

use log::{debug, error};
use tokio::sync::watch;

use crate::book::Unit;
use crate::credentials::Credential;
use crate::errors::CallError;
use crate::providers::{Channel, Prompt, RequestMetadata, TranslateRequest, TranslateResponse, TranslationBackend};
use crate::session::ConversationContextStore;
use crate::validation::CompletionMarker;

use super::retry::{RetryError, RetryPolicy};

/// Channel and credential a call goes through
#[derive(Debug, Clone, Copy)]
pub struct CallTarget<'a> {
    pub channel: Channel,
    pub credential: Option<&'a Credential>,
}

impl<'a> CallTarget<'a> {
    pub fn api() -> Self {
        Self {
            channel: Channel::Api,
            credential: None,
        }
    }

    pub fn token(credential: &'a Credential) -> Self {
        Self {
            channel: Channel::Token,
            credential: Some(credential),
        }
    }

    /// Label used in logs and request metadata
    pub fn label(&self) -> String {
        match self.credential {
            Some(c) => c.display_name().to_string(),
            None => "API".to_string(),
        }
    }
}

/// Sends unit prompts to the backend
pub struct UnitDispatcher {
    backend: Arc<dyn TranslationBackend>,
    contexts: Arc<ConversationContextStore>,
    model: String,
    use_proxy: bool,
}

impl UnitDispatcher {
    pub fn new(
        backend: Arc<dyn TranslationBackend>,
        contexts: Arc<ConversationContextStore>,
        model: impl Into<String>,
        use_proxy: bool,
    ) -> Self {
        Self {
            backend,
            contexts,
            model: model.into(),
            use_proxy,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn backend(&self) -> &Arc<dyn TranslationBackend> {
        &self.backend
    }

    pub fn contexts(&self) -> &Arc<ConversationContextStore> {
        &self.contexts
    }

    /// Request envelope for `unit` through `target`
    pub fn build_request(
        &self,
        prompt: &Prompt,
        unit: &Unit,
        target: &CallTarget<'_>,
        marker: &CompletionMarker,
    ) -> TranslateRequest {
        let is_token = target.channel == Channel::Token;
        TranslateRequest {
            prompt: prompt.clone(),
            model: self.model.clone(),
            channel: target.channel,
            credential_id: target.credential.map(|c| c.id.clone()),
            use_proxy: is_token && self.use_proxy,
            metadata: RequestMetadata {
                unit_id: unit.id.clone(),
                unit_title: unit.title.clone(),
                credential_label: Some(target.label()),
                validation_regex: Some(marker.pattern().to_string()),
            },
            context: target
                .credential
                .filter(|_| is_token)
                .and_then(|c| self.contexts.get(&c.identity_key())),
        }
    }

    /// A single attempt.
    ///
    /// A successful answer is only returned when it echoes `unit.id` and the
    /// run was not stopped while the call was in flight.
    pub async fn call(
        &self,
        prompt: &Prompt,
        unit: &Unit,
        target: &CallTarget<'_>,
        marker: &CompletionMarker,
        stop: Option<&watch::Receiver<bool>>,
    ) -> Result<TranslateResponse, CallError> {
        let request = self.build_request(prompt, unit, target, marker);
        let response = self.backend.translate_unit(request).await?;

        if stop.is_some_and(|rx| *rx.borrow()) {
            debug!("Dropping response for unit {}: run stopped", unit.id);
            return Err(CallError::Stopped);
        }

        if response.text().is_none() {
            return Err(CallError::Rejected {
                message: response.error.clone().unwrap_or_else(|| "empty response".to_string()),
                retryable: response.is_retryable(),
            });
        }

        let echoed = response.echoed_unit_id();
        if echoed != Some(unit.id.as_str()) {
            error!(
                "Race condition: response for unit {:?} arrived on the request for unit {}, discarding",
                echoed, unit.id
            );
            return Err(CallError::Mismatch {
                expected: unit.id.clone(),
                received: echoed.map(str::to_string),
            });
        }

        Ok(response)
    }

    /// Retry transient failures, then re-issue once if the marker is missing
    pub async fn call_with_retry(
        &self,
        policy: &RetryPolicy,
        stop: Option<watch::Receiver<bool>>,
        prompt: &Prompt,
        unit: &Unit,
        target: &CallTarget<'_>,
        marker: &CompletionMarker,
    ) -> Result<TranslateResponse, RetryError<CallError>> {
        let label = format!("Unit {} ({})", unit.id, target.label());
        let stop_ref = stop.as_ref();

        let response = policy
            .run(&label, stop.clone(), CallError::is_retryable, |_| {
                self.call(prompt, unit, target, marker, stop_ref)
            })
            .await?;

        let response = policy
            .keep_valid(
                &label,
                response,
                |r: &TranslateResponse| r.text().is_some_and(|t| marker.is_satisfied(t)),
                || self.call(prompt, unit, target, marker, stop_ref),
            )
            .await;

        Ok(response)
    }

    /// Store the context of a successful token call
    pub fn commit_context(&self, target: &CallTarget<'_>, response: &TranslateResponse) {
        if target.channel != Channel::Token {
            return;
        }
        if let (Some(credential), Some(context)) = (target.credential, response.context.as_ref()) {
            if !context.is_empty() {
                self.contexts.set(&credential.identity_key(), context.clone());
            }
        }
    }
}
