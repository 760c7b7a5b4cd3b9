/*!
 * Backend collaborators.
 *
 * The worker pool never talks to a model directly. It hands prepared prompts
 * to a `TranslationBackend`, which routes them over one of two channels:
 * - `api`: stateless, key-pooled, no credential
 * - `token`: stateful session bound to one credential
 *
 * Implementations:
 * - `mock`: scripted backend for tests and benchmarks
 * - `http`: JSON relay service client
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::BackendError;
use crate::session::ConversationState;

pub mod http;
pub mod mock;

/// Prepared prompt payload (opaque to the worker pool)
pub type Prompt = serde_json::Value;

/// Channel a request is routed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Api,
    Token,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Token => "token",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope echoed back by the backend so responses can be correlated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    pub unit_id: String,

    #[serde(default)]
    pub unit_title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_label: Option<String>,

    /// Completion marker the backend may use to validate its own output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_regex: Option<String>,
}

/// A single translate call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateRequest {
    pub prompt: Prompt,
    pub model: String,
    pub channel: Channel,

    /// Credential record id, token channel only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,

    #[serde(default)]
    pub use_proxy: bool,

    pub metadata: RequestMetadata,

    /// Current conversation state of the credential, token channel only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ConversationState>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    #[serde(default)]
    pub unit_id: Option<String>,
}

/// Result of a translate call as reported by the backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateResponse {
    pub success: bool,

    #[serde(default)]
    pub data: Option<String>,

    #[serde(default)]
    pub error: Option<String>,

    /// Transient failure classification; absent means permanent
    #[serde(default)]
    pub retryable: Option<bool>,

    /// Updated conversation state, token channel only
    #[serde(default)]
    pub context: Option<ConversationState>,

    #[serde(default)]
    pub metadata: Option<ResponseMetadata>,
}

impl TranslateResponse {
    /// Successful response echoing `unit_id`
    pub fn ok(unit_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            metadata: Some(ResponseMetadata {
                unit_id: Some(unit_id.into()),
            }),
            ..Default::default()
        }
    }

    /// Failed response echoing `unit_id`
    pub fn failure(unit_id: impl Into<String>, error: impl Into<String>, retryable: Option<bool>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            retryable,
            metadata: Some(ResponseMetadata {
                unit_id: Some(unit_id.into()),
            }),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: ConversationState) -> Self {
        self.context = Some(context);
        self
    }

    /// Unit id echoed back by the backend
    pub fn echoed_unit_id(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.unit_id.as_deref())
    }

    /// Only an explicit `retryable: true` allows another attempt
    pub fn is_retryable(&self) -> bool {
        self.retryable == Some(true)
    }

    /// Non-empty translated text of a successful response
    pub fn text(&self) -> Option<&str> {
        if !self.success {
            return None;
        }
        self.data.as_deref().filter(|d| !d.trim().is_empty())
    }
}

/// Backend collaborator used by workers and the scheduler
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    /// Send one prepared prompt through `request.channel`.
    ///
    /// `Err` means the call never produced a backend answer; the caller
    /// classifies it with `BackendError::is_retryable`.
    async fn translate_unit(&self, request: TranslateRequest) -> Result<TranslateResponse, BackendError>;

    /// How many session channels may run at once
    async fn max_concurrent_session_channels(&self) -> Result<usize, BackendError>;

    /// Drop every session channel left over from earlier runs
    async fn release_all_session_channels(&self) -> Result<(), BackendError>;
}
