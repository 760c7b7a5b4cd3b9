/*!
 * Project state persisted between runs.
 *
 * One JSON document next to the book holds the translations, the summaries,
 * the conversation contexts and the preferred credential. Older documents
 * stored a single `tokenContext` for the preferred credential; it is loaded
 * and rehomed by the context store.
 */

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::session::context_store::{ConversationContextStore, ConversationState};
use crate::translation::results::{TranslationResult, TranslationResults};

/// Single context saved by older versions, keyed by credential record id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyContext {
    pub credential_id: String,
    #[serde(flatten)]
    pub state: ConversationState,
}

// @struct: Serialized project document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    #[serde(default)]
    pub translations: BTreeMap<String, TranslationResult>,

    #[serde(default)]
    pub summaries: BTreeMap<String, TranslationResult>,

    #[serde(default)]
    pub token_contexts: BTreeMap<String, ConversationState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_credential_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_context: Option<LegacyContext>,
}

impl ProjectState {
    /// Load from `path`; a missing file is an empty project
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No project state at {:?}, starting fresh", path);
            return Ok(Self::default());
        }

        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read project state: {:?}", path))?;
        let state: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse project state: {:?}", path))?;
        Ok(state)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize project state")?;
        fs::write(path, json).with_context(|| format!("Failed to write project state: {:?}", path))?;
        info!("Saved project state to {:?}", path);
        Ok(())
    }

    /// Conversation contexts including the legacy single context
    pub fn context_store(&self) -> ConversationContextStore {
        let store = ConversationContextStore::from_map(self.token_contexts.clone());
        if let Some(legacy) = &self.token_context {
            store.restore_legacy(&legacy.credential_id, legacy.state.clone());
        }
        store
    }

    pub fn translation_results(&self) -> TranslationResults {
        TranslationResults::from_map(self.translations.clone())
    }

    pub fn summary_results(&self) -> TranslationResults {
        TranslationResults::from_map(self.summaries.clone())
    }

    /// Capture the live maps; the legacy context is dropped once captured
    pub fn capture(
        &mut self,
        translations: &TranslationResults,
        summaries: &TranslationResults,
        contexts: &ConversationContextStore,
        preferred_credential_id: Option<String>,
    ) {
        self.translations = translations.snapshot();
        self.summaries = summaries.snapshot();
        self.token_contexts = contexts.snapshot();
        self.preferred_credential_id = preferred_credential_id;
        self.token_context = None;
    }
}
