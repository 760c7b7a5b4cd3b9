/*!
 * Conversation context store.
 *
 * Keeps the opaque multi-turn continuation state of every session
 * credential, keyed by the credential's identity key. Older saves keyed the
 * state by credential record id; `migrate` rehomes those entries.
 */

use std::collections::{BTreeMap, HashMap};

use log::{debug, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::credentials::Credential;

/// Continuation tokens returned by the session channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub response_id: String,
    #[serde(default)]
    pub choice_id: String,
}

impl ConversationState {
    pub fn new(
        conversation_id: impl Into<String>,
        response_id: impl Into<String>,
        choice_id: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            response_id: response_id.into(),
            choice_id: choice_id.into(),
        }
    }

    /// A state without a conversation id cannot continue anything
    pub fn is_empty(&self) -> bool {
        self.conversation_id.trim().is_empty()
    }
}

/// Thread-safe map from identity key to conversation state
#[derive(Debug, Default)]
pub struct ConversationContextStore {
    contexts: RwLock<HashMap<String, ConversationState>>,
}

impl ConversationContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from previously persisted contexts
    pub fn from_map(contexts: impl IntoIterator<Item = (String, ConversationState)>) -> Self {
        Self {
            contexts: RwLock::new(contexts.into_iter().collect()),
        }
    }

    pub fn get(&self, identity_key: &str) -> Option<ConversationState> {
        self.contexts.read().get(identity_key).cloned()
    }

    /// Replace the state for `identity_key`.
    ///
    /// Callers only invoke this after a successful call that returned a
    /// context; empty states are ignored.
    pub fn set(&self, identity_key: &str, state: ConversationState) {
        if state.is_empty() {
            debug!("Ignoring empty conversation state for {}", short_key(identity_key));
            return;
        }
        self.contexts.write().insert(identity_key.to_string(), state);
    }

    pub fn len(&self) -> usize {
        self.contexts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.read().is_empty()
    }

    /// Sorted copy for persistence
    pub fn snapshot(&self) -> BTreeMap<String, ConversationState> {
        self.contexts
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Adopt a single context saved under a credential record id.
    ///
    /// The entry stays keyed by `credential_id` until `migrate` runs. An
    /// existing entry is never overwritten.
    pub fn restore_legacy(&self, credential_id: &str, state: ConversationState) {
        if state.is_empty() {
            return;
        }
        self.contexts
            .write()
            .entry(credential_id.to_string())
            .or_insert(state);
    }

    /// Rehome entries keyed by a credential record id to that credential's
    /// identity key. Returns whether anything moved.
    pub fn migrate(&self, credentials: &[Credential]) -> bool {
        let mut contexts = self.contexts.write();
        let (migrated, changed) = Self::migrate_map(&contexts, credentials);
        if changed {
            info!("Migrated conversation contexts to identity keys ({} entries)", migrated.len());
            *contexts = migrated;
        }
        changed
    }

    /// Pure form of `migrate`.
    ///
    /// For every key that is a credential id whose identity key differs, the
    /// state moves to the identity key unless that key already has one; the
    /// stale key is always dropped. Running it twice changes nothing.
    pub fn migrate_map(
        contexts: &HashMap<String, ConversationState>,
        credentials: &[Credential],
    ) -> (HashMap<String, ConversationState>, bool) {
        if credentials.is_empty() || contexts.is_empty() {
            return (contexts.clone(), false);
        }

        let id_to_key: HashMap<&str, String> = credentials
            .iter()
            .map(|c| (c.id.as_str(), c.identity_key()))
            .collect();

        let mut next = contexts.clone();
        let mut changed = false;

        // Deterministic order when two stale ids share one identity
        let mut keys: Vec<&String> = contexts.keys().collect();
        keys.sort();

        for key in keys {
            let Some(identity_key) = id_to_key.get(key.as_str()) else {
                continue;
            };
            if identity_key == key {
                continue;
            }
            if !next.contains_key(identity_key) {
                next.insert(identity_key.clone(), contexts[key].clone());
            }
            next.remove(key);
            changed = true;
        }

        (next, changed)
    }
}

fn short_key(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}
