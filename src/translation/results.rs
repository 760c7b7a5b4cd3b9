/*!
 * Result maps written by workers.
 *
 * A unit appears at most once; a later successful run for the same unit
 * replaces the earlier entry.
 */

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::providers::Channel;

/// A finished translation (or summary) of one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub unit_id: String,
    pub title: String,
    pub text: String,
    pub model_used: String,
    pub channel_used: Channel,
    pub timestamp: DateTime<Utc>,
}

impl TranslationResult {
    pub fn new(
        unit_id: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
        model_used: impl Into<String>,
        channel_used: Channel,
    ) -> Self {
        Self {
            unit_id: unit_id.into(),
            title: title.into(),
            text: text.into(),
            model_used: model_used.into(),
            channel_used,
            timestamp: Utc::now(),
        }
    }
}

/// Shared map from unit id to result
#[derive(Debug, Default)]
pub struct TranslationResults {
    entries: RwLock<HashMap<String, TranslationResult>>,
}

impl TranslationResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(entries: impl IntoIterator<Item = (String, TranslationResult)>) -> Self {
        Self {
            entries: RwLock::new(entries.into_iter().collect()),
        }
    }

    /// Store `result`, returning the entry it replaced
    pub fn insert(&self, result: TranslationResult) -> Option<TranslationResult> {
        self.entries.write().insert(result.unit_id.clone(), result)
    }

    pub fn get(&self, unit_id: &str) -> Option<TranslationResult> {
        self.entries.read().get(unit_id).cloned()
    }

    pub fn contains(&self, unit_id: &str) -> bool {
        self.entries.read().contains_key(unit_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Sorted copy for persistence
    pub fn snapshot(&self) -> BTreeMap<String, TranslationResult> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
