/*!
 * Credential registry.
 *
 * Observes the externally owned credential list, filters it down to the
 * distinct usable slots and remembers which credential is preferred for
 * single-unit work. Every successful load publishes a change event that
 * the worker pool uses to hot-add session workers.
 */

use std::collections::HashSet;

use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::errors::BackendError;

use super::model::Credential;

/// Capacity of the change event channel
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Source of the raw credential list
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Fetch every known credential record
    async fn list_credentials(&self) -> Result<Vec<Credential>, BackendError>;
}

/// Published after the credential list changes
#[derive(Debug, Clone)]
pub struct CredentialsChanged {
    /// Distinct usable credentials after the change, in list order
    pub distinct_active: Vec<Credential>,
}

#[derive(Debug, Default)]
struct RegistryState {
    credentials: Vec<Credential>,
    preferred_id: Option<String>,
}

/// Registry of session credentials
pub struct CredentialRegistry {
    state: RwLock<RegistryState>,
    events: broadcast::Sender<CredentialsChanged>,
}

impl Default for CredentialRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialRegistry {
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(RegistryState::default()),
            events,
        }
    }

    /// Create a registry already holding `credentials`
    pub fn with_credentials(credentials: Vec<Credential>) -> Self {
        let registry = Self::new();
        registry.replace(credentials);
        registry
    }

    /// Reload from `source`.
    ///
    /// A transport failure is logged and the previous list is kept.
    /// Returns the number of records now held.
    pub async fn load_all(&self, source: &dyn CredentialSource) -> usize {
        match source.list_credentials().await {
            Ok(credentials) => {
                let count = credentials.len();
                self.replace(credentials);
                count
            }
            Err(e) => {
                warn!("Failed to load credentials, keeping previous list: {}", e);
                self.state.read().credentials.len()
            }
        }
    }

    /// Replace the held list and notify subscribers
    pub fn replace(&self, credentials: Vec<Credential>) {
        let distinct_active = {
            let mut state = self.state.write();
            state.credentials = credentials;
            let distinct = Self::distinct_active(&state.credentials);

            if state.preferred_id.is_none() {
                state.preferred_id = distinct
                    .first()
                    .or_else(|| state.credentials.first())
                    .map(|c| c.id.clone());
            }

            info!(
                "Loaded {} credential(s), {} distinct active",
                state.credentials.len(),
                distinct.len()
            );
            distinct
        };

        // No subscribers is fine
        let _ = self.events.send(CredentialsChanged { distinct_active });
    }

    /// Filter to usable credentials with one record per identity key.
    ///
    /// The first record of each identity wins and list order is kept.
    pub fn distinct_active(configs: &[Credential]) -> Vec<Credential> {
        let mut seen = HashSet::new();
        configs
            .iter()
            .filter(|c| c.is_usable())
            .filter(|c| seen.insert(c.identity_key()))
            .cloned()
            .collect()
    }

    /// Distinct usable credentials of the held list
    pub fn active(&self) -> Vec<Credential> {
        Self::distinct_active(&self.state.read().credentials)
    }

    /// Every held record, usable or not
    pub fn all(&self) -> Vec<Credential> {
        self.state.read().credentials.clone()
    }

    pub fn get(&self, id: &str) -> Option<Credential> {
        self.state.read().credentials.iter().find(|c| c.id == id).cloned()
    }

    pub fn preferred_id(&self) -> Option<String> {
        self.state.read().preferred_id.clone()
    }

    pub fn set_preferred_id(&self, id: Option<String>) {
        self.state.write().preferred_id = id;
    }

    /// Resolve `current_id` against `configs`.
    ///
    /// Returns the credential for `current_id` when it is still usable,
    /// otherwise the first distinct active credential.
    pub fn select_preferred(configs: &[Credential], current_id: Option<&str>) -> Option<Credential> {
        if let Some(direct) = current_id.and_then(|id| configs.iter().find(|c| c.id == id)) {
            if direct.is_usable() {
                return Some(direct.clone());
            }
        }
        Self::distinct_active(configs).into_iter().next()
    }

    /// Preferred credential, updating the remembered id on fallback
    pub fn preferred(&self) -> Option<Credential> {
        let mut state = self.state.write();
        let selected = Self::select_preferred(&state.credentials, state.preferred_id.as_deref())?;

        if state.preferred_id.as_deref() != Some(selected.id.as_str()) {
            debug!("Preferred credential changed to {}", selected.display_name());
            state.preferred_id = Some(selected.id.clone());
        }
        Some(selected)
    }

    /// Subscribe to credential change events
    pub fn subscribe(&self) -> broadcast::Receiver<CredentialsChanged> {
        self.events.subscribe()
    }
}
