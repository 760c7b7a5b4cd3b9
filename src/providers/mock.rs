/*!
 * Mock backend for tests and benchmarks.
 *
 * Behaviors can be set for the whole backend or per unit:
 * - `MockBehavior::Working` - succeeds with text carrying the completion marker
 * - `MockBehavior::RetryableFailure` - fails with `retryable: true` every time
 * - `MockBehavior::PermanentFailure` - fails without a retryable flag
 * - `MockBehavior::TransportError` - the call itself errors (connection reset)
 * - `MockBehavior::MismatchedMetadata` - echoes another unit id
 * - `MockBehavior::MissingMarkerOnce` - first answer is truncated, later ones are complete
 * - `MockBehavior::NeverMarker` - answers never carry the marker
 *
 * Every call is recorded so tests can count attempts per unit and check
 * which credential carried it.
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::credentials::{Credential, CredentialSource};
use crate::errors::BackendError;
use crate::providers::{Channel, TranslateRequest, TranslateResponse, TranslationBackend};
use crate::session::ConversationState;

/// Behavior mode for the mock backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    Working,
    RetryableFailure,
    PermanentFailure,
    TransportError,
    MismatchedMetadata,
    MissingMarkerOnce,
    NeverMarker,
}

/// One recorded translate call
#[derive(Debug, Clone)]
pub struct MockCall {
    pub unit_id: String,
    pub channel: Channel,
    pub credential_id: Option<String>,
    pub context: Option<ConversationState>,
}

/// Scripted `TranslationBackend`
#[derive(Debug)]
pub struct MockBackend {
    behavior: MockBehavior,
    overrides: RwLock<HashMap<String, MockBehavior>>,
    delay: Option<Duration>,
    probe_delay: Option<Duration>,
    calls: Mutex<Vec<MockCall>>,
    attempts: Mutex<HashMap<String, usize>>,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: Mutex<HashMap<String, usize>>,
    credentials: RwLock<Vec<Credential>>,
    capacity: Option<usize>,
    listing_fails: AtomicBool,
    release_count: AtomicUsize,
    turn_counter: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::working()
    }
}

impl MockBackend {
    /// Create a new mock backend with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            overrides: RwLock::new(HashMap::new()),
            delay: None,
            probe_delay: None,
            calls: Mutex::new(Vec::new()),
            attempts: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            max_in_flight: Mutex::new(HashMap::new()),
            credentials: RwLock::new(Vec::new()),
            capacity: Some(usize::MAX),
            listing_fails: AtomicBool::new(false),
            release_count: AtomicUsize::new(0),
            turn_counter: AtomicUsize::new(0),
        }
    }

    /// Create a working mock backend that always succeeds
    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    /// Override the behavior for one unit
    pub fn with_unit_behavior(self, unit_id: impl Into<String>, behavior: MockBehavior) -> Self {
        self.overrides.write().insert(unit_id.into(), behavior);
        self
    }

    /// Answer every call after `delay_ms`
    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(delay_ms));
        self
    }

    /// Session channel capacity reported by the probe
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Answer the capacity probe after `delay_ms`
    pub fn with_probe_delay(mut self, delay_ms: u64) -> Self {
        self.probe_delay = Some(Duration::from_millis(delay_ms));
        self
    }

    /// Make the capacity probe fail
    pub fn with_capacity_error(mut self) -> Self {
        self.capacity = None;
        self
    }

    pub fn with_credentials(self, credentials: Vec<Credential>) -> Self {
        self.set_credentials(credentials);
        self
    }

    /// Replace the credential list served by `list_credentials`
    pub fn set_credentials(&self, credentials: Vec<Credential>) {
        *self.credentials.write() = credentials;
    }

    /// Make `list_credentials` fail with a connection error
    pub fn set_listing_fails(&self, fails: bool) {
        self.listing_fails.store(fails, Ordering::SeqCst);
    }

    /// Every call received, in arrival order
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of translate calls received for `unit_id`
    pub fn attempts_for(&self, unit_id: &str) -> usize {
        self.attempts.lock().get(unit_id).copied().unwrap_or(0)
    }

    /// Highest number of simultaneous calls seen for one credential id
    pub fn max_in_flight_for(&self, credential_id: &str) -> usize {
        self.max_in_flight.lock().get(credential_id).copied().unwrap_or(0)
    }

    /// Number of `release_all_session_channels` calls
    pub fn release_count(&self) -> usize {
        self.release_count.load(Ordering::SeqCst)
    }

    /// Text a working backend returns for `unit_id`
    pub fn translated_text(unit_id: &str) -> String {
        format!("Translated chapter {}\n\nBody of chapter {}.\n\nEnd of chapter", unit_id, unit_id)
    }

    fn behavior_for(&self, unit_id: &str) -> MockBehavior {
        self.overrides.read().get(unit_id).copied().unwrap_or(self.behavior)
    }

    fn record(&self, request: &TranslateRequest) -> usize {
        let unit_id = request.metadata.unit_id.clone();
        self.calls.lock().push(MockCall {
            unit_id: unit_id.clone(),
            channel: request.channel,
            credential_id: request.credential_id.clone(),
            context: request.context.clone(),
        });

        let mut attempts = self.attempts.lock();
        let count = attempts.entry(unit_id).or_insert(0);
        *count += 1;
        *count
    }

    fn enter(&self, credential_id: &str) {
        let mut in_flight = self.in_flight.lock();
        let current = in_flight.entry(credential_id.to_string()).or_insert(0);
        *current += 1;
        let mut max = self.max_in_flight.lock();
        let seen = max.entry(credential_id.to_string()).or_insert(0);
        *seen = (*seen).max(*current);
    }

    fn leave(&self, credential_id: &str) {
        if let Some(current) = self.in_flight.lock().get_mut(credential_id) {
            *current = current.saturating_sub(1);
        }
    }

    fn answer(&self, request: &TranslateRequest, attempt: usize) -> Result<TranslateResponse, BackendError> {
        let unit_id = request.metadata.unit_id.as_str();
        let ending = match request.metadata.validation_regex.as_deref() {
            Some(hint) if hint.contains("summary") => "End of summary",
            _ => "End of chapter",
        };
        let complete = |tag: &str| {
            format!("Translated chapter {}\n\nBody of chapter {}.{}\n\n{}", unit_id, unit_id, tag, ending)
        };
        let truncated = format!("Translated chapter {}\n\nBody of chapter {} (truncated)", unit_id, unit_id);

        let response = match self.behavior_for(unit_id) {
            MockBehavior::Working => TranslateResponse::ok(unit_id, complete("")),
            MockBehavior::RetryableFailure => {
                TranslateResponse::failure(unit_id, "Simulated overload", Some(true))
            }
            MockBehavior::PermanentFailure => {
                TranslateResponse::failure(unit_id, "Simulated content rejection", None)
            }
            MockBehavior::TransportError => {
                return Err(BackendError::ConnectionError("Simulated connection reset".to_string()));
            }
            MockBehavior::MismatchedMetadata => {
                TranslateResponse::ok(format!("{}-other", unit_id), complete(""))
            }
            MockBehavior::MissingMarkerOnce => {
                if attempt == 1 {
                    TranslateResponse::ok(unit_id, truncated)
                } else {
                    TranslateResponse::ok(unit_id, complete(" (complete)"))
                }
            }
            MockBehavior::NeverMarker => TranslateResponse::ok(unit_id, truncated),
        };

        if response.success && request.channel == Channel::Token {
            let turn = self.turn_counter.fetch_add(1, Ordering::SeqCst) + 1;
            let conversation = request.credential_id.as_deref().unwrap_or("anonymous");
            return Ok(response.with_context(ConversationState::new(
                format!("conv-{}", conversation),
                format!("resp-{}", turn),
                format!("choice-{}", turn),
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl TranslationBackend for MockBackend {
    async fn translate_unit(&self, request: TranslateRequest) -> Result<TranslateResponse, BackendError> {
        let attempt = self.record(&request);
        let slot = request
            .credential_id
            .clone()
            .unwrap_or_else(|| format!("api:{}", request.metadata.unit_id));

        self.enter(&slot);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.answer(&request, attempt);
        self.leave(&slot);
        result
    }

    async fn max_concurrent_session_channels(&self) -> Result<usize, BackendError> {
        if let Some(delay) = self.probe_delay {
            tokio::time::sleep(delay).await;
        }
        self.capacity
            .ok_or_else(|| BackendError::ConnectionError("Simulated capacity probe failure".to_string()))
    }

    async fn release_all_session_channels(&self) -> Result<(), BackendError> {
        self.release_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl CredentialSource for MockBackend {
    async fn list_credentials(&self) -> Result<Vec<Credential>, BackendError> {
        if self.listing_fails.load(Ordering::SeqCst) {
            return Err(BackendError::ConnectionError("Simulated listing failure".to_string()));
        }
        Ok(self.credentials.read().clone())
    }
}
