/*!
 * Error types for the bookwai application.
 *
 * This module contains custom error types for different parts of the application,
 * using the thiserror crate for ergonomic error definitions.
 */

use thiserror::Error;

/// Errors that can occur when talking to the generative backend
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    /// Error when making a request fails
    #[error("Backend request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing a backend response fails
    #[error("Failed to parse backend response: {0}")]
    ParseError(String),

    /// Error returned by the backend itself
    #[error("Backend responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the backend
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
}

impl BackendError {
    /// Whether the same request may safely be sent again.
    ///
    /// Connection drops, rate limiting and 5xx/408/429 statuses are transient;
    /// everything else is treated as permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionError(_) | Self::RateLimitExceeded(_) => true,
            Self::ApiError { status_code, .. } => {
                *status_code == 408 || *status_code == 429 || *status_code >= 500
            }
            Self::RequestFailed(_) | Self::ParseError(_) | Self::AuthenticationError(_) => false,
        }
    }
}

/// Outcome of a single translate call that produced no usable text
#[derive(Error, Debug, Clone)]
pub enum CallError {
    /// The call never produced a backend answer
    #[error("{0}")]
    Backend(#[from] BackendError),

    /// The backend answered with a failure (or an empty success)
    #[error("Backend rejected the request: {message}")]
    Rejected { message: String, retryable: bool },

    /// The response belongs to another unit
    #[error("Race condition: response is for unit {received:?}, expected {expected}")]
    Mismatch {
        expected: String,
        received: Option<String>,
    },

    /// The run was stopped while the call was in flight
    #[error("Run stopped before the response could be used")]
    Stopped,
}

impl CallError {
    /// Whether the same request may be sent again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_retryable(),
            Self::Rejected { retryable, .. } => *retryable,
            Self::Mismatch { .. } | Self::Stopped => false,
        }
    }
}

/// Errors raised while building a prompt for a unit
#[derive(Error, Debug, Clone)]
pub enum PromptError {
    /// No template exists for the requested language pair
    #[error("No prompt template found for {source_language} -> {target_language}")]
    MissingTemplate {
        source_language: String,
        target_language: String,
    },

    /// The template could not be used
    #[error("Invalid prompt template: {0}")]
    InvalidTemplate(String),
}

/// Errors that prevent a batch run from being configured
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The session channel is required but no usable credential exists
    #[error("No usable session credential is available for the token channel")]
    NoUsableCredential,

    /// The computed worker pool is empty
    #[error("No workers could be started (api workers: {api_workers}, session capacity: {session_capacity})")]
    NoWorkers {
        api_workers: usize,
        session_capacity: usize,
    },

    /// The batch contains no units
    #[error("Nothing to translate: the selected unit list is empty")]
    EmptyBatch,

    /// A completion marker pattern failed to compile
    #[error("Invalid completion marker pattern '{pattern}': {reason}")]
    InvalidMarker { pattern: String, reason: String },

    /// Any other invalid setting
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced by the worker pool scheduler when starting a run
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchError {
    /// The run could not be configured
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A run is already active on this scheduler
    #[error("A batch run is already in progress")]
    AlreadyRunning,

    /// A stopped run still has workers finishing their calls
    #[error("The previous batch run still has {live} worker(s) finishing")]
    PreviousRunDraining { live: usize },
}

/// Errors from single-unit translation and summary operations
#[derive(Error, Debug)]
pub enum TranslationError {
    /// Error from the backend
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Error preparing the prompt
    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    /// Error in the configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The backend reported a failure for this unit
    #[error("Translation of unit {unit_id} failed: {message}")]
    Failed { unit_id: String, message: String },

    /// The backend answered for a different unit than the one requested
    #[error("Race condition detected: response is for unit {received:?}, expected {expected}")]
    RaceCondition {
        expected: String,
        received: Option<String>,
    },

    /// A summary was requested for a unit with no translation
    #[error("Unit {0} has no translation to summarise")]
    MissingTranslation(String),

    /// The unit id is unknown
    #[error("Unknown unit: {0}")]
    UnknownUnit(String),
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from the backend
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Error starting a batch
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    /// Error from translation
    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

// Utility functions for error conversion
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
