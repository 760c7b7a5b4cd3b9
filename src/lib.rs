/*!
 * # BookWAI - batch book translation with AI
 *
 * A Rust library that translates a book chapter by chapter with a pool of
 * concurrent workers talking to a translation relay.
 *
 * ## Features
 *
 * - Split `.txt` books on `=== Title ===` chapter headers
 * - Two channels to the relay:
 *   - a stateless api channel with a fixed worker fan-out
 *   - session channels, one worker per distinct credential, each keeping its
 *     own conversation context
 * - Staggered start-up of session workers and hot-add of new credentials
 *   while a run is active
 * - Bounded retry with linear backoff and completion-marker validation
 * - Response correlation so a translation is never stored under the wrong chapter
 * - Project state (translations, summaries, contexts) saved between runs
 *
 * ## Architecture
 *
 * - `app_config`: Configuration management
 * - `book`: Chapter parsing and selection
 * - `credentials`: Session credentials, identity keys and the registry
 * - `session`: Conversation contexts and persisted project state
 * - `providers`: The relay seam with an HTTP client and a mock
 * - `translation`: Worker pool, retry policy, single-unit service and export
 * - `validation`: Completion markers
 * - `app_controller`: Main application controller
 * - `language_utils`: ISO language code utilities
 * - `errors`: Custom error types for the application
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod book;
pub mod credentials;
pub mod errors;
pub mod language_utils;
pub mod providers;
pub mod session;
pub mod translation;
pub mod validation;

// Re-export main types for easier usage
pub use app_config::{Config, TranslateMode};
pub use book::Unit;
pub use credentials::{Credential, CredentialRegistry};
pub use errors::{AppError, BackendError, BatchError, ConfigError, TranslationError};
pub use language_utils::{get_language_name, language_codes_match, normalize_to_part2t};
pub use session::ConversationContextStore;
pub use translation::{RunReport, TranslationService, WorkerPoolScheduler};
