/*!
 * Session channel state.
 *
 * This module provides:
 * - Per-credential conversation continuity (`context_store`)
 * - Project state persistence between runs (`state`)
 */

pub mod context_store;
pub mod state;

// Re-export main types
pub use context_store::{ConversationContextStore, ConversationState};
pub use state::{LegacyContext, ProjectState};
