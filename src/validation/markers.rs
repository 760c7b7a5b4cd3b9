/*!
 * Completion marker validation for translated units.
 *
 * Generative backends sometimes stop mid-chapter. Prompts ask the model to
 * finish with an explicit marker line; a response without it is treated as
 * truncated and re-requested once.
 */

use anyhow::{Result, anyhow};
use log::debug;
use regex::{Regex, RegexBuilder};

/// Marker every translated chapter must end with
pub const DEFAULT_COMPLETION_MARKER: &str = r"hết\s+chương|end\s+of\s+chapter|---\s*hết\s*---";

/// Marker every chapter summary must end with
pub const DEFAULT_SUMMARY_MARKER: &str =
    r"hết\s+tóm\s+tắt|end\s+of\s+summary|---\s*hết\s*---|hết\s+chương";

/// Case-insensitive completion marker
#[derive(Debug, Clone)]
pub struct CompletionMarker {
    pattern: String,
    regex: Regex,
}

impl CompletionMarker {
    /// Compile `pattern` case-insensitively
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| anyhow!("Invalid completion marker pattern '{}': {}", pattern, e))?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// The marker for translated chapters
    pub fn chapter() -> Self {
        Self::new(DEFAULT_COMPLETION_MARKER).expect("Invalid default completion marker")
    }

    /// The marker for chapter summaries
    pub fn summary() -> Self {
        Self::new(DEFAULT_SUMMARY_MARKER).expect("Invalid default summary marker")
    }

    /// Source pattern, forwarded to the backend as a validation hint
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether `text` contains the marker
    pub fn is_satisfied(&self, text: &str) -> bool {
        let found = self.regex.is_match(text);
        if !found {
            debug!("Completion marker /{}/ not found in {} chars", self.pattern, text.len());
        }
        found
    }
}
