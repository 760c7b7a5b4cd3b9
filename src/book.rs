use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// @module: Book parsing and unit selection

// @const: Chapter header line, e.g. "=== Chapter 1: The Gate ==="
static CHAPTER_HEADER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"===\s*(.*?)\s*===").expect("Invalid chapter header regex")
});

// @const: Title used when a text file has no chapter headers
const FULL_TEXT_TITLE: &str = "Full text";

// @struct: One translatable unit of a book (a chapter)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    // @field: Stable id, 1-based sequence number as a string
    pub id: String,

    // @field: Source title
    pub title: String,

    // @field: Source text
    pub content: String,
}

impl Unit {
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Parse the text of a book into units.
///
/// Units are delimited by `=== Title ===` header lines. Text before the first
/// header is ignored. A text with no headers becomes a single unit.
pub fn parse_text(text: &str) -> Vec<Unit> {
    let headers: Vec<(String, usize, usize)> = CHAPTER_HEADER_REGEX
        .captures_iter(text)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            let title = cap.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
            Some((title, whole.start(), whole.end()))
        })
        .collect();

    if headers.is_empty() {
        return vec![Unit::new("1", FULL_TEXT_TITLE, text)];
    }

    headers
        .iter()
        .enumerate()
        .map(|(i, (title, _, content_start))| {
            let content_end = headers.get(i + 1).map(|(_, start, _)| *start).unwrap_or(text.len());
            let content = text[*content_start..content_end].trim();
            Unit::new((i + 1).to_string(), title.clone(), content)
        })
        .collect()
}

/// Read and parse a `.txt` book file.
pub fn parse_file(path: &Path) -> Result<Vec<Unit>> {
    let is_txt = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("txt"));
    if !is_txt {
        return Err(anyhow!("Unsupported book format: {:?} (expected a .txt file)", path));
    }

    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read book file: {:?}", path))?;
    let units = parse_text(&text);
    debug!("Parsed {} unit(s) from {:?}", units.len(), path);
    Ok(units)
}

/// Title of a translated unit: its first non-empty line, or `Chapter <id>`.
pub fn extract_translated_title(text: &str, fallback_id: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Chapter {}", fallback_id))
}

// @struct: Which units take part in a run
#[derive(Debug, Clone, Default)]
pub struct UnitSelection {
    // @field: Unit ids the user excluded
    pub excluded: HashSet<String>,

    // @field: Translate units again even when a translation exists
    pub retranslate_existing: bool,
}

impl UnitSelection {
    pub fn new(retranslate_existing: bool) -> Self {
        Self {
            excluded: HashSet::new(),
            retranslate_existing,
        }
    }

    pub fn exclude(mut self, unit_id: impl Into<String>) -> Self {
        self.excluded.insert(unit_id.into());
        self
    }

    pub fn is_included(&self, unit_id: &str) -> bool {
        !self.excluded.contains(unit_id)
    }

    /// Units to translate, in book order.
    pub fn select(&self, units: &[Unit], already_translated: impl Fn(&str) -> bool) -> Vec<Unit> {
        let selected: Vec<Unit> = units
            .iter()
            .filter(|u| self.is_included(&u.id))
            .filter(|u| self.retranslate_existing || !already_translated(&u.id))
            .cloned()
            .collect();

        if selected.is_empty() && !units.is_empty() {
            warn!("All selected units are already translated");
        }
        selected
    }
}
