/*!
 * Book export.
 *
 * Collects stored translations and summaries in unit order and hands them
 * to a `BookExporter`. Units without the requested text are skipped.
 */

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use log::{info, warn};

use crate::book::Unit;

use super::results::TranslationResults;

/// Which texts go into the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportMode {
    #[default]
    Translation,
    Summary,
    /// Translation followed by its summary
    Combined,
}

impl FromStr for ExportMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "translation" => Ok(Self::Translation),
            "summary" => Ok(Self::Summary),
            "combined" => Ok(Self::Combined),
            _ => Err(anyhow!("Invalid export mode: {}", s)),
        }
    }
}

/// One chapter of an exported book
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportChapter {
    pub unit_id: String,
    pub title: String,
    pub body: String,
}

/// Writes a book file from chapters
pub trait BookExporter {
    fn create_ebook(&self, chapters: &[ExportChapter], title: &str, author: &str, output_path: &Path) -> Result<PathBuf>;
}

/// Plain UTF-8 text, chapters separated by `=== Title ===` headers
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExporter;

impl BookExporter for PlainTextExporter {
    fn create_ebook(&self, chapters: &[ExportChapter], title: &str, author: &str, output_path: &Path) -> Result<PathBuf> {
        let mut out = String::new();
        writeln!(out, "{}", title)?;
        if !author.is_empty() {
            writeln!(out, "{}", author)?;
        }
        for chapter in chapters {
            write!(out, "\n=== {} ===\n\n{}\n", chapter.title, chapter.body.trim_end())?;
        }

        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        fs::write(output_path, out).with_context(|| format!("Failed to write book {:?}", output_path))?;
        Ok(output_path.to_path_buf())
    }
}

/// Chapters for `mode` in the order of `units`
pub fn collect_chapters(
    units: &[Unit],
    translations: &TranslationResults,
    summaries: &TranslationResults,
    mode: ExportMode,
) -> Vec<ExportChapter> {
    units
        .iter()
        .filter_map(|unit| {
            let translation = translations.get(&unit.id);
            let summary = summaries.get(&unit.id);
            let (title, body) = match mode {
                ExportMode::Translation => {
                    let t = translation?;
                    (t.title, t.text)
                }
                ExportMode::Summary => {
                    let s = summary?;
                    (s.title, s.text)
                }
                ExportMode::Combined => {
                    let t = translation?;
                    let body = match summary {
                        Some(s) => format!("{}\n\n{}", t.text.trim_end(), s.text),
                        None => t.text,
                    };
                    (t.title, body)
                }
            };
            Some(ExportChapter {
                unit_id: unit.id.clone(),
                title,
                body,
            })
        })
        .collect()
}

/// Export the stored texts of `units` through `exporter`
#[allow(clippy::too_many_arguments)]
pub fn export_book(
    exporter: &dyn BookExporter,
    units: &[Unit],
    translations: &TranslationResults,
    summaries: &TranslationResults,
    mode: ExportMode,
    title: &str,
    author: &str,
    output_path: &Path,
) -> Result<PathBuf> {
    let chapters = collect_chapters(units, translations, summaries, mode);
    if chapters.is_empty() {
        return Err(anyhow!("Nothing to export for {:?}", mode));
    }
    if chapters.len() < units.len() {
        warn!("{} of {} units have no text to export", units.len() - chapters.len(), units.len());
    }

    let path = exporter.create_ebook(&chapters, title, author, output_path)?;
    info!("Exported {} chapters to {:?}", chapters.len(), path);
    Ok(path)
}
