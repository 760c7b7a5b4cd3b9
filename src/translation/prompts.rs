/*!
 * Prompt preparation.
 *
 * Workers only need an opaque prompt per unit. `PromptPreparer` is the seam;
 * `TemplatePromptPreparer` renders the configured templates into a
 * single-message chat prompt.
 */

use async_trait::async_trait;
use serde_json::json;

use crate::app_config::PromptConfig;
use crate::errors::PromptError;
use crate::language_utils::display_language;
use crate::providers::Prompt;

const TEXT_PLACEHOLDERS: [&str; 2] = ["{{text}}", "{{input}}"];

/// Builds prompts for translation and summary calls
#[async_trait]
pub trait PromptPreparer: Send + Sync {
    /// Prompt translating `content` from `source_language` to `target_language`
    async fn prepare_prompt(
        &self,
        content: &str,
        source_language: &str,
        target_language: &str,
        model: Option<&str>,
    ) -> Result<Prompt, PromptError>;

    /// Prompt summarising already translated `content`
    async fn prepare_summary_prompt(
        &self,
        content: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<Prompt, PromptError>;
}

/// Placeholder-substitution prompt builder
#[derive(Debug, Clone)]
pub struct TemplatePromptPreparer {
    translation_template: String,
    summary_template: String,
}

impl TemplatePromptPreparer {
    pub fn new(translation_template: impl Into<String>, summary_template: impl Into<String>) -> Self {
        Self {
            translation_template: translation_template.into(),
            summary_template: summary_template.into(),
        }
    }

    pub fn from_config(config: &PromptConfig) -> Self {
        Self::new(&config.translation_template, &config.summary_template)
    }

    /// Substitute placeholders; content without a placeholder is appended
    pub fn render(template: &str, content: &str, source_language: &str, target_language: &str) -> String {
        let mut rendered = template
            .replace("{{source_language}}", &display_language(source_language))
            .replace("{{target_language}}", &display_language(target_language));

        if TEXT_PLACEHOLDERS.iter().any(|p| rendered.contains(p)) {
            for placeholder in TEXT_PLACEHOLDERS {
                rendered = rendered.replace(placeholder, content);
            }
        } else {
            rendered = format!("{}\n\n{}", rendered.trim_end(), content);
        }
        rendered
    }

    fn build(
        template: &str,
        content: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<Prompt, PromptError> {
        if template.trim().is_empty() {
            return Err(PromptError::MissingTemplate {
                source_language: source_language.to_string(),
                target_language: target_language.to_string(),
            });
        }
        let text = Self::render(template, content, source_language, target_language);
        Ok(json!([{ "role": "user", "content": text }]))
    }
}

impl Default for TemplatePromptPreparer {
    fn default() -> Self {
        Self::from_config(&PromptConfig::default())
    }
}

#[async_trait]
impl PromptPreparer for TemplatePromptPreparer {
    async fn prepare_prompt(
        &self,
        content: &str,
        source_language: &str,
        target_language: &str,
        _model: Option<&str>,
    ) -> Result<Prompt, PromptError> {
        Self::build(&self.translation_template, content, source_language, target_language)
    }

    async fn prepare_summary_prompt(
        &self,
        content: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<Prompt, PromptError> {
        Self::build(&self.summary_template, content, source_language, target_language)
    }
}
