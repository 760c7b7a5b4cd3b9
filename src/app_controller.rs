use anyhow::{Context, Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::app_config::Config;
use crate::book::{self, Unit, UnitSelection};
use crate::credentials::{Credential, CredentialRegistry, CredentialSource};
use crate::providers::TranslationBackend;
use crate::providers::http::HttpBackend;
use crate::session::{ConversationContextStore, ProjectState};
use crate::translation::{
    ExportMode, PlainTextExporter, RunReport, SchedulerConfig, TemplatePromptPreparer, TranslationResult,
    TranslationResults, TranslationService, WorkerPoolScheduler, export_book,
};

// @module: Application controller for book translation

/// Options of a batch translation
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    // @field: Unit ids left out of the run
    pub excluded: Vec<String>,
    // @field: Overrides `batch.retranslate_existing`
    pub retranslate_existing: Option<bool>,
    // @field: Project state file, defaults next to the book
    pub state_path: Option<PathBuf>,
    // @field: Draw a progress bar
    pub show_progress: bool,
}

/// Loaded project: parsed units plus the live maps of the state file
struct Project {
    units: Vec<Unit>,
    state: ProjectState,
    state_path: PathBuf,
    translations: Arc<TranslationResults>,
    summaries: Arc<TranslationResults>,
    contexts: Arc<ConversationContextStore>,
}

/// Main application controller for book translation
pub struct Controller {
    // @field: App configuration
    config: Config,
    backend: Arc<dyn TranslationBackend>,
    credentials: Arc<dyn CredentialSource>,
}

impl Controller {
    // @method: Create a controller talking to the configured relay
    pub fn with_config(config: Config) -> Result<Self> {
        let backend = HttpBackend::new(&config.backend).context("Failed to create backend client")?;
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// Create a controller over any backend that also lists credentials
    pub fn with_backend<B>(config: Config, backend: Arc<B>) -> Self
    where
        B: TranslationBackend + CredentialSource + 'static,
    {
        Self {
            config,
            backend: backend.clone(),
            credentials: backend,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// State file used for `input` when none is given
    pub fn default_state_path(input: &Path) -> PathBuf {
        input.with_extension("bookwai.json")
    }

    fn open_project(&self, input: &Path, state_path: Option<&Path>) -> Result<Project> {
        let units = book::parse_file(input)?;
        let state_path = state_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| Self::default_state_path(input));
        let state = ProjectState::load(&state_path)?;

        debug!("Opened {:?}: {} units, state {:?}", input, units.len(), state_path);
        Ok(Project {
            units,
            translations: Arc::new(state.translation_results()),
            summaries: Arc::new(state.summary_results()),
            contexts: Arc::new(state.context_store()),
            state,
            state_path,
        })
    }

    fn save_project(&self, project: &mut Project, registry: &CredentialRegistry) -> Result<()> {
        let preferred = registry.preferred_id().or_else(|| project.state.preferred_credential_id.clone());
        project
            .state
            .capture(&project.translations, &project.summaries, &project.contexts, preferred);
        project.state.save(&project.state_path)
    }

    /// Registry loaded from the backend, seeded with the remembered preference
    async fn load_registry(&self, project: &Project) -> Arc<CredentialRegistry> {
        let registry = Arc::new(CredentialRegistry::new());
        registry.set_preferred_id(project.state.preferred_credential_id.clone());

        if self.config.mode.uses_token() {
            let count = registry.load_all(self.credentials.as_ref()).await;
            debug!("{} credential record(s) available", count);
            if project.contexts.migrate(&registry.all()) {
                info!("Conversation contexts moved to identity keys");
            }
        }
        registry
    }

    /// Reload credentials periodically so new ones join a session run
    fn spawn_credential_refresh(&self, registry: &Arc<CredentialRegistry>) -> Option<JoinHandle<()>> {
        let secs = self.config.batch.credential_refresh_secs;
        if !self.config.mode.uses_token() || secs == 0 {
            return None;
        }

        let period = Duration::from_secs(secs);
        let registry = registry.clone();
        let source = self.credentials.clone();
        Some(tokio::spawn(async move {
            // Loaded just before the run, so the first reload waits a full period
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let count = registry.load_all(source.as_ref()).await;
                debug!("Credential refresh: {} record(s)", count);
            }
        }))
    }

    /// Translate the selected units of `input` with the worker pool.
    ///
    /// Returns `None` when the selection is empty.
    pub async fn translate_book(&self, input: &Path, options: &RunOptions) -> Result<Option<RunReport>> {
        let mut project = self.open_project(input, options.state_path.as_deref())?;
        let registry = self.load_registry(&project).await;

        let retranslate = options
            .retranslate_existing
            .unwrap_or(self.config.batch.retranslate_existing);
        let selection = options
            .excluded
            .iter()
            .fold(UnitSelection::new(retranslate), |s, id| s.exclude(id.clone()));
        let selected = selection.select(&project.units, |id| project.translations.contains(id));

        if selected.is_empty() {
            info!("Nothing to translate in {:?}", input);
            return Ok(None);
        }

        let scheduler = WorkerPoolScheduler::new(
            self.backend.clone(),
            registry.clone(),
            project.contexts.clone(),
            project.translations.clone(),
            Arc::new(TemplatePromptPreparer::from_config(&self.config.prompts)),
            SchedulerConfig::from_config(&self.config)?,
        );

        let handle = scheduler.start_run(selected).await?;
        let progress_task = options
            .show_progress
            .then(|| spawn_progress_bar(handle.subscribe_progress()));
        let refresh_task = self.spawn_credential_refresh(&registry);

        let state = handle.state().clone();
        let wait = handle.wait();
        tokio::pin!(wait);
        let report = tokio::select! {
            report = &mut wait => report,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping run. In-flight units will be discarded");
                state.stop();
                wait.await
            }
        };

        if let Some(task) = progress_task {
            task.abort();
        }
        if let Some(task) = refresh_task {
            task.abort();
        }

        self.save_project(&mut project, &registry)?;
        info!(
            "Run {} done in {:.1}s: {}/{} translated, {} abandoned, {} discarded",
            report.run_id,
            report.elapsed.as_secs_f64(),
            report.completed,
            report.total,
            report.abandoned,
            report.discarded
        );
        Ok(Some(report))
    }

    fn single_unit_service(&self, project: &Project, registry: Arc<CredentialRegistry>) -> Result<TranslationService> {
        let service = TranslationService::new(
            &self.config,
            self.backend.clone(),
            registry,
            project.contexts.clone(),
            Arc::new(TemplatePromptPreparer::from_config(&self.config.prompts)),
            project.translations.clone(),
            project.summaries.clone(),
        )?;
        Ok(service)
    }

    fn find_unit<'a>(project: &'a Project, unit_id: &str) -> Result<&'a Unit> {
        project
            .units
            .iter()
            .find(|u| u.id == unit_id)
            .ok_or_else(|| anyhow!("Unknown unit: {}", unit_id))
    }

    /// Translate one unit outside a batch run
    pub async fn translate_unit(&self, input: &Path, unit_id: &str, state_path: Option<&Path>) -> Result<TranslationResult> {
        let mut project = self.open_project(input, state_path)?;
        let registry = self.load_registry(&project).await;
        let unit = Self::find_unit(&project, unit_id)?.clone();

        let result = self.single_unit_service(&project, registry.clone())?.translate_one(&unit).await?;
        self.save_project(&mut project, &registry)?;
        Ok(result)
    }

    /// Summarise the translation of one unit
    pub async fn summarize_unit(&self, input: &Path, unit_id: &str, state_path: Option<&Path>) -> Result<TranslationResult> {
        let mut project = self.open_project(input, state_path)?;
        let registry = self.load_registry(&project).await;
        let unit = Self::find_unit(&project, unit_id)?.clone();

        let result = self.single_unit_service(&project, registry.clone())?.summarize_one(&unit).await?;
        self.save_project(&mut project, &registry)?;
        Ok(result)
    }

    /// Units of `input` with whether each already has a translation
    pub fn list_units(&self, input: &Path, state_path: Option<&Path>) -> Result<Vec<(Unit, bool)>> {
        let project = self.open_project(input, state_path)?;
        Ok(project
            .units
            .iter()
            .map(|u| (u.clone(), project.translations.contains(&u.id)))
            .collect())
    }

    /// Credential records from the backend and the distinct usable ones
    pub async fn list_credentials(&self) -> Result<(Vec<Credential>, Vec<Credential>)> {
        let credentials = self
            .credentials
            .list_credentials()
            .await
            .context("Failed to list credentials")?;
        let distinct = CredentialRegistry::distinct_active(&credentials);
        Ok((credentials, distinct))
    }

    /// Write the stored texts of `input` as a plain-text book
    pub fn export(
        &self,
        input: &Path,
        mode: ExportMode,
        output: &Path,
        title: Option<&str>,
        author: &str,
        state_path: Option<&Path>,
    ) -> Result<PathBuf> {
        let project = self.open_project(input, state_path)?;
        let default_title = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        export_book(
            &PlainTextExporter,
            &project.units,
            &project.translations,
            &project.summaries,
            mode,
            title.unwrap_or(&default_title),
            author,
            output,
        )
    }
}

fn spawn_progress_bar(
    mut progress: tokio::sync::watch::Receiver<crate::translation::BatchProgress>,
) -> tokio::task::JoinHandle<()> {
    let total = progress.borrow().total as u64;
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} units ({percent}%) {msg} {eta}")
        .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style.progress_chars("█▓▒░"));
    bar.set_message("Translating");

    tokio::spawn(async move {
        loop {
            let snapshot = *progress.borrow_and_update();
            bar.set_position(snapshot.accounted() as u64);
            if snapshot.abandoned > 0 {
                bar.set_message(format!("{} abandoned", snapshot.abandoned));
            }
            if snapshot.is_finished() || progress.changed().await.is_err() {
                break;
            }
        }
        bar.finish_and_clear();
    })
}
