/*!
 * Controller lifecycle tests over a book file and the mock backend
 */

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bookwai::app_config::{Config, TranslateMode};
use bookwai::app_controller::{Controller, RunOptions};
use bookwai::providers::Channel;
use bookwai::providers::mock::{MockBackend, MockBehavior};
use bookwai::session::{ConversationState, LegacyContext, ProjectState};
use bookwai::translation::ExportMode;

use crate::common::{self, credential};

fn config(mode: TranslateMode) -> Config {
    let mut config = Config::default();
    config.mode = mode;
    config.batch.api_workers = 2;
    config
}

/// Test a run, a rerun and an abandoned chapter being retried on the next run
#[tokio::test(start_paused = true)]
async fn test_translate_book_withAbandonedChapter_shouldRetryOnRerun() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let book = common::create_test_book(dir.path(), "novel.txt", 4)?;

    let failing = MockBackend::working().with_unit_behavior("3", MockBehavior::PermanentFailure);
    let controller = Controller::with_backend(config(TranslateMode::Api), Arc::new(failing));
    let report = controller.translate_book(&book, &RunOptions::default()).await?.unwrap();
    assert_eq!(report.completed, 3);
    assert_eq!(report.abandoned, 1);

    let backend = Arc::new(MockBackend::working());
    let controller = Controller::with_backend(config(TranslateMode::Api), backend.clone());
    let report = controller.translate_book(&book, &RunOptions::default()).await?.unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(backend.attempts_for("3"), 1);
    assert_eq!(backend.call_count(), 1);

    let state = ProjectState::load(&Controller::default_state_path(&book))?;
    assert_eq!(state.translations.len(), 4);
    Ok(())
}

/// Test a token-mode run migrates a legacy context and saves the preferred credential
#[tokio::test(start_paused = true)]
async fn test_translate_book_withLegacyContext_shouldMigrateAndReuseIt() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let book = common::create_test_book(dir.path(), "novel.txt", 1)?;
    let state_path = dir.path().join("state.json");
    let cred = credential("a", "s1");

    ProjectState {
        preferred_credential_id: Some("a".to_string()),
        token_context: Some(LegacyContext {
            credential_id: "a".to_string(),
            state: ConversationState::new("legacy-conv", "r0", "c0"),
        }),
        ..ProjectState::default()
    }
    .save(&state_path)?;

    let backend = Arc::new(MockBackend::working().with_credentials(vec![cred.clone()]));
    let controller = Controller::with_backend(config(TranslateMode::Token), backend.clone());
    let options = RunOptions {
        state_path: Some(state_path.clone()),
        ..RunOptions::default()
    };
    let report = controller.translate_book(&book, &options).await?.unwrap();
    assert_eq!(report.completed, 1);

    let calls = backend.calls();
    assert_eq!(calls[0].context.as_ref().unwrap().conversation_id, "legacy-conv");

    let saved = ProjectState::load(&state_path)?;
    assert!(saved.token_context.is_none());
    assert_eq!(saved.preferred_credential_id.as_deref(), Some("a"));
    assert_eq!(saved.token_contexts[&cred.identity_key()].conversation_id, "conv-a");
    assert_eq!(saved.translations["1"].channel_used, Channel::Token);
    Ok(())
}

/// Test a credential activated on the backend mid-run joins the running batch
#[tokio::test(start_paused = true)]
async fn test_translate_book_withCredentialActivatedMidRun_shouldAddWorker() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let book = common::create_test_book(dir.path(), "novel.txt", 10)?;
    let a = credential("a", "s1");
    let backend = Arc::new(MockBackend::working().with_delay(1_000).with_credentials(vec![a.clone()]));
    let mut settings = config(TranslateMode::Token);
    settings.batch.credential_refresh_secs = 2;
    let controller = Controller::with_backend(settings, backend.clone());

    let run_options = RunOptions::default();
    let (report, ()) = tokio::join!(controller.translate_book(&book, &run_options), async {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        backend.set_credentials(vec![a.clone(), credential("b", "s2")]);
    });
    let report = report?.unwrap();

    assert_eq!(report.completed, 10);
    assert_eq!(report.workers_started, 2);
    let used: HashSet<String> = backend.calls().into_iter().filter_map(|c| c.credential_id).collect();
    assert!(used.contains("b"));
    assert_eq!(backend.max_in_flight_for("a"), 1);
    Ok(())
}

/// Test a token-mode run without credentials reports a configuration error
#[tokio::test]
async fn test_translate_book_withoutCredentials_shouldFail() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let book = common::create_test_book(dir.path(), "novel.txt", 2)?;
    let controller = Controller::with_backend(config(TranslateMode::Token), Arc::new(MockBackend::working()));

    let err = controller.translate_book(&book, &RunOptions::default()).await.unwrap_err();
    assert!(err.to_string().contains("No usable session credential"));
    Ok(())
}

/// Test single-chapter translation, summary and combined export
#[tokio::test]
async fn test_chapter_summary_and_export_withMockBackend_shouldWriteCombinedBook() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let book = common::create_test_book(dir.path(), "novel.txt", 2)?;
    let controller = Controller::with_backend(config(TranslateMode::Api), Arc::new(MockBackend::working()));

    let translated = controller.translate_unit(&book, "2", None).await?;
    assert_eq!(translated.title, "Translated chapter 2");

    let summary = controller.summarize_unit(&book, "2", None).await?;
    assert_eq!(summary.title, "Translated chapter 2");
    assert!(controller.summarize_unit(&book, "1", None).await.is_err());

    let out = dir.path().join("export").join("novel.vi.txt");
    controller.export(&book, ExportMode::Combined, &out, Some("Novel"), "Anon", None)?;
    let content = std::fs::read_to_string(&out)?;
    assert!(content.starts_with("Novel\nAnon\n"));
    assert!(content.contains("=== Translated chapter 2 ==="));
    assert!(content.contains("End of summary"));
    assert!(!content.contains("Translated chapter 1"));
    Ok(())
}

/// Test chapter listing marks translated chapters
#[tokio::test]
async fn test_list_units_afterSingleTranslation_shouldMarkIt() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let book = common::create_test_book(dir.path(), "novel.txt", 3)?;
    let controller = Controller::with_backend(config(TranslateMode::Api), Arc::new(MockBackend::working()));

    controller.translate_unit(&book, "1", None).await?;
    let listed = controller.list_units(&book, None)?;

    let done: Vec<bool> = listed.iter().map(|(_, translated)| *translated).collect();
    assert_eq!(done, vec![true, false, false]);
    assert_eq!(listed[1].0.title, "Chapter 2");
    Ok(())
}

/// Test credential listing through the controller
#[test]
fn test_list_credentials_withDuplicateRecords_shouldReportDistinctUsable() {
    common::init_test_logging();
    let backend = MockBackend::working().with_credentials(vec![
        credential("a", "s1"),
        credential("b", "s1"),
        credential("c", "s2").inactive(),
    ]);
    let controller = Controller::with_backend(config(TranslateMode::Token), Arc::new(backend));

    let (all, distinct) = tokio_test::block_on(controller.list_credentials()).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(distinct.len(), 1);
    assert_eq!(distinct[0].id, "a");
}
