/*!
 * Batch runs on the api channel: fan-out, progress, retries and correlation
 */

use std::time::Duration;

use bookwai::app_config::TranslateMode;
use bookwai::errors::{BatchError, ConfigError};
use bookwai::providers::mock::{MockBackend, MockBehavior};
use bookwai::translation::RunStatus;

use crate::common::{scheduler_config, test_pool, units};

/// Test a small run with two api workers
#[tokio::test(start_paused = true)]
async fn test_api_run_withTwoWorkers_shouldTranslateEveryUnitWithMonotonicProgress() {
    crate::common::init_test_logging();
    let pool = test_pool(
        MockBackend::working().with_delay(100),
        vec![],
        scheduler_config(TranslateMode::Api, 2),
    );

    let handle = pool.scheduler.start_run(units(3)).await.unwrap();
    let mut progress = handle.subscribe_progress();
    let observer = tokio::spawn(async move {
        let mut seen = Vec::new();
        loop {
            let snapshot = *progress.borrow_and_update();
            seen.push(snapshot.completed);
            if snapshot.is_finished() || progress.changed().await.is_err() {
                break;
            }
        }
        seen
    });

    let report = handle.wait().await;
    let seen = observer.await.unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.completed, 3);
    assert_eq!(report.abandoned, 0);
    assert!(!report.stopped);
    assert_eq!(report.workers_started, 2);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last().copied(), Some(3));

    for id in ["1", "2", "3"] {
        let result = pool.results.get(id).unwrap();
        assert_eq!(result.title, format!("Translated chapter {}", id));
    }
    assert_eq!(pool.scheduler.status(), RunStatus::Idle);
}

/// Test that every unit is attempted exactly once when nothing fails
#[tokio::test(start_paused = true)]
async fn test_api_run_withManyWorkers_shouldClaimEachUnitOnce() {
    let pool = test_pool(
        MockBackend::working().with_delay(50),
        vec![],
        scheduler_config(TranslateMode::Api, 5),
    );

    let report = pool.scheduler.start_run(units(12)).await.unwrap().wait().await;

    assert_eq!(report.completed, 12);
    assert_eq!(pool.backend.call_count(), 12);
    for i in 1..=12 {
        assert_eq!(pool.backend.attempts_for(&i.to_string()), 1);
    }
}

/// Test the retry budget on an always-retryable unit
#[tokio::test(start_paused = true)]
async fn test_api_run_withAlwaysRetryableUnit_shouldAbandonAfterFourAttempts() {
    let backend = MockBackend::working().with_unit_behavior("2", MockBehavior::RetryableFailure);
    let pool = test_pool(backend, vec![], scheduler_config(TranslateMode::Api, 1));
    let start = tokio::time::Instant::now();

    let report = pool.scheduler.start_run(units(3)).await.unwrap().wait().await;

    assert_eq!(pool.backend.attempts_for("2"), 4);
    assert_eq!(report.completed, 2);
    assert_eq!(report.abandoned, 1);
    assert_eq!(report.missing(), 1);
    assert!(!pool.results.contains("2"));
    assert!(start.elapsed() >= Duration::from_secs(12));
}

/// Test transport errors follow the same retry rule
#[tokio::test(start_paused = true)]
async fn test_api_run_withTransportErrors_shouldRetryThenAbandon() {
    let backend = MockBackend::working().with_unit_behavior("1", MockBehavior::TransportError);
    let pool = test_pool(backend, vec![], scheduler_config(TranslateMode::Api, 1));

    let report = pool.scheduler.start_run(units(1)).await.unwrap().wait().await;

    assert_eq!(pool.backend.attempts_for("1"), 4);
    assert_eq!(report.abandoned, 1);
}

/// Test a permanent failure is not retried
#[tokio::test(start_paused = true)]
async fn test_api_run_withPermanentFailure_shouldNotRetry() {
    let backend = MockBackend::working().with_unit_behavior("1", MockBehavior::PermanentFailure);
    let pool = test_pool(backend, vec![], scheduler_config(TranslateMode::Api, 1));

    let report = pool.scheduler.start_run(units(2)).await.unwrap().wait().await;

    assert_eq!(pool.backend.attempts_for("1"), 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.abandoned, 1);
}

/// Test the completion-marker re-issue keeps the passing text
#[tokio::test(start_paused = true)]
async fn test_api_run_withMissingMarkerOnce_shouldStoreReissuedText() {
    let backend = MockBackend::working().with_unit_behavior("1", MockBehavior::MissingMarkerOnce);
    let pool = test_pool(backend, vec![], scheduler_config(TranslateMode::Api, 1));

    pool.scheduler.start_run(units(1)).await.unwrap().wait().await;

    assert_eq!(pool.backend.attempts_for("1"), 2);
    assert!(pool.results.get("1").unwrap().text.contains("(complete)"));
}

/// Test the original text is kept when the re-issue also lacks the marker
#[tokio::test(start_paused = true)]
async fn test_api_run_withNeverMarker_shouldKeepOriginalAfterOneReissue() {
    let backend = MockBackend::working().with_unit_behavior("1", MockBehavior::NeverMarker);
    let pool = test_pool(backend, vec![], scheduler_config(TranslateMode::Api, 1));

    let report = pool.scheduler.start_run(units(1)).await.unwrap().wait().await;

    assert_eq!(pool.backend.attempts_for("1"), 2);
    assert_eq!(report.completed, 1);
    assert!(pool.results.get("1").unwrap().text.contains("(truncated)"));
}

/// Test a response for another unit is never written
#[tokio::test(start_paused = true)]
async fn test_api_run_withMismatchedMetadata_shouldDiscardResponse() {
    let backend = MockBackend::working().with_unit_behavior("2", MockBehavior::MismatchedMetadata);
    let pool = test_pool(backend, vec![], scheduler_config(TranslateMode::Api, 2));

    let report = pool.scheduler.start_run(units(3)).await.unwrap().wait().await;

    assert!(!pool.results.contains("2"));
    assert!(!pool.results.contains("2-other"));
    assert_eq!(pool.results.len(), 2);
    assert_eq!(report.discarded, 1);
    assert_eq!(pool.backend.attempts_for("2"), 1);
}

/// Test stop blocks further claims and drops the in-flight answer
#[tokio::test(start_paused = true)]
async fn test_api_run_withStop_shouldNotClaimNewUnits() {
    let pool = test_pool(
        MockBackend::working().with_delay(1000),
        vec![],
        scheduler_config(TranslateMode::Api, 1),
    );

    let handle = pool.scheduler.start_run(units(10)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(pool.scheduler.stop());
    assert!(!pool.scheduler.stop());
    assert_eq!(pool.scheduler.status(), RunStatus::Idle);

    let report = handle.wait().await;

    assert!(report.stopped);
    assert_eq!(report.completed, 1);
    assert_eq!(report.discarded, 1);
    assert_eq!(pool.backend.call_count(), 2);
    assert!(pool.results.contains("1"));
    assert!(!pool.results.contains("2"));
}

/// Test processing telemetry while a unit is in flight
#[tokio::test(start_paused = true)]
async fn test_api_run_whileInFlight_shouldExposeProcessingEntries() {
    let pool = test_pool(
        MockBackend::working().with_delay(1000),
        vec![],
        scheduler_config(TranslateMode::Api, 2),
    );

    let handle = pool.scheduler.start_run(units(2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let processing = pool.scheduler.processing();
    assert_eq!(processing.len(), 2);
    assert!(processing.iter().all(|p| p.worker_id.starts_with("api-")));

    handle.wait().await;
    assert!(pool.scheduler.processing().is_empty());
}

/// Test configuration errors are reported before any worker runs
#[tokio::test]
async fn test_start_run_withInvalidSetup_shouldReturnConfigErrors() {
    let pool = test_pool(MockBackend::working(), vec![], scheduler_config(TranslateMode::Api, 0));
    let err = pool.scheduler.start_run(units(2)).await.err().unwrap();
    assert!(matches!(err, BatchError::Config(ConfigError::NoWorkers { .. })));

    let pool = test_pool(MockBackend::working(), vec![], scheduler_config(TranslateMode::Api, 2));
    let err = pool.scheduler.start_run(vec![]).await.err().unwrap();
    assert_eq!(err, BatchError::Config(ConfigError::EmptyBatch));
    assert_eq!(pool.backend.call_count(), 0);
}

/// Test a second run cannot start while one is active
#[tokio::test(start_paused = true)]
async fn test_start_run_whileRunning_shouldBeRejected() {
    let pool = test_pool(
        MockBackend::working().with_delay(1000),
        vec![],
        scheduler_config(TranslateMode::Api, 1),
    );

    let handle = pool.scheduler.start_run(units(2)).await.unwrap();
    let err = pool.scheduler.start_run(units(2)).await.err().unwrap();
    assert_eq!(err, BatchError::AlreadyRunning);

    handle.wait().await;
    assert!(pool.scheduler.start_run(units(1)).await.is_ok());
}
