/*!
 * Batch runs on session channels: dedup, capacity, stagger and hot-add
 */

use std::collections::HashSet;
use std::time::Duration;

use bookwai::app_config::TranslateMode;
use bookwai::errors::{BatchError, ConfigError};
use bookwai::providers::Channel;
use bookwai::providers::mock::MockBackend;

use crate::common::{credential, scheduler_config, test_pool, units};

fn credential_ids(pool: &crate::common::TestPool) -> HashSet<String> {
    pool.backend
        .calls()
        .into_iter()
        .filter_map(|c| c.credential_id)
        .collect()
}

/// Test duplicate records never run two workers on one identity
#[tokio::test(start_paused = true)]
async fn test_token_run_withDuplicateCredentials_shouldRunOneWorkerPerIdentity() {
    let creds = vec![credential("a", "s1"), credential("b", "s1"), credential("c", "s2")];
    let pool = test_pool(
        MockBackend::working().with_delay(10_000),
        creds,
        scheduler_config(TranslateMode::Token, 0),
    );

    let report = pool.scheduler.start_run(units(6)).await.unwrap().wait().await;

    assert_eq!(report.completed, 6);
    assert_eq!(report.workers_started, 2);
    assert_eq!(credential_ids(&pool), HashSet::from(["a".to_string(), "c".to_string()]));
    assert_eq!(pool.backend.max_in_flight_for("a"), 1);
    assert_eq!(pool.backend.max_in_flight_for("c"), 1);
}

/// Test the cohort is clamped to the session channel capacity
#[tokio::test(start_paused = true)]
async fn test_token_run_withCapacityOne_shouldStartOnlyFirstCredential() {
    let creds = vec![credential("a", "s1"), credential("b", "s2"), credential("c", "s3")];
    let pool = test_pool(
        MockBackend::working().with_delay(10_000).with_capacity(1),
        creds,
        scheduler_config(TranslateMode::Token, 0),
    );

    let report = pool.scheduler.start_run(units(4)).await.unwrap().wait().await;

    assert_eq!(report.completed, 4);
    assert_eq!(report.workers_started, 1);
    assert_eq!(credential_ids(&pool), HashSet::from(["a".to_string()]));
    assert_eq!(pool.backend.release_count(), 1);
}

/// Test a failed capacity probe means no limit
#[tokio::test(start_paused = true)]
async fn test_token_run_withCapacityProbeFailure_shouldStartEveryCredential() {
    let creds = vec![credential("a", "s1"), credential("b", "s2")];
    let pool = test_pool(
        MockBackend::working().with_delay(10_000).with_capacity_error(),
        creds,
        scheduler_config(TranslateMode::Token, 0),
    );

    let report = pool.scheduler.start_run(units(8)).await.unwrap().wait().await;

    assert_eq!(report.workers_started, 2);
    assert_eq!(report.completed, 8);
}

/// Test session workers start one after another
#[tokio::test(start_paused = true)]
async fn test_token_run_withThreeCredentials_shouldStaggerStarts() {
    let creds = vec![credential("a", "s1"), credential("b", "s2"), credential("c", "s3")];
    let pool = test_pool(
        MockBackend::working().with_delay(100_000),
        creds,
        scheduler_config(TranslateMode::Token, 0),
    );

    let handle = pool.scheduler.start_run(units(10)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert_eq!(pool.scheduler.processing().len(), 1);
    assert_eq!(credential_ids(&pool), HashSet::from(["a".to_string()]));

    tokio::time::sleep(Duration::from_millis(35_600)).await;
    assert_eq!(pool.scheduler.processing().len(), 3);

    handle.stop();
    let report = handle.wait().await;
    assert!(report.stopped);
    assert_eq!(report.workers_started, 3);
    assert_eq!(report.completed, 0);
}

/// Test delayed starts are cancelled when the run finishes first
#[tokio::test(start_paused = true)]
async fn test_token_run_finishingBeforeStagger_shouldCancelDelayedStarts() {
    let creds = vec![credential("a", "s1"), credential("b", "s2")];
    let pool = test_pool(
        MockBackend::working().with_delay(100),
        creds,
        scheduler_config(TranslateMode::Token, 0),
    );

    let report = pool.scheduler.start_run(units(3)).await.unwrap().wait().await;

    assert_eq!(report.completed, 3);
    assert_eq!(report.workers_started, 1);
    assert_eq!(credential_ids(&pool), HashSet::from(["a".to_string()]));
}

/// Test conversation contexts are reused across a worker's units
#[tokio::test(start_paused = true)]
async fn test_token_run_withOneCredential_shouldCarryContextBetweenUnits() {
    let cred = credential("a", "s1");
    let pool = test_pool(
        MockBackend::working().with_delay(100),
        vec![cred.clone()],
        scheduler_config(TranslateMode::Token, 0),
    );

    pool.scheduler.start_run(units(3)).await.unwrap().wait().await;

    let calls = pool.backend.calls();
    assert!(calls[0].context.is_none());
    assert_eq!(calls[1].context.as_ref().unwrap().conversation_id, "conv-a");
    assert_eq!(calls[2].context.as_ref().unwrap().response_id, "resp-2");

    let stored = pool.contexts.get(&cred.identity_key()).unwrap();
    assert_eq!(stored.response_id, "resp-3");
    assert!(pool.contexts.get("a").is_none());
}

/// Test a session run without usable credentials is refused up front
#[tokio::test]
async fn test_token_run_withoutUsableCredential_shouldFailBeforeSpawning() {
    let creds = vec![credential("a", "s1").inactive(), credential("b", "s2").with_error()];
    let pool = test_pool(MockBackend::working(), creds, scheduler_config(TranslateMode::Both, 2));

    let err = pool.scheduler.start_run(units(3)).await.err().unwrap();

    assert_eq!(err, BatchError::Config(ConfigError::NoUsableCredential));
    assert_eq!(pool.backend.call_count(), 0);
    assert_eq!(pool.backend.release_count(), 0);
}

/// Test both cohorts share one cursor
#[tokio::test(start_paused = true)]
async fn test_both_run_withApiAndSessionWorkers_shouldUseBothChannels() {
    let pool = test_pool(
        MockBackend::working().with_delay(1_000),
        vec![credential("a", "s1")],
        scheduler_config(TranslateMode::Both, 1),
    );

    let report = pool.scheduler.start_run(units(4)).await.unwrap().wait().await;

    assert_eq!(report.completed, 4);
    assert_eq!(report.workers_started, 2);
    let channels: HashSet<Channel> = pool.backend.calls().into_iter().map(|c| c.channel).collect();
    assert!(channels.contains(&Channel::Api));
    assert!(channels.contains(&Channel::Token));
    assert_eq!(pool.backend.call_count(), 4);
}

/// Test a credential added mid-run gets its own worker at once
#[tokio::test(start_paused = true)]
async fn test_token_run_withCredentialAddedMidRun_shouldHotAddWorker() {
    crate::common::init_test_logging();
    let a = credential("a", "s1");
    let pool = test_pool(
        MockBackend::working().with_delay(1_000),
        vec![a.clone()],
        scheduler_config(TranslateMode::Token, 0),
    );

    let handle = pool.scheduler.start_run(units(10)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    pool.registry
        .replace(vec![a.clone(), credential("a-copy", "s1"), credential("b", "s2")]);
    let report = handle.wait().await;

    assert_eq!(report.completed, 10);
    assert_eq!(report.workers_started, 2);
    let ids = credential_ids(&pool);
    assert!(ids.contains("b"));
    assert!(!ids.contains("a-copy"));
    assert_eq!(pool.backend.max_in_flight_for("a"), 1);
    assert_eq!(pool.backend.max_in_flight_for("b"), 1);
}

/// Test a pending delayed start counts as bound for hot-add
#[tokio::test(start_paused = true)]
async fn test_token_run_withReloadDuringStagger_shouldNotDoubleStart() {
    let a = credential("a", "s1");
    let b = credential("b", "s2");
    let pool = test_pool(
        MockBackend::working().with_delay(10_000),
        vec![a.clone(), b.clone()],
        scheduler_config(TranslateMode::Token, 0),
    );

    let handle = pool.scheduler.start_run(units(6)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    pool.registry.replace(vec![a, b]);

    let report = handle.wait().await;

    assert_eq!(report.workers_started, 2);
    assert_eq!(report.completed, 6);
    assert_eq!(pool.backend.max_in_flight_for("b"), 1);
}

/// Test a restart is refused while a stopped run still has a call in flight
#[tokio::test(start_paused = true)]
async fn test_start_run_afterStopWithCallInFlight_shouldRefuseUntilDrained() {
    let pool = test_pool(
        MockBackend::working().with_delay(10_000),
        vec![credential("a", "s1")],
        scheduler_config(TranslateMode::Token, 0),
    );

    let handle = pool.scheduler.start_run(units(4)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(pool.scheduler.stop());

    let err = pool.scheduler.start_run(units(4)).await.err().unwrap();
    assert_eq!(err, BatchError::PreviousRunDraining { live: 1 });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.backend.max_in_flight_for("a"), 1);

    let report = handle.wait().await;
    assert!(report.stopped);
    assert_eq!(report.discarded, 1);

    let rerun = pool.scheduler.start_run(units(1)).await.unwrap().wait().await;
    assert_eq!(rerun.completed, 1);
    assert_eq!(pool.backend.max_in_flight_for("a"), 1);
}

/// Test a credential published while capacity is probed still gets a worker
#[tokio::test(start_paused = true)]
async fn test_token_run_withCredentialAddedDuringCapacityProbe_shouldHotAddIt() {
    let a = credential("a", "s1");
    let pool = test_pool(
        MockBackend::working().with_delay(1_000).with_probe_delay(1_000),
        vec![a.clone()],
        scheduler_config(TranslateMode::Token, 0),
    );

    let (started, ()) = tokio::join!(pool.scheduler.start_run(units(6)), async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        pool.registry.replace(vec![a.clone(), credential("b", "s2")]);
    });
    let report = started.unwrap().wait().await;

    assert_eq!(report.completed, 6);
    assert_eq!(report.workers_started, 2);
    assert!(credential_ids(&pool).contains("b"));
}

/// Test a reload keeps credentials clamped out at start idle but adds new ones
#[tokio::test(start_paused = true)]
async fn test_token_run_withClampedCredentialReloaded_shouldOnlyHotAddNewIdentity() {
    let a = credential("a", "s1");
    let b = credential("b", "s2");
    let pool = test_pool(
        MockBackend::working().with_delay(1_000).with_capacity(1),
        vec![a.clone(), b.clone()],
        scheduler_config(TranslateMode::Token, 0),
    );

    let handle = pool.scheduler.start_run(units(8)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    pool.registry.replace(vec![a, b, credential("c", "s3")]);
    let report = handle.wait().await;

    assert_eq!(report.completed, 8);
    assert_eq!(report.workers_started, 2);
    let ids = credential_ids(&pool);
    assert!(ids.contains("c"));
    assert!(!ids.contains("b"));
}
