/*!
 * Tests for identity keys and the credential registry
 */

use bookwai::credentials::{Credential, CredentialRegistry, identity_key};
use bookwai::providers::mock::MockBackend;

use crate::common::credential;

/// Test that records with the same secrets collapse to one
#[test]
fn test_distinct_active_withDuplicatesAndUnusable_shouldKeepFirstPerIdentity() {
    let configs = vec![
        credential("a", "s1"),
        credential("b", "s1"),
        credential("c", "s2").inactive(),
        credential("d", "s3").with_error(),
        credential("e", "s4"),
    ];

    let distinct = CredentialRegistry::distinct_active(&configs);
    let ids: Vec<&str> = distinct.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "e"]);
}

/// Test that dedup never yields two records with the same key
#[test]
fn test_distinct_active_withManyDuplicates_shouldHaveUniqueKeys() {
    let configs: Vec<Credential> = (0..20).map(|i| credential(&format!("c{}", i), &format!("s{}", i % 3))).collect();
    let distinct = CredentialRegistry::distinct_active(&configs);

    assert_eq!(distinct.len(), 3);
    let mut keys: Vec<String> = distinct.iter().map(|c| c.identity_key()).collect();
    keys.dedup();
    assert_eq!(keys.len(), 3);
}

/// Test identity key normalisation
#[test]
fn test_identity_key_withWhitespaceAndRotatedCookies_shouldBeStable() {
    let a = identity_key("__Secure-1PSID=abc; NID=1", "tok");
    let b = identity_key(" NID=9; __Secure-1PSID=abc ", "  tok\n");
    let c = identity_key("__Secure-1PSID=abc", "other");
    assert_eq!(a, b);
    assert_ne!(a, c);
}

/// Test preferred credential memory
#[test]
fn test_preferred_withUnusablePreference_shouldFallBackToFirstDistinct() {
    let registry = CredentialRegistry::with_credentials(vec![credential("a", "s1"), credential("b", "s2")]);
    assert_eq!(registry.preferred_id().as_deref(), Some("a"));

    registry.set_preferred_id(Some("b".to_string()));
    assert_eq!(registry.preferred().unwrap().id, "b");

    registry.replace(vec![credential("a", "s1"), credential("b", "s2").inactive()]);
    assert_eq!(registry.preferred().unwrap().id, "a");
    assert_eq!(registry.preferred_id().as_deref(), Some("a"));
}

/// Test soft failure of a reload
#[tokio::test]
async fn test_load_all_withFailingSource_shouldKeepPreviousList() {
    let backend = MockBackend::working().with_credentials(vec![credential("a", "s1")]);
    let registry = CredentialRegistry::new();

    assert_eq!(registry.load_all(&backend).await, 1);

    backend.set_listing_fails(true);
    assert_eq!(registry.load_all(&backend).await, 1);
    assert_eq!(registry.active().len(), 1);
}

/// Test change events on reload
#[tokio::test]
async fn test_replace_withSubscriber_shouldPublishDistinctActive() {
    let registry = CredentialRegistry::new();
    let mut events = registry.subscribe();

    registry.replace(vec![credential("a", "s1"), credential("b", "s1"), credential("c", "s2")]);
    let event = events.recv().await.unwrap();
    assert_eq!(event.distinct_active.len(), 2);
}

/// Test credential JSON field names
#[test]
fn test_credential_deserialize_withRelayFields_shouldMapFlags() {
    let json = r#"{"id":"x","cookie":"c","atToken":"t","isActive":true,"isError":false,"email":"me@example.com"}"#;
    let credential: Credential = serde_json::from_str(json).unwrap();

    assert!(credential.is_usable());
    assert_eq!(credential.display_name(), "me@example.com");
}
