/*!
 * Tests for conversation contexts and project state
 */

use std::collections::HashMap;

use bookwai::session::{ConversationContextStore, ConversationState, LegacyContext, ProjectState};
use bookwai::translation::TranslationResults;

use crate::common::{self, credential};

/// Test that contexts are keyed by identity and shared across duplicate records
#[test]
fn test_context_store_withDuplicateRecords_shouldShareOneEntry() {
    let store = ConversationContextStore::new();
    let a = credential("a", "s1");
    let b = credential("b", "s1");

    store.set(&a.identity_key(), ConversationState::new("c1", "r1", "k1"));
    assert_eq!(store.get(&b.identity_key()).unwrap().conversation_id, "c1");

    store.set(&b.identity_key(), ConversationState::default());
    assert_eq!(store.get(&a.identity_key()).unwrap().conversation_id, "c1");
    assert_eq!(store.len(), 1);
}

/// Test migration from record ids to identity keys
#[test]
fn test_migrate_withIdKeyedEntries_shouldMoveToIdentityKeys() {
    let a = credential("a", "s1");
    let b = credential("b", "s2");
    let store = ConversationContextStore::from_map(vec![
        ("a".to_string(), ConversationState::new("old-a", "r", "c")),
        (b.identity_key(), ConversationState::new("kept-b", "r", "c")),
        ("b".to_string(), ConversationState::new("old-b", "r", "c")),
    ]);

    assert!(store.migrate(&[a.clone(), b.clone()]));
    assert_eq!(store.get(&a.identity_key()).unwrap().conversation_id, "old-a");
    assert_eq!(store.get(&b.identity_key()).unwrap().conversation_id, "kept-b");
    assert!(store.get("a").is_none());
    assert!(store.get("b").is_none());

    assert!(!store.migrate(&[a, b]));
}

/// Test that migrating twice equals migrating once
#[test]
fn test_migrate_map_appliedTwice_shouldBeIdempotent() {
    let creds = vec![credential("a", "s1"), credential("b", "s1"), credential("c", "s3")];
    let mut contexts = HashMap::new();
    contexts.insert("a".to_string(), ConversationState::new("x", "r", "c"));
    contexts.insert("b".to_string(), ConversationState::new("y", "r", "c"));
    contexts.insert("unknown".to_string(), ConversationState::new("z", "r", "c"));

    let (once, changed) = ConversationContextStore::migrate_map(&contexts, &creds);
    assert!(changed);
    let (twice, changed_again) = ConversationContextStore::migrate_map(&once, &creds);

    assert!(!changed_again);
    assert_eq!(once, twice);
    assert_eq!(once.len(), 2);
    // "a" sorts first and wins the shared identity
    assert_eq!(once[&creds[0].identity_key()].conversation_id, "x");
    assert!(once.contains_key("unknown"));
}

/// Test loading an older document with a single legacy context
#[test]
fn test_project_state_withLegacyContext_shouldRestoreAndDropOnCapture() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("project.json");
    let cred = credential("a", "s1");

    let legacy = ProjectState {
        preferred_credential_id: Some("a".to_string()),
        token_context: Some(LegacyContext {
            credential_id: "a".to_string(),
            state: ConversationState::new("legacy", "r", "c"),
        }),
        ..ProjectState::default()
    };
    legacy.save(&path).unwrap();

    let mut loaded = ProjectState::load(&path).unwrap();
    let store = loaded.context_store();
    assert!(store.migrate(&[cred.clone()]));
    assert_eq!(store.get(&cred.identity_key()).unwrap().conversation_id, "legacy");

    loaded.capture(&TranslationResults::new(), &TranslationResults::new(), &store, Some("a".to_string()));
    loaded.save(&path).unwrap();

    let json = std::fs::read_to_string(&path).unwrap();
    assert!(!json.contains("tokenContext\""));
    assert!(json.contains("tokenContexts"));
}
