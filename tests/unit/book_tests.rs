/*!
 * Tests for chapter parsing and unit selection
 */

use bookwai::book::{UnitSelection, extract_translated_title, parse_file, parse_text};

use crate::common;

/// Test header-delimited parsing
#[test]
fn test_parse_text_withHeaders_shouldSplitInOrder() {
    let text = "Preface that is ignored\n=== First ===\nOne.\n\n===Second===\nTwo.\n";
    let units = parse_text(text);

    assert_eq!(units.len(), 2);
    assert_eq!(units[0].id, "1");
    assert_eq!(units[0].title, "First");
    assert_eq!(units[0].content, "One.");
    assert_eq!(units[1].id, "2");
    assert_eq!(units[1].title, "Second");
}

/// Test a text without any header
#[test]
fn test_parse_text_withoutHeaders_shouldYieldFullText() {
    let units = parse_text("Just prose.");
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].title, "Full text");
    assert_eq!(units[0].content, "Just prose.");
}

/// Test file parsing and extension check
#[test]
fn test_parse_file_withTxtAndOtherExtension_shouldAcceptOnlyTxt() {
    let dir = common::create_temp_dir().unwrap();
    let book = common::create_test_book(dir.path(), "book.txt", 3).unwrap();
    assert_eq!(parse_file(&book).unwrap().len(), 3);

    let epub = common::create_test_file(dir.path(), "book.epub", "=== A ===\nx").unwrap();
    assert!(parse_file(&epub).is_err());
}

/// Test translated title extraction
#[test]
fn test_extract_translated_title_withBlankLeadingLines_shouldUseFirstNonEmpty() {
    assert_eq!(extract_translated_title("\n\n  Chương 1  \nBody", "1"), "Chương 1");
    assert_eq!(extract_translated_title("   \n", "7"), "Chapter 7");
}

/// Test exclusion and skip-existing selection
#[test]
fn test_unit_selection_withExclusionsAndExisting_shouldFilter() {
    let units = common::units(4);

    let selection = UnitSelection::new(false).exclude("2");
    let ids: Vec<String> = selection
        .select(&units, |id| id == "3")
        .into_iter()
        .map(|u| u.id)
        .collect();
    assert_eq!(ids, vec!["1", "4"]);

    let retranslate = UnitSelection::new(true).exclude("2");
    assert_eq!(retranslate.select(&units, |_| true).len(), 3);

    assert!(UnitSelection::new(false).select(&units, |_| true).is_empty());
}
