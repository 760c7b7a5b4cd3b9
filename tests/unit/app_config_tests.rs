/*!
 * Tests for application configuration functionality
 */

use bookwai::app_config::{Config, LogLevel, TranslateMode};

/// Test default configuration values
#[test]
fn test_default_config_withNoParameters_shouldHaveCorrectDefaults() {
    let config = Config::default();

    assert_eq!(config.source_language, "zh");
    assert_eq!(config.target_language, "vi");
    assert_eq!(config.mode, TranslateMode::Api);
    assert_eq!(config.batch.api_workers, 5);
    assert_eq!(config.batch.max_retries, 3);
    assert_eq!(config.batch.retry_backoff_ms, 2000);
    assert_eq!(config.batch.stagger_min_ms, 5000);
    assert_eq!(config.batch.stagger_max_ms, 20000);
    assert!(!config.batch.use_proxy);
    assert_eq!(config.backend.timeout_secs, 300);
    assert_eq!(config.log_level, LogLevel::Info);
}

/// Test that a partial JSON document is completed with defaults
#[test]
fn test_config_deserialize_withPartialJson_shouldFillDefaults() {
    let json = r#"{
        "source_language": "en",
        "target_language": "fr",
        "mode": "both",
        "batch": { "api_workers": 2, "use_proxy": true }
    }"#;
    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.mode, TranslateMode::Both);
    assert_eq!(config.batch.api_workers, 2);
    assert!(config.batch.use_proxy);
    assert_eq!(config.batch.max_retries, 3);
    assert_eq!(config.model, "gemini-2.5-pro");
    assert!(config.validate().is_ok());
}

/// Test configuration validation
#[test]
fn test_config_validation_withVariousConfigs_shouldValidateCorrectly() {
    let mut config = Config::default();
    assert!(config.validate().is_ok());

    config.source_language = "xyz".to_string();
    assert!(config.validate().is_err());
    config.source_language = "en".to_string();

    config.batch.api_workers = 0;
    assert!(config.validate().is_err());
    config.mode = TranslateMode::Token;
    assert!(config.validate().is_ok());

    config.batch.stagger_min_ms = 30_000;
    assert!(config.validate().is_err());
    config.batch.stagger_min_ms = 5_000;

    config.batch.completion_marker = "(unclosed".to_string();
    assert!(config.validate().is_err());
}

/// Test translate mode parsing and channel usage
#[test]
fn test_translate_mode_fromStr_shouldParseAndReportChannels() {
    let both: TranslateMode = "BOTH".parse().unwrap();
    assert!(both.uses_api() && both.uses_token());

    let token: TranslateMode = "token".parse().unwrap();
    assert!(!token.uses_api() && token.uses_token());

    assert!("session".parse::<TranslateMode>().is_err());
    assert_eq!(TranslateMode::Api.to_string(), "api");
}
