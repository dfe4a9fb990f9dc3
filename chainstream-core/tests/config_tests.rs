//! Integration tests for configuration loading and validation

mod common;

use chainstream_core::config::{
    load_from_json, load_from_yaml, ConfigError, SettingsResolver, StaticSettings,
    StoreFailurePolicy, ValidationErrorKind,
};
use anyhow::Context;
use chainstream_core::jobs::{ChainEngine, MemoryJobStore};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Helper to create a test config file
fn create_test_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_valid_yaml_config() -> anyhow::Result<()> {
    std::env::set_var("CHAINSTREAM_TEST_YAML_KEY", "sk-from-env");
    let dir = TempDir::new()?;
    let path = create_test_file(
        &dir,
        "engine.yaml",
        r#"
version: "0.1"
providers:
  - name: openai
    api_key: ${CHAINSTREAM_TEST_YAML_KEY}
    base_url: https://proxy.internal.example/v1
  - name: anthropic
    api_key: sk-ant-inline
    region: us-east-1
circuit_breaker:
  failure_threshold: 3
  recovery_timeout_ms: 15000
jobs:
  store_failure_policy: propagate
"#,
    );

    let config = load_from_yaml(&path)?;
    assert_eq!(config.providers.len(), 2);
    assert_eq!(config.circuit_breaker.failure_threshold, 3);
    assert_eq!(config.timeouts.heavy_reasoning_ms, 300_000);
    assert_eq!(config.jobs.store_failure_policy, StoreFailurePolicy::Propagate);

    let settings = StaticSettings::from_config(&config);
    let openai = settings.resolve("openai").context("openai settings")?;
    let key = openai.api_key.context("openai api key")?;
    assert_eq!(key.expose_secret(), "sk-from-env");
    assert_eq!(openai.base_url.as_deref(), Some("https://proxy.internal.example/v1"));
    let anthropic = settings.resolve("anthropic").context("anthropic settings")?;
    assert_eq!(anthropic.region.as_deref(), Some("us-east-1"));

    ChainEngine::from_config(&config, Arc::new(MemoryJobStore::new()))?;
    Ok(())
}

#[test]
fn test_secrets_are_redacted_in_debug_output() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = create_test_file(
        &dir,
        "engine.json",
        r#"{"version": "0.1", "providers": [{"name": "google", "api_key": "g-very-secret"}]}"#,
    );

    let config = load_from_json(&path)?;
    let rendered = format!("{:?}", config);
    assert!(!rendered.contains("g-very-secret"));
    Ok(())
}

#[test]
fn test_missing_env_var_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = create_test_file(
        &dir,
        "engine.yaml",
        "version: \"0.1\"\nproviders:\n  - name: openai\n    api_key: ${CHAINSTREAM_TEST_NEVER_SET}\n",
    );

    match load_from_yaml(&path) {
        Err(ConfigError::MissingEnvVar { var }) => assert_eq!(var, "CHAINSTREAM_TEST_NEVER_SET"),
        other => panic!("expected MissingEnvVar, got {other:?}"),
    }
}

#[test]
fn test_unknown_fields_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "engine.yaml", "version: \"0.1\"\nretries: 3\n");

    assert!(matches!(load_from_yaml(&path), Err(ConfigError::Parse { .. })));
}

#[test]
fn test_validation_errors_carry_field_paths() {
    let dir = TempDir::new().unwrap();
    let path = create_test_file(
        &dir,
        "engine.yaml",
        r#"
version: "0.1"
providers:
  - name: openai
    api_key: sk-one
  - name: OpenAI
    api_key: sk-two
"#,
    );

    match load_from_yaml(&path) {
        Err(ConfigError::Invalid(err)) => {
            assert!(matches!(err.kind, ValidationErrorKind::DuplicateProvider { .. }));
            assert!(err.field_path.starts_with("providers[1]"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    let path = create_test_file(
        &dir,
        "timeouts.yaml",
        "version: \"0.1\"\ncircuit_breaker:\n  failure_threshold: 0\n",
    );
    assert!(matches!(
        load_from_yaml(&path),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_missing_file() {
    let err = load_from_yaml("/definitely/not/here/engine.yaml").unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}
