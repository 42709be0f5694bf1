//! Unit tests for configuration resolution
//!
//! Covers Database → ENV → TOML resolution of API keys, the
//! `KINLORE_API_TOKEN` override and TOML write-back.
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that touch KINLORE_* variables are marked with #[serial].

mod helpers;

use helpers::test_pool;
use kinlore_common::config::TomlConfig;
use kinlore_common::db::settings::set_setting;
use kinlore_fn::config::{resolve_secret, sync_settings_to_toml, ApiSecret, GatewayConfig};
use serial_test::serial;
use std::collections::HashMap;
use std::path::PathBuf;
use tempfile::TempDir;

const OPENAI_ENV: &str = "KINLORE_OPENAI_API_KEY";

fn toml_with_openai(key: Option<&str>) -> TomlConfig {
    TomlConfig {
        openai_api_key: key.map(str::to_string),
        ..TomlConfig::default()
    }
}

// ============================================================================
// Resolution
// ============================================================================

#[tokio::test]
#[serial]
async fn test_database_overrides_env_and_toml() {
    let pool = test_pool().await;
    set_setting(&pool, "openai_api_key", "db-key".to_string()).await.unwrap();
    std::env::set_var(OPENAI_ENV, "env-key");

    let result = resolve_secret(&pool, &toml_with_openai(Some("toml-key")), ApiSecret::OpenAi)
        .await
        .unwrap();
    assert_eq!(result.as_deref(), Some("db-key"));

    std::env::remove_var(OPENAI_ENV);
}

#[tokio::test]
#[serial]
async fn test_env_fallback_when_database_empty() {
    let pool = test_pool().await;
    std::env::set_var(OPENAI_ENV, "env-key");

    let result = resolve_secret(&pool, &toml_with_openai(Some("toml-key")), ApiSecret::OpenAi)
        .await
        .unwrap();
    assert_eq!(result.as_deref(), Some("env-key"));

    std::env::remove_var(OPENAI_ENV);
}

#[tokio::test]
#[serial]
async fn test_toml_fallback_when_db_and_env_empty() {
    std::env::remove_var(OPENAI_ENV);
    let pool = test_pool().await;

    let result = resolve_secret(&pool, &toml_with_openai(Some("toml-key")), ApiSecret::OpenAi)
        .await
        .unwrap();
    assert_eq!(result.as_deref(), Some("toml-key"));
}

#[tokio::test]
#[serial]
async fn test_missing_key_resolves_to_none() {
    std::env::remove_var(OPENAI_ENV);
    let pool = test_pool().await;

    let result = resolve_secret(&pool, &toml_with_openai(None), ApiSecret::OpenAi)
        .await
        .unwrap();
    assert_eq!(result, None);
}

#[tokio::test]
#[serial]
async fn test_whitespace_sources_are_skipped() {
    let pool = test_pool().await;
    set_setting(&pool, "openai_api_key", "   ".to_string()).await.unwrap();
    std::env::set_var(OPENAI_ENV, "");

    let result = resolve_secret(&pool, &toml_with_openai(Some("toml-key")), ApiSecret::OpenAi)
        .await
        .unwrap();
    assert_eq!(result.as_deref(), Some("toml-key"));

    std::env::remove_var(OPENAI_ENV);
}

#[tokio::test]
#[serial]
async fn test_secrets_resolve_independently() {
    std::env::remove_var(OPENAI_ENV);
    let pool = test_pool().await;
    set_setting(&pool, "email_api_key", "re-db".to_string()).await.unwrap();

    let toml = toml_with_openai(Some("sk-toml"));
    assert_eq!(
        resolve_secret(&pool, &toml, ApiSecret::OpenAi).await.unwrap().as_deref(),
        Some("sk-toml")
    );
    assert_eq!(
        resolve_secret(&pool, &toml, ApiSecret::Email).await.unwrap().as_deref(),
        Some("re-db")
    );
}

// ============================================================================
// Gateway configuration
// ============================================================================

#[test]
#[serial]
fn test_api_token_env_overrides_toml() {
    let toml = TomlConfig {
        api_token: Some("toml-token".to_string()),
        ..TomlConfig::default()
    };

    std::env::set_var("KINLORE_API_TOKEN", "env-token");
    let config = GatewayConfig::from_toml(&toml, None);
    assert_eq!(config.api_token.as_deref(), Some("env-token"));

    std::env::remove_var("KINLORE_API_TOKEN");
    let config = GatewayConfig::from_toml(&toml, None);
    assert_eq!(config.api_token.as_deref(), Some("toml-token"));
}

#[test]
#[serial]
fn test_blank_api_token_disables_auth() {
    std::env::remove_var("KINLORE_API_TOKEN");
    let toml = TomlConfig {
        api_token: Some("  ".to_string()),
        ..TomlConfig::default()
    };
    assert_eq!(GatewayConfig::from_toml(&toml, None).api_token, None);
}

#[test]
#[serial]
fn test_from_toml_keeps_models_and_path() {
    std::env::remove_var("KINLORE_API_TOKEN");
    let toml = TomlConfig {
        transcription_model: Some("whisper-large".to_string()),
        completion_model: Some("gpt-4o".to_string()),
        email_from: Some("Family <hi@example.com>".to_string()),
        ..TomlConfig::default()
    };
    let path = PathBuf::from("/etc/kinlore/kinlore.toml");

    let config = GatewayConfig::from_toml(&toml, Some(path.clone()));
    assert_eq!(config.transcription_model, "whisper-large");
    assert_eq!(config.completion_model, "gpt-4o");
    assert_eq!(config.email_from, "Family <hi@example.com>");
    assert_eq!(config.toml_path, Some(path));
    // Secrets are resolved separately
    assert_eq!(config.openai_api_key, None);
}

// ============================================================================
// Write-back
// ============================================================================

#[tokio::test]
async fn test_sync_settings_to_toml_creates_file() {
    let temp_dir = TempDir::new().unwrap();
    let toml_path = temp_dir.path().join("kinlore.toml");

    let mut settings = HashMap::new();
    settings.insert("openai_api_key".to_string(), "test-key-123".to_string());

    sync_settings_to_toml(settings, &toml_path).await.unwrap();

    let content = std::fs::read_to_string(&toml_path).unwrap();
    let parsed: TomlConfig = toml::from_str(&content).unwrap();
    assert_eq!(parsed.openai_api_key.as_deref(), Some("test-key-123"));
}

#[tokio::test]
async fn test_sync_settings_preserves_existing_fields() {
    let temp_dir = TempDir::new().unwrap();
    let toml_path = temp_dir.path().join("kinlore.toml");

    let initial = TomlConfig {
        root_folder: Some(PathBuf::from("/srv/kinlore")),
        port: Some(6000),
        email_api_key: Some("re-old".to_string()),
        ..TomlConfig::default()
    };
    kinlore_common::config::write_toml_config(&initial, &toml_path).unwrap();

    let mut settings = HashMap::new();
    settings.insert("openai_api_key".to_string(), "sk-new".to_string());
    settings.insert("unknown_key".to_string(), "ignored".to_string());
    sync_settings_to_toml(settings, &toml_path).await.unwrap();

    let content = std::fs::read_to_string(&toml_path).unwrap();
    let parsed: TomlConfig = toml::from_str(&content).unwrap();
    assert_eq!(parsed.root_folder, Some(PathBuf::from("/srv/kinlore")));
    assert_eq!(parsed.port, Some(6000));
    assert_eq!(parsed.email_api_key.as_deref(), Some("re-old"));
    assert_eq!(parsed.openai_api_key.as_deref(), Some("sk-new"));
    assert!(!content.contains("ignored"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_toml_write_failure_graceful_degradation() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let locked = temp_dir.path().join("locked");
    std::fs::create_dir(&locked).unwrap();
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

    let mut settings = HashMap::new();
    settings.insert("email_api_key".to_string(), "key".to_string());

    // Write fails, but the database stays authoritative so this is not an error
    let result = sync_settings_to_toml(settings, &locked.join("kinlore.toml")).await;
    assert!(result.is_ok());

    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
}
