//! Configuration resolution for kinlore-fn
//!
//! Non-secret settings come from the TOML file with compiled defaults.
//! API keys use multi-tier resolution with Database → ENV → TOML priority.

use kinlore_common::config::{LoggingConfig, TomlConfig};
use kinlore_common::retry::RetryPolicy;
use kinlore_common::Result;
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";
pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMAIL_BASE_URL: &str = "https://api.resend.com";
pub const DEFAULT_EMAIL_FROM: &str = "Kinlore <invitations@kinlore.app>";
pub const DEFAULT_APP_BASE_URL: &str = "http://localhost:5173";

/// Secrets that can be set through `/api/settings/:key`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiSecret {
    OpenAi,
    Email,
}

impl ApiSecret {
    pub const ALL: [ApiSecret; 2] = [ApiSecret::OpenAi, ApiSecret::Email];

    /// Key in the settings table and in the TOML file
    pub fn setting_key(&self) -> &'static str {
        match self {
            ApiSecret::OpenAi => "openai_api_key",
            ApiSecret::Email => "email_api_key",
        }
    }

    pub fn env_var(&self) -> &'static str {
        match self {
            ApiSecret::OpenAi => "KINLORE_OPENAI_API_KEY",
            ApiSecret::Email => "KINLORE_EMAIL_API_KEY",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ApiSecret::OpenAi => "OpenAI API key",
            ApiSecret::Email => "Email API key",
        }
    }

    pub fn from_setting_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.setting_key() == key)
    }

    fn toml_value<'a>(&self, config: &'a TomlConfig) -> Option<&'a String> {
        match self {
            ApiSecret::OpenAi => config.openai_api_key.as_ref(),
            ApiSecret::Email => config.email_api_key.as_ref(),
        }
    }

    fn set_toml_value(&self, config: &mut TomlConfig, value: String) {
        match self {
            ApiSecret::OpenAi => config.openai_api_key = Some(value),
            ApiSecret::Email => config.email_api_key = Some(value),
        }
    }
}

/// Effective gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bearer token guarding every non-public route (None disables auth)
    pub api_token: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub transcription_model: String,
    pub completion_model: String,
    pub email_api_key: Option<String>,
    pub email_base_url: String,
    pub email_from: String,
    pub app_base_url: String,
    /// Backoff for outbound calls
    pub retry: RetryPolicy,
    /// Allow the image proxy to reach loopback and private addresses
    pub allow_private_image_hosts: bool,
    /// TOML file that settings are written back to
    pub toml_path: Option<PathBuf>,
    pub logging: LoggingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            completion_model: DEFAULT_COMPLETION_MODEL.to_string(),
            email_api_key: None,
            email_base_url: DEFAULT_EMAIL_BASE_URL.to_string(),
            email_from: DEFAULT_EMAIL_FROM.to_string(),
            app_base_url: DEFAULT_APP_BASE_URL.to_string(),
            retry: RetryPolicy::default(),
            allow_private_image_hosts: false,
            toml_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Non-secret settings from TOML, defaults elsewhere
    ///
    /// `api_token` also honours `KINLORE_API_TOKEN`, which wins over TOML.
    pub fn from_toml(toml: &TomlConfig, toml_path: Option<PathBuf>) -> Self {
        let defaults = Self::default();
        let api_token = std::env::var("KINLORE_API_TOKEN")
            .ok()
            .filter(|t| is_valid_key(t))
            .or_else(|| toml.api_token.clone().filter(|t| is_valid_key(t)));

        Self {
            api_token,
            openai_base_url: trim_base(toml.openai_base_url.as_deref(), &defaults.openai_base_url),
            transcription_model: toml
                .transcription_model
                .clone()
                .unwrap_or(defaults.transcription_model),
            completion_model: toml.completion_model.clone().unwrap_or(defaults.completion_model),
            email_base_url: trim_base(toml.email_base_url.as_deref(), &defaults.email_base_url),
            email_from: toml.email_from.clone().unwrap_or(defaults.email_from),
            app_base_url: trim_base(toml.app_base_url.as_deref(), &defaults.app_base_url),
            toml_path,
            logging: toml.logging.clone(),
            ..defaults
        }
    }

    pub fn secret(&self, secret: ApiSecret) -> Option<&str> {
        match secret {
            ApiSecret::OpenAi => self.openai_api_key.as_deref(),
            ApiSecret::Email => self.email_api_key.as_deref(),
        }
    }

    pub fn set_secret(&mut self, secret: ApiSecret, value: Option<String>) {
        match secret {
            ApiSecret::OpenAi => self.openai_api_key = value,
            ApiSecret::Email => self.email_api_key = value,
        }
    }
}

fn trim_base(value: Option<&str>, default: &str) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve an API key from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML. Returns `Ok(None)` when no tier
/// holds a usable key; the functions needing it then answer 503.
pub async fn resolve_secret(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
    secret: ApiSecret,
) -> Result<Option<String>> {
    let db_key = kinlore_common::db::settings::get_setting::<String>(db, secret.setting_key())
        .await?
        .filter(|k| is_valid_key(k));
    let env_key = std::env::var(secret.env_var()).ok().filter(|k| is_valid_key(k));
    let toml_key = secret.toml_value(toml_config).filter(|k| is_valid_key(k)).cloned();

    let sources: Vec<&str> = [
        db_key.as_ref().map(|_| "database"),
        env_key.as_ref().map(|_| "environment"),
        toml_key.as_ref().map(|_| "TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if sources.len() > 1 {
        warn!(
            "{} found in multiple sources: {}. Using {} (highest priority).",
            secret.label(),
            sources.join(", "),
            sources[0]
        );
    }

    let resolved = db_key.or(env_key).or(toml_key);
    match sources.first() {
        Some(source) => info!("{} loaded from {}", secret.label(), source),
        None => warn!(
            "{} not configured (set {} or POST /api/settings/{})",
            secret.label(),
            secret.env_var(),
            secret.setting_key()
        ),
    }

    Ok(resolved)
}

/// Sync settings from database to TOML file
///
/// Keys not naming an [`ApiSecret`] are ignored. TOML write failures are
/// logged and swallowed; the database stays authoritative.
pub async fn sync_settings_to_toml(settings: HashMap<String, String>, toml_path: &Path) -> Result<()> {
    let mut config = kinlore_common::config::load_toml_config(toml_path)?.unwrap_or_default();

    for (key, value) in settings {
        match ApiSecret::from_setting_key(&key) {
            Some(secret) => secret.set_toml_value(&mut config, value),
            None => warn!("Ignoring unknown setting during TOML sync: {}", key),
        }
    }

    match kinlore_common::config::write_toml_config(&config, toml_path) {
        Ok(()) => {
            info!("Settings synced to TOML: {}", toml_path.display());
            Ok(())
        }
        Err(e) => {
            warn!("TOML write failed (database write succeeded): {}", e);
            Ok(())
        }
    }
}
