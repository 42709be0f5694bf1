//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`KINLORE_ROOT_FOLDER`, then `KINLORE_ROOT`)
//! 3. TOML config file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file is never fatal: a warning is logged
//! and compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the SQLite database file inside the root folder
pub const DATABASE_FILE_NAME: &str = "kinlore.db";

/// Default HTTP port for the function gateway
pub const DEFAULT_PORT: u16 = 5740;

/// Default bind address
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Logging section of the TOML config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter level ("error", "warn", "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file path (stdout when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_file: None,
        }
    }
}

/// Contents of `kinlore.toml`
///
/// Every field is optional so that older or partial files keep loading.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_folder: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bearer token required by the gateway (auth disabled when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Key for the speech-to-text and text-completion provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription_model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_model: Option<String>,

    /// Key for the transactional email provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_base_url: Option<String>,

    /// Sender address for invitation emails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_from: Option<String>,

    /// Public web app URL used to build invitation links
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_base_url: Option<String>,

    /// Kept last: TOML tables must follow plain values
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// OS-dependent compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub bind_address: String,
    pub port: u16,
}

impl CompiledDefaults {
    /// Defaults for the platform this binary was compiled for
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: default_log_level(),
            log_file: None,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/kinlore (or /var/lib/kinlore for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("kinlore"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/kinlore"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/kinlore
        dirs::data_dir()
            .map(|d| d.join("kinlore"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/kinlore"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\kinlore
        dirs::data_local_dir()
            .map(|d| d.join("kinlore"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\kinlore"))
    } else {
        PathBuf::from("./kinlore_data")
    }
}

/// Resolves the root folder for a module using the 4-tier priority order
pub struct RootFolderResolver {
    module_name: String,
    cli_override: Option<PathBuf>,
    config_override: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_override: None,
            config_override: None,
        }
    }

    /// Set the command-line value (highest priority)
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_override = path;
        self
    }

    /// Use an explicit TOML file instead of the per-module default
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_override = path;
        self
    }

    /// Path of this module's TOML file, e.g. `~/.config/kinlore/gateway.toml`
    pub fn config_file_path(&self) -> PathBuf {
        if let Some(path) = &self.config_override {
            return path.clone();
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kinlore")
            .join(format!("{}.toml", self.module_name))
    }

    /// Resolve the root folder. Never fails.
    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_override {
            debug!("Root folder from command line: {}", path.display());
            return path.clone();
        }

        // Priority 2: Environment variables
        for var in ["KINLORE_ROOT_FOLDER", "KINLORE_ROOT"] {
            if let Ok(path) = std::env::var(var) {
                if !path.trim().is_empty() {
                    debug!("Root folder from {}: {}", var, path);
                    return PathBuf::from(path);
                }
            }
        }

        // Priority 3: TOML config file
        let config_path = self.config_file_path();
        match load_toml_config(&config_path) {
            Ok(Some(config)) => {
                if let Some(root) = config.root_folder {
                    debug!("Root folder from {}: {}", config_path.display(), root.display());
                    return root;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring unreadable config file: {}", e),
        }

        // Priority 4: OS-dependent compiled default
        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder and knows where the database lives inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Create the root folder (and parents) if missing. Idempotent.
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            tracing::info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }
}

/// Load a TOML config file
///
/// Returns `Ok(None)` when the file does not exist.
pub fn load_toml_config(path: &Path) -> Result<Option<TomlConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    #[cfg(unix)]
    {
        if check_toml_permissions_loose(path).unwrap_or(false) {
            warn!(
                "Config file {} is readable by other users; it may contain API keys (chmod 600 recommended)",
                path.display()
            );
        }
    }

    Ok(Some(config))
}

/// Load a TOML config file, falling back to defaults on any problem
pub fn load_toml_config_or_default(path: &Path) -> TomlConfig {
    match load_toml_config(path) {
        Ok(Some(config)) => config,
        Ok(None) => {
            warn!("Config file not found: {} (using defaults)", path.display());
            TomlConfig::default()
        }
        Err(e) => {
            warn!("{} (using defaults)", e);
            TomlConfig::default()
        }
    }
}

/// Write TOML config atomically (temp file + rename), mode 0600 on Unix
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    std::fs::write(&tmp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(Error::Io(e));
    }

    Ok(())
}

/// True if group/other have any access bits set
#[cfg(unix)]
pub fn check_toml_permissions_loose(path: &Path) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(path)?.permissions().mode();
    Ok(mode & 0o077 != 0)
}

/// User-Agent for outbound HTTP clients
pub fn get_user_agent() -> String {
    format!(
        "Kinlore/{} (+https://github.com/kinlore/kinlore)",
        env!("CARGO_PKG_VERSION")
    )
}
