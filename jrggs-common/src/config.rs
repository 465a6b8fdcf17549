//! Bootstrap configuration loading
//!
//! Resolution priority for every setting:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`JRGGS_*`)
//! 3. TOML config file
//! 4. Built-in default (fallback)
//!
//! A missing config file is not fatal: the service starts with defaults and
//! logs a warning. Secrets for an enabled source are validated separately by
//! [`AppConfig::validate`].

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const ENV_CONFIG_PATH: &str = "JRGGS_CONFIG";
/// Environment variable overriding the database path
pub const ENV_DATABASE_PATH: &str = "JRGGS_DATABASE_PATH";
/// Environment variable overriding the log level
pub const ENV_LOG_LEVEL: &str = "JRGGS_LOG_LEVEL";
/// Environment variable overriding the Jira API token
pub const ENV_JIRA_TOKEN: &str = "JRGGS_JIRA_TOKEN";
/// Environment variable overriding the Bitbucket API token
pub const ENV_BITBUCKET_API_TOKEN: &str = "JRGGS_BITBUCKET_API_TOKEN";

/// Default Bitbucket REST endpoint
pub const DEFAULT_BITBUCKET_API_BASE: &str = "https://api.bitbucket.org/2.0";
/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Config file name looked up in the platform config directories
pub const CONFIG_FILE_NAME: &str = "jrggs.toml";

/// Bootstrap configuration loaded from TOML
///
/// These settings cannot change while the service runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Jira issue source (disabled when absent)
    #[serde(default)]
    pub jira: Option<JiraConfig>,

    /// Bitbucket pull-request source (disabled when absent)
    #[serde(default)]
    pub bitbucket: Option<BitbucketConfig>,

    /// Engine tuning table, decoded by the engine crate
    #[serde(default)]
    pub engine: toml::Table,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Jira connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraConfig {
    /// Base URL, e.g. `https://example.atlassian.net`
    pub host: String,
    /// Value sent verbatim in the `Authorization` header
    #[serde(default)]
    pub token: String,
    /// Project whose issues are ingested
    pub project_key: String,
}

/// Bitbucket connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitbucketConfig {
    #[serde(default = "default_bitbucket_api_base")]
    pub api_base: String,
    pub username: String,
    #[serde(default)]
    pub api_token: String,
    pub workspace: String,
    pub repo_slug: String,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("jrggs").join("jrggs.db"))
        .unwrap_or_else(|| PathBuf::from("./jrggs_data/jrggs.db"))
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_bitbucket_api_base() -> String {
    DEFAULT_BITBUCKET_API_BASE.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            logging: LoggingConfig::default(),
            jira: None,
            bitbucket: None,
            engine: toml::Table::new(),
        }
    }
}

impl AppConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Resolve the full bootstrap configuration
    ///
    /// `cli_config` and `cli_database` come from command-line flags and win
    /// over everything else.
    pub fn resolve(cli_config: Option<&Path>, cli_database: Option<&Path>) -> Result<Self> {
        let mut config = match locate_config_file(cli_config) {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::load_file(&path)?
            }
            None => {
                warn!("No {} found, using built-in defaults", CONFIG_FILE_NAME);
                Self::default()
            }
        };

        config.apply_env_overrides();

        if let Some(db) = cli_database {
            config.database_path = db.to_path_buf();
        }

        Ok(config)
    }

    /// Apply `JRGGS_*` environment overrides on top of file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(ENV_DATABASE_PATH) {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let (Some(jira), Ok(token)) = (self.jira.as_mut(), std::env::var(ENV_JIRA_TOKEN)) {
            jira.token = token;
        }
        if let (Some(bb), Ok(token)) = (
            self.bitbucket.as_mut(),
            std::env::var(ENV_BITBUCKET_API_TOKEN),
        ) {
            bb.api_token = token;
        }
    }

    /// Check that every enabled source has its credentials
    pub fn validate(&self) -> Result<()> {
        if let Some(jira) = &self.jira {
            if jira.host.trim().is_empty() || jira.token.trim().is_empty() {
                return Err(Error::Config(format!(
                    "Jira source enabled but host/token missing (set [jira] or {})",
                    ENV_JIRA_TOKEN
                )));
            }
            if jira.project_key.trim().is_empty() {
                return Err(Error::Config("Jira project_key is empty".to_string()));
            }
        }
        if let Some(bb) = &self.bitbucket {
            if bb.username.trim().is_empty() || bb.api_token.trim().is_empty() {
                return Err(Error::Config(format!(
                    "Bitbucket source enabled but username/api_token missing (set [bitbucket] or {})",
                    ENV_BITBUCKET_API_TOKEN
                )));
            }
        }
        Ok(())
    }

    /// Decode the `[engine]` table into a module-specific settings type
    ///
    /// Missing keys fall back to the type's serde defaults.
    pub fn engine_section<T: DeserializeOwned>(&self) -> Result<T> {
        toml::Value::Table(self.engine.clone())
            .try_into()
            .map_err(|e| Error::Config(format!("Invalid [engine] section: {}", e)))
    }
}

/// Find the config file: CLI flag, then `JRGGS_CONFIG`, then platform dirs
fn locate_config_file(cli_config: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_config {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        return Some(PathBuf::from(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join("jrggs").join(CONFIG_FILE_NAME));
    let system_config = PathBuf::from("/etc/jrggs").join(CONFIG_FILE_NAME);

    user_config
        .into_iter()
        .chain(std::iter::once(system_config))
        .find(|p| p.exists())
}
