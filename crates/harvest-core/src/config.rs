//! Harvest configuration.
//!
//! Settings come from an optional TOML file (`harvest.toml`) and are then
//! overridden by environment variables. Only the workspace token is
//! required; everything else has a default or disables a feature when
//! absent.
//!
//! ```toml
//! [workspace]
//! token = "xoxp-..."
//! channel_denylist = ["security", "admin"]
//!
//! [analysis]
//! scheme = "monthly"
//! first_run_epoch = "2025-09-01"
//!
//! [generator]
//! api_key = "sk-..."
//! model = "gpt-4o"
//!
//! [storage]
//! database_url = "sqlite:harvest.db"
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, NaiveDate};
use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::period::{midnight, CalendarScheme};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("workspace API token is not configured (set SLACK_USER_TOKEN or [workspace].token)")]
    MissingWorkspaceToken,

    #[error("unknown calendar scheme '{0}' (expected 'weekly' or 'monthly')")]
    UnknownScheme(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub workspace: WorkspaceConfig,
    pub analysis: AnalysisConfig,
    pub generator: GeneratorConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub token: Option<String>,
    pub api_base_url: String,
    /// Page size for list endpoints (the API caps this at 200).
    pub page_size: u32,
    pub request_timeout_secs: u64,
    /// Total attempts per page fetch, including the first.
    pub max_attempts: u32,
    /// Case-insensitive substrings that exclude public/private channels.
    pub channel_denylist: Vec<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base_url: "https://slack.com/api/".to_string(),
            page_size: 200,
            request_timeout_secs: 30,
            max_attempts: 3,
            channel_denylist: ["security", "보안", "admin", "관리자"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub scheme: CalendarScheme,
    /// Start of the very first collection window.
    pub first_run_epoch: NaiveDate,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            scheme: CalendarScheme::Monthly,
            first_run_epoch: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap_or_default(),
        }
    }
}

impl AnalysisConfig {
    pub fn epoch(&self) -> DateTime<FixedOffset> {
        midnight(self.first_run_epoch)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1/".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.4,
            max_tokens: 1200,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `sqlite:` URL or file path. Absent means no persistence.
    pub database_url: Option<String>,
}

impl HarvestConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the file (if any) and apply process environment overrides.
    pub fn from_env(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("HARVEST_CONFIG").map(PathBuf::from))
            .or_else(default_config_path);

        let mut config = match path {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("SLACK_USER_TOKEN") {
            self.workspace.token = Some(token);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.generator.api_key = Some(key);
        }
        if let Some(url) = get("HARVEST_DATABASE_URL") {
            self.storage.database_url = Some(url);
        }
        if let Some(scheme) = get("HARVEST_SCHEME") {
            self.analysis.scheme = scheme.parse()?;
        }
        if let Some(attempts) = get("HARVEST_MAX_ATTEMPTS") {
            self.workspace.max_attempts =
                attempts.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "HARVEST_MAX_ATTEMPTS",
                    value: attempts.clone(),
                })?;
        }
        if let Some(model) = get("HARVEST_GENERATOR_MODEL") {
            self.generator.model = model;
        }
        if let Some(url) = get("HARVEST_GENERATOR_URL") {
            self.generator.base_url = url;
        }
        Ok(())
    }

    /// The workspace token; its absence is fatal.
    pub fn workspace_token(&self) -> Result<&str, ConfigError> {
        self.workspace
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingWorkspaceToken)
    }

    pub fn generator_key(&self) -> Option<&str> {
        self.generator
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "harvest")
}

/// `<config dir>/harvest.toml`, if the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("harvest.toml"))
}

/// `<data dir>/harvest.db`, used by the CLI when no database is configured.
pub fn default_database_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("harvest.db"))
}
