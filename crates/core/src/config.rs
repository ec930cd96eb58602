//! TOML-based configuration for MergePort.
//!
//! Sensitive values (passwords, tokens) are stored as `_env` fields that
//! reference environment variable names; the actual secrets are resolved at
//! runtime via [`AppConfig::resolve_env_vars`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::version::Version;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote descriptor queue settings.
    pub queue: QueueConfig,

    /// SVN backend settings.
    pub svn: SvnConfig,

    /// Git backend settings.
    #[serde(default)]
    pub git: GitConfig,

    /// Rename/link lookup store settings.
    #[serde(default)]
    pub lookup: LookupConfig,

    /// General settings (data dir, log level).
    #[serde(default)]
    pub general: GeneralConfig,

    /// Branch name to version mapping, used to derive the rename-resolution
    /// interval for a descriptor. Branches not listed here skip resolution.
    #[serde(default)]
    pub branches: HashMap<String, Version>,
}

/// Remote queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Base directory (or mount point) holding the Todo/Done/Ignored/
    /// Cancelled/Manual folders.
    pub root: PathBuf,
}

/// SVN backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvnConfig {
    /// SVN username for authentication.
    pub username: String,

    /// Environment variable holding the SVN password.
    pub password_env: String,

    /// Name of a background process known to hold locks on working copies;
    /// the working-copy builder terminates it before retrying a stubborn
    /// delete. Empty disables the kill step.
    #[serde(default)]
    pub interfering_process: String,

    /// Resolved password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub password: Option<String>,
}

/// Git backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Directory where local clones live.
    #[serde(default = "default_clones_dir")]
    pub clones_dir: PathBuf,

    /// Remote name to pull from and push to.
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Environment variable holding an access token, if the remote needs one.
    #[serde(default)]
    pub token_env: String,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

/// Lookup store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LookupConfig {
    /// Path to the SQLite database holding RENAME_MAPPING / LINK_MAPPING.
    /// Empty means no store; resolution degrades to identity.
    #[serde(default)]
    pub db_path: String,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory for working copies and scratch descriptor files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_clones_dir() -> PathBuf {
    PathBuf::from("clones")
}
fn default_remote() -> String {
    "origin".into()
}
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mergeport")
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            clones_dir: default_clones_dir(),
            remote: default_remote(),
            token_env: String::new(),
            token: None,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading / validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve `_env` fields into their secret values.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        self.svn.password = Some(std::env::var(&self.svn.password_env).map_err(|_| {
            ConfigError::EnvVarMissing {
                var: self.svn.password_env.clone(),
                field: "svn.password_env".into(),
            }
        })?);
        if !self.git.token_env.is_empty() {
            self.git.token = Some(std::env::var(&self.git.token_env).map_err(|_| {
                ConfigError::EnvVarMissing {
                    var: self.git.token_env.clone(),
                    field: "git.token_env".into(),
                }
            })?);
        }
        debug!("resolved environment variables");
        Ok(())
    }

    /// Validate field values that serde cannot check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.svn.username.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "svn.username".into(),
                detail: "must not be empty".into(),
            });
        }
        if self.queue.root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "queue.root".into(),
                detail: "must not be empty".into(),
            });
        }
        match self.general.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "general.log_level".into(),
                    detail: format!("unknown log level '{}'", other),
                });
            }
        }
        Ok(())
    }

    /// Version assigned to a branch, if the branch table knows it.
    ///
    /// Branch names are matched on the full name first, then on the last
    /// path segment, so both `branches/18.5` and a bare `18.5` entry work.
    pub fn branch_version(&self, branch: &str) -> Option<Version> {
        if let Some(v) = self.branches.get(branch) {
            return Some(v.clone());
        }
        let last = branch.rsplit('/').next().unwrap_or(branch);
        self.branches.get(last).cloned()
    }

    /// Render a default config file for `mergeport init`.
    pub fn default_toml() -> &'static str {
        r#"# MergePort configuration

[queue]
# Base directory holding the Todo/Done/Ignored/Cancelled/Manual folders.
root = "/srv/mergeport/queue"

[svn]
username = "mergeport"
password_env = "MERGEPORT_SVN_PASSWORD"
# Process to terminate before retrying a stubborn working-copy delete.
interfering_process = ""

[git]
clones_dir = "/srv/mergeport/clones"
remote = "origin"
token_env = ""

[lookup]
db_path = "/srv/mergeport/lookup.db"

[general]
data_dir = "/srv/mergeport/data"
log_level = "info"

[branches]
# trunk = "19.0"
# "branches/18.5" = "18.5"
"#
    }
}
