//! Service configuration.
//!
//! The environment (prefix `CA4M_`) supplies the service-level settings;
//! per-request knobs arrive as [`PreservationConfig`] and [`AtomConfig`]
//! values and are merged against defaults at request entry.

mod atom;
mod preservation;

pub use atom::AtomConfig;
pub use preservation::{default_processing_config, PreservationConfig};

use std::path::PathBuf;

use figment::providers::Env;
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix for every service setting.
pub const ENV_PREFIX: &str = "CA4M_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to load configuration: {0}")]
    Parse(String),
}

/// Service-level configuration loaded from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// gRPC address of the archival processing service.
    #[serde(default = "default_a3m_address")]
    pub a3m_address: String,
    /// Directory the service writes completed AIPs into.
    #[serde(default = "default_a3m_completed_dir")]
    pub a3m_completed_dir: PathBuf,
    /// Directory the service writes DIPs into.
    #[serde(default = "default_a3m_dips_dir")]
    pub a3m_dips_dir: PathBuf,
    /// HTTP address of the CMS.
    #[serde(default = "default_cells_address")]
    pub cells_address: String,
    /// CMS admin personal access token (required).
    #[serde(default)]
    pub cells_admin_token: String,
    /// Logical CMS directory the finished AIP is uploaded to.
    #[serde(default = "default_archive_workspace")]
    pub cells_archive_workspace: String,
    /// Path to the CMS transfer binary.
    #[serde(default = "default_cec_path")]
    pub cells_cec_path: PathBuf,
    /// Default for requests that do not specify cleanup behaviour.
    #[serde(default = "default_true")]
    pub cleanup: bool,
    /// Optional JSON file with ADS connection settings.
    #[serde(default)]
    pub atom_config_path: Option<PathBuf>,
    /// Organization recorded as a PREMIS agent; empty disables the agent.
    #[serde(default)]
    pub premis_organization: String,
    /// Accept self-signed CMS/ADS certificates.
    #[serde(default)]
    pub allow_insecure_tls: bool,
    /// One of debug, info, warn, error, fatal, panic.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Optional log file; stderr when unset.
    #[serde(default)]
    pub log_file_path: Option<PathBuf>,
    /// Base directory for per-request processing directories (required).
    #[serde(default)]
    pub processing_base_dir: PathBuf,
}

fn default_a3m_address() -> String {
    "localhost:7000".to_string()
}

fn default_a3m_completed_dir() -> PathBuf {
    PathBuf::from("/home/a3m/.local/share/a3m/share/completed")
}

fn default_a3m_dips_dir() -> PathBuf {
    PathBuf::from("/home/a3m/.local/share/a3m/share/dips")
}

fn default_cells_address() -> String {
    "https://localhost:8080".to_string()
}

fn default_archive_workspace() -> String {
    "common-files".to_string()
}

fn default_cec_path() -> PathBuf {
    PathBuf::from("/usr/local/bin/cec")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

const LOG_LEVELS: [&str; 6] = ["debug", "info", "warn", "error", "fatal", "panic"];

impl Config {
    /// Loads configuration from `CA4M_`-prefixed environment variables and
    /// validates it.
    pub fn load() -> Result<Self, ConfigError> {
        let config: Config = Figment::new()
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks required keys and directory-shaped settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cells_admin_token.is_empty() {
            return Err(ConfigError::MissingKey {
                key: format!("{ENV_PREFIX}CELLS_ADMIN_TOKEN"),
            });
        }
        if self.processing_base_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingKey {
                key: format!("{ENV_PREFIX}PROCESSING_BASE_DIR"),
            });
        }
        if !self.processing_base_dir.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "processing base directory {} does not exist",
                self.processing_base_dir.display()
            )));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "unknown log level {:?}",
                self.log_level
            )));
        }
        Ok(())
    }
}
