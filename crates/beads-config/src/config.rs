//! Configuration types and loading.
//!
//! The main entry point is [`BeadsConfig`], which represents the contents of
//! `.beads/config.yaml` layered with `BEADS_*` environment overrides.
//! Configuration is loaded with [`load_config`] and saved with [`save_config`].

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// The configuration file could not be serialized.
    #[error("failed to write config file: {0}")]
    WriteError(#[from] serde_yaml::Error),

    /// The layered configuration could not be extracted.
    #[error("invalid configuration: {0}")]
    Extract(#[from] Box<figment::Error>),

    /// The `.beads/` directory was not found.
    #[error("no .beads directory found (run 'bd init' first)")]
    BeadsDirNotFound,
}

/// A specialized `Result` type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Prefix of environment variables that override file values.
/// Nested keys use `__`, e.g. `BEADS_STORAGE__EPHEMERAL`.
pub const ENV_PREFIX: &str = "BEADS_";

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Database file locations, relative to the `.beads/` directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Audited store for mols and all digests.
    #[serde(default = "default_durable_db")]
    pub durable: String,

    /// Local store for wisps; never committed.
    #[serde(default = "default_ephemeral_db")]
    pub ephemeral: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            durable: default_durable_db(),
            ephemeral: default_ephemeral_db(),
        }
    }
}

fn default_durable_db() -> String {
    "beads.db".to_string()
}

fn default_ephemeral_db() -> String {
    "wisps.db".to_string()
}

/// Template catalog sources, lowest precedence first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Include the protos compiled into the binary.
    #[serde(default = "default_true")]
    pub builtin: bool,

    /// Shared team directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,

    /// User-private directory.
    #[serde(default = "default_user_dir")]
    pub user: String,

    /// JSONL file of externally distributed fragments (user scope).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragments: Option<String>,

    /// Project-local directory, relative to `.beads/`.
    #[serde(default = "default_project_dir")]
    pub project: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            builtin: true,
            team: None,
            user: default_user_dir(),
            fragments: None,
            project: default_project_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_user_dir() -> String {
    "~/.beads/formulas".to_string()
}

fn default_project_dir() -> String {
    "formulas".to_string()
}

/// Catalog locations with `~` expanded and relative paths anchored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPaths {
    pub builtin: bool,
    pub team: Option<PathBuf>,
    pub user: Option<PathBuf>,
    pub fragments: Option<PathBuf>,
    pub project: PathBuf,
}

// ---------------------------------------------------------------------------
// Main config struct
// ---------------------------------------------------------------------------

/// Top-level configuration from `.beads/config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BeadsConfig {
    /// Actor name recorded on instances, digests and audit events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,

    /// Emit JSON output by default.
    #[serde(default)]
    pub json: bool,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,
}

impl BeadsConfig {
    pub fn durable_path(&self, beads_dir: &Path) -> PathBuf {
        anchor(beads_dir, &self.storage.durable)
    }

    pub fn ephemeral_path(&self, beads_dir: &Path) -> PathBuf {
        anchor(beads_dir, &self.storage.ephemeral)
    }

    /// Resolves catalog locations. The user directory is dropped when it
    /// needs a home directory and none is known.
    pub fn catalog_paths(&self, beads_dir: &Path) -> CatalogPaths {
        let c = &self.catalog;
        CatalogPaths {
            builtin: c.builtin,
            team: c.team.as_deref().and_then(|p| resolve(beads_dir, p)),
            user: resolve(beads_dir, &c.user),
            fragments: c.fragments.as_deref().and_then(|p| resolve(beads_dir, p)),
            project: anchor(beads_dir, &c.project),
        }
    }
}

/// Joins a relative path onto `beads_dir`; absolute paths pass through.
fn anchor(beads_dir: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        beads_dir.join(p)
    }
}

fn resolve(beads_dir: &Path, path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().map(|h| h.join(rest)),
        None => Some(anchor(beads_dir, path)),
    }
}

/// Get the user's home directory.
pub fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Loads configuration for `beads_dir`: defaults, then `config.yaml`, then
/// `BEADS_*` environment variables.
///
/// A missing or empty file yields defaults (plus any environment overrides).
pub fn load_config(beads_dir: &Path) -> Result<BeadsConfig> {
    figment_for(beads_dir, Env::prefixed(ENV_PREFIX).split("__"))
}

/// Like [`load_config`], but ignores the process environment.
pub fn load_config_file(beads_dir: &Path) -> Result<BeadsConfig> {
    figment_for(beads_dir, Serialized::defaults(BeadsConfig::default()))
}

fn figment_for(beads_dir: &Path, overrides: impl figment::Provider) -> Result<BeadsConfig> {
    let config_path = beads_dir.join("config.yaml");

    let mut figment = Figment::from(Serialized::defaults(BeadsConfig::default()));
    // An empty file is valid and yields default config.
    if config_path.is_file() && !std::fs::read_to_string(&config_path)?.trim().is_empty() {
        figment = figment.merge(Yaml::file(&config_path));
    }
    figment
        .merge(overrides)
        .extract()
        .map_err(|e| ConfigError::Extract(Box::new(e)))
}

/// Writes `config` to `beads_dir/config.yaml`, creating the directory.
pub fn save_config(beads_dir: &Path, config: &BeadsConfig) -> Result<()> {
    std::fs::create_dir_all(beads_dir)?;

    let config_path = beads_dir.join("config.yaml");
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(config_path, yaml)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
