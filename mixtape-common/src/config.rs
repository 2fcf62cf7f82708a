//! Configuration loading and pipeline resolution
//!
//! Config file resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. `MIXTAPE_CONFIG` environment variable
//! 3. `<user config dir>/mixtape/config.toml`
//! 4. Compiled defaults (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "MIXTAPE_CONFIG";

/// Default log level when neither config nor command line sets one
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Where a config file path came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine,
    Environment,
    DefaultLocation,
}

/// Contents of `config.toml`
///
/// Every field is optional in the file; missing fields take the compiled
/// defaults.
///
/// ```toml
/// log_level = "debug"
/// default_pipeline = "test"
///
/// [pipelines]
/// test = "videotestsrc num-buffers=100 ! fakesink"
///
/// [plugins]
/// status = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub log_level: String,
    pub default_pipeline: Option<String>,
    /// Named pipeline descriptions
    pub pipelines: BTreeMap<String, String>,
    /// Plugin name → enabled; plugins not listed are enabled
    pub plugins: BTreeMap<String, bool>,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            default_pipeline: None,
            pipelines: BTreeMap::new(),
            plugins: BTreeMap::new(),
        }
    }
}

impl TomlConfig {
    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Whether a plugin is enabled (plugins are enabled unless listed as false)
    pub fn plugin_enabled(&self, name: &str) -> bool {
        self.plugins.get(name).copied().unwrap_or(true)
    }
}

/// Default config file path for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mixtape").join("config.toml"))
}

/// Resolve which config file to read, if any
///
/// Explicit paths (command line, environment) are returned whether or not
/// they exist so that the caller can report them; the default location is
/// only returned when the file exists.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<(PathBuf, ConfigSource)> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some((path.to_path_buf(), ConfigSource::CommandLine));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some((PathBuf::from(path), ConfigSource::Environment));
        }
    }

    // Priority 3: Default location
    default_config_path()
        .filter(|path| path.exists())
        .map(|path| (path, ConfigSource::DefaultLocation))
}

/// Load configuration following the resolution priority order
///
/// A missing explicit config file is an error; no file at all yields the
/// compiled defaults.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some((path, source)) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {} (from {:?})",
                    path.display(),
                    source
                )));
            }
            info!("Loading config from {} ({:?})", path.display(), source);
            TomlConfig::from_file(&path)
        }
        None => {
            debug!("No config file found, using compiled defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Pick the pipeline description to run
///
/// Priority: explicit description, then a named pipeline from the config,
/// then the config's `default_pipeline`.
pub fn resolve_pipeline(
    description: Option<&str>,
    name: Option<&str>,
    config: &TomlConfig,
) -> Result<String> {
    if let Some(description) = description.map(str::trim).filter(|d| !d.is_empty()) {
        return Ok(description.to_string());
    }

    let name = name
        .or(config.default_pipeline.as_deref())
        .ok_or_else(|| Error::InvalidInput("No pipeline description or name given".to_string()))?;

    config
        .pipelines
        .get(name)
        .cloned()
        .ok_or_else(|| Error::Config(format!("Unknown pipeline name: {}", name)))
}
