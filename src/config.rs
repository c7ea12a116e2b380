//! `config.toml` - operator settings for the CLI
//!
//! Every field is optional; a missing file means defaults.

use anyhow::{Context, Result};
use declarative::ResourceKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

/// Default declaration file name inside the config directory
pub const DECLARATION_FILE: &str = "configuration.conf";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Declaration file; `~` and variables are expanded
    pub declaration: Option<String>,
    /// Deadline for probing the system
    pub probe_timeout_secs: u64,
    /// Kinds whose undeclared resources are removed
    pub exclusive: Vec<String>,
    /// Root the file backend writes under
    pub root: String,
    /// Where the inventory and run journal live
    pub state_dir: Option<String>,
    /// Shell out to a real package manager instead of the inventory
    pub packages: Option<PackageCommands>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            declaration: None,
            probe_timeout_secs: 30,
            exclusive: Vec::new(),
            root: "/".to_string(),
            state_dir: None,
            packages: None,
        }
    }
}

/// Command templates; `{name}` and `{version}` are substituted per argument
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCommands {
    /// Succeeds when installed; prints the version
    pub query: String,
    /// Prints one installed package name per line
    #[serde(default)]
    pub list: Option<String>,
    pub install: String,
    pub remove: String,
}

impl Config {
    /// Default config file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(paths::config_dir()?.join("config.toml"))
    }

    /// Load the config at `path`, or at the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        if !path.exists() {
            log::debug!("Config file {} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.exclusive_kinds()?;
        Ok(config)
    }

    /// The declaration file to read, `cli` taking precedence
    pub fn declaration_path(&self, cli: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = cli {
            return Ok(path.to_path_buf());
        }
        match &self.declaration {
            Some(path) => Ok(paths::expand(path)),
            None => Ok(paths::config_dir()?.join(DECLARATION_FILE)),
        }
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(paths::expand(dir)),
            None => paths::state_dir(),
        }
    }

    pub fn root(&self) -> PathBuf {
        paths::expand(&self.root)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn exclusive_kinds(&self) -> Result<Vec<ResourceKind>> {
        self.exclusive
            .iter()
            .map(|name| name.parse::<ResourceKind>().map_err(anyhow::Error::msg))
            .collect()
    }
}
