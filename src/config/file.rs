// src/config/file.rs
// File-based configuration from ~/.grid/config.toml

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::flags::SettingsMap;

/// Top-level config structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct GridConfig {
    /// Overrides the default cache root
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub clients: BTreeMap<String, ClientSection>,
}

/// `[clients.<name>]`: a version requirement plus free-form settings
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ClientSection {
    pub version: Option<String>,
    #[serde(flatten)]
    pub settings: BTreeMap<String, toml::Value>,
}

impl GridConfig {
    /// Load config from ~/.grid/config.toml, falling back to defaults
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded config from file");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config file");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".grid")
            .join("config.toml")
    }

    /// User settings for a client, rendered as flag values
    pub fn settings_for(&self, client: &str) -> SettingsMap {
        self.clients
            .get(client)
            .map(|section| {
                section
                    .settings
                    .iter()
                    .map(|(key, value)| (key.clone(), value_to_string(value)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn constraint_for(&self, client: &str) -> Option<&str> {
        self.clients
            .get(client)
            .and_then(|section| section.version.as_deref())
            .filter(|v| !v.trim().is_empty())
    }
}

fn value_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
