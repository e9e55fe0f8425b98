// src/clients/mod.rs
// Client descriptors: everything the provider and supervisor need to know about a client

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{GridError, Result};
use crate::flags::{self, SettingSpec, SettingsMap};
use crate::platform::PlatformProfile;
use crate::release::{ReleaseFilter, RepositoryLocator};

pub mod clef;
pub mod geth;
pub mod parity;

/// Names of the built-in clients, in display order
pub const BUILTIN_CLIENTS: &[&str] = &["geth", "clef", "parity"];

/// How to find the client's IPC endpoint once it is running
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IpcLocation {
    /// Parsed from the first log line containing the marker
    FromLogs { marker: String },
    Fixed(PathBuf),
    None,
}

/// A flag pointing at a file inside the client's cache directory,
/// passed only when that file exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheFileFlag {
    pub flag: String,
    pub file_name: String,
}

/// Read-only description of a supervisable client
#[derive(Debug, Clone, Serialize)]
pub struct ClientDescriptor {
    pub name: String,
    pub display_name: String,
    pub repository: RepositoryLocator,
    /// Platform-specific executable name inside the archive
    pub binary_name: String,
    pub filter: ReleaseFilter,
    /// Drop the trailing build hash from published versions
    pub strip_build_metadata: bool,
    /// Default version requirement, e.g. `>=1.9.0`
    pub version_constraint: Option<String>,
    /// Output substring that signals the RPC endpoint is open
    pub readiness_marker: String,
    /// Always passed, ahead of generated flags
    pub base_flags: Vec<String>,
    pub settings: Vec<SettingSpec>,
    pub ipc: IpcLocation,
    pub cache_file_flags: Vec<CacheFileFlag>,
}

impl ClientDescriptor {
    pub fn builtin(name: &str, profile: &PlatformProfile) -> Result<Self> {
        match name {
            "geth" => Ok(geth::descriptor(profile)),
            "clef" => Ok(clef::descriptor(profile)),
            "parity" => Ok(parity::descriptor(profile)),
            other => Err(GridError::UnknownClient(other.to_string())),
        }
    }

    pub fn builtins(profile: &PlatformProfile) -> Vec<Self> {
        vec![
            geth::descriptor(profile),
            clef::descriptor(profile),
            parity::descriptor(profile),
        ]
    }

    /// Defaults from the settings schema
    pub fn default_settings(&self) -> SettingsMap {
        flags::default_settings(&self.settings)
    }

    /// Full argv for a launch: base flags, generated flags, cache-file flags
    pub fn launch_flags(&self, user: &SettingsMap, cache_dir: &Path) -> Result<Vec<String>> {
        let mut args = self.base_flags.clone();

        let merged = flags::merge_with_defaults(user, &self.settings);
        args.extend(flags::generate_flags(&merged, &self.settings)?);

        for extra in &self.cache_file_flags {
            let path = cache_dir.join(&extra.file_name);
            if path.exists() {
                args.push(extra.flag.clone());
                args.push(path.to_string_lossy().into_owned());
            }
        }
        Ok(args)
    }

    /// IPC endpoint for a running instance
    pub fn resolve_ipc(&self, logs: &[String]) -> Option<PathBuf> {
        match &self.ipc {
            IpcLocation::FromLogs { marker } => ipc_path_from_logs(logs, marker),
            IpcLocation::Fixed(path) => Some(path.clone()),
            IpcLocation::None => None,
        }
    }
}

/// `... IPC endpoint opened url=/home/u/.ethereum/geth.ipc` -> the path.
/// Windows pipe names come back double-escaped and are collapsed.
pub fn ipc_path_from_logs(logs: &[String], marker: &str) -> Option<PathBuf> {
    let line = logs.iter().find(|l| l.contains(marker))?;
    let (_, value) = line.split_once('=')?;
    let mut path = value.trim().to_string();
    if path.contains("\\\\") {
        path = path.replace("\\\\", "\\");
    }
    (!path.is_empty()).then(|| PathBuf::from(path))
}
