// src/release/mod.rs
// Versioned binary provisioning: release model, remote index, cache, extraction

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub mod archive;
pub mod index;
pub mod provider;
pub mod version;

pub use index::{ArchiveDownload, HttpReleaseIndex, ReleaseIndex};
pub use provider::{ProgressThrottle, ReleaseProvider};
pub use version::{VersionConstraint, compare_versions, extract_version, normalize_version};

// ============================================================================
// Repository
// ============================================================================

/// Where a client's builds are published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepositoryLocator {
    /// Azure blob container listing (the geth build store)
    GethStore { base_url: String },
    /// GitHub releases of `owner/repo`
    Github { owner: String, repo: String },
}

impl RepositoryLocator {
    pub fn geth_store() -> Self {
        RepositoryLocator::GethStore {
            base_url: "https://gethstore.blob.core.windows.net".to_string(),
        }
    }

    pub fn github(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        RepositoryLocator::Github {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl std::fmt::Display for RepositoryLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryLocator::GethStore { base_url } => write!(f, "{}", base_url),
            RepositoryLocator::Github { owner, repo } => write!(f, "github:{}/{}", owner, repo),
        }
    }
}

// ============================================================================
// Index entries and releases
// ============================================================================

/// One artifact as reported by a remote index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEntry {
    pub file_name: String,
    /// Raw version as published (not normalized)
    pub version: Option<String>,
    pub download_url: String,
    pub size: Option<u64>,
    /// Base64 MD5 digest, when the index publishes one
    pub md5: Option<String>,
}

/// A specific downloadable build. Immutable: the `with_*` helpers return
/// a new value with the extra location filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Normalized version (build hash dropped where applicable)
    pub version: String,
    pub file_name: String,
    pub download_url: Option<String>,
    pub size: Option<u64>,
    pub md5: Option<String>,
    /// Set once the archive is in the cache
    pub archive_path: Option<PathBuf>,
    /// Set once the binary has been extracted
    pub binary_path: Option<PathBuf>,
}

impl Release {
    pub fn with_archive_path(&self, path: PathBuf) -> Self {
        Self {
            archive_path: Some(path),
            ..self.clone()
        }
    }

    pub fn with_binary_path(&self, path: PathBuf) -> Self {
        Self {
            binary_path: Some(path),
            ..self.clone()
        }
    }

    pub fn is_downloaded(&self) -> bool {
        self.archive_path.as_ref().is_some_and(|p| p.exists())
    }
}

// ============================================================================
// Filtering
// ============================================================================

/// Filename predicate: every include token must appear, no exclude token may.
/// Matching is case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFilter {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

impl ReleaseFilter {
    pub fn new<I, E>(includes: I, excludes: E) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            includes: includes.into_iter().map(|s| s.into().to_lowercase()).collect(),
            excludes: excludes.into_iter().map(|s| s.into().to_lowercase()).collect(),
        }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        let name = file_name.to_lowercase();
        self.includes.iter().all(|t| name.contains(t.as_str()))
            && !self.excludes.iter().any(|t| name.contains(t.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_geth() {
        let filter = ReleaseFilter::new(["linux", "amd64"], ["unstable", "alltools", "swarm"]);
        assert!(filter.matches("geth-linux-amd64-1.9.0-52f24617.tar.gz"));
        assert!(!filter.matches("geth-alltools-linux-amd64-1.9.0-52f24617.tar.gz"));
        assert!(!filter.matches("geth-linux-amd64-1.9.1-unstable-aa11bb22.tar.gz"));
        assert!(!filter.matches("geth-darwin-amd64-1.9.0-52f24617.tar.gz"));
    }

    #[test]
    fn test_filter_case_insensitive() {
        let filter = ReleaseFilter::new(["Linux"], Vec::<String>::new());
        assert!(filter.matches("PARITY-LINUX.tar.gz"));
    }

    #[test]
    fn test_release_with_paths_is_new_value() {
        let release = Release {
            version: "1.9.0".to_string(),
            file_name: "geth-linux-amd64-1.9.0-52f24617.tar.gz".to_string(),
            download_url: None,
            size: None,
            md5: None,
            archive_path: None,
            binary_path: None,
        };
        let downloaded = release.with_archive_path(PathBuf::from("/tmp/a.tar.gz"));
        assert!(release.archive_path.is_none());
        assert_eq!(downloaded.archive_path, Some(PathBuf::from("/tmp/a.tar.gz")));
        assert_eq!(downloaded.version, release.version);
    }

    #[test]
    fn test_locator_display() {
        assert_eq!(
            RepositoryLocator::github("openethereum", "openethereum").to_string(),
            "github:openethereum/openethereum"
        );
        assert!(RepositoryLocator::geth_store().to_string().contains("gethstore"));
    }
}
