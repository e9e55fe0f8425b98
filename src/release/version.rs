// src/release/version.rs
// Version extraction, normalization and constraint matching

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use semver::{Version, VersionReq};

use crate::error::{GridError, Result};

/// `1.9.0`, `1.9.0-52f24617`, `1.9.0-unstable-f82185a4`
static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    // SAFETY: This is a static literal regex pattern; compilation cannot fail.
    #[allow(clippy::expect_used)]
    Regex::new(r"(\d+\.\d+\.\d+(?:-[0-9A-Za-z]+)*)").expect("version regex")
});

/// Pull the version out of a release file's base name
pub fn extract_version(base_name: &str) -> Option<String> {
    VERSION_RE
        .captures_iter(base_name)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Drop the final dash-separated segment (the build hash).
///
/// `1.9.0-unstable-f82185a4` -> `1.9.0-unstable`, `1.9.0-52f24617` -> `1.9.0`.
/// Versions without a dash are returned unchanged.
pub fn normalize_version(raw: &str) -> String {
    let raw = raw.trim().trim_start_matches('v');
    match raw.rsplit_once('-') {
        Some((head, _)) => head.to_string(),
        None => raw.to_string(),
    }
}

/// Parse a (normalized) version string as semver
pub fn parse_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    Version::parse(trimmed).map_err(|e| GridError::Version(format!("`{}`: {}", raw, e)))
}

/// Order two version strings semantically; unparsable sorts lowest
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a).ok(), parse_version(b).ok()) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// Version requirement such as `>=1.9.0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    raw: String,
    req: VersionReq,
}

impl VersionConstraint {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let req = if trimmed.is_empty() {
            VersionReq::STAR
        } else {
            VersionReq::parse(trimmed)
                .map_err(|e| GridError::Version(format!("constraint `{}`: {}", raw, e)))?
        };
        Ok(Self {
            raw: trimmed.to_string(),
            req,
        })
    }

    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            req: VersionReq::STAR,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// A pre-release build (`1.9.0-unstable`) satisfies the constraint
    /// when its release version (`1.9.0`) does.
    pub fn matches(&self, version: &Version) -> bool {
        if self.req.matches(version) {
            return true;
        }
        if version.pre.is_empty() {
            return false;
        }
        let release = Version::new(version.major, version.minor, version.patch);
        self.req.matches(&release)
    }

    /// Match against a raw version string (normalized first)
    pub fn matches_str(&self, raw: &str) -> bool {
        parse_version(&normalize_version_keep_plain(raw))
            .map(|v| self.matches(&v))
            .unwrap_or(false)
    }
}

impl std::fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Normalize only when the raw string does not already parse
fn normalize_version_keep_plain(raw: &str) -> String {
    if parse_version(raw).is_ok() {
        raw.trim().trim_start_matches('v').to_string()
    } else {
        normalize_version(raw)
    }
}
