// src/release/provider.rs
// ReleaseProvider: resolve, download, verify, cache and extract client binaries

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::archive;
use super::index::ReleaseIndex;
use super::version::{VersionConstraint, compare_versions, extract_version, normalize_version};
use super::{Release, ReleaseEntry, ReleaseFilter, RepositoryLocator};
use crate::clients::ClientDescriptor;
use crate::error::{GridError, Result};
use crate::platform::PlatformProfile;

/// Suffix for archives still being written
const PARTIAL_SUFFIX: &str = ".part";

// ============================================================================
// Progress coalescing
// ============================================================================

/// Turns byte counts into at most one progress value per 5% step.
/// Emits 0 once at the start and 100 once at the end.
#[derive(Debug, Default)]
pub struct ProgressThrottle {
    last: Option<u8>,
}

impl ProgressThrottle {
    pub const STEP: u8 = 5;

    pub fn new() -> Self {
        Self::default()
    }

    /// Initial event
    pub fn start(&mut self) -> u8 {
        self.last = Some(0);
        0
    }

    pub fn update(&mut self, done: u64, total: Option<u64>) -> Option<u8> {
        let total = total.filter(|t| *t > 0)?;
        let percent = (done.saturating_mul(100) / total).min(100) as u8;
        let step = percent / Self::STEP * Self::STEP;
        match self.last {
            Some(last) if step <= last => None,
            _ => {
                self.last = Some(step);
                Some(step)
            }
        }
    }

    /// Final event, unless 100 was already reported
    pub fn finish(&mut self) -> Option<u8> {
        if self.last == Some(100) {
            return None;
        }
        self.last = Some(100);
        Some(100)
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Provisioning for one client. Owns `<cache_root>/<client name>`.
pub struct ReleaseProvider {
    client_name: String,
    repository: RepositoryLocator,
    filter: ReleaseFilter,
    binary_name: String,
    strip_build_metadata: bool,
    profile: PlatformProfile,
    cache_dir: PathBuf,
    index: Arc<dyn ReleaseIndex>,
}

impl std::fmt::Debug for ReleaseProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseProvider")
            .field("client_name", &self.client_name)
            .field("repository", &self.repository)
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl ReleaseProvider {
    pub fn new(
        client: &ClientDescriptor,
        profile: PlatformProfile,
        cache_root: impl AsRef<Path>,
        index: Arc<dyn ReleaseIndex>,
    ) -> Self {
        Self {
            client_name: client.name.clone(),
            repository: client.repository.clone(),
            filter: client.filter.clone(),
            binary_name: client.binary_name.clone(),
            strip_build_metadata: client.strip_build_metadata,
            cache_dir: cache_root.as_ref().join(&client.name),
            profile,
            index,
        }
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    /// Releases present in the cache directory, newest first.
    ///
    /// A release counts as cached when its archive or its extracted binary
    /// is present; the binary alone is enough to run it.
    pub async fn cached_releases(&self) -> Result<Vec<Release>> {
        let mut dir = match tokio::fs::read_dir(&self.cache_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found: BTreeMap<String, Release> = BTreeMap::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !self.filter.matches(file_name) {
                continue;
            }

            if let Some(base) = self.profile.archive_base_name(file_name) {
                let release = self.cached_entry(&mut found, base);
                release.archive_path = Some(path);
            } else if let Some(base) = self.binary_base_name(file_name) {
                let release = self.cached_entry(&mut found, base);
                release.binary_path = Some(path);
            }
        }

        let mut releases: Vec<Release> = found.into_values().collect();
        sort_newest_first(&mut releases);
        Ok(releases)
    }

    fn cached_entry<'a>(&self, found: &'a mut BTreeMap<String, Release>, base: &str) -> &'a mut Release {
        found.entry(base.to_string()).or_insert_with(|| Release {
            version: self.version_for(base, None),
            file_name: format!("{}{}", base, self.profile.archive_extension),
            download_url: None,
            size: None,
            md5: None,
            archive_path: None,
            binary_path: None,
        })
    }

    pub async fn latest_cached(&self, constraint: Option<&VersionConstraint>) -> Result<Option<Release>> {
        Ok(self
            .cached_releases()
            .await?
            .into_iter()
            .find(|r| satisfies(constraint, &r.version)))
    }

    /// Remote releases that pass this client's filter, newest first
    pub async fn remote_releases(&self) -> Result<Vec<Release>> {
        let entries = self.index.list_releases(&self.repository).await?;
        debug!(
            client = %self.client_name,
            repository = %self.repository,
            count = entries.len(),
            "Fetched release index"
        );

        let mut releases: Vec<Release> = entries
            .into_iter()
            .filter_map(|entry| self.release_from_entry(entry))
            .collect();
        sort_newest_first(&mut releases);
        Ok(releases)
    }

    pub async fn latest_remote(&self, constraint: Option<&VersionConstraint>) -> Result<Option<Release>> {
        Ok(self
            .remote_releases()
            .await?
            .into_iter()
            .find(|r| satisfies(constraint, &r.version)))
    }

    /// Newest cached release satisfying `constraint`, otherwise the newest
    /// remote one, downloaded
    pub async fn get_latest_release(
        &self,
        constraint: Option<&VersionConstraint>,
        on_progress: impl FnMut(u8) + Send,
    ) -> Result<Release> {
        if let Some(cached) = self.latest_cached(constraint).await? {
            debug!(client = %self.client_name, version = %cached.version, "Using cached release");
            return Ok(cached);
        }

        info!(client = %self.client_name, "No cached release found, querying remote index");
        let target = self.latest_remote(constraint).await?.ok_or_else(|| {
            GridError::NoMatchingRelease(
                constraint
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "*".to_string()),
            )
        })?;
        self.download(&target, on_progress).await
    }

    /// Resolve, download and extract in one step
    pub async fn provision(
        &self,
        constraint: Option<&VersionConstraint>,
        on_progress: impl FnMut(u8) + Send,
    ) -> Result<Release> {
        let release = self.get_latest_release(constraint, on_progress).await?;
        let binary = self.extract_binary(&release).await?;
        Ok(release.with_binary_path(binary))
    }

    // ------------------------------------------------------------------------
    // Download
    // ------------------------------------------------------------------------

    /// Stream the archive into the cache. Either the complete, verified file
    /// ends up at its final path or nothing does.
    pub async fn download(
        &self,
        release: &Release,
        mut on_progress: impl FnMut(u8) + Send,
    ) -> Result<Release> {
        let dest = self.cache_dir.join(&release.file_name);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            debug!(file = %release.file_name, "Archive already cached");
            return Ok(release.with_archive_path(dest));
        }

        let url = release
            .download_url
            .as_deref()
            .ok_or_else(|| GridError::download(&release.file_name, "no download URL"))?;

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let tmp = partial_path(&dest);

        info!(
            client = %self.client_name,
            version = %release.version,
            file = %release.file_name,
            "Downloading release"
        );

        match self.fetch_to(url, release, &tmp, &mut on_progress).await {
            Ok(()) => {}
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                warn!(file = %release.file_name, error = %e, "Download failed");
                return Err(match e {
                    GridError::Download { .. } => e,
                    other => GridError::download(&release.file_name, other),
                });
            }
        }

        if let Err(e) = tokio::fs::rename(&tmp, &dest).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(GridError::download(&release.file_name, e));
        }

        info!(file = %release.file_name, "Download complete");
        Ok(release.with_archive_path(dest))
    }

    async fn fetch_to(
        &self,
        url: &str,
        release: &Release,
        tmp: &Path,
        on_progress: &mut (impl FnMut(u8) + Send),
    ) -> Result<()> {
        let mut throttle = ProgressThrottle::new();
        on_progress(throttle.start());

        let download = self.index.download_archive(url).await?;
        let total = download.content_length.or(release.size);
        let mut stream = download.stream;

        let mut file = tokio::fs::File::create(tmp).await?;
        let mut digest = md5::Context::new();
        let mut received: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            digest.consume(&chunk);
            received += chunk.len() as u64;
            if let Some(percent) = throttle.update(received, total) {
                on_progress(percent);
            }
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = release.size {
            if expected != received {
                return Err(GridError::download(
                    &release.file_name,
                    format!("size mismatch: expected {} bytes, got {}", expected, received),
                ));
            }
        }
        if let Some(expected) = &release.md5 {
            verify_md5(digest.finalize(), expected, &release.file_name)?;
        }

        if let Some(percent) = throttle.finish() {
            on_progress(percent);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Extraction
    // ------------------------------------------------------------------------

    /// Extract the binary from a cached archive. A no-op returning the same
    /// path when the binary is already present.
    pub async fn extract_binary(&self, release: &Release) -> Result<PathBuf> {
        let base = self
            .profile
            .archive_base_name(&release.file_name)
            .ok_or_else(|| GridError::extraction(&release.file_name, "not a platform archive"))?;
        let dest = self.binary_path_for(base);

        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            debug!(binary = %dest.display(), "Binary already extracted");
            return Ok(dest);
        }

        let archive_path = release
            .archive_path
            .clone()
            .unwrap_or_else(|| self.cache_dir.join(&release.file_name));
        if !tokio::fs::try_exists(&archive_path).await.unwrap_or(false) {
            return Err(GridError::extraction(&release.file_name, "archive not downloaded"));
        }

        let entry = format!("{}/{}", base, self.binary_name);
        info!(client = %self.client_name, entry = %entry, "Extracting binary");
        tokio::task::spawn_blocking(move || archive::extract_entry(&archive_path, &entry, &dest))
            .await?
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Base name of an extracted binary; None for in-flight temp files
    /// and anything without a version in its name
    fn binary_base_name<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        if file_name.ends_with(PARTIAL_SUFFIX) || file_name.ends_with(archive::EXTRACTING_SUFFIX) {
            return None;
        }
        let base = file_name.strip_suffix(self.profile.executable_suffix.as_str())?;
        extract_version(base).is_some().then_some(base)
    }

    /// `<cache>/<archive base name>[.exe]`
    fn binary_path_for(&self, base: &str) -> PathBuf {
        self.cache_dir.join(self.profile.executable_name(base))
    }

    fn version_for(&self, base_name: &str, published: Option<&str>) -> String {
        let raw = published
            .map(str::to_string)
            .or_else(|| extract_version(base_name))
            .unwrap_or_default();
        if self.strip_build_metadata && !raw.is_empty() {
            normalize_version(&raw)
        } else {
            raw.trim_start_matches('v').to_string()
        }
    }

    fn release_from_entry(&self, entry: ReleaseEntry) -> Option<Release> {
        if !self.filter.matches(&entry.file_name) {
            return None;
        }
        let base = self.profile.archive_base_name(&entry.file_name)?;
        let version = self.version_for(base, entry.version.as_deref());
        Some(Release {
            version,
            file_name: entry.file_name,
            download_url: Some(entry.download_url),
            size: entry.size,
            md5: entry.md5,
            archive_path: None,
            binary_path: None,
        })
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    dest.with_file_name(name)
}

fn satisfies(constraint: Option<&VersionConstraint>, version: &str) -> bool {
    match constraint {
        Some(c) => c.matches_str(version),
        None => true,
    }
}

fn sort_newest_first(releases: &mut [Release]) {
    releases.sort_by(|a, b| compare_versions(&b.version, &a.version));
}

/// Compare a digest against a base64 `Content-MD5` value
fn verify_md5(actual: md5::Digest, expected_b64: &str, file_name: &str) -> Result<()> {
    let expected = base64::engine::general_purpose::STANDARD
        .decode(expected_b64.trim())
        .map_err(|e| GridError::download(file_name, format!("invalid MD5 in index: {}", e)))?;
    if actual.0[..] != expected[..] {
        return Err(GridError::download(
            file_name,
            format!("MD5 mismatch: expected {}, got {:x}", hex::encode(&expected), actual),
        ));
    }
    Ok(())
}
