// tests/common/mod.rs
// Shared fixtures: in-memory release index, archive builder, fake client

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures::StreamExt;
use grid::clients::{ClientDescriptor, IpcLocation};
use grid::config::SupervisorConfig;
use grid::flags::SettingSpec;
use grid::platform::{Os, PlatformProfile};
use grid::release::{
    ArchiveDownload, ReleaseEntry, ReleaseFilter, ReleaseIndex, ReleaseProvider,
    RepositoryLocator,
};
use grid::supervisor::{ProcessSupervisor, SupervisorState};
use grid::{GridError, Result};
use tempfile::TempDir;

pub const CLIENT: &str = "fakeclef";
pub const BINARY: &str = "clef";
pub const READY_MARKER: &str = "HTTP endpoint opened";
pub const ARCHIVE: &str = "fakeclef-linux-amd64-1.9.0-unstable-0000aaaa.tar.gz";
pub const ARCHIVE_BASE: &str = "fakeclef-linux-amd64-1.9.0-unstable-0000aaaa";

/// Bytes per chunk served by the fake index
const CHUNK_SIZE: usize = 64;

pub fn profile() -> PlatformProfile {
    PlatformProfile::for_os(Os::Linux, "x86_64")
}

pub fn descriptor() -> ClientDescriptor {
    ClientDescriptor {
        name: CLIENT.to_string(),
        display_name: "Fake Clef".to_string(),
        repository: RepositoryLocator::GethStore {
            base_url: "memory://store".to_string(),
        },
        binary_name: BINARY.to_string(),
        filter: ReleaseFilter::new([CLIENT, "linux", "amd64"], ["swarm"]),
        strip_build_metadata: true,
        version_constraint: None,
        readiness_marker: READY_MARKER.to_string(),
        base_flags: vec!["--stdio-ui".to_string()],
        settings: vec![SettingSpec::flag("chainId", "--chainid %s").with_default("1")],
        ipc: IpcLocation::None,
        cache_file_flags: Vec::new(),
    }
}

/// Gzipped tarball with `(path, contents)` entries, all executable
pub fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Archive laid out the way the geth store publishes builds
pub fn client_archive(script: &str) -> Vec<u8> {
    let entry = format!("{}/{}", ARCHIVE_BASE, BINARY);
    tar_gz(&[(entry.as_str(), script.as_bytes())])
}

pub fn md5_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(md5::compute(data).0)
}

pub fn entry(file_name: &str, data: &[u8]) -> ReleaseEntry {
    ReleaseEntry {
        file_name: file_name.to_string(),
        version: grid::release::extract_version(file_name.trim_end_matches(".tar.gz")),
        download_url: format!("memory://store/builds/{}", file_name),
        size: Some(data.len() as u64),
        md5: Some(md5_base64(data)),
    }
}

// ============================================================================
// In-memory index
// ============================================================================

#[derive(Default)]
pub struct FakeIndex {
    entries: Vec<ReleaseEntry>,
    archives: HashMap<String, Vec<u8>>,
    pub listings: AtomicUsize,
    pub downloads: AtomicUsize,
}

impl FakeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `data` under `entry`
    pub fn with(mut self, entry: ReleaseEntry, data: Vec<u8>) -> Self {
        self.archives.insert(entry.download_url.clone(), data);
        self.entries.push(entry);
        self
    }

    /// List `entry` without serving any bytes for it
    pub fn listing_only(mut self, entry: ReleaseEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Publish a correctly described archive
    pub fn with_archive(self, file_name: &str, data: Vec<u8>) -> Self {
        let entry = entry(file_name, &data);
        self.with(entry, data)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn listing_count(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseIndex for FakeIndex {
    async fn list_releases(&self, _repository: &RepositoryLocator) -> Result<Vec<ReleaseEntry>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.clone())
    }

    async fn download_archive(&self, url: &str) -> Result<ArchiveDownload> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let data = self
            .archives
            .get(url)
            .cloned()
            .ok_or_else(|| GridError::download(url, "not found"))?;
        let chunks: Vec<Result<Bytes>> = data
            .chunks(CHUNK_SIZE)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(ArchiveDownload {
            content_length: Some(data.len() as u64),
            stream: futures::stream::iter(chunks).boxed(),
        })
    }
}

// ============================================================================
// Supervisor fixtures
// ============================================================================

pub struct Harness {
    pub cache: TempDir,
    pub index: Arc<FakeIndex>,
    pub provider: Arc<ReleaseProvider>,
    pub supervisor: Arc<ProcessSupervisor>,
}

pub fn config() -> SupervisorConfig {
    SupervisorConfig::default().with_startup_timeout(Some(Duration::from_secs(10)))
}

/// A supervisor whose client binary is `script`
pub fn harness(script: &str, config: SupervisorConfig) -> Harness {
    harness_with_index(FakeIndex::new().with_archive(ARCHIVE, client_archive(script)), config)
}

/// A supervisor provisioning from `index`
pub fn harness_with_index(index: FakeIndex, config: SupervisorConfig) -> Harness {
    let cache = tempfile::tempdir().unwrap();
    let index = Arc::new(index);
    let provider = Arc::new(ReleaseProvider::new(
        &descriptor(),
        profile(),
        cache.path(),
        index.clone(),
    ));
    let supervisor = Arc::new(ProcessSupervisor::new(descriptor(), provider.clone(), config));
    Harness {
        cache,
        index,
        provider,
        supervisor,
    }
}

pub async fn wait_for_state(supervisor: &ProcessSupervisor, state: SupervisorState) {
    let mut rx = supervisor.watch_state();
    tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}, still {}", supervisor.state()))
        .unwrap();
}

pub async fn wait_for_log(supervisor: &ProcessSupervisor, predicate: impl Fn(&str) -> bool) -> String {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(line) = supervisor.logs().await.into_iter().find(|l| predicate(l.as_str())) {
            return line;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for log line, have {:?}", supervisor.logs().await);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn cache_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
