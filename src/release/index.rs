// src/release/index.rs
// Remote release index: trait + HTTP implementation for the geth store and GitHub

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ReleaseEntry, RepositoryLocator};
use crate::error::{GridError, Result};

const GITHUB_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("grid/", env!("CARGO_PKG_VERSION"));

/// Guard against a listing that keeps handing out markers
const MAX_LISTING_PAGES: usize = 50;

/// An archive being streamed from the index
pub struct ArchiveDownload {
    pub content_length: Option<u64>,
    pub stream: BoxStream<'static, Result<Bytes>>,
}

impl std::fmt::Debug for ArchiveDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveDownload")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Source of published builds. One instance may be shared by every
/// ReleaseProvider (`Arc<dyn ReleaseIndex>`).
#[async_trait]
pub trait ReleaseIndex: Send + Sync {
    /// Every artifact in the repository, unfiltered
    async fn list_releases(&self, repository: &RepositoryLocator) -> Result<Vec<ReleaseEntry>>;

    /// Open a byte stream for `url`
    async fn download_archive(&self, url: &str) -> Result<ArchiveDownload>;
}

/// HTTP-backed index for both repository kinds
#[derive(Debug, Clone)]
pub struct HttpReleaseIndex {
    client: Client,
    github_api_url: String,
}

impl Default for HttpReleaseIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpReleaseIndex {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            github_api_url: GITHUB_API_URL.to_string(),
        }
    }

    /// Point GitHub lookups at another API host (GitHub Enterprise, mirrors)
    pub fn with_github_api_url(mut self, url: impl Into<String>) -> Self {
        self.github_api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn list_geth_store(&self, base_url: &str) -> Result<Vec<ReleaseEntry>> {
        let base_url = base_url.trim_end_matches('/');
        let mut entries = Vec::new();
        let mut marker: Option<String> = None;

        for page in 0..MAX_LISTING_PAGES {
            let mut url = format!("{}/builds?restype=container&comp=list", base_url);
            if let Some(m) = &marker {
                url.push_str("&marker=");
                url.push_str(&urlencoding::encode(m));
            }
            debug!(page, url = %url, "Listing geth store");

            let response = self.client.get(&url).send().await?;
            if !response.status().is_success() {
                let status = response.status();
                return Err(GridError::Index(format!("{} returned {}", url, status)));
            }
            let body = response.text().await?;
            let listing = parse_blob_listing(&body, base_url)?;
            entries.extend(listing.entries);

            match listing.next_marker {
                Some(next) => marker = Some(next),
                None => return Ok(entries),
            }
        }

        warn!(base_url, "Listing truncated after {} pages", MAX_LISTING_PAGES);
        Ok(entries)
    }

    async fn list_github(&self, owner: &str, repo: &str) -> Result<Vec<ReleaseEntry>> {
        let url = format!("{}/repos/{}/{}/releases", self.github_api_url, owner, repo);
        debug!(url = %url, "Listing GitHub releases");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(GridError::Index(format!(
                "GitHub API error {}: {}",
                status, error_text
            )));
        }

        let releases: Vec<GithubRelease> = response.json().await?;
        Ok(github_entries(releases))
    }
}

#[async_trait]
impl ReleaseIndex for HttpReleaseIndex {
    async fn list_releases(&self, repository: &RepositoryLocator) -> Result<Vec<ReleaseEntry>> {
        match repository {
            RepositoryLocator::GethStore { base_url } => self.list_geth_store(base_url).await,
            RepositoryLocator::Github { owner, repo } => self.list_github(owner, repo).await,
        }
    }

    async fn download_archive(&self, url: &str) -> Result<ArchiveDownload> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(GridError::download(
                url,
                format!("server returned {}", response.status()),
            ));
        }
        let content_length = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(GridError::from))
            .boxed();
        Ok(ArchiveDownload {
            content_length,
            stream,
        })
    }
}

// ============================================================================
// Azure blob listing
// ============================================================================

#[derive(Debug, Default)]
struct BlobListing {
    entries: Vec<ReleaseEntry>,
    next_marker: Option<String>,
}

/// `<EnumerationResults>` as returned by the container list call.
/// Unknown elements and attributes are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EnumerationResults {
    #[serde(default)]
    blobs: BlobList,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    items: Vec<BlobItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlobItem {
    name: String,
    #[serde(default)]
    properties: BlobProperties,
}

#[derive(Debug, Default, Deserialize)]
struct BlobProperties {
    #[serde(rename = "Content-Length", default)]
    content_length: Option<String>,
    #[serde(rename = "Content-MD5", default)]
    content_md5: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an Azure `EnumerationResults` document
fn parse_blob_listing(xml: &str, base_url: &str) -> Result<BlobListing> {
    let xml = xml.trim_start_matches('\u{feff}');
    let results: EnumerationResults = quick_xml::de::from_str(xml)
        .map_err(|e| GridError::Index(format!("invalid blob listing: {}", e)))?;

    let entries = results
        .blobs
        .items
        .into_iter()
        .map(|blob| {
            let name = blob.name.trim().to_string();
            ReleaseEntry {
                download_url: format!("{}/builds/{}", base_url, name),
                version: super::extract_version(&name),
                size: non_empty(blob.properties.content_length).and_then(|s| s.parse().ok()),
                md5: non_empty(blob.properties.content_md5),
                file_name: name,
            }
        })
        .collect();

    Ok(BlobListing {
        entries,
        next_marker: non_empty(results.next_marker),
    })
}

// ============================================================================
// GitHub releases
// ============================================================================

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: Option<u64>,
}

fn github_entries(releases: Vec<GithubRelease>) -> Vec<ReleaseEntry> {
    releases
        .into_iter()
        .filter(|r| !r.draft)
        .flat_map(|release| {
            let version = release.tag_name.trim_start_matches('v').to_string();
            release.assets.into_iter().map(move |asset| ReleaseEntry {
                file_name: asset.name,
                version: Some(version.clone()),
                download_url: asset.browser_download_url,
                size: asset.size,
                md5: None,
            })
        })
        .collect()
}
