//! Remote PDF download with an on-disk cache.

use crate::error::{error_from_response, RefSpeciesError, Result};
use crate::retry::RetryPolicy;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Publisher sites commonly refuse non-browser agents for PDF links
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Longest file stem derived from an identifier
const MAX_STEM_LEN: usize = 150;

/// Makes a document's PDF available on local disk.
pub trait DocumentFetcher: Send + Sync {
    /// Download `url` for `identifier`, returning the local path.
    fn fetch<'a>(&'a self, identifier: &'a str, url: &'a str) -> BoxFuture<'a, Result<PathBuf>>;
}

/// HTTP fetcher caching PDFs under one directory.
pub struct PdfFetcher {
    client: reqwest::Client,
    cache_dir: PathBuf,
    retry: RetryPolicy,
}

impl PdfFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| RefSpeciesError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            cache_dir: cache_dir.into(),
            retry,
        })
    }

    /// Cache location for `identifier`.
    pub fn cache_path(&self, identifier: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.pdf", file_stem(identifier)))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/pdf,*/*;q=0.8")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let bytes = response.bytes().await?;
        if !is_pdf(&bytes) {
            return Err(RefSpeciesError::Permanent {
                code: 0,
                message: format!("{} did not return a PDF", url),
            });
        }
        Ok(bytes.to_vec())
    }

    async fn fetch_cached(&self, identifier: &str, url: &str) -> Result<PathBuf> {
        let path = self.cache_path(identifier);
        if is_cached_pdf(&path).await {
            debug!(path = %path.display(), "Reusing cached PDF");
            return Ok(path);
        }

        let bytes = self.retry.run("pdf-download", move || self.download(url)).await?;

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let tmp = path.with_extension("pdf.part");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        info!(identifier, bytes = bytes.len(), path = %path.display(), "Downloaded PDF");
        Ok(path)
    }
}

impl DocumentFetcher for PdfFetcher {
    fn fetch<'a>(&'a self, identifier: &'a str, url: &'a str) -> BoxFuture<'a, Result<PathBuf>> {
        Box::pin(self.fetch_cached(identifier, url))
    }
}

/// `%PDF` magic, allowing leading whitespace.
fn is_pdf(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    bytes[start..].starts_with(b"%PDF")
}

async fn is_cached_pdf(path: &Path) -> bool {
    match tokio::fs::read(path).await {
        Ok(bytes) => is_pdf(&bytes),
        Err(_) => false,
    }
}

/// Filesystem-safe stem for an identifier (`10.1000/x.y` -> `10.1000_x.y`).
pub fn file_stem(identifier: &str) -> String {
    let stem: String = identifier
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .take(MAX_STEM_LEN)
        .collect();
    let stem = stem.trim_start_matches('.');
    if stem.is_empty() {
        "document".to_string()
    } else {
        stem.to_string()
    }
}
