//! OpenAlex API client used to locate open-access PDFs.
//!
//! Works are fetched by DOI. The PDF location comes from `best_oa_location`
//! first and `primary_location` second; the abstract is rebuilt from the
//! inverted index OpenAlex publishes instead of plain text.

use crate::error::{error_from_response, RefSpeciesError, Result};
use crate::resolver::{OpenAccessRecord, PdfLocator};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// OpenAlex API base URL
pub const OPENALEX_API_BASE: &str = "https://api.openalex.org";

/// Fields requested for a work
const SELECT: &str = "id,doi,display_name,abstract_inverted_index,primary_location,best_oa_location";

/// OpenAlex API client
pub struct OpenAlexClient {
    client: reqwest::Client,
    base_url: String,
    mailto: Option<String>,
}

impl OpenAlexClient {
    /// `mailto` opts into the polite pool (higher rate limit).
    pub fn new(base_url: impl Into<String>, mailto: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("refspecies/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RefSpeciesError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mailto: mailto.filter(|m| !m.trim().is_empty()),
        })
    }

    fn work_url(&self, doi: &str) -> String {
        let mut url = format!(
            "{}/works/doi:{}?select={}",
            self.base_url,
            urlencoding::encode(doi),
            SELECT
        );
        if let Some(mailto) = &self.mailto {
            url.push_str(&format!("&mailto={}", urlencoding::encode(mailto)));
        }
        url
    }

    async fn fetch_work(&self, doi: &str) -> Result<Option<OpenAccessRecord>> {
        let url = self.work_url(doi);
        debug!(url = %url, "Fetching OpenAlex work");

        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let work: OpenAlexWork = response.json().await?;
        Ok(Some(parse_work(work)))
    }
}

impl PdfLocator for OpenAlexClient {
    fn locate<'a>(&'a self, doi: &'a str) -> BoxFuture<'a, Result<Option<OpenAccessRecord>>> {
        Box::pin(self.fetch_work(doi))
    }
}

// === OpenAlex API Response Types ===

#[derive(Debug, Deserialize)]
struct OpenAlexWork {
    #[serde(rename = "abstract_inverted_index", default)]
    abstract_index: Option<serde_json::Value>,
    #[serde(default)]
    primary_location: Option<OpenAlexLocation>,
    #[serde(default)]
    best_oa_location: Option<OpenAlexLocation>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexLocation {
    #[serde(default)]
    pdf_url: Option<String>,
}

fn parse_work(work: OpenAlexWork) -> OpenAccessRecord {
    let pdf_url = [work.best_oa_location, work.primary_location]
        .into_iter()
        .flatten()
        .filter_map(|location| location.pdf_url)
        .find(|url| !url.trim().is_empty());

    let abstract_text = work
        .abstract_index
        .map(|index| reconstruct_abstract(&index))
        .filter(|text| !text.is_empty());

    OpenAccessRecord { pdf_url, abstract_text }
}

/// Reconstruct abstract text from the inverted index (word -> positions).
fn reconstruct_abstract(inverted_index: &serde_json::Value) -> String {
    let Some(obj) = inverted_index.as_object() else {
        return String::new();
    };

    let mut words: Vec<(i64, &str)> = obj
        .iter()
        .filter_map(|(word, positions)| Some((word, positions.as_array()?)))
        .flat_map(|(word, positions)| {
            positions
                .iter()
                .filter_map(|p| p.as_i64())
                .map(move |p| (p, word.as_str()))
        })
        .collect();

    words.sort_by_key(|(pos, _)| *pos);
    words.iter().map(|(_, w)| *w).collect::<Vec<_>>().join(" ")
}
