//! Crossref API client for citation lookup.
//!
//! DOIs go to `/works/{doi}`; everything else is matched with
//! `query.bibliographic`, which scores the whole citation string. An API key,
//! when given, is sent as a Crossref Plus token.

use crate::citation::clean_doi;
use crate::error::{error_from_response, RefSpeciesError, Result};
use crate::resolver::{BibliographicRecord, BibliographicService, CitationQuery};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Crossref API base URL
pub const CROSSREF_API_BASE: &str = "https://api.crossref.org";

/// Fields requested for search results
const SELECT: &str = "DOI,title,abstract";

/// Crossref API client
pub struct CrossrefClient {
    client: reqwest::Client,
    base_url: String,
    plus_token: Option<String>,
}

impl CrossrefClient {
    /// Create a client; an empty `api_key` uses the public pool.
    pub fn new(api_key: &str, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("refspecies/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| RefSpeciesError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let api_key = api_key.trim();
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            plus_token: (!api_key.is_empty()).then(|| format!("Bearer {}", api_key)),
        })
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.plus_token {
            Some(token) => request.header("Crossref-Plus-API-Token", token),
            None => request,
        }
    }

    async fn lookup_doi(&self, doi: &str) -> Result<Option<BibliographicRecord>> {
        let url = format!("{}/works/{}", self.base_url, urlencoding::encode(doi));
        debug!(doi, "Crossref DOI lookup");

        let response = self.get(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let data: CrossrefWorkResponse = response.json().await?;
        Ok(parse_crossref_item(data.message))
    }

    async fn lookup_bibliographic(&self, citation: &str) -> Result<Option<BibliographicRecord>> {
        debug!(citation, "Crossref bibliographic search");

        let response = self
            .get(format!("{}/works", self.base_url))
            .query(&[("query.bibliographic", citation), ("rows", "1"), ("select", SELECT)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let data: CrossrefResponse = response.json().await?;
        Ok(data.message.items.into_iter().find_map(parse_crossref_item))
    }
}

impl BibliographicService for CrossrefClient {
    fn name(&self) -> &'static str {
        "crossref"
    }

    fn lookup<'a>(&'a self, query: &'a CitationQuery) -> BoxFuture<'a, Result<Option<BibliographicRecord>>> {
        Box::pin(async move {
            match query {
                CitationQuery::Doi(doi) => self.lookup_doi(doi).await,
                CitationQuery::Title(title) => self.lookup_bibliographic(title).await,
            }
        })
    }
}

// === Crossref API Response Types ===

#[derive(Debug, Deserialize)]
struct CrossrefResponse {
    message: CrossrefMessage,
}

#[derive(Debug, Deserialize)]
struct CrossrefMessage {
    #[serde(default)]
    items: Vec<CrossrefItem>,
}

#[derive(Debug, Deserialize)]
struct CrossrefWorkResponse {
    message: CrossrefItem,
}

#[derive(Debug, Deserialize)]
struct CrossrefItem {
    #[serde(rename = "DOI", default)]
    doi: String,
    #[serde(default)]
    title: Vec<String>,
    #[serde(rename = "abstract", default)]
    abstract_text: Option<String>,
}

/// Parse a Crossref item; items without a title are useless here.
fn parse_crossref_item(item: CrossrefItem) -> Option<BibliographicRecord> {
    let title = item
        .title
        .into_iter()
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|t| !t.is_empty())?;

    let doi = clean_doi(&item.doi);
    let abstract_text = item
        .abstract_text
        .map(|s| strip_html_tags(&s).trim().to_string())
        .filter(|s| !s.is_empty());

    Some(BibliographicRecord {
        service_id: doi.clone(),
        doi: (!doi.is_empty()).then_some(doi),
        title,
        abstract_text,
    })
}

/// Strip JATS/HTML tags from abstracts
fn strip_html_tags(text: &str) -> String {
    static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));
    TAG_RE.replace_all(text, "").to_string()
}
