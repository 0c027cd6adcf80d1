//! Elsevier Scopus Search API client.
//!
//! Citations are looked up either by `DOI("...")` or by a conjunction of
//! significant title words. Requests carry the `X-ELS-APIKey` header.
//!
//! Reference lists come from the Abstract Retrieval API: the DOI is mapped to
//! a Scopus ID, whose `references` view lists the cited works. When that
//! yields nothing, a looser title search stands in for the reference list.

use crate::citation::{clean_doi, query_words};
use crate::error::{error_from_response, RefSpeciesError, Result};
use crate::resolver::{BibliographicRecord, BibliographicService, CitationQuery, MIN_TITLE_CHARS};
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Scopus API base URL
pub const SCOPUS_API_BASE: &str = "https://api.elsevier.com";

/// Significant title words used in a title query
const TITLE_QUERY_WORDS: usize = 5;

/// Fields requested from the search endpoint
const FIELDS: &str = "dc:identifier,prism:doi,dc:title,dc:description";

/// References requested from the abstract endpoint
const REFERENCE_PAGE: &str = "20";

/// Cited works kept per document
const MAX_CITED_WORKS: usize = 10;

/// Significant title words in a related-works search
const RELATED_QUERY_WORDS: usize = 3;

/// Hits requested from a related-works search
const RELATED_PAGE: &str = "15";

/// Scopus Search API client
pub struct ScopusClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ScopusClient {
    /// Create a client against `base_url` (normally [`SCOPUS_API_BASE`]).
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("refspecies/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| RefSpeciesError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Search query string for `query`, or `None` when a title has no usable words.
    fn search_expression(query: &CitationQuery) -> Option<String> {
        match query {
            CitationQuery::Doi(doi) => Some(format!("DOI(\"{}\")", doi)),
            CitationQuery::Title(title) => Self::title_expression(title, TITLE_QUERY_WORDS),
        }
    }

    /// `TITLE-ABS-KEY("w") AND ...` over the first `max_words` significant words.
    fn title_expression(title: &str, max_words: usize) -> Option<String> {
        let words = query_words(title, max_words);
        if words.is_empty() {
            return None;
        }
        Some(
            words
                .iter()
                .map(|w| format!("TITLE-ABS-KEY(\"{}\")", w))
                .collect::<Vec<_>>()
                .join(" AND "),
        )
    }

    async fn search_entries(&self, expression: &str, count: &str) -> Result<Vec<ScopusEntry>> {
        debug!(query = %expression, count, "Scopus search");

        let response = self
            .client
            .get(format!("{}/content/search/scopus", self.base_url))
            .header("X-ELS-APIKey", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[
                ("query", expression),
                ("count", count),
                ("sort", "relevancy"),
                ("field", FIELDS),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let data: ScopusResponse = response.json().await?;
        Ok(data.search_results.entry)
    }

    async fn search(&self, query: &CitationQuery) -> Result<Option<BibliographicRecord>> {
        let Some(expression) = Self::search_expression(query) else {
            return Ok(None);
        };
        let entries = self.search_entries(&expression, "1").await?;
        Ok(entries.into_iter().find_map(parse_scopus_entry))
    }

    /// Works listed in the reference section Scopus holds for `doi`.
    async fn cited_works(&self, doi: &str) -> Result<Vec<BibliographicRecord>> {
        let Some(scopus_id) = self
            .search(&CitationQuery::Doi(doi.to_string()))
            .await?
            .and_then(|record| record.service_id.strip_prefix("SCOPUS_ID:").map(str::to_string))
        else {
            debug!(doi, "No Scopus ID for DOI");
            return Ok(Vec::new());
        };

        let response = self
            .client
            .get(format!("{}/content/abstract/scopus_id/{}/references", self.base_url, scopus_id))
            .header("X-ELS-APIKey", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[("count", REFERENCE_PAGE)])
            .send()
            .await?;

        // Scopus answers 400 or 404 for records without a reference view
        if matches!(response.status(), StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND) {
            debug!(doi, status = %response.status(), "No reference view");
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: Value = response.json().await?;
        Ok(parse_reference_list(&body))
    }

    /// Works sharing the leading significant words of `title`.
    async fn related_works(&self, title: &str) -> Result<Vec<BibliographicRecord>> {
        let Some(expression) = Self::title_expression(title, RELATED_QUERY_WORDS) else {
            return Ok(Vec::new());
        };
        let entries = self.search_entries(&expression, RELATED_PAGE).await?;
        Ok(entries
            .into_iter()
            .filter_map(parse_scopus_entry)
            .filter(|record| record.doi.is_some())
            .collect())
    }
}

impl BibliographicService for ScopusClient {
    fn name(&self) -> &'static str {
        "scopus"
    }

    fn lookup<'a>(&'a self, query: &'a CitationQuery) -> BoxFuture<'a, Result<Option<BibliographicRecord>>> {
        Box::pin(self.search(query))
    }

    fn references<'a>(
        &'a self,
        doi: Option<&'a str>,
        title: &'a str,
    ) -> BoxFuture<'a, Result<Vec<BibliographicRecord>>> {
        Box::pin(async move {
            if let Some(doi) = doi {
                let cited = self.cited_works(doi).await?;
                if !cited.is_empty() {
                    info!(doi, count = cited.len(), "Scopus reference list");
                    return Ok(cited);
                }
            }
            let related = self.related_works(title).await?;
            info!(title, count = related.len(), "Scopus related works stand in for references");
            Ok(related)
        })
    }
}

// === Scopus API Response Types ===

#[derive(Debug, Deserialize)]
struct ScopusResponse {
    #[serde(rename = "search-results")]
    search_results: ScopusSearchResults,
}

#[derive(Debug, Deserialize)]
struct ScopusSearchResults {
    #[serde(default)]
    entry: Vec<ScopusEntry>,
}

#[derive(Debug, Deserialize)]
struct ScopusEntry {
    #[serde(rename = "dc:identifier", default)]
    identifier: Option<String>,
    #[serde(rename = "prism:doi", default)]
    doi: Option<String>,
    #[serde(rename = "dc:title", default)]
    title: Option<String>,
    #[serde(rename = "dc:description", default)]
    description: Option<String>,
}

/// Empty result sets come back as a single entry carrying only an `error` field.
fn parse_scopus_entry(entry: ScopusEntry) -> Option<BibliographicRecord> {
    let title = entry.title.filter(|t| !t.trim().is_empty())?;
    let doi = entry.doi.map(|d| clean_doi(&d)).filter(|d| !d.is_empty());
    let service_id = entry
        .identifier
        .or_else(|| doi.clone())
        .unwrap_or_default();

    Some(BibliographicRecord {
        service_id,
        doi,
        title,
        abstract_text: entry.description.filter(|d| !d.trim().is_empty()),
    })
}

/// Cited works of an abstract-retrieval `references` view.
///
/// `reference` is a list, or a bare object when there is only one entry.
fn parse_reference_list(body: &Value) -> Vec<BibliographicRecord> {
    let references = &body["abstract-retrieval-response"]["references"]["reference"];
    let entries: Vec<&Value> = match references {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![references],
        _ => Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(parse_cited_work)
        .take(MAX_CITED_WORKS)
        .collect()
}

fn parse_cited_work(reference: &Value) -> Option<BibliographicRecord> {
    let info = &reference["ref-info"];
    let doi = info["ref-publicationtitle"]["prism:doi"]
        .as_str()
        .map(clean_doi)
        .filter(|d| !d.is_empty())?;

    let title = match &info["ref-title"] {
        Value::String(title) => Some(title.as_str()),
        other => other["ref-titletext"].as_str(),
    }
    .or_else(|| info["ref-titletext"].as_str())
    .map(str::trim)
    .filter(|t| t.chars().count() > MIN_TITLE_CHARS)?;

    Some(BibliographicRecord {
        service_id: doi.clone(),
        doi: Some(doi),
        title: title.to_string(),
        abstract_text: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[test]
    fn test_search_expression() {
        assert_eq!(
            ScopusClient::search_expression(&CitationQuery::Doi("10.1000/x".into())).as_deref(),
            Some("DOI(\"10.1000/x\")")
        );
        assert_eq!(
            ScopusClient::search_expression(&CitationQuery::Title("The ecology of small mammals".into())).as_deref(),
            Some("TITLE-ABS-KEY(\"ecology\") AND TITLE-ABS-KEY(\"small\") AND TITLE-ABS-KEY(\"mammals\")")
        );
        assert_eq!(ScopusClient::search_expression(&CitationQuery::Title("of a".into())), None);
    }

    #[tokio::test]
    async fn test_doi_lookup() -> Result<()> {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/content/search/scopus")
            .match_header("X-ELS-APIKey", "secret")
            .match_query(Matcher::UrlEncoded("query".into(), "DOI(\"10.1000/x\")".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "search-results": {
                        "opensearch:totalResults": "1",
                        "entry": [{
                            "dc:identifier": "SCOPUS_ID:85000000001",
                            "prism:doi": "10.1000/X",
                            "dc:title": "Small mammal abundance in boreal bogs",
                            "dc:description": "We trapped voles."
                        }]
                    }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let client = ScopusClient::new("secret", server.url(), Duration::from_secs(5))?;
        let record = client.lookup(&CitationQuery::Doi("10.1000/x".into())).await?;
        mock.assert_async().await;

        let record = record.ok_or_else(|| RefSpeciesError::Parse("no record".into()))?;
        assert_eq!(record.service_id, "SCOPUS_ID:85000000001");
        assert_eq!(record.doi.as_deref(), Some("10.1000/X"));
        assert_eq!(record.abstract_text.as_deref(), Some("We trapped voles."));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_result_set() -> Result<()> {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"search-results":{"opensearch:totalResults":"0","entry":[{"@_fa":"true","error":"Result set was empty"}]}}"#)
            .create_async()
            .await;

        let client = ScopusClient::new("k", server.url(), Duration::from_secs(5))?;
        let record = client.lookup(&CitationQuery::Title("Voles of Lapland revisited".into())).await?;
        assert_eq!(record, None);
        Ok(())
    }

    fn scopus_id_mock(server: &mut mockito::ServerGuard, doi: &str) -> mockito::Mock {
        server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::UrlEncoded("query".into(), format!("DOI(\"{}\")", doi)))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "search-results": {
                        "entry": [{
                            "dc:identifier": "SCOPUS_ID:85000000001",
                            "prism:doi": doi,
                            "dc:title": "Voles under deep snow cover"
                        }]
                    }
                })
                .to_string(),
            )
    }

    #[tokio::test]
    async fn test_reference_list_from_abstract_endpoint() -> Result<()> {
        let mut server = Server::new_async().await;
        let id_mock = scopus_id_mock(&mut server, "10.1000/seen").expect(1).create_async().await;
        let refs_mock = server
            .mock("GET", "/content/abstract/scopus_id/85000000001/references")
            .match_header("X-ELS-APIKey", "secret")
            .match_query(Matcher::UrlEncoded("count".into(), "20".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "abstract-retrieval-response": {
                        "references": {
                            "reference": [
                                {"ref-info": {
                                    "ref-title": {"ref-titletext": "Small mammal abundance in bogs"},
                                    "ref-publicationtitle": {"prism:doi": "10.1000/a."}
                                }},
                                {"ref-info": {
                                    "ref-title": {"ref-titletext": "Shrew density along rivers"}
                                }},
                                {"ref-info": {
                                    "ref-title": "Lemming outbreaks revisited",
                                    "ref-publicationtitle": {"prism:doi": "10.1000/b"}
                                }},
                                {"ref-info": {
                                    "ref-titletext": "Erratum",
                                    "ref-publicationtitle": {"prism:doi": "10.1000/c"}
                                }}
                            ]
                        }
                    }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let related_mock = server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::Regex("TITLE-ABS-KEY".into()))
            .expect(0)
            .create_async()
            .await;

        let client = ScopusClient::new("secret", server.url(), Duration::from_secs(5))?;
        let records = client.references(Some("10.1000/seen"), "Voles under deep snow cover").await?;
        id_mock.assert_async().await;
        refs_mock.assert_async().await;
        related_mock.assert_async().await;

        let dois: Vec<Option<&str>> = records.iter().map(|r| r.doi.as_deref()).collect();
        assert_eq!(dois, vec![Some("10.1000/a"), Some("10.1000/b")]);
        assert_eq!(records[1].title, "Lemming outbreaks revisited");
        Ok(())
    }

    #[tokio::test]
    async fn test_title_search_when_reference_view_missing() -> Result<()> {
        let mut server = Server::new_async().await;
        let _id_mock = scopus_id_mock(&mut server, "10.1000/seen").create_async().await;
        let _refs_mock = server
            .mock("GET", "/content/abstract/scopus_id/85000000001/references")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;
        let related_mock = server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded(
                    "query".into(),
                    "TITLE-ABS-KEY(\"voles\") AND TITLE-ABS-KEY(\"under\") AND TITLE-ABS-KEY(\"deep\")".into(),
                ),
                Matcher::UrlEncoded("count".into(), "15".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "search-results": {
                        "entry": [
                            {"dc:identifier": "SCOPUS_ID:2", "prism:doi": "10.1000/r", "dc:title": "Winter survival of voles"},
                            {"dc:identifier": "SCOPUS_ID:3", "dc:title": "Snow depth and rodent cycles"}
                        ]
                    }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let client = ScopusClient::new("k", server.url(), Duration::from_secs(5))?;
        let records = client.references(Some("10.1000/seen"), "Voles under deep snow cover").await?;
        related_mock.assert_async().await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].doi.as_deref(), Some("10.1000/r"));
        Ok(())
    }

    #[test]
    fn test_single_reference_object() {
        let body = json!({
            "abstract-retrieval-response": {
                "references": {
                    "reference": {"ref-info": {
                        "ref-titletext": "Population cycles of boreal voles",
                        "ref-publicationtitle": {"prism:doi": "10.1000/v"}
                    }}
                }
            }
        });
        let records = parse_reference_list(&body);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Population cycles of boreal voles");
        assert!(parse_reference_list(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() -> Result<()> {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_header("retry-after", "2")
            .create_async()
            .await;

        let client = ScopusClient::new("k", server.url(), Duration::from_secs(5))?;
        let err = client
            .lookup(&CitationQuery::Doi("10.1000/x".into()))
            .await
            .err()
            .ok_or_else(|| RefSpeciesError::Parse("expected error".into()))?;
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        Ok(())
    }

    #[tokio::test]
    async fn test_unauthorized_is_permanent() -> Result<()> {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/content/search/scopus")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("invalid key")
            .create_async()
            .await;

        let client = ScopusClient::new("k", server.url(), Duration::from_secs(5))?;
        let result = client.lookup(&CitationQuery::Doi("10.1000/x".into())).await;
        assert!(matches!(result, Err(RefSpeciesError::Permanent { code: 401, .. })));
        Ok(())
    }
}
