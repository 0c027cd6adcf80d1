//! Citation resolution: raw citation text to a retrievable document stub.
//!
//! A [`BibliographicResolver`] derives a query from the citation (its DOI, or
//! a guessed title), asks the configured [`BibliographicService`] for a
//! record, and then asks a [`PdfLocator`] where an open-access PDF lives.
//! Keyword gating happens in [`resolve_filtered`] so that citations without
//! a keyword never reach the network.
//!
//! Documents whose text has no reference section can still be expanded
//! through a [`ReferenceSource`], which asks the service for the work's
//! reference list.

use crate::citation::{extract_doi, guess_title, query_words};
use crate::document::{Document, ResolvedReference};
use crate::error::{ResolutionFailure, Result};
use crate::retry::RetryPolicy;
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Resolved titles this short are treated as junk records
pub const MIN_TITLE_CHARS: usize = 10;

/// What to ask the bibliographic service for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CitationQuery {
    Doi(String),
    Title(String),
}

/// A bibliographic service hit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BibliographicRecord {
    /// Service-specific ID (e.g. `SCOPUS_ID:85012345678`)
    pub service_id: String,
    pub doi: Option<String>,
    pub title: String,
    pub abstract_text: Option<String>,
}

/// Open-access details for a DOI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenAccessRecord {
    pub pdf_url: Option<String>,
    pub abstract_text: Option<String>,
}

/// Looks up citation metadata (Scopus, Crossref).
pub trait BibliographicService: Send + Sync {
    fn name(&self) -> &'static str;

    /// Best match for `query`; `Ok(None)` when the service knows nothing.
    fn lookup<'a>(&'a self, query: &'a CitationQuery) -> BoxFuture<'a, Result<Option<BibliographicRecord>>>;

    /// Works cited by the work with `doi`, or works related to `title` when
    /// the service has no reference list. Services without either answer
    /// with an empty list.
    fn references<'a>(
        &'a self,
        _doi: Option<&'a str>,
        _title: &'a str,
    ) -> BoxFuture<'a, Result<Vec<BibliographicRecord>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// Finds an open-access PDF for a DOI (OpenAlex).
pub trait PdfLocator: Send + Sync {
    fn locate<'a>(&'a self, doi: &'a str) -> BoxFuture<'a, Result<Option<OpenAccessRecord>>>;
}

/// Maps one raw citation to a document stub.
pub trait CitationResolver: Send + Sync {
    fn resolve<'a>(&'a self, citation: &'a str) -> BoxFuture<'a, Result<ResolvedReference>>;
}

/// Service-side reference list of a document, used when its text yields no citations.
pub trait ReferenceSource: Send + Sync {
    fn references<'a>(&'a self, document: &'a Document) -> BoxFuture<'a, Result<Vec<ResolvedReference>>>;
}

/// Case-insensitive substring filter over citation text and titles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

/// Outcome of checking a raw citation against the keyword filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Resolve and accept
    Resolve,
    /// Citation carries a DOI or no guessable title; resolve, then check the resolved title
    CheckResolvedTitle,
    /// Drop without touching the network
    Skip,
}

impl KeywordFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// Parse a comma-separated keyword list.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// True when no keywords are configured or any keyword occurs in `text`.
    pub fn matches(&self, text: &str) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let lower = text.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// Early decision from the raw citation alone.
    ///
    /// Only a citation whose guessed title is its real title can be rejected
    /// here; with a DOI or no title guess the resolved title decides.
    pub fn admit(&self, citation: &str) -> Admission {
        if self.matches(citation) {
            Admission::Resolve
        } else if extract_doi(citation).is_some() || guess_title(citation).is_none() {
            Admission::CheckResolvedTitle
        } else {
            Admission::Skip
        }
    }
}

/// Resolve `citation` honouring `filter`.
///
/// Citations rejected up front fail with [`ResolutionFailure::Filtered`]
/// without calling `resolver`.
pub async fn resolve_filtered(
    resolver: &dyn CitationResolver,
    citation: &str,
    filter: &KeywordFilter,
) -> Result<ResolvedReference> {
    match filter.admit(citation) {
        Admission::Skip => Err(ResolutionFailure::Filtered.into()),
        Admission::Resolve => resolver.resolve(citation).await,
        Admission::CheckResolvedTitle => {
            let resolved = resolver.resolve(citation).await?;
            if filter.matches(&resolved.title) {
                Ok(resolved)
            } else {
                debug!(title = %resolved.title, "Resolved title rejected by keyword filter");
                Err(ResolutionFailure::Filtered.into())
            }
        }
    }
}

/// Derive the lookup query for a raw citation.
pub fn build_query(citation: &str) -> Option<CitationQuery> {
    extract_doi(citation)
        .map(CitationQuery::Doi)
        .or_else(|| guess_title(citation).map(CitationQuery::Title))
}

/// At least half of the guessed title's significant words occur in the hit.
fn title_matches(guess: &str, found: &str) -> bool {
    let words = query_words(guess, 8);
    if words.is_empty() {
        return false;
    }
    let found_words: HashSet<String> = query_words(found, usize::MAX).into_iter().collect();
    let shared = words.iter().filter(|w| found_words.contains(*w)).count();
    shared * 2 >= words.len()
}

/// Default resolver over a bibliographic service plus an optional PDF locator.
pub struct BibliographicResolver {
    service: Arc<dyn BibliographicService>,
    locator: Option<Arc<dyn PdfLocator>>,
    retry: RetryPolicy,
}

impl BibliographicResolver {
    pub fn new(
        service: Arc<dyn BibliographicService>,
        locator: Option<Arc<dyn PdfLocator>>,
        retry: RetryPolicy,
    ) -> Self {
        Self { service, locator, retry }
    }

    async fn lookup(&self, query: &CitationQuery) -> Result<Option<BibliographicRecord>> {
        let service = &self.service;
        self.retry
            .run(service.name(), move || service.lookup(query))
            .await
    }

    async fn find_record(&self, citation: &str) -> Result<BibliographicRecord> {
        let query = build_query(citation).ok_or(ResolutionFailure::Malformed)?;
        debug!(query = ?query, service = self.service.name(), "Resolving citation");

        let record = match &query {
            CitationQuery::Doi(_) => match self.lookup(&query).await? {
                Some(record) => Some(record),
                // Mistyped DOIs are common; retry by title when one is there
                None => match guess_title(citation) {
                    Some(title) => self.lookup_title(&title).await?,
                    None => None,
                },
            },
            CitationQuery::Title(title) => self.lookup_title(title).await?,
        };

        let record = record.ok_or(ResolutionFailure::NotFound)?;
        if record.title.trim().chars().count() <= MIN_TITLE_CHARS {
            debug!(title = %record.title, "Discarding record with implausible title");
            return Err(ResolutionFailure::NotFound.into());
        }
        Ok(record)
    }

    async fn lookup_title(&self, title: &str) -> Result<Option<BibliographicRecord>> {
        let query = CitationQuery::Title(title.to_string());
        Ok(self
            .lookup(&query)
            .await?
            .filter(|record| title_matches(title, &record.title)))
    }

    /// Document stub for a record, with its open-access location when known.
    async fn reference_for(&self, record: BibliographicRecord) -> ResolvedReference {
        let access = match &record.doi {
            Some(doi) => self.locate(doi).await.unwrap_or_default(),
            None => OpenAccessRecord::default(),
        };

        let identifier = record.doi.clone().unwrap_or_else(|| record.service_id.clone());
        info!(identifier = %identifier, title = %record.title, has_pdf = access.pdf_url.is_some(), "Resolved citation");

        ResolvedReference {
            identifier,
            title: record.title.trim().to_string(),
            pdf_url: access.pdf_url,
            abstract_text: record.abstract_text.or(access.abstract_text),
        }
    }

    async fn locate(&self, doi: &str) -> Option<OpenAccessRecord> {
        let locator = self.locator.as_ref()?;
        match self.retry.run("pdf-locator", move || locator.locate(doi)).await {
            Ok(found) => found,
            Err(e) => {
                warn!(doi, error = %e, "Open-access lookup failed");
                None
            }
        }
    }
}

impl CitationResolver for BibliographicResolver {
    fn resolve<'a>(&'a self, citation: &'a str) -> BoxFuture<'a, Result<ResolvedReference>> {
        Box::pin(async move {
            let record = self.find_record(citation).await?;
            Ok(self.reference_for(record).await)
        })
    }
}

impl ReferenceSource for BibliographicResolver {
    /// Only records with a DOI and a plausible title are kept.
    fn references<'a>(&'a self, document: &'a Document) -> BoxFuture<'a, Result<Vec<ResolvedReference>>> {
        Box::pin(async move {
            let doi = extract_doi(&document.identifier);
            let doi = doi.as_deref();
            let title = document.title.as_str();
            let service = &self.service;
            let records = self
                .retry
                .run(service.name(), move || service.references(doi, title))
                .await?;

            let mut references = Vec::new();
            for record in records {
                if record.doi.is_none() || record.title.trim().chars().count() <= MIN_TITLE_CHARS {
                    continue;
                }
                references.push(self.reference_for(record).await);
            }
            debug!(doi = %document.identifier, count = references.len(), "Service reference list");
            Ok(references)
        })
    }
}
