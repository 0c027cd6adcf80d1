//! In-memory stand-ins for every external component, for engine tests.
//!
//! Mocks are cheap to clone and clones share their call counters, so a test
//! can hand one copy to the engine and keep another to inspect afterwards.

use crate::document::{Document, ObservationRow, ResolvedReference};
use crate::error::{RefSpeciesError, ResolutionFailure, Result, TransientKind};
use crate::fetch::DocumentFetcher;
use crate::pdf_text::TextExtractor;
use crate::resolver::{
    BibliographicRecord, BibliographicService, CitationQuery, CitationResolver, OpenAccessRecord, PdfLocator,
    ReferenceSource,
};
use crate::species::{Extraction, SpeciesExtractor, TokenUsage};
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Text extractor serving fixed text per path; unknown paths fail.
#[derive(Clone, Default)]
pub struct MockTextExtractor {
    texts: Arc<HashMap<PathBuf, String>>,
    calls: Arc<AtomicUsize>,
}

impl MockTextExtractor {
    pub fn with_text(mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.texts).insert(path.into(), text.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextExtractor for MockTextExtractor {
    fn extract_text(&self, path: &Path) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts
            .get(path)
            .cloned()
            .ok_or_else(|| RefSpeciesError::TextExtraction(format!("no text for {}", path.display())))
    }
}

/// Resolver answering from a citation -> reference table.
#[derive(Clone, Default)]
pub struct MockCitationResolver {
    table: Arc<HashMap<String, ResolvedReference>>,
    transient: Arc<Vec<String>>,
    calls: Arc<AtomicUsize>,
}

impl MockCitationResolver {
    pub fn with(self, citation: &str, identifier: &str, title: &str) -> Self {
        self.with_reference(
            citation,
            ResolvedReference {
                identifier: identifier.to_string(),
                title: title.to_string(),
                pdf_url: None,
                abstract_text: None,
            },
        )
    }

    pub fn with_reference(mut self, citation: &str, reference: ResolvedReference) -> Self {
        Arc::make_mut(&mut self.table).insert(citation.to_string(), reference);
        self
    }

    /// Make `citation` fail as if the service stayed unavailable.
    pub fn unavailable(mut self, citation: &str) -> Self {
        Arc::make_mut(&mut self.transient).push(citation.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CitationResolver for MockCitationResolver {
    fn resolve<'a>(&'a self, citation: &'a str) -> BoxFuture<'a, Result<ResolvedReference>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.transient.iter().any(|c| c == citation) {
                return Err(RefSpeciesError::Transient(TransientKind::Server(503)));
            }
            self.table
                .get(citation)
                .cloned()
                .ok_or_else(|| ResolutionFailure::NotFound.into())
        })
    }
}

/// Bibliographic service replaying a scripted response sequence.
///
/// Once the script is exhausted every lookup answers `Ok(None)`.
#[derive(Clone, Default)]
pub struct MockService {
    responses: Arc<Mutex<VecDeque<Result<Option<BibliographicRecord>>>>>,
    reference_list: Arc<Vec<BibliographicRecord>>,
    reference_requests: Arc<Mutex<Vec<(Option<String>, String)>>>,
    calls: Arc<AtomicUsize>,
}

impl MockService {
    pub fn respond(self, response: Result<Option<BibliographicRecord>>) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
        self
    }

    /// Reference list returned for every document.
    pub fn with_references(mut self, records: Vec<BibliographicRecord>) -> Self {
        self.reference_list = Arc::new(records);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(doi, title)` of every reference-list request, in order.
    pub fn reference_requests(&self) -> Vec<(Option<String>, String)> {
        self.reference_requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl BibliographicService for MockService {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn lookup<'a>(&'a self, _query: &'a CitationQuery) -> BoxFuture<'a, Result<Option<BibliographicRecord>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().ok().and_then(|mut r| r.pop_front());
            next.unwrap_or(Ok(None))
        })
    }

    fn references<'a>(
        &'a self,
        doi: Option<&'a str>,
        title: &'a str,
    ) -> BoxFuture<'a, Result<Vec<BibliographicRecord>>> {
        Box::pin(async move {
            if let Ok(mut requests) = self.reference_requests.lock() {
                requests.push((doi.map(str::to_string), title.to_string()));
            }
            Ok(self.reference_list.as_ref().clone())
        })
    }
}

/// Reference source answering from a document identifier -> references table.
#[derive(Clone, Default)]
pub struct MockReferenceSource {
    table: Arc<HashMap<String, Vec<ResolvedReference>>>,
    calls: Arc<AtomicUsize>,
}

impl MockReferenceSource {
    pub fn with(mut self, identifier: &str, references: Vec<ResolvedReference>) -> Self {
        Arc::make_mut(&mut self.table).insert(identifier.to_string(), references);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReferenceSource for MockReferenceSource {
    fn references<'a>(&'a self, document: &'a Document) -> BoxFuture<'a, Result<Vec<ResolvedReference>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.table.get(&document.identifier).cloned().unwrap_or_default())
        })
    }
}

/// PDF locator with one fixed answer.
#[derive(Clone)]
pub struct MockLocator {
    answer: Option<OpenAccessRecord>,
    fail: bool,
}

impl MockLocator {
    pub fn new(answer: Option<OpenAccessRecord>) -> Self {
        Self { answer, fail: false }
    }

    pub fn failing() -> Self {
        Self { answer: None, fail: true }
    }
}

impl PdfLocator for MockLocator {
    fn locate<'a>(&'a self, _doi: &'a str) -> BoxFuture<'a, Result<Option<OpenAccessRecord>>> {
        Box::pin(async move {
            if self.fail {
                Err(RefSpeciesError::Permanent {
                    code: 500,
                    message: "locator down".to_string(),
                })
            } else {
                Ok(self.answer.clone())
            }
        })
    }
}

/// Fetcher mapping URLs to local paths; unknown URLs fail permanently.
#[derive(Clone, Default)]
pub struct MockFetcher {
    files: Arc<HashMap<String, PathBuf>>,
    calls: Arc<AtomicUsize>,
}

impl MockFetcher {
    pub fn with_file(mut self, url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Arc::make_mut(&mut self.files).insert(url.into(), path.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DocumentFetcher for MockFetcher {
    fn fetch<'a>(&'a self, _identifier: &'a str, url: &'a str) -> BoxFuture<'a, Result<PathBuf>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.files.get(url).cloned().ok_or_else(|| RefSpeciesError::Permanent {
                code: 404,
                message: format!("no file at {}", url),
            })
        })
    }
}

/// Scripted behaviour of the species extractor for one identifier.
#[derive(Clone, Debug)]
pub enum SpeciesScript {
    /// `(species, location)` pairs
    Rows(Vec<(String, String)>),
    /// Model answered with unusable output
    Malformed,
    /// Service failed after retries
    Unavailable,
}

/// Species extractor recording which documents it saw, in order.
///
/// Documents without a script yield one row named after the identifier.
#[derive(Clone, Default)]
pub struct MockSpeciesExtractor {
    scripts: Arc<HashMap<String, SpeciesScript>>,
    seen: Arc<Mutex<Vec<(String, u32, String)>>>,
}

impl MockSpeciesExtractor {
    pub fn script(mut self, identifier: &str, script: SpeciesScript) -> Self {
        Arc::make_mut(&mut self.scripts).insert(identifier.to_string(), script);
        self
    }

    /// Identifiers in the order they were extracted.
    pub fn order(&self) -> Vec<String> {
        self.seen()
            .into_iter()
            .map(|(id, _, _)| id)
            .collect()
    }

    /// `(identifier, distance, text)` per call.
    pub fn seen(&self) -> Vec<(String, u32, String)> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl SpeciesExtractor for MockSpeciesExtractor {
    fn extract<'a>(&'a self, document: &'a Document) -> BoxFuture<'a, Result<Extraction>> {
        Box::pin(async move {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push((
                    document.identifier.clone(),
                    document.distance,
                    document.raw_text.clone().unwrap_or_default(),
                ));
            }

            let row = |species: &str, location: &str| ObservationRow {
                doi: document.identifier.clone(),
                species: species.to_string(),
                abundance_or_biomass: "not specified".to_string(),
                number: None,
                location: location.to_string(),
                distance_from_seed: document.distance,
                title: document.title.clone(),
            };
            let usage = TokenUsage {
                input_tokens: 100,
                output_tokens: 10,
            };

            match self.scripts.get(&document.identifier) {
                None => Ok(Extraction {
                    rows: vec![row(&format!("Species {}", document.identifier), "UNSPECIFIED")],
                    usage,
                    malformed: false,
                }),
                Some(SpeciesScript::Rows(pairs)) => Ok(Extraction {
                    rows: pairs.iter().map(|(s, l)| row(s, l)).collect(),
                    usage,
                    malformed: false,
                }),
                Some(SpeciesScript::Malformed) => Ok(Extraction {
                    rows: Vec::new(),
                    usage,
                    malformed: true,
                }),
                Some(SpeciesScript::Unavailable) => Err(RefSpeciesError::Transient(TransientKind::Timeout)),
            }
        })
    }
}
