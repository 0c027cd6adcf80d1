//! Breadth-first reference-graph traversal.
//!
//! The engine walks outward from the seed paper one document at a time:
//! text extraction, species extraction, then (below the depth limit)
//! reference parsing and resolution, enqueueing every newly discovered
//! document one hop further out. Documents whose text has no reference
//! section (abstract-only reads, mostly) fall back to the bibliographic
//! service's reference list when a [`ReferenceSource`] is wired in. All run
//! state lives in a
//! [`TraversalSession`] so a run can be checkpointed and resumed.

use crate::accumulator::ResultAccumulator;
use crate::checkpoint::CheckpointStore;
use crate::citation::normalize_identifier;
use crate::config::RunConfig;
use crate::document::{Document, DocumentSource, DocumentState, ResolvedReference};
use crate::error::{RefSpeciesError, ResolutionFailure, Result};
use crate::fetch::DocumentFetcher;
use crate::pdf_text::TextExtractor;
use crate::references::ReferenceParser;
use crate::resolver::{resolve_filtered, Admission, CitationResolver, KeywordFilter, ReferenceSource};
use crate::seed::{seed_identifier, seed_title};
use crate::species::{SpeciesExtractor, TokenUsage};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Counters for everything that happened during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Documents dequeued, including ones that failed
    pub papers_processed: usize,
    /// Documents with no usable text
    pub papers_failed: usize,
    /// Documents read from their abstract instead of a PDF
    pub papers_from_abstract: usize,
    pub pdf_downloads_failed: usize,
    pub documents_without_references: usize,
    /// Documents expanded through the service's reference list
    #[serde(default)]
    pub documents_expanded_from_service: usize,
    pub citations_seen: usize,
    pub citations_resolved: usize,
    pub citations_already_visited: usize,
    pub citations_filtered: usize,
    pub citations_not_found: usize,
    pub citations_malformed: usize,
    /// Service errors that outlived the retry policy
    pub citations_failed: usize,
    /// Citations left unresolved once the paper budget was committed
    pub citations_over_budget: usize,
    pub species_extraction_failures: usize,
    pub malformed_llm_responses: usize,
    pub rows: usize,
    pub duplicate_rows: u64,
    pub max_distance_reached: u32,
    pub token_usage: TokenUsage,
}

/// Mutable state of one traversal run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalSession {
    pub seed_identifier: String,
    /// Normalized identifiers of every processed or enqueued document
    visited: BTreeSet<String>,
    queue: VecDeque<Document>,
    next_sequence: u64,
    pub accumulator: ResultAccumulator,
    summary: RunSummary,
}

impl TraversalSession {
    /// A fresh session with `seed` queued at distance 0.
    pub fn new(seed: Document) -> Self {
        let mut visited = BTreeSet::new();
        visited.insert(normalize_identifier(&seed.identifier));
        Self {
            seed_identifier: seed.identifier.clone(),
            visited,
            queue: VecDeque::from([seed]),
            next_sequence: 1,
            accumulator: ResultAccumulator::new(),
            summary: RunSummary::default(),
        }
    }

    pub fn is_visited(&self, identifier: &str) -> bool {
        self.visited.contains(&normalize_identifier(identifier))
    }

    /// Queue a newly discovered document; `false` if it was seen before.
    pub fn enqueue(&mut self, resolved: ResolvedReference, distance: u32) -> bool {
        if !self.visited.insert(normalize_identifier(&resolved.identifier)) {
            return false;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.queue.push_back(Document::discovered(resolved, distance, sequence));
        true
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn papers_processed(&self) -> usize {
        self.summary.papers_processed
    }

    /// Summary with the row counters filled in.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            rows: self.accumulator.len(),
            duplicate_rows: self.accumulator.duplicates(),
            ..self.summary.clone()
        }
    }
}

/// Limits and pacing of a run.
#[derive(Debug, Clone)]
pub struct TraversalOptions {
    pub max_papers: usize,
    pub max_depth: u32,
    pub keywords: KeywordFilter,
    pub max_citations_per_paper: Option<usize>,
    pub paper_delay: Duration,
    pub extraction_timeout: Duration,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            max_papers: 20,
            max_depth: 2,
            keywords: KeywordFilter::default(),
            max_citations_per_paper: None,
            paper_delay: Duration::from_secs(3),
            extraction_timeout: Duration::from_secs(120),
        }
    }
}

impl From<&RunConfig> for TraversalOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            max_papers: config.max_papers,
            max_depth: config.max_depth,
            keywords: config.keywords.clone(),
            max_citations_per_paper: config.max_citations_per_paper,
            paper_delay: config.paper_delay,
            extraction_timeout: config.extraction_timeout,
        }
    }
}

/// The components a traversal is wired from.
pub struct Components {
    pub text_extractor: Arc<dyn TextExtractor>,
    pub parser: Arc<dyn ReferenceParser>,
    pub resolver: Arc<dyn CitationResolver>,
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub species: Arc<dyn SpeciesExtractor>,
    /// Consulted when a document's text yields no citations
    pub reference_source: Option<Arc<dyn ReferenceSource>>,
}

/// Drives a [`TraversalSession`] to completion.
pub struct TraversalEngine {
    components: Components,
    options: TraversalOptions,
    checkpoint: Option<CheckpointStore>,
}

impl TraversalEngine {
    pub fn new(components: Components, options: TraversalOptions) -> Self {
        Self {
            components,
            options,
            checkpoint: None,
        }
    }

    /// Save the session to `store` after every document.
    pub fn with_checkpoint(mut self, store: CheckpointStore) -> Self {
        self.checkpoint = Some(store);
        self
    }

    /// Read the seed PDF and build a fresh session around it.
    ///
    /// A seed without extractable text is fatal: nothing could be produced.
    pub async fn start_session(&self, seed_path: &Path) -> Result<TraversalSession> {
        let text = self
            .extract_pdf(seed_path.to_path_buf())
            .await
            .map_err(|e| RefSpeciesError::SeedUnreadable(e.to_string()))?;

        let identifier = seed_identifier(&text);
        let title = seed_title(&text);
        info!(doi = %identifier, title = %title, "Seed paper loaded");

        let mut seed = Document::seed(identifier, title, seed_path.to_path_buf());
        seed.raw_text = Some(text);
        Ok(TraversalSession::new(seed))
    }

    /// Start a session, or pick up the checkpointed one when `resume` is set.
    pub async fn prepare_session(&self, seed_path: &Path, resume: bool) -> Result<TraversalSession> {
        let session = self.start_session(seed_path).await?;
        if !resume {
            return Ok(session);
        }
        let Some(store) = &self.checkpoint else {
            return Ok(session);
        };
        match store.load_for_seed(&session.seed_identifier)? {
            Some(saved) => {
                info!(
                    processed = saved.papers_processed(),
                    queued = saved.queue_len(),
                    "Resuming from checkpoint"
                );
                Ok(saved)
            }
            None => Ok(session),
        }
    }

    /// Process queued documents until the queue drains or the paper budget is spent.
    pub async fn run(&self, session: &mut TraversalSession) -> Result<()> {
        let mut first = true;

        loop {
            if session.summary.papers_processed >= self.options.max_papers {
                info!(max_papers = self.options.max_papers, "Paper budget exhausted");
                break;
            }
            let Some(mut document) = session.queue.pop_front() else {
                break;
            };

            if !first && !self.options.paper_delay.is_zero() {
                tokio::time::sleep(self.options.paper_delay).await;
            }
            first = false;

            session.summary.papers_processed += 1;
            session.summary.max_distance_reached = session.summary.max_distance_reached.max(document.distance);
            info!(
                doi = %document.identifier,
                distance = document.distance,
                processed = session.summary.papers_processed,
                queued = session.queue.len(),
                "Processing document"
            );

            let state = self.process_document(session, &mut document).await;
            debug!(doi = %document.identifier, state = ?state, "Document finished");

            if let Some(store) = &self.checkpoint {
                if let Err(e) = store.save(session) {
                    warn!(error = %e, "Failed to write checkpoint");
                }
            }
        }

        let summary = session.summary();
        info!(
            processed = summary.papers_processed,
            failed = summary.papers_failed,
            rows = summary.rows,
            "Traversal complete"
        );
        Ok(())
    }

    /// Seed path to finished session.
    pub async fn run_from_seed(&self, seed_path: &Path) -> Result<TraversalSession> {
        let mut session = self.start_session(seed_path).await?;
        self.run(&mut session).await?;
        Ok(session)
    }

    async fn process_document(&self, session: &mut TraversalSession, document: &mut Document) -> DocumentState {
        let Some(text) = self.document_text(session, document).await else {
            session.summary.papers_failed += 1;
            return DocumentState::Failed;
        };
        document.raw_text = Some(text);
        debug!(doi = %document.identifier, state = ?DocumentState::TextExtracted, "Text ready");

        match self.components.species.extract(document).await {
            Ok(extraction) => {
                session.summary.token_usage.add(extraction.usage);
                if extraction.malformed {
                    session.summary.malformed_llm_responses += 1;
                }
                let added = session.accumulator.extend(document.sequence, extraction.rows);
                info!(doi = %document.identifier, rows = added, "Species rows accumulated");
            }
            Err(e) => {
                session.summary.species_extraction_failures += 1;
                warn!(doi = %document.identifier, error = %e, "Species extraction failed");
            }
        }
        debug!(doi = %document.identifier, state = ?DocumentState::SpeciesExtracted, "Species done");

        if document.distance >= self.options.max_depth {
            debug!(doi = %document.identifier, "Depth limit reached, not expanding");
            return DocumentState::Done;
        }

        self.expand(session, document).await;
        debug!(doi = %document.identifier, state = ?DocumentState::ReferencesExpanded, "References done");
        DocumentState::Done
    }

    /// Full text of `document`, from cache, PDF, or abstract, in that order.
    async fn document_text(&self, session: &mut TraversalSession, document: &Document) -> Option<String> {
        if let Some(text) = document.raw_text.as_ref().filter(|t| !t.trim().is_empty()) {
            return Some(text.clone());
        }

        let pdf_path = match &document.source {
            DocumentSource::LocalPdf(path) => Some(path.clone()),
            DocumentSource::RemotePdf(url) => {
                match self.components.fetcher.fetch(&document.identifier, url).await {
                    Ok(path) => Some(path),
                    Err(e) => {
                        session.summary.pdf_downloads_failed += 1;
                        warn!(doi = %document.identifier, url = %url, error = %e, "PDF download failed");
                        None
                    }
                }
            }
            DocumentSource::Unavailable => None,
        };

        if let Some(path) = pdf_path {
            match self.extract_pdf(path).await {
                Ok(text) => return Some(text),
                Err(e) => warn!(doi = %document.identifier, error = %e, "Text extraction failed"),
            }
        }

        let abstract_text = document.abstract_text.as_deref()?;
        session.summary.papers_from_abstract += 1;
        info!(doi = %document.identifier, "Using abstract instead of full text");
        Some(format!("Title: {}\n\nAbstract: {}", document.title, abstract_text))
    }

    /// Run the blocking extractor off the async runtime, under a deadline.
    async fn extract_pdf(&self, path: PathBuf) -> Result<String> {
        let extractor = Arc::clone(&self.components.text_extractor);
        let shown = path.display().to_string();
        let task = tokio::task::spawn_blocking(move || extractor.extract_text(&path));

        match tokio::time::timeout(self.options.extraction_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(RefSpeciesError::TextExtraction(format!("{}: extractor task failed: {}", shown, e))),
            Err(_) => Err(RefSpeciesError::TextExtraction(format!("{}: timed out", shown))),
        }
    }

    /// True once processed plus queued documents fill the paper budget.
    fn budget_committed(&self, session: &TraversalSession) -> bool {
        session.summary.papers_processed + session.queue.len() >= self.options.max_papers
    }

    fn cap_reached(&self, attempts: usize) -> bool {
        match self.options.max_citations_per_paper {
            Some(cap) if attempts >= cap => {
                debug!(cap, "Citation cap reached for document");
                true
            }
            _ => false,
        }
    }

    /// Count the citation that hit the budget plus everything after it.
    fn skip_over_budget(session: &mut TraversalSession, rest: usize) {
        session.summary.citations_seen += rest;
        session.summary.citations_over_budget += rest + 1;
        debug!(skipped = rest + 1, "Paper budget committed, stopping expansion");
    }

    fn enqueue_resolved(session: &mut TraversalSession, resolved: ResolvedReference, distance: u32) {
        let identifier = resolved.identifier.clone();
        if session.enqueue(resolved, distance) {
            session.summary.citations_resolved += 1;
            info!(doi = %identifier, distance, "Enqueued document");
        } else {
            session.summary.citations_already_visited += 1;
            debug!(doi = %identifier, "Already visited");
        }
    }

    /// Resolve the document's citations in order, enqueueing new documents.
    async fn expand(&self, session: &mut TraversalSession, document: &Document) {
        let text = document.raw_text.as_deref().unwrap_or_default();
        let next_distance = document.distance + 1;
        let keywords = &self.options.keywords;

        let mut any_citation = false;
        let mut attempts = 0;

        let mut citations = self.components.parser.citations(text);
        while let Some(citation) = citations.next() {
            any_citation = true;
            session.summary.citations_seen += 1;

            if self.budget_committed(session) {
                Self::skip_over_budget(session, citations.by_ref().count());
                break;
            }

            if keywords.admit(&citation) == Admission::Skip {
                session.summary.citations_filtered += 1;
                continue;
            }

            if self.cap_reached(attempts) {
                break;
            }
            attempts += 1;

            match resolve_filtered(self.components.resolver.as_ref(), &citation, keywords).await {
                Ok(resolved) => Self::enqueue_resolved(session, resolved, next_distance),
                Err(RefSpeciesError::Resolution(failure)) => match failure {
                    ResolutionFailure::Filtered => session.summary.citations_filtered += 1,
                    ResolutionFailure::NotFound => session.summary.citations_not_found += 1,
                    ResolutionFailure::Malformed => session.summary.citations_malformed += 1,
                },
                Err(e) => {
                    session.summary.citations_failed += 1;
                    warn!(error = %e, citation = %preview(&citation), "Citation resolution failed");
                }
            }
        }

        if !any_citation && !self.expand_from_service(session, document).await {
            session.summary.documents_without_references += 1;
            info!(doi = %document.identifier, "No references found");
        }
    }

    /// Enqueue the service's reference list for `document`; `false` when
    /// there is no source or it knows no references.
    async fn expand_from_service(&self, session: &mut TraversalSession, document: &Document) -> bool {
        let Some(source) = &self.components.reference_source else {
            return false;
        };
        if self.budget_committed(session) {
            debug!(doi = %document.identifier, "Paper budget committed, not asking for references");
            return false;
        }

        let references = match source.references(document).await {
            Ok(references) if !references.is_empty() => references,
            Ok(_) => return false,
            Err(e) => {
                warn!(doi = %document.identifier, error = %e, "Reference list lookup failed");
                return false;
            }
        };
        session.summary.documents_expanded_from_service += 1;
        info!(doi = %document.identifier, count = references.len(), "Expanding from service reference list");

        let next_distance = document.distance + 1;
        let mut attempts = 0;
        let mut references = references.into_iter();
        while let Some(reference) = references.next() {
            session.summary.citations_seen += 1;

            if self.budget_committed(session) {
                Self::skip_over_budget(session, references.by_ref().count());
                break;
            }

            // Service records carry the real title
            if !self.options.keywords.matches(&reference.title) {
                session.summary.citations_filtered += 1;
                continue;
            }

            if self.cap_reached(attempts) {
                break;
            }
            attempts += 1;

            Self::enqueue_resolved(session, reference, next_distance);
        }
        true
    }
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}
