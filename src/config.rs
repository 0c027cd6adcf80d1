//! Run configuration and validation.
//!
//! [`RunConfig::new`] fills in the defaults; [`RunConfig::validate`] must pass
//! before a traversal starts, and every failure is a
//! [`RefSpeciesError::Config`].

use crate::crossref::CROSSREF_API_BASE;
use crate::error::{RefSpeciesError, Result};
use crate::openalex::OPENALEX_API_BASE;
use crate::references::DEFAULT_HEADINGS;
use crate::resolver::KeywordFilter;
use crate::retry::RetryPolicy;
use crate::scopus::SCOPUS_API_BASE;
use crate::species::{LlmConfig, LlmProvider};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Output table file name
pub const OUTPUT_CSV: &str = "species_observations.csv";

/// Run summary file name
pub const SUMMARY_JSON: &str = "run_summary.json";

/// Checkpoint file name
pub const CHECKPOINT_JSON: &str = "checkpoint.json";

/// Downloaded PDFs live in this subdirectory of the output directory
pub const PDF_CACHE_DIR: &str = "pdfs";

/// Bibliographic service used for citation resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ServiceKind {
    /// Elsevier Scopus Search API
    #[default]
    Scopus,
    /// Crossref REST API
    Crossref,
}

/// Everything a traversal run needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub seed_paper: PathBuf,
    pub output_dir: PathBuf,
    pub biblio_api_key: String,
    pub service: ServiceKind,
    pub scopus_base_url: String,
    pub crossref_base_url: String,
    pub openalex_base_url: String,
    /// Contact address for the OpenAlex polite pool
    pub openalex_mailto: Option<String>,
    pub llm: LlmConfig,
    pub max_papers: usize,
    pub max_depth: u32,
    pub keywords: KeywordFilter,
    /// Cap on resolution attempts per document
    pub max_citations_per_paper: Option<usize>,
    /// Pause between documents
    pub paper_delay: Duration,
    pub http_timeout: Duration,
    /// Deadline for extracting text from one PDF
    pub extraction_timeout: Duration,
    pub retry: RetryPolicy,
    pub reference_headings: Vec<String>,
    pub resume: bool,
}

impl RunConfig {
    /// Defaults: `./output`, 20 papers, depth 2, Scopus, Anthropic.
    pub fn new(
        seed_paper: impl Into<PathBuf>,
        biblio_api_key: impl Into<String>,
        llm_api_key: impl Into<String>,
    ) -> Self {
        Self {
            seed_paper: seed_paper.into(),
            output_dir: PathBuf::from("output"),
            biblio_api_key: biblio_api_key.into(),
            service: ServiceKind::Scopus,
            scopus_base_url: SCOPUS_API_BASE.to_string(),
            crossref_base_url: CROSSREF_API_BASE.to_string(),
            openalex_base_url: OPENALEX_API_BASE.to_string(),
            openalex_mailto: None,
            llm: LlmConfig::new(LlmProvider::Anthropic, llm_api_key),
            max_papers: 20,
            max_depth: 2,
            keywords: KeywordFilter::default(),
            max_citations_per_paper: None,
            paper_delay: Duration::from_secs(3),
            http_timeout: Duration::from_secs(30),
            extraction_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            reference_headings: DEFAULT_HEADINGS.iter().map(|h| h.to_string()).collect(),
            resume: false,
        }
    }

    /// Check required parameters and value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.seed_paper.as_os_str().is_empty() {
            return Err(config_error("seed paper path is required"));
        }
        if !self.seed_paper.is_file() {
            return Err(config_error(format!(
                "seed paper not found: {}",
                self.seed_paper.display()
            )));
        }
        if self.biblio_api_key.trim().is_empty() {
            return Err(config_error("bibliographic API key is required"));
        }
        if self.llm.api_key.trim().is_empty() {
            return Err(config_error("language-model API key is required"));
        }
        if self.llm.model.trim().is_empty() {
            return Err(config_error("language-model name must not be empty"));
        }
        if self.max_papers == 0 {
            return Err(config_error("max papers must be at least 1"));
        }
        if self.llm.max_input_chars == 0 {
            return Err(config_error("max input chars must be at least 1"));
        }
        if self.max_citations_per_paper == Some(0) {
            return Err(config_error("max citations per paper must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error("retry attempts must be at least 1"));
        }
        if self.reference_headings.iter().all(|h| h.trim().is_empty()) {
            return Err(config_error("at least one reference heading is required"));
        }

        for (name, value) in [
            ("scopus", &self.scopus_base_url),
            ("crossref", &self.crossref_base_url),
            ("openalex", &self.openalex_base_url),
            ("llm", &self.llm.base_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| config_error(format!("invalid {} base URL {:?}: {}", name, value, e)))?;
        }
        Ok(())
    }

    pub fn csv_path(&self) -> PathBuf {
        self.output_dir.join(OUTPUT_CSV)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join(SUMMARY_JSON)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir.join(CHECKPOINT_JSON)
    }

    pub fn pdf_cache_dir(&self) -> PathBuf {
        self.output_dir.join(PDF_CACHE_DIR)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

fn config_error(message: impl Into<String>) -> RefSpeciesError {
    RefSpeciesError::Config(message.into())
}
