//! refspecies - Reference-graph species observation extractor
//!
//! Walks the citation graph of a seed paper breadth first and tabulates the
//! species observations reported in every paper it reaches.
//!
//! ## Usage
//!
//! ### Traversal
//! ```bash
//! refspecies run --seed-paper seed.pdf --max-papers 20 --max-depth 2 --keywords mammal,rodent
//! refspecies run --seed-paper seed.pdf --resume
//! ```
//!
//! ### Inspect a paper's reference list
//! ```bash
//! refspecies references seed.pdf
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use refspecies::checkpoint::CheckpointStore;
use refspecies::config::{RunConfig, ServiceKind};
use refspecies::crossref::CrossrefClient;
use refspecies::fetch::PdfFetcher;
use refspecies::openalex::OpenAlexClient;
use refspecies::output::{write_observations_csv, write_summary};
use refspecies::pdf_text::{PdfTextExtractor, TextExtractor};
use refspecies::references::{HeadingReferenceParser, ReferenceParser};
use refspecies::resolver::{BibliographicResolver, BibliographicService, KeywordFilter, PdfLocator};
use refspecies::scopus::ScopusClient;
use refspecies::species::{LlmProvider, LlmSpeciesExtractor};
use refspecies::traversal::{Components, TraversalEngine, TraversalOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Reference-graph species observation extractor
#[derive(Parser)]
#[command(name = "refspecies")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Traverse the reference graph of a seed paper and extract species observations
    Run(RunArgs),

    /// Print the citations parsed from a PDF's reference section
    References {
        /// PDF to parse
        pdf: PathBuf,

        /// Reference section headings (comma-separated)
        #[arg(long, value_delimiter = ',')]
        headings: Vec<String>,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Seed paper (PDF)
    #[arg(long)]
    seed_paper: PathBuf,

    /// Bibliographic service API key
    #[arg(long, env = "BIBLIO_API_KEY", hide_env_values = true)]
    biblio_key: String,

    /// Language-model API key
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    llm_key: String,

    /// Output directory
    #[arg(short, long, default_value = "./output")]
    output: PathBuf,

    /// Maximum number of papers to process, seed included
    #[arg(long, default_value_t = 20)]
    max_papers: usize,

    /// Maximum citation distance from the seed
    #[arg(long, default_value_t = 2)]
    max_depth: u32,

    /// Only follow citations mentioning one of these keywords (comma-separated)
    #[arg(long)]
    keywords: Option<String>,

    /// Bibliographic service used to resolve citations
    #[arg(long, value_enum, default_value_t = ServiceKind::Scopus)]
    service: ServiceKind,

    /// Language-model API flavour
    #[arg(long, value_enum, default_value_t = LlmProvider::Anthropic)]
    llm_provider: LlmProvider,

    /// Model name (default depends on the provider)
    #[arg(long)]
    llm_model: Option<String>,

    /// Language-model API base URL (default depends on the provider)
    #[arg(long)]
    llm_base_url: Option<String>,

    /// Contact e-mail for the OpenAlex polite pool
    #[arg(long, env = "OPENALEX_MAILTO")]
    mailto: Option<String>,

    /// Resolve at most this many citations per paper
    #[arg(long)]
    max_citations: Option<usize>,

    /// Pause between papers, in seconds
    #[arg(long, default_value_t = 3)]
    paper_delay_secs: u64,

    /// Continue from the checkpoint in the output directory
    #[arg(long)]
    resume: bool,

    /// Delete the checkpoint in the output directory before starting
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let result = match cli.command {
        Commands::Run(args) => run_traversal(args).await,
        Commands::References { pdf, headings } => print_references(pdf, headings),
    };

    if let Err(e) = result {
        error!(error = %e, "Run failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Traversal
// ============================================================================

fn build_config(args: RunArgs) -> RunConfig {
    let mut config = RunConfig::new(args.seed_paper, args.biblio_key, args.llm_key);
    config.output_dir = args.output;
    config.service = args.service;
    config.openalex_mailto = args.mailto;
    config.max_papers = args.max_papers;
    config.max_depth = args.max_depth;
    config.keywords = args.keywords.as_deref().map(KeywordFilter::parse).unwrap_or_default();
    config.max_citations_per_paper = args.max_citations;
    config.paper_delay = Duration::from_secs(args.paper_delay_secs);
    config.resume = args.resume;

    let provider = args.llm_provider;
    config.llm.provider = provider;
    config.llm.model = args.llm_model.unwrap_or_else(|| provider.default_model().to_string());
    config.llm.base_url = args.llm_base_url.unwrap_or_else(|| provider.default_base_url().to_string());
    config
}

/// Wire the production components for `config`.
fn build_engine(config: &RunConfig) -> Result<TraversalEngine> {
    let service: Arc<dyn BibliographicService> = match config.service {
        ServiceKind::Scopus => Arc::new(
            ScopusClient::new(&config.biblio_api_key, &config.scopus_base_url, config.http_timeout)
                .context("Failed to create Scopus client")?,
        ),
        ServiceKind::Crossref => Arc::new(
            CrossrefClient::new(&config.biblio_api_key, &config.crossref_base_url, config.http_timeout)
                .context("Failed to create Crossref client")?,
        ),
    };
    let locator: Arc<dyn PdfLocator> = Arc::new(
        OpenAlexClient::new(&config.openalex_base_url, config.openalex_mailto.clone(), config.http_timeout)
            .context("Failed to create OpenAlex client")?,
    );

    let headings: Vec<&str> = config.reference_headings.iter().map(String::as_str).collect();
    let parser = HeadingReferenceParser::with_headings(&headings).context("Invalid reference headings")?;
    let resolver = Arc::new(BibliographicResolver::new(service, Some(locator), config.retry));

    let components = Components {
        text_extractor: Arc::new(PdfTextExtractor::new()),
        parser: Arc::new(parser),
        resolver: resolver.clone(),
        reference_source: Some(resolver),
        fetcher: Arc::new(
            PdfFetcher::new(config.pdf_cache_dir(), config.http_timeout, config.retry)
                .context("Failed to create PDF fetcher")?,
        ),
        species: Arc::new(
            LlmSpeciesExtractor::new(config.llm.clone(), config.retry)
                .context("Failed to create language-model client")?,
        ),
    };

    Ok(TraversalEngine::new(components, TraversalOptions::from(config))
        .with_checkpoint(CheckpointStore::new(config.checkpoint_path())))
}

/// Create the output directory; `fresh` drops a checkpoint left by an earlier run.
fn prepare_output(config: &RunConfig, fresh: bool) -> Result<()> {
    std::fs::create_dir_all(config.output_dir()).context("Failed to create output directory")?;
    if fresh {
        CheckpointStore::new(config.checkpoint_path())
            .clear()
            .context("Failed to delete checkpoint")?;
    }
    Ok(())
}

async fn run_traversal(args: RunArgs) -> Result<()> {
    let fresh = args.fresh;
    let config = build_config(args);
    config.validate().context("Invalid configuration")?;

    prepare_output(&config, fresh)?;
    println!("Output folder: {}", config.output_dir().display());
    info!(
        seed = %config.seed_paper.display(),
        max_papers = config.max_papers,
        max_depth = config.max_depth,
        service = ?config.service,
        model = %config.llm.model,
        "Starting traversal"
    );

    let engine = build_engine(&config)?;

    println!("\n--- Seed paper ---");
    let mut session = engine
        .prepare_session(&config.seed_paper, config.resume)
        .await
        .context("Failed to read seed paper")?;
    println!("Seed: {}", session.seed_identifier);

    println!("\n--- Traversal ---");
    engine.run(&mut session).await.context("Traversal failed")?;

    let rows = session.accumulator.rows();
    let summary = session.summary();

    let csv_path = config.csv_path();
    write_observations_csv(&csv_path, &rows).context("Failed to write observation table")?;
    println!("Saved: {:?}", csv_path);

    let summary_path = config.summary_path();
    write_summary(&summary_path, &session.seed_identifier, &summary).context("Failed to write run summary")?;
    println!("Saved: {:?}", summary_path);

    println!("\n--- Summary ---");
    println!("Papers processed:  {}", summary.papers_processed);
    println!("Papers failed:     {}", summary.papers_failed);
    println!("Citations resolved: {}", summary.citations_resolved);
    println!("Observation rows:  {}", summary.rows);
    println!("Max distance:      {}", summary.max_distance_reached);
    println!(
        "Tokens used:       {} in / {} out",
        summary.token_usage.input_tokens, summary.token_usage.output_tokens
    );

    Ok(())
}

// ============================================================================
// Reference Inspection
// ============================================================================

fn print_references(pdf: PathBuf, headings: Vec<String>) -> Result<()> {
    let text = PdfTextExtractor::new()
        .extract_text(&pdf)
        .with_context(|| format!("Failed to read {}", pdf.display()))?;

    let parser = if headings.is_empty() {
        HeadingReferenceParser::default()
    } else {
        let labels: Vec<&str> = headings.iter().map(String::as_str).collect();
        HeadingReferenceParser::with_headings(&labels).context("Invalid reference headings")?
    };

    let mut count = 0;
    for (i, citation) in parser.citations(&text).enumerate() {
        println!("[{}] {}", i + 1, citation);
        count += 1;
    }

    if count == 0 {
        println!("No reference section found in {}", pdf.display());
    } else {
        println!("\n{} citations", count);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn run_args(extra: &[&str]) -> Result<RunArgs> {
        let mut argv = vec!["refspecies", "run", "--seed-paper", "seed.pdf", "--biblio-key", "bk", "--llm-key", "lk"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv)?.command {
            Commands::Run(args) => Ok(args),
            Commands::References { .. } => anyhow::bail!("expected the run command"),
        }
    }

    #[test]
    fn test_build_config_carries_llm_key_and_provider_defaults() -> Result<()> {
        let config = build_config(run_args(&["--llm-provider", "openai", "--keywords", "mammal,vole"])?);
        assert_eq!(config.llm.api_key, "lk");
        assert_eq!(config.biblio_api_key, "bk");
        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
        assert_eq!(config.llm.model, LlmProvider::OpenAi.default_model());
        assert_eq!(config.llm.base_url, LlmProvider::OpenAi.default_base_url());
        assert_eq!(config.keywords.keywords(), &["mammal".to_string(), "vole".to_string()]);

        let config = build_config(run_args(&["--llm-model", "claude-custom"])?);
        assert_eq!(config.llm.provider, LlmProvider::Anthropic);
        assert_eq!(config.llm.model, "claude-custom");
        assert_eq!(config.llm.api_key, "lk");
        Ok(())
    }

    #[test]
    fn test_fresh_conflicts_with_resume() {
        assert!(run_args(&["--fresh", "--resume"]).is_err());
    }

    #[test]
    fn test_fresh_deletes_checkpoint() -> Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path().join("out").to_string_lossy().to_string();
        let config = build_config(run_args(&["--output", out.as_str()])?);

        prepare_output(&config, false)?;
        std::fs::write(config.checkpoint_path(), "{}")?;
        prepare_output(&config, false)?;
        assert!(config.checkpoint_path().exists());

        prepare_output(&config, true)?;
        assert!(!config.checkpoint_path().exists());
        Ok(())
    }
}
