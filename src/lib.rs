//! # refspecies
//!
//! Reference-graph species observation extractor.
//!
//! Starting from a seed paper, the crate walks the citation graph breadth
//! first, resolves each citation through a bibliographic service, and asks a
//! language model for the species observations reported in every paper it
//! reaches. Results land in one deduplicated table.
//!
//! ## Modules
//!
//! - [`traversal`] - BFS engine and run session
//! - [`pdf_text`] - PDF text extraction
//! - [`references`] - Reference-section detection and segmentation
//! - [`resolver`] - Citation resolution and keyword filtering
//! - [`scopus`], [`crossref`], [`openalex`] - Bibliographic service clients
//! - [`species`] - Language-model species extraction
//! - [`accumulator`] - Deduplicated result table
//! - [`checkpoint`] - Resumable run state
//! - [`output`] - CSV and summary writers
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use refspecies::{config::RunConfig, traversal::TraversalEngine};
//!
//! # async fn run(engine: TraversalEngine, config: RunConfig) -> refspecies::Result<()> {
//! let session = engine.run_from_seed(&config.seed_paper).await?;
//! refspecies::output::write_observations_csv(&config.csv_path(), &session.accumulator.rows())?;
//! # Ok(())
//! # }
//! ```

pub mod accumulator;
pub mod checkpoint;
pub mod citation;
pub mod config;
pub mod crossref;
pub mod document;
pub mod error;
pub mod fetch;
pub mod openalex;
pub mod output;
pub mod pdf_text;
pub mod prompts;
pub mod references;
pub mod resolver;
pub mod retry;
pub mod scopus;
pub mod seed;
pub mod species;
pub mod traversal;

#[cfg(test)]
mod mock;

pub use document::{Document, ObservationRow};
pub use error::{RefSpeciesError, Result};
pub use traversal::{RunSummary, TraversalEngine, TraversalSession};
