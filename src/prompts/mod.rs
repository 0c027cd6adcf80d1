//! Prompt module for LLM-based operations.

pub mod species_extraction;
