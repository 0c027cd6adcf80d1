//! Core data model shared by the traversal components.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where a document's full text can be obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "location", rename_all = "snake_case")]
pub enum DocumentSource {
    /// PDF already on disk (the seed, or a cached download)
    LocalPdf(PathBuf),
    /// PDF that must be downloaded first
    RemotePdf(String),
    /// No retrievable PDF; only the abstract fallback (if any) is available
    Unavailable,
}

/// A paper in the reference graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// DOI or resolver-assigned ID
    pub identifier: String,
    pub title: String,
    pub source: DocumentSource,
    /// Reference hops from the seed
    pub distance: u32,
    /// Discovery order across the whole run
    pub sequence: u64,
    /// Bibliographic abstract, used when the PDF cannot be read
    #[serde(default)]
    pub abstract_text: Option<String>,
    /// Populated once by text extraction
    #[serde(skip)]
    pub raw_text: Option<String>,
}

impl Document {
    /// The seed paper: a local PDF at distance 0.
    pub fn seed(identifier: String, title: String, path: PathBuf) -> Self {
        Self {
            identifier,
            title,
            source: DocumentSource::LocalPdf(path),
            distance: 0,
            sequence: 0,
            abstract_text: None,
            raw_text: None,
        }
    }

    /// A document discovered through a resolved citation.
    pub fn discovered(resolved: ResolvedReference, distance: u32, sequence: u64) -> Self {
        let source = match resolved.pdf_url {
            Some(url) => DocumentSource::RemotePdf(url),
            None => DocumentSource::Unavailable,
        };
        Self {
            identifier: resolved.identifier,
            title: resolved.title,
            source,
            distance,
            sequence,
            abstract_text: resolved.abstract_text.filter(|a| !a.trim().is_empty()),
            raw_text: None,
        }
    }
}

/// What the bibliographic resolver knows about a citation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolvedReference {
    /// DOI when known, otherwise the service's own ID
    pub identifier: String,
    pub title: String,
    /// Best-effort open-access PDF location
    pub pdf_url: Option<String>,
    pub abstract_text: Option<String>,
}

/// One species observation extracted from a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObservationRow {
    pub doi: String,
    pub species: String,
    pub abundance_or_biomass: String,
    /// Specimen count or sample size, when reported
    pub number: Option<String>,
    pub location: String,
    pub distance_from_seed: u32,
    pub title: String,
}

/// Processing state of a document within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentState {
    Pending,
    TextExtracted,
    SpeciesExtracted,
    ReferencesExpanded,
    Done,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovered_document_source() {
        let resolved = ResolvedReference {
            identifier: "10.1/a".to_string(),
            title: "Voles of the north".to_string(),
            pdf_url: Some("https://example.org/a.pdf".to_string()),
            abstract_text: Some("   ".to_string()),
        };
        let doc = Document::discovered(resolved, 2, 9);
        assert_eq!(doc.source, DocumentSource::RemotePdf("https://example.org/a.pdf".to_string()));
        assert_eq!(doc.distance, 2);
        assert_eq!(doc.sequence, 9);
        assert_eq!(doc.abstract_text, None);
    }

    #[test]
    fn test_document_json_skips_raw_text() -> serde_json::Result<()> {
        let mut doc = Document::seed("SEED_PAPER".into(), "Seed".into(), PathBuf::from("seed.pdf"));
        doc.raw_text = Some("full text".into());
        let json = serde_json::to_string(&doc)?;
        assert!(!json.contains("full text"));
        let back: Document = serde_json::from_str(&json)?;
        assert_eq!(back.raw_text, None);
        assert_eq!(back.source, DocumentSource::LocalPdf(PathBuf::from("seed.pdf")));
        Ok(())
    }
}
