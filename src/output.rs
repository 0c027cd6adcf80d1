//! Persisted results: the observation table and the run summary.

use crate::document::ObservationRow;
use crate::error::Result;
use crate::species::NOT_SPECIFIED;
use crate::traversal::RunSummary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Output columns, in order
pub const COLUMNS: [&str; 7] = [
    "doi",
    "species",
    "abundance_or_biomass",
    "number",
    "location",
    "distance_from_seed",
    "title",
];

/// One CSV line; field order matches [`COLUMNS`].
#[derive(Serialize)]
struct CsvRecord<'a> {
    doi: &'a str,
    species: &'a str,
    abundance_or_biomass: &'a str,
    number: &'a str,
    location: &'a str,
    distance_from_seed: u32,
    title: &'a str,
}

impl<'a> From<&'a ObservationRow> for CsvRecord<'a> {
    fn from(row: &'a ObservationRow) -> Self {
        Self {
            doi: &row.doi,
            species: &row.species,
            abundance_or_biomass: &row.abundance_or_biomass,
            number: row.number.as_deref().unwrap_or(NOT_SPECIFIED),
            location: &row.location,
            distance_from_seed: row.distance_from_seed,
            title: &row.title,
        }
    }
}

/// Write `rows` as CSV with every field quoted; the header is written even
/// when there are no rows.
pub fn write_observations_csv(path: &Path, rows: &[ObservationRow]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Always)
        .from_path(path)?;

    wtr.write_record(COLUMNS)?;
    for row in rows {
        wtr.serialize(CsvRecord::from(row))?;
    }
    wtr.flush()?;

    info!(path = %path.display(), rows = rows.len(), "Wrote observation table");
    Ok(())
}

#[derive(Serialize)]
struct SummaryFile<'a> {
    seed_identifier: &'a str,
    finished_at: DateTime<Utc>,
    #[serde(flatten)]
    summary: &'a RunSummary,
}

/// Write the run summary next to the table.
pub fn write_summary(path: &Path, seed_identifier: &str, summary: &RunSummary) -> Result<()> {
    let content = serde_json::to_string_pretty(&SummaryFile {
        seed_identifier,
        finished_at: Utc::now(),
        summary,
    })?;
    std::fs::write(path, content)?;
    info!(path = %path.display(), "Wrote run summary");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(number: Option<&str>) -> ObservationRow {
        ObservationRow {
            doi: "10.1000/a".into(),
            species: "Myodes glareolus".into(),
            abundance_or_biomass: "12 ind/ha, spring".into(),
            number: number.map(str::to_string),
            location: "Oulu \"north\"".into(),
            distance_from_seed: 1,
            title: "Voles".into(),
        }
    }

    #[test]
    fn test_header_written_without_rows() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("out.csv");
        write_observations_csv(&path, &[])?;
        let content = std::fs::read_to_string(&path)?;
        assert_eq!(
            content,
            "\"doi\",\"species\",\"abundance_or_biomass\",\"number\",\"location\",\"distance_from_seed\",\"title\"\n"
        );
        Ok(())
    }

    #[test]
    fn test_rows_fully_quoted_in_column_order() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("out.csv");
        write_observations_csv(&path, &[row(Some("40")), row(None)])?;

        let content = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[1],
            "\"10.1000/a\",\"Myodes glareolus\",\"12 ind/ha, spring\",\"40\",\"Oulu \"\"north\"\"\",\"1\",\"Voles\""
        );
        assert!(lines[2].contains("\"not specified\""));

        let mut reader = csv::Reader::from_path(&path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        assert_eq!(headers, COLUMNS);
        Ok(())
    }

    #[test]
    fn test_summary_json() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("run_summary.json");
        let summary = RunSummary {
            papers_processed: 3,
            rows: 7,
            ..RunSummary::default()
        };
        write_summary(&path, "10.1000/seed", &summary)?;

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(value["seed_identifier"], "10.1000/seed");
        assert_eq!(value["papers_processed"], 3);
        assert_eq!(value["rows"], 7);
        assert!(value["token_usage"]["input_tokens"].is_number());
        Ok(())
    }
}
