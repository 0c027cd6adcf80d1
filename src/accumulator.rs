//! Append-only, deduplicated collection of observation rows.
//!
//! Rows are keyed by `(doi, species, location, distance_from_seed)` with
//! surrounding whitespace ignored; the first occurrence of a key wins.

use crate::document::ObservationRow;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Deduplication key of a row
type RowKey = (String, String, String, u32);

fn row_key(row: &ObservationRow) -> RowKey {
    (
        row.doi.trim().to_string(),
        row.species.trim().to_string(),
        row.location.trim().to_string(),
        row.distance_from_seed,
    )
}

/// A row tagged with the discovery sequence of its document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatedRow {
    pub sequence: u64,
    pub row: ObservationRow,
}

/// Result accumulator owned by a traversal session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "AccumulatorState")]
pub struct ResultAccumulator {
    entries: Vec<AccumulatedRow>,
    duplicates: u64,
    #[serde(skip)]
    seen: HashSet<RowKey>,
}

#[derive(Deserialize)]
struct AccumulatorState {
    entries: Vec<AccumulatedRow>,
    #[serde(default)]
    duplicates: u64,
}

impl From<AccumulatorState> for ResultAccumulator {
    fn from(state: AccumulatorState) -> Self {
        let seen = state.entries.iter().map(|e| row_key(&e.row)).collect();
        Self {
            entries: state.entries,
            duplicates: state.duplicates,
            seen,
        }
    }
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `row` from the document with discovery number `sequence`.
    ///
    /// Returns `false` when an equal-keyed row is already present.
    pub fn push(&mut self, sequence: u64, row: ObservationRow) -> bool {
        if !self.seen.insert(row_key(&row)) {
            self.duplicates += 1;
            return false;
        }
        self.entries.push(AccumulatedRow { sequence, row });
        true
    }

    /// Append all rows of one document; returns how many were new.
    pub fn extend<I>(&mut self, sequence: u64, rows: I) -> usize
    where
        I: IntoIterator<Item = ObservationRow>,
    {
        let mut added = 0;
        for row in rows {
            if self.push(sequence, row) {
                added += 1;
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows collapsed as duplicates so far.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Rows ordered by distance, then discovery sequence, then arrival.
    pub fn rows(&self) -> Vec<ObservationRow> {
        let mut ordered: Vec<&AccumulatedRow> = self.entries.iter().collect();
        ordered.sort_by_key(|e| (e.row.distance_from_seed, e.sequence));
        ordered.into_iter().map(|e| e.row.clone()).collect()
    }
}

/// Drop rows whose key was already seen, keeping order. Idempotent.
pub fn dedup_rows(rows: &[ObservationRow]) -> Vec<ObservationRow> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter(|row| seen.insert(row_key(row)))
        .cloned()
        .collect()
}
