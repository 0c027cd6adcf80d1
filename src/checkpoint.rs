//! Session persistence for resumable runs.
//!
//! The checkpoint is a JSON document written after every processed paper.
//! Writes go to a sibling temp file first and are then renamed into place,
//! so an interrupted run never leaves a truncated checkpoint behind.

use crate::citation::normalize_identifier;
use crate::error::{RefSpeciesError, Result};
use crate::traversal::TraversalSession;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bumped whenever the session layout changes incompatibly
const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    version: u32,
    saved_at: DateTime<Utc>,
    session: TraversalSession,
}

/// Reads and writes the checkpoint file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `session`, replacing any previous checkpoint.
    pub fn save(&self, session: &TraversalSession) -> Result<()> {
        #[derive(Serialize)]
        struct CheckpointRef<'a> {
            version: u32,
            saved_at: DateTime<Utc>,
            session: &'a TraversalSession,
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string(&CheckpointRef {
            version: CHECKPOINT_VERSION,
            saved_at: Utc::now(),
            session,
        })?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), processed = session.papers_processed(), "Checkpoint saved");
        Ok(())
    }

    /// Load the checkpoint, if one exists.
    pub fn load(&self) -> Result<Option<TraversalSession>> {
        if !self.path.exists() {
            debug!("Checkpoint file not found: {:?}", self.path);
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&content)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(RefSpeciesError::Config(format!(
                "checkpoint {} has version {}, expected {}",
                self.path.display(),
                checkpoint.version,
                CHECKPOINT_VERSION
            )));
        }

        info!(
            path = %self.path.display(),
            saved_at = %checkpoint.saved_at.to_rfc3339(),
            "Loaded checkpoint"
        );
        Ok(Some(checkpoint.session))
    }

    /// Load the checkpoint and check it belongs to the seed `seed_identifier`.
    pub fn load_for_seed(&self, seed_identifier: &str) -> Result<Option<TraversalSession>> {
        let Some(session) = self.load()? else {
            return Ok(None);
        };
        if normalize_identifier(&session.seed_identifier) != normalize_identifier(seed_identifier) {
            return Err(RefSpeciesError::Config(format!(
                "checkpoint {} belongs to seed {}, not {}",
                self.path.display(),
                session.seed_identifier,
                seed_identifier
            )));
        }
        Ok(Some(session))
    }

    /// Remove the checkpoint after a completed run.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            info!("Cleared checkpoint at {:?}", self.path);
        }
        Ok(())
    }
}
