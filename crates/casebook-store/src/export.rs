//! Flat export snapshot of the vector index.
//!
//! The export carries everything needed to repopulate the index store -
//! embeddings included - so a cold start never has to re-pay the
//! embedding-service cost or trust a damaged local index.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use casebook_core::error::Result;
use casebook_core::types::CaseMetadata;

use crate::ledger::Ledger;

/// One exported index row: `{id, document, metadata, embedding}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: String,
    pub document: String,
    pub metadata: CaseMetadata,
    pub embedding: Vec<f32>,
}

/// The export snapshot file, with the same durability discipline as the
/// checkpoint ledgers.
#[derive(Debug, Clone)]
pub struct ExportFile {
    inner: Ledger<ExportRecord>,
}

impl ExportFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Ledger::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    pub fn exists(&self) -> bool {
        self.inner.exists()
    }

    /// Write the full snapshot (temp file + rename).
    pub fn save(&self, records: &[ExportRecord]) -> Result<()> {
        self.inner.checkpoint(records)
    }

    /// Load the snapshot; absence is a `NotReady` condition since restore
    /// is only meaningful after at least one successful build.
    pub fn load(&self) -> Result<Vec<ExportRecord>> {
        self.inner.load_required("casebook build --force")
    }
}
