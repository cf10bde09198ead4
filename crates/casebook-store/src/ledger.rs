//! Whole-file JSON checkpoint ledger.
//!
//! A ledger is a single JSON array on stable storage, fully rewritten on
//! each checkpoint. Rewriting after every completed unit of work is what
//! bounds crash loss to at most one in-flight record, so callers must not
//! batch or defer checkpoint calls.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use casebook_core::error::{CasebookError, Result};

/// A JSON-array ledger for records of type `T`.
///
/// Load behavior distinguishes three states: absent (start empty),
/// parsable (use contents), corrupt (rename aside to `<name>.bak`, warn,
/// start empty - the damaged file is preserved for inspection).
#[derive(Debug, Clone)]
pub struct Ledger<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> Ledger<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the ledger, tolerating absence and corruption.
    pub fn load(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str(&content) {
            Ok(records) => Ok(records),
            Err(e) => {
                let backup = backup_path(&self.path);
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    error = %e,
                    "Ledger unparsable; moving aside and starting fresh"
                );
                std::fs::rename(&self.path, &backup)?;
                Ok(Vec::new())
            }
        }
    }

    /// Load the ledger, failing with `NotReady` when the file is absent.
    ///
    /// For stages whose precondition is a previous stage's output.
    pub fn load_required(&self, produced_by: &str) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Err(CasebookError::NotReady(format!(
                "{} not found; run `{}` first",
                self.path.display(),
                produced_by
            )));
        }
        self.load()
    }

    /// Durably rewrite the entire ledger.
    ///
    /// The new content is written to a sibling temp file and renamed over
    /// the old one, so a crash mid-write leaves the previous checkpoint
    /// intact.
    pub fn checkpoint(&self, records: &[T]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// `raw_data.json` → `raw_data.json.bak`; never clobbers an existing
/// backup from the same run thanks to a numeric suffix.
fn backup_path(path: &Path) -> PathBuf {
    let base = PathBuf::from(format!("{}.bak", path.display()));
    if !base.exists() {
        return base;
    }
    let mut n = 1u32;
    loop {
        let candidate = PathBuf::from(format!("{}.bak{}", path.display(), n));
        if !candidate.exists() {
            info!(path = %candidate.display(), "Previous backup exists; using numbered backup");
            return candidate;
        }
        n += 1;
    }
}
