//! Vector index store contract and bundled implementations.
//!
//! The pipeline and query engine only know the [`VectorStore`] trait:
//! upsert, k-NN query, filtered fetch, count, delete-collection. The
//! bundled stores keep insertion order, which makes the engine's
//! equal-distance tie-break deterministic (first inserted wins).
//!
//! Distances are cosine distances (1 - cosine similarity): 0 is identical,
//! lower is more similar.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use casebook_core::error::{CasebookError, Result};
use casebook_core::types::CaseMetadata;
use casebook_store::Ledger;

/// The unit stored in the vector index: one embedded description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRecord {
    /// Unique per indexed description (not per case); assigned
    /// monotonically by the build stage.
    pub doc_id: String,
    pub embedding: Vec<f32>,
    /// The source description text.
    pub document: String,
    pub metadata: CaseMetadata,
}

impl From<casebook_store::ExportRecord> for IndexedRecord {
    fn from(record: casebook_store::ExportRecord) -> Self {
        Self {
            doc_id: record.id,
            embedding: record.embedding,
            document: record.document,
            metadata: record.metadata,
        }
    }
}

impl From<IndexedRecord> for casebook_store::ExportRecord {
    fn from(record: IndexedRecord) -> Self {
        Self {
            id: record.doc_id,
            document: record.document,
            metadata: record.metadata,
            embedding: record.embedding,
        }
    }
}

/// One hit returned from a k-NN query.
#[derive(Debug, Clone)]
pub struct ScoredHit {
    pub record: IndexedRecord,
    /// Cosine distance to the query vector; lower is more similar.
    pub distance: f32,
}

/// Minimal vector index store contract.
///
/// Implementations must support concurrent reads; the bundled ones use an
/// interior `RwLock`. `query_knn` returns hits in ascending distance, with
/// equal distances ordered by insertion; `fetch` returns records in
/// insertion order.
pub trait VectorStore: Send + Sync {
    /// Insert a record, replacing any record with the same `doc_id`.
    fn upsert(&self, record: IndexedRecord) -> Result<()>;

    /// The `k` nearest neighbors to the query vector.
    fn query_knn(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredHit>>;

    /// All records belonging to one case, in insertion order.
    fn get_by_case(&self, case_id: &str) -> Result<Vec<IndexedRecord>>;

    /// Up to `limit` records in insertion order, no ranking.
    fn fetch(&self, limit: usize) -> Result<Vec<IndexedRecord>>;

    /// Number of records currently stored.
    fn count(&self) -> Result<usize>;

    /// Discard the entire collection.
    fn delete_collection(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct Inner {
    records: Vec<IndexedRecord>,
    by_id: HashMap<String, usize>,
}

// ---------------------------------------------------------------------------
// MemoryVectorStore - volatile store for tests and embedded use
// ---------------------------------------------------------------------------

/// In-memory vector store with brute-force cosine-distance search.
///
/// All operations are O(n) for search, which is acceptable for the
/// collection sizes this system handles.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    inner: RwLock<Inner>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_records(records: Vec<IndexedRecord>) -> Self {
        let by_id = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.doc_id.clone(), i))
            .collect();
        Self {
            inner: RwLock::new(Inner { records, by_id }),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| CasebookError::Index(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| CasebookError::Index(format!("lock poisoned: {}", e)))
    }

    fn snapshot(&self) -> Result<Vec<IndexedRecord>> {
        Ok(self.read()?.records.clone())
    }
}

impl VectorStore for MemoryVectorStore {
    fn upsert(&self, record: IndexedRecord) -> Result<()> {
        let mut inner = self.write()?;
        let existing = inner.by_id.get(&record.doc_id).copied();
        match existing {
            Some(slot) => inner.records[slot] = record,
            None => {
                let slot = inner.records.len();
                inner.by_id.insert(record.doc_id.clone(), slot);
                inner.records.push(record);
            }
        }
        Ok(())
    }

    fn query_knn(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredHit>> {
        let inner = self.read()?;
        let mut hits: Vec<ScoredHit> = inner
            .records
            .iter()
            .map(|record| ScoredHit {
                distance: cosine_distance(vector, &record.embedding),
                record: record.clone(),
            })
            .collect();

        // Stable sort: equal distances keep insertion order.
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn get_by_case(&self, case_id: &str) -> Result<Vec<IndexedRecord>> {
        let inner = self.read()?;
        Ok(inner
            .records
            .iter()
            .filter(|r| r.metadata.case_id == case_id)
            .cloned()
            .collect())
    }

    fn fetch(&self, limit: usize) -> Result<Vec<IndexedRecord>> {
        let inner = self.read()?;
        Ok(inner.records.iter().take(limit).cloned().collect())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.read()?.records.len())
    }

    fn delete_collection(&self) -> Result<()> {
        let mut inner = self.write()?;
        inner.records.clear();
        inner.by_id.clear();
        Ok(())
    }
}

/// Cosine distance (1 - cosine similarity).
///
/// Mismatched lengths and zero vectors yield the maximum distance of 1.0
/// rather than an error, so one malformed record cannot poison a query.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();
    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 1.0;
    }

    (1.0 - dot / (mag_a * mag_b)) as f32
}

// ---------------------------------------------------------------------------
// JsonVectorStore - file-backed store with write-through persistence
// ---------------------------------------------------------------------------

/// File-backed vector store.
///
/// Every upsert rewrites the backing file (temp file + rename), so the
/// store on disk always reflects the last completed unit of work. A
/// corrupt file is moved aside on open and the store starts empty, which
/// the build stage's health probe then treats as a restore trigger.
#[derive(Debug)]
pub struct JsonVectorStore {
    memory: MemoryVectorStore,
    ledger: Ledger<IndexedRecord>,
}

impl JsonVectorStore {
    /// Open a store at the given path, loading existing records if the
    /// file is present and parsable.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let ledger: Ledger<IndexedRecord> = Ledger::new(path);
        let records = ledger.load()?;
        debug!(path = %ledger.path().display(), records = records.len(), "Vector store opened");
        Ok(Self {
            memory: MemoryVectorStore::from_records(records),
            ledger,
        })
    }

    pub fn path(&self) -> &Path {
        self.ledger.path()
    }

    fn persist(&self) -> Result<()> {
        self.ledger.checkpoint(&self.memory.snapshot()?)
    }
}

impl VectorStore for JsonVectorStore {
    fn upsert(&self, record: IndexedRecord) -> Result<()> {
        self.memory.upsert(record)?;
        self.persist()
    }

    fn query_knn(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredHit>> {
        self.memory.query_knn(vector, k)
    }

    fn get_by_case(&self, case_id: &str) -> Result<Vec<IndexedRecord>> {
        self.memory.get_by_case(case_id)
    }

    fn fetch(&self, limit: usize) -> Result<Vec<IndexedRecord>> {
        self.memory.fetch(limit)
    }

    fn count(&self) -> Result<usize> {
        self.memory.count()
    }

    fn delete_collection(&self) -> Result<()> {
        self.memory.delete_collection()?;
        if self.ledger.exists() {
            std::fs::remove_file(self.ledger.path())?;
        }
        Ok(())
    }
}
