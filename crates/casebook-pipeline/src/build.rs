//! Index build stage: embed descriptions and populate the vector store.
//!
//! Two entry points:
//! - [`BuildStage::rebuild`] - explicit full rebuild: drop the collection,
//!   embed every non-empty description, upsert, then write the export
//!   snapshot.
//! - [`BuildStage::ensure_ready`] - cold-start path: keep a healthy live
//!   store as-is, otherwise repopulate it from the export snapshot in
//!   fixed-size batches without touching the embedding service.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use casebook_core::error::Result;
use casebook_core::types::{CaseMetadata, EnrichedCase};
use casebook_store::{ExportFile, ExportRecord, Ledger};
use casebook_vector::embedding::EmbeddingService;
use casebook_vector::store::{IndexedRecord, VectorStore};

/// Outcome of a build, restore, or reuse decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    /// Records now present in the store.
    pub indexed: usize,
    /// Descriptions dropped because their embedding call failed.
    pub skipped: usize,
    /// Non-empty descriptions that were eligible for indexing.
    pub total: usize,
    /// True when the records came from the export snapshot.
    pub restored: bool,
}

/// The index build stage. One instance per run.
pub struct BuildStage<E: EmbeddingService, V: VectorStore> {
    embedder: E,
    store: Arc<V>,
    enriched_ledger: Ledger<EnrichedCase>,
    export: ExportFile,
    restore_batch_size: usize,
}

impl<E: EmbeddingService, V: VectorStore> BuildStage<E, V> {
    pub fn new(
        embedder: E,
        store: Arc<V>,
        enriched_ledger: Ledger<EnrichedCase>,
        export: ExportFile,
        restore_batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            enriched_ledger,
            export,
            restore_batch_size: restore_batch_size.max(1),
        }
    }

    /// Full rebuild: discard the collection and re-index every non-empty
    /// description. A single embedding failure skips that description
    /// only. On success the export snapshot is rewritten so the restore
    /// path always has a source.
    pub async fn rebuild(&self) -> Result<IndexSummary> {
        let cases = self.enriched_ledger.load_required("casebook enrich")?;

        self.store.delete_collection()?;

        let total: usize = cases
            .iter()
            .flat_map(|c| &c.descriptions)
            .filter(|d| d.is_captioned())
            .count();
        info!(total, "Index rebuild started");

        let mut doc_id: u64 = 0;
        let mut skipped = 0usize;
        let mut export_records: Vec<ExportRecord> = Vec::with_capacity(total);

        for case in &cases {
            for entry in &case.descriptions {
                if !entry.is_captioned() {
                    continue;
                }

                let embedding = match self.embedder.embed_document(&entry.description).await {
                    Ok(embedding) => embedding,
                    Err(e) => {
                        warn!(
                            case_id = %case.case.case_id,
                            image = %entry.image_ref,
                            error = %e,
                            "Embedding failed; skipping description"
                        );
                        skipped += 1;
                        continue;
                    }
                };

                let products = if entry.refined_products.is_empty() {
                    case.case.products.join(", ")
                } else {
                    entry.refined_products.join(", ")
                };

                let record = IndexedRecord {
                    doc_id: doc_id.to_string(),
                    embedding,
                    document: entry.description.clone(),
                    metadata: CaseMetadata {
                        case_id: case.case.case_id.clone(),
                        project_name: case.case.project_name.clone(),
                        products,
                        location: case.case.location.clone(),
                        image_ref: entry.image_ref.clone(),
                        url: case.case.url.clone(),
                    },
                };

                export_records.push(record.clone().into());
                self.store.upsert(record)?;
                doc_id += 1;

                info!(indexed = doc_id, total, "Description indexed");
            }
        }

        self.export.save(&export_records)?;
        info!(
            indexed = doc_id,
            skipped,
            export = %self.export.path().display(),
            "Index rebuild complete"
        );

        Ok(IndexSummary {
            indexed: doc_id as usize,
            skipped,
            total,
            restored: false,
        })
    }

    /// Health probe: non-empty and a trial read succeeds.
    pub fn is_healthy(&self) -> bool {
        match self.store.count() {
            Ok(count) if count > 0 => matches!(self.store.fetch(1), Ok(records) if !records.is_empty()),
            _ => false,
        }
    }

    /// Keep a healthy live store; otherwise restore it from the export.
    ///
    /// Fails with `NotReady` when neither a healthy store nor an export
    /// snapshot exists - that situation needs an explicit rebuild.
    pub fn ensure_ready(&self) -> Result<IndexSummary> {
        if self.is_healthy() {
            let indexed = self.store.count()?;
            info!(indexed, "Existing index is healthy; reusing it");
            return Ok(IndexSummary {
                indexed,
                skipped: 0,
                total: indexed,
                restored: false,
            });
        }
        self.restore()
    }

    /// Bulk-load the store from the export snapshot in fixed-size
    /// batches, skipping the embedding service entirely.
    pub fn restore(&self) -> Result<IndexSummary> {
        let records = self.export.load()?;
        let total = records.len();
        info!(total, batch_size = self.restore_batch_size, "Restoring index from export");

        self.store.delete_collection()?;

        let mut restored = 0usize;
        for batch in records.chunks(self.restore_batch_size) {
            for record in batch {
                self.store.upsert(IndexedRecord::from(record.clone()))?;
            }
            restored += batch.len();
            info!(restored, total, "Restore batch loaded");
        }

        Ok(IndexSummary {
            indexed: restored,
            skipped: 0,
            total,
            restored: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casebook_core::types::{CaseRecord, DescriptionEntry};
    use casebook_vector::embedding::MockEmbedding;
    use casebook_vector::store::MemoryVectorStore;
    use chrono::Utc;

    use casebook_core::error::CasebookError;

    fn make_enriched(id: &str, descriptions: &[&str]) -> EnrichedCase {
        EnrichedCase {
            case: CaseRecord {
                case_id: id.to_string(),
                url: format!("https://x.jp/case/detail/{}/", id),
                project_name: format!("Project {}", id),
                location: "Kobe".to_string(),
                products: vec!["Panel-A".to_string(), "Panel-B".to_string()],
                image_urls: vec![],
                image_refs: (0..descriptions.len())
                    .map(|i| format!("{}_{}.jpg", id, i))
                    .collect(),
                first_seen: Utc::now(),
            },
            descriptions: descriptions
                .iter()
                .enumerate()
                .map(|(i, d)| DescriptionEntry {
                    image_ref: format!("{}_{}.jpg", id, i),
                    description: d.to_string(),
                    refined_products: vec![],
                })
                .collect(),
        }
    }

    fn make_stage(
        dir: &std::path::Path,
        store: Arc<MemoryVectorStore>,
    ) -> BuildStage<MockEmbedding, MemoryVectorStore> {
        BuildStage::new(
            MockEmbedding::new(),
            store,
            Ledger::new(dir.join("enriched_data.json")),
            ExportFile::new(dir.join("export.json")),
            2,
        )
    }

    fn write_enriched(dir: &std::path::Path, cases: &[EnrichedCase]) {
        let ledger: Ledger<EnrichedCase> = Ledger::new(dir.join("enriched_data.json"));
        ledger.checkpoint(cases).unwrap();
    }

    #[tokio::test]
    async fn test_rebuild_missing_ledger_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let stage = make_stage(dir.path(), Arc::new(MemoryVectorStore::new()));
        assert!(stage.rebuild().await.unwrap_err().is_not_ready());
    }

    #[tokio::test]
    async fn test_rebuild_indexes_non_empty_descriptions() {
        let dir = tempfile::tempdir().unwrap();
        write_enriched(
            dir.path(),
            &[
                make_enriched("1", &["a bright lobby", ""]),
                make_enriched("2", &["a quiet archive room"]),
            ],
        );

        let store = Arc::new(MemoryVectorStore::new());
        let stage = make_stage(dir.path(), store.clone());
        let summary = stage.rebuild().await.unwrap();

        // The empty description is neither indexed nor a failure.
        assert_eq!(summary.indexed, 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.total, 2);
        assert!(!summary.restored);
        assert_eq!(store.count().unwrap(), 2);

        // doc_ids are monotonic strings.
        let records = store.fetch(10).unwrap();
        assert_eq!(records[0].doc_id, "0");
        assert_eq!(records[1].doc_id, "1");
        assert_eq!(records[0].metadata.case_id, "1");
        assert_eq!(records[1].metadata.case_id, "2");
    }

    #[tokio::test]
    async fn test_rebuild_discards_previous_collection() {
        let dir = tempfile::tempdir().unwrap();
        write_enriched(dir.path(), &[make_enriched("1", &["fresh description"])]);

        let store = Arc::new(MemoryVectorStore::new());
        store
            .upsert(IndexedRecord {
                doc_id: "stale".to_string(),
                embedding: vec![1.0, 0.0],
                document: "stale".to_string(),
                metadata: CaseMetadata {
                    case_id: "old".to_string(),
                    project_name: "Old".to_string(),
                    products: String::new(),
                    location: String::new(),
                    image_ref: String::new(),
                    url: String::new(),
                },
            })
            .unwrap();

        let stage = make_stage(dir.path(), store.clone());
        stage.rebuild().await.unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.fetch(10).unwrap()[0].metadata.case_id, "1");
    }

    #[tokio::test]
    async fn test_rebuild_metadata_prefers_refined_products() {
        let dir = tempfile::tempdir().unwrap();
        let mut enriched = make_enriched("1", &["uses Panel-A near the entrance", "plain text"]);
        enriched.descriptions[0].refined_products = vec!["Panel-A".to_string()];
        write_enriched(dir.path(), &[enriched]);

        let store = Arc::new(MemoryVectorStore::new());
        make_stage(dir.path(), store.clone()).rebuild().await.unwrap();

        let records = store.fetch(10).unwrap();
        assert_eq!(records[0].metadata.products, "Panel-A");
        // No refinement → fall back to the case's full product list.
        assert_eq!(records[1].metadata.products, "Panel-A, Panel-B");
    }

    #[tokio::test]
    async fn test_rebuild_writes_export_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        write_enriched(dir.path(), &[make_enriched("1", &["one", "two"])]);

        let store = Arc::new(MemoryVectorStore::new());
        make_stage(dir.path(), store).rebuild().await.unwrap();

        let export = ExportFile::new(dir.path().join("export.json"));
        let records = export.load().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "0");
        assert!(!records[0].embedding.is_empty());
    }

    /// Embedder that fails on a marker substring, for skip-path coverage.
    struct FlakyEmbedding;

    impl EmbeddingService for FlakyEmbedding {
        async fn embed_document(&self, text: &str) -> casebook_core::error::Result<Vec<f32>> {
            if text.contains("poison") {
                return Err(CasebookError::Embedding("scripted failure".to_string()));
            }
            MockEmbedding::new().embed_document(text).await
        }

        async fn embed_query(&self, text: &str) -> casebook_core::error::Result<Vec<f32>> {
            self.embed_document(text).await
        }
    }

    #[tokio::test]
    async fn test_embedding_failure_skips_description_not_run() {
        let dir = tempfile::tempdir().unwrap();
        write_enriched(
            dir.path(),
            &[make_enriched("1", &["fine text", "poison text", "more fine text"])],
        );

        let store = Arc::new(MemoryVectorStore::new());
        let stage = BuildStage::new(
            FlakyEmbedding,
            store.clone(),
            Ledger::new(dir.path().join("enriched_data.json")),
            ExportFile::new(dir.path().join("export.json")),
            10,
        );

        let summary = stage.rebuild().await.unwrap();
        assert_eq!(summary.indexed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total, 3);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ensure_ready_reuses_healthy_store() {
        let dir = tempfile::tempdir().unwrap();
        write_enriched(dir.path(), &[make_enriched("1", &["text"])]);

        let store = Arc::new(MemoryVectorStore::new());
        let stage = make_stage(dir.path(), store.clone());
        stage.rebuild().await.unwrap();

        // Remove the export to prove ensure_ready never reads it when the
        // store is healthy.
        std::fs::remove_file(dir.path().join("export.json")).unwrap();

        let summary = stage.ensure_ready().unwrap();
        assert_eq!(summary.indexed, 1);
        assert!(!summary.restored);
    }

    #[tokio::test]
    async fn test_ensure_ready_restores_empty_store_from_export() {
        let dir = tempfile::tempdir().unwrap();
        write_enriched(
            dir.path(),
            &[make_enriched("1", &["alpha", "beta"]), make_enriched("2", &["gamma"])],
        );

        // Build once to produce the export, then start over with an empty
        // store (a fresh process with a lost local index).
        let first_store = Arc::new(MemoryVectorStore::new());
        make_stage(dir.path(), first_store).rebuild().await.unwrap();

        let cold_store = Arc::new(MemoryVectorStore::new());
        let stage = make_stage(dir.path(), cold_store.clone());
        let summary = stage.ensure_ready().unwrap();

        assert!(summary.restored);
        assert_eq!(summary.indexed, 3);
        // Restore equivalence: count matches the export's record count.
        assert_eq!(cold_store.count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_ensure_ready_without_store_or_export_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let stage = make_stage(dir.path(), Arc::new(MemoryVectorStore::new()));
        assert!(stage.ensure_ready().unwrap_err().is_not_ready());
    }

    #[tokio::test]
    async fn test_restore_preserves_record_content() {
        let dir = tempfile::tempdir().unwrap();
        write_enriched(dir.path(), &[make_enriched("42", &["a vaulted reading room"])]);

        let build_store = Arc::new(MemoryVectorStore::new());
        make_stage(dir.path(), build_store.clone()).rebuild().await.unwrap();
        let original = build_store.fetch(10).unwrap();

        let cold_store = Arc::new(MemoryVectorStore::new());
        make_stage(dir.path(), cold_store.clone()).restore().unwrap();

        assert_eq!(cold_store.fetch(10).unwrap(), original);
    }
}
