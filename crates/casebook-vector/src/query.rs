//! Query engine: nearest-neighbor search with per-case aggregation.
//!
//! One case owns many indexed vectors (one per captioned image), so every
//! query mode shares the same collapse step: group hits by `case_id`, keep
//! the best-scoring hit per case, and rank the survivors. Neighbor queries
//! over-fetch to compensate for the rows the collapse removes.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use casebook_core::error::{CasebookError, Result};

use crate::embedding::{DynEmbeddingService, EmbeddingService};
use crate::store::{IndexedRecord, ScoredHit, VectorStore};

/// Default neighbor over-fetch multiplier applied before collapsing.
pub const DEFAULT_OVERFETCH_FACTOR: usize = 5;

/// One case-aggregated query result.
///
/// Carries the metadata of the case's best-matching image plus the
/// matching description text. Within one result set, `case_id` values are
/// unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseMatch {
    pub case_id: String,
    pub project_name: String,
    pub products: String,
    pub location: String,
    pub image_ref: String,
    pub url: String,
    /// The best-matching description text for this case.
    pub description: String,
    /// Cosine distance; lower is more similar. `0.0` in unranked listings,
    /// where it means "not applicable" rather than "perfect match".
    pub distance: f32,
}

impl CaseMatch {
    fn from_record(record: IndexedRecord, distance: f32) -> Self {
        Self {
            case_id: record.metadata.case_id,
            project_name: record.metadata.project_name,
            products: record.metadata.products,
            location: record.metadata.location,
            image_ref: record.metadata.image_ref,
            url: record.metadata.url,
            description: record.document,
            distance,
        }
    }
}

/// Collapse per-image hits into one best hit per case.
///
/// Only a strictly smaller distance replaces a case's current best, and
/// first-seen order is preserved, so equal-distance duplicates resolve to
/// the hit encountered first in the store's return order. That tie-break
/// is defined but arbitrary - it depends on the store's ordering, not on
/// any property of the data.
fn collapse_by_case(hits: impl IntoIterator<Item = ScoredHit>) -> Vec<CaseMatch> {
    let mut matches: Vec<CaseMatch> = Vec::new();
    let mut slot_by_case: HashMap<String, usize> = HashMap::new();

    for hit in hits {
        let candidate = CaseMatch::from_record(hit.record, hit.distance);
        match slot_by_case.get(&candidate.case_id) {
            Some(&slot) => {
                if candidate.distance < matches[slot].distance {
                    matches[slot] = candidate;
                }
            }
            None => {
                slot_by_case.insert(candidate.case_id.clone(), matches.len());
                matches.push(candidate);
            }
        }
    }

    matches
}

/// Query engine over a vector store and an embedding service.
///
/// Uses dynamic dispatch for the embedder (`Box<dyn DynEmbeddingService>`)
/// so production code can supply the hosted client while tests use
/// `MockEmbedding`. Read-only and side-effect-free; safe to share across
/// concurrent queries.
pub struct QueryEngine<V: VectorStore> {
    store: Arc<V>,
    embedder: Box<dyn DynEmbeddingService>,
    overfetch_factor: usize,
}

impl<V: VectorStore> QueryEngine<V> {
    /// Create an engine with the default over-fetch factor.
    pub fn new(store: Arc<V>, embedder: impl EmbeddingService + 'static) -> Self {
        Self {
            store,
            embedder: Box::new(embedder),
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
        }
    }

    /// Create an engine from a pre-boxed dynamic embedding service.
    pub fn new_dyn(store: Arc<V>, embedder: Box<dyn DynEmbeddingService>) -> Self {
        Self {
            store,
            embedder,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
        }
    }

    /// Override the neighbor over-fetch multiplier.
    pub fn with_overfetch_factor(mut self, factor: usize) -> Self {
        self.overfetch_factor = factor.max(1);
        self
    }

    /// Fail with the distinct not-ready condition when nothing has been
    /// indexed yet; otherwise return the collection size.
    fn ensure_ready(&self) -> Result<usize> {
        let count = self.store.count()?;
        if count == 0 {
            return Err(CasebookError::NotReady(
                "vector index is empty; run `casebook build` first".to_string(),
            ));
        }
        Ok(count)
    }

    /// Free-text search returning up to `k` case-aggregated results,
    /// ranked by ascending distance.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<CaseMatch>> {
        let count = self.ensure_ready()?;
        let query_vec = self.embedder.embed_query_boxed(query).await?;

        let fetch = (k.saturating_mul(self.overfetch_factor)).min(count);
        let hits = self.store.query_knn(&query_vec, fetch)?;
        debug!(query, fetched = hits.len(), "Collapsing search hits by case");

        let mut matches = collapse_by_case(hits);
        sort_by_distance(&mut matches);
        matches.truncate(k);
        Ok(matches)
    }

    /// Similarity-by-identity: cases nearest to the given case, excluding
    /// the case itself. An unknown `case_id` yields an empty result set,
    /// not an error.
    pub async fn similar(&self, case_id: &str, k: usize) -> Result<Vec<CaseMatch>> {
        let count = self.ensure_ready()?;

        let records = self.store.get_by_case(case_id)?;
        let Some(anchor) = records.into_iter().next() else {
            debug!(case_id, "No stored embedding for case; returning empty result");
            return Ok(Vec::new());
        };

        let fetch = (k.saturating_mul(self.overfetch_factor)).min(count);
        let hits = self.store.query_knn(&anchor.embedding, fetch)?;

        // Self-exclusion happens before collapsing so the case's other
        // images cannot shadow a genuine neighbor.
        let others = hits
            .into_iter()
            .filter(|hit| hit.record.metadata.case_id != case_id);

        let mut matches = collapse_by_case(others);
        sort_by_distance(&mut matches);
        matches.truncate(k);
        Ok(matches)
    }

    /// Unranked listing of up to `limit` records, collapsed to one entry
    /// per case (first seen wins). Distances carry the `0.0` sentinel.
    pub fn list_all(&self, limit: usize) -> Result<Vec<CaseMatch>> {
        self.ensure_ready()?;
        let records = self.store.fetch(limit)?;
        Ok(collapse_by_case(records.into_iter().map(|record| ScoredHit {
            record,
            distance: 0.0,
        })))
    }

    /// Access the underlying store.
    pub fn store(&self) -> &V {
        &self.store
    }
}

/// Stable ascending sort: equal distances keep their collapse order,
/// which itself follows the store's return order.
fn sort_by_distance(matches: &mut [CaseMatch]) {
    matches.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedding;
    use crate::store::MemoryVectorStore;
    use casebook_core::types::CaseMetadata;

    /// Embedder returning one fixed vector for every input, so tests can
    /// hand-place documents at exact distances from the query.
    struct FixedEmbedding(Vec<f32>);

    impl EmbeddingService for FixedEmbedding {
        async fn embed_document(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }

        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    fn make_record(doc_id: &str, case_id: &str, embedding: Vec<f32>) -> IndexedRecord {
        IndexedRecord {
            doc_id: doc_id.to_string(),
            embedding,
            document: format!("description {}", doc_id),
            metadata: CaseMetadata {
                case_id: case_id.to_string(),
                project_name: format!("Project {}", case_id),
                products: "Panel-A".to_string(),
                location: "Kyoto".to_string(),
                image_ref: format!("{}_{}.jpg", case_id, doc_id),
                url: format!("https://example.com/case/detail/{}/", case_id),
            },
        }
    }

    /// Unit vector at cosine distance `d` from the query vector [1, 0].
    fn vector_at_distance(d: f32) -> Vec<f32> {
        let cos = 1.0 - d;
        vec![cos, (1.0 - cos * cos).max(0.0).sqrt()]
    }

    fn populated_store() -> Arc<MemoryVectorStore> {
        let store = Arc::new(MemoryVectorStore::new());
        // Case X: two images at distances 0.1 and 0.3; case Y: one at 0.2.
        store.upsert(make_record("0", "x", vector_at_distance(0.1))).unwrap();
        store.upsert(make_record("1", "x", vector_at_distance(0.3))).unwrap();
        store.upsert(make_record("2", "y", vector_at_distance(0.2))).unwrap();
        store
    }

    fn engine_with_query_at_origin(
        store: Arc<MemoryVectorStore>,
    ) -> QueryEngine<MemoryVectorStore> {
        QueryEngine::new(store, FixedEmbedding(vec![1.0, 0.0]))
    }

    #[tokio::test]
    async fn test_search_collapses_to_best_hit_per_case() {
        let engine = engine_with_query_at_origin(populated_store());
        let results = engine.search("query", 2).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].case_id, "x");
        assert!((results[0].distance - 0.1).abs() < 1e-3);
        assert_eq!(results[1].case_id, "y");
        assert!((results[1].distance - 0.2).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_search_results_have_unique_case_ids() {
        let engine = engine_with_query_at_origin(populated_store());
        let results = engine.search("query", 10).await.unwrap();

        let mut seen = std::collections::HashSet::new();
        for result in &results {
            assert!(seen.insert(result.case_id.clone()), "duplicate case_id in results");
        }
    }

    #[tokio::test]
    async fn test_search_distances_non_decreasing() {
        let engine = engine_with_query_at_origin(populated_store());
        let results = engine.search("query", 10).await.unwrap();

        for pair in results.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[tokio::test]
    async fn test_search_respects_k() {
        let engine = engine_with_query_at_origin(populated_store());
        let results = engine.search("query", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].case_id, "x");
    }

    #[tokio::test]
    async fn test_search_overfetch_clamps_to_collection_size() {
        // k * factor far exceeds the 3 stored records; must not error.
        let engine = engine_with_query_at_origin(populated_store()).with_overfetch_factor(100);
        let results = engine.search("query", 50).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_search_empty_store_is_not_ready() {
        let engine = engine_with_query_at_origin(Arc::new(MemoryVectorStore::new()));
        let err = engine.search("query", 5).await.unwrap_err();
        assert!(err.is_not_ready());
    }

    #[tokio::test]
    async fn test_equal_distance_tie_break_keeps_store_order() {
        let store = Arc::new(MemoryVectorStore::new());
        // Same case, identical vectors: equal distances. The first
        // inserted must win the collapse.
        store.upsert(make_record("first", "x", vec![1.0, 0.0])).unwrap();
        store.upsert(make_record("second", "x", vec![1.0, 0.0])).unwrap();

        let engine = engine_with_query_at_origin(store);
        let results = engine.search("query", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].image_ref, "x_first.jpg");
    }

    #[tokio::test]
    async fn test_similar_excludes_the_anchor_case() {
        let engine = engine_with_query_at_origin(populated_store());
        let results = engine.similar("x", 10).await.unwrap();

        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.case_id != "x"));
        assert_eq!(results[0].case_id, "y");
    }

    #[tokio::test]
    async fn test_similar_unknown_case_returns_empty_not_error() {
        let engine = engine_with_query_at_origin(populated_store());
        let results = engine.similar("nonexistent", 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_similar_uses_first_stored_embedding() {
        let store = populated_store();
        // Case z sits exactly on x's first image vector, so z should rank
        // before y when anchoring on x.
        store.upsert(make_record("3", "z", vector_at_distance(0.1))).unwrap();

        let engine = engine_with_query_at_origin(store);
        let results = engine.similar("x", 10).await.unwrap();
        assert_eq!(results[0].case_id, "z");
        assert!(results[0].distance.abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_similar_empty_store_is_not_ready() {
        let engine = engine_with_query_at_origin(Arc::new(MemoryVectorStore::new()));
        assert!(engine.similar("x", 5).await.unwrap_err().is_not_ready());
    }

    #[test]
    fn test_list_all_collapses_first_seen_with_zero_distance() {
        let engine = engine_with_query_at_origin(populated_store());
        let results = engine.list_all(10).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].case_id, "x");
        // First-seen wins: the doc_id 0 image, not the closer-ranked one.
        assert_eq!(results[0].image_ref, "x_0.jpg");
        assert_eq!(results[1].case_id, "y");
        assert!(results.iter().all(|r| r.distance == 0.0));
    }

    #[test]
    fn test_list_all_respects_limit_before_collapse() {
        let engine = engine_with_query_at_origin(populated_store());
        // Limit 2 fetches only case x's two records.
        let results = engine.list_all(2).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].case_id, "x");
    }

    #[test]
    fn test_list_all_empty_store_is_not_ready() {
        let engine = engine_with_query_at_origin(Arc::new(MemoryVectorStore::new()));
        assert!(engine.list_all(10).unwrap_err().is_not_ready());
    }

    #[tokio::test]
    async fn test_search_with_mock_embedding_finds_exact_text() {
        // End-to-end with the hash-based mock: indexing a document and
        // searching for its exact text must return it first.
        let store = Arc::new(MemoryVectorStore::new());
        let embedder = MockEmbedding::new();

        let text = "a sunlit atrium with walnut partitions";
        let embedding = embedder.embed_document(text).await.unwrap();
        let mut record = make_record("0", "atrium", embedding);
        record.document = text.to_string();
        store.upsert(record).unwrap();

        let other = embedder.embed_document("a dim basement archive").await.unwrap();
        store.upsert(make_record("1", "basement", other)).unwrap();

        let engine = QueryEngine::new(store, MockEmbedding::new());
        let results = engine.search(text, 2).await.unwrap();
        assert_eq!(results[0].case_id, "atrium");
        assert!(results[0].distance.abs() < 1e-5);
    }
}
