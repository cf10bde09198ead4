//! Benchmarks for k-NN search and per-case collapsing.
//!
//! Uses 1,000 indexed descriptions spread over 200 cases (5 images each),
//! which mirrors the real shape of the data: a query must over-fetch and
//! collapse several per-image hits per case. Set `BENCH_FULL_SCALE=1` to
//! run with 10,000 descriptions.

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};

use casebook_core::types::CaseMetadata;
use casebook_vector::embedding::{EmbeddingService, MockEmbedding};
use casebook_vector::query::QueryEngine;
use casebook_vector::store::{IndexedRecord, MemoryVectorStore, VectorStore};

const CI_DESCRIPTION_COUNT: usize = 1_000;
const FULL_SCALE_DESCRIPTION_COUNT: usize = 10_000;
const IMAGES_PER_CASE: usize = 5;

fn description_count() -> usize {
    if std::env::var("BENCH_FULL_SCALE").is_ok() {
        FULL_SCALE_DESCRIPTION_COUNT
    } else {
        CI_DESCRIPTION_COUNT
    }
}

fn generate_description(index: usize) -> String {
    format!(
        "A generously glazed meeting area with movable partitions in pale \
         oak, acoustic ceiling panels, and indirect lighting along the \
         corridor side. The space converts between one large seminar room \
         and three small consultation rooms. Description number {}",
        index
    )
}

fn build_populated_store(count: usize) -> Arc<MemoryVectorStore> {
    let store = Arc::new(MemoryVectorStore::new());
    let embedder = MockEmbedding::new();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    for i in 0..count {
        let text = generate_description(i);
        let embedding = rt.block_on(embedder.embed_document(&text)).expect("embed failed");
        let case_id = format!("case-{}", i / IMAGES_PER_CASE);
        store
            .upsert(IndexedRecord {
                doc_id: i.to_string(),
                embedding,
                document: text,
                metadata: CaseMetadata {
                    case_id: case_id.clone(),
                    project_name: format!("Project {}", case_id),
                    products: "Movable Wall M-80".to_string(),
                    location: "Kanazawa".to_string(),
                    image_ref: format!("{}_{}.jpg", case_id, i % IMAGES_PER_CASE),
                    url: format!("https://example.com/case/detail/{}/", case_id),
                },
            })
            .expect("upsert failed");
    }

    assert_eq!(store.count().unwrap(), count);
    store
}

fn bench_knn(c: &mut Criterion) {
    let count = description_count();
    let store = build_populated_store(count);
    let embedder = MockEmbedding::new();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    let query_vec = rt
        .block_on(embedder.embed_query("bright convertible seminar room"))
        .expect("query embed failed");

    let mut group = c.benchmark_group("knn");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function(format!("top60_{}descriptions", count), |b| {
        b.iter(|| {
            let hits = store.query_knn(&query_vec, 60).expect("search failed");
            assert!(!hits.is_empty());
            hits
        });
    });

    group.finish();
}

fn bench_search_with_collapse(c: &mut Criterion) {
    let count = description_count();
    let store = build_populated_store(count);
    let engine = QueryEngine::new(store, MockEmbedding::new());

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    let mut group = c.benchmark_group("search");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function(format!("top12_collapsed_{}descriptions", count), |b| {
        b.iter(|| {
            let results = rt
                .block_on(engine.search("bright convertible seminar room", 12))
                .expect("search failed");
            assert!(results.len() <= 12);
            results
        });
    });

    group.finish();
}

criterion_group!(benches, bench_knn, bench_search_with_collapse);
criterion_main!(benches);
