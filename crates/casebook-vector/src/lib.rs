//! Casebook vector crate - embedding services, the vector store contract,
//! and the query aggregation engine.
//!
//! Provides the embedding-service trait with document/query intents and a
//! mock implementation for testing, in-memory and file-backed vector
//! stores with cosine-distance k-NN, and the engine that collapses
//! per-image hits into per-case results.

pub mod embedding;
pub mod query;
pub mod store;

pub use embedding::{DynEmbeddingService, EmbeddingService, GeminiEmbedding, MockEmbedding};
pub use query::{CaseMatch, QueryEngine};
pub use store::{IndexedRecord, JsonVectorStore, MemoryVectorStore, ScoredHit, VectorStore};
