//! Casebook ingestion pipeline - the three crash-resumable stages.
//!
//! Each stage is a struct owning its external collaborators and ledgers,
//! with a single entry point. Stages run sequentially and checkpoint after
//! every completed unit of work (one case for collection and enrichment,
//! one description for index building), which bounds crash loss to at most
//! one in-flight unit. Resumability, not cancellation, is what makes
//! stopping a run safe.

pub mod build;
pub mod collect;
pub mod enrich;

pub use build::{BuildStage, IndexSummary};
pub use collect::CollectStage;
pub use enrich::EnrichStage;
