//! Casebook binary - composition root.
//!
//! Wires configuration, the HTTP collaborators, the checkpoint ledgers,
//! and the file-backed vector store into the three pipeline stages and the
//! query engine, then dispatches one subcommand per invocation:
//!
//! 1. `collect` - scrape new cases and images into the raw ledger
//! 2. `enrich`  - caption images into the enriched ledger
//! 3. `build`   - embed descriptions into the vector index (or restore it)
//! 4. `search` / `similar` / `list` / `status` - read-only queries

mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use casebook_caption::GeminiCaptioner;
use casebook_core::config::CasebookConfig;
use casebook_core::error::Result;
use casebook_core::types::{CaseRecord, EnrichedCase};
use casebook_pipeline::{BuildStage, CollectStage, EnrichStage, IndexSummary};
use casebook_source::HttpContentSource;
use casebook_store::{ExportFile, Ledger};
use casebook_vector::{CaseMatch, GeminiEmbedding, JsonVectorStore, QueryEngine, VectorStore};

use cli::{CliArgs, Command};

/// Resolved file layout under the data directory.
struct DataLayout {
    raw_ledger: Ledger<CaseRecord>,
    enriched_ledger: Ledger<EnrichedCase>,
    export: ExportFile,
    index_path: PathBuf,
    images_dir: PathBuf,
}

impl DataLayout {
    fn new(data_dir: &PathBuf, config: &CasebookConfig) -> Self {
        Self {
            raw_ledger: Ledger::new(data_dir.join(&config.index.raw_ledger)),
            enriched_ledger: Ledger::new(data_dir.join(&config.index.enriched_ledger)),
            export: ExportFile::new(data_dir.join(&config.index.export_file)),
            index_path: data_dir.join(&config.index.index_file),
            images_dir: data_dir.join("images"),
        }
    }
}

/// Expand ~ to the home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut)
}

fn print_matches(matches: &[CaseMatch], ranked: bool) {
    if matches.is_empty() {
        println!("No matching cases.");
        return;
    }
    for (i, m) in matches.iter().enumerate() {
        if ranked {
            println!(
                "{:>2}. {} ({})  distance {:.4}",
                i + 1,
                m.project_name,
                m.location,
                m.distance
            );
        } else {
            println!("{:>2}. {} ({})", i + 1, m.project_name, m.location);
        }
        if !m.products.is_empty() {
            println!("    products: {}", m.products);
        }
        if !m.description.is_empty() {
            println!("    {}", truncate(&m.description, 140));
        }
        println!("    case {} - {}", m.case_id, m.url);
    }
}

fn print_summary(summary: &IndexSummary) {
    if summary.restored {
        println!(
            "Index restored from export: {} records loaded.",
            summary.indexed
        );
    } else if summary.skipped > 0 {
        println!(
            "Index ready: {} of {} descriptions indexed ({} skipped on embedding failures).",
            summary.indexed, summary.total, summary.skipped
        );
    } else {
        println!("Index ready: {} descriptions indexed.", summary.indexed);
    }
}

/// An embedding client for commands that never embed (similar, list,
/// restore): the key may legitimately be absent.
fn embedder_without_key_requirement(config: &CasebookConfig) -> Result<GeminiEmbedding> {
    let key = config.embedding.resolve_api_key().unwrap_or_default();
    GeminiEmbedding::with_key(&config.embedding, key)
}

async fn run(args: CliArgs, config: CasebookConfig, data_dir: PathBuf) -> Result<()> {
    std::fs::create_dir_all(&data_dir)?;
    let layout = DataLayout::new(&data_dir, &config);

    match args.command {
        Command::Collect { max_pages } => {
            let source = HttpContentSource::new(&config.source)?;
            let stage = CollectStage::new(
                source,
                layout.raw_ledger,
                layout.images_dir,
                max_pages.unwrap_or(config.source.max_pages),
                Duration::from_millis(config.source.page_delay_ms),
            );
            let cases = stage.run().await?;
            println!("Collected {} cases in total.", cases.len());
        }

        Command::Enrich => {
            let captioner = GeminiCaptioner::new(&config.caption)?;
            let stage = EnrichStage::new(
                captioner,
                layout.raw_ledger,
                layout.enriched_ledger,
                layout.images_dir,
                Duration::from_millis(config.caption.delay_ms),
            );
            let enriched = stage.run().await?;
            let complete = enriched.iter().filter(|e| e.is_fully_enriched()).count();
            println!(
                "Enriched {} cases ({} fully captioned).",
                enriched.len(),
                complete
            );
        }

        Command::Build { force } => {
            let store = Arc::new(JsonVectorStore::open(&layout.index_path)?);
            let embedder = if force {
                GeminiEmbedding::new(&config.embedding)?
            } else {
                // The non-force path reuses or restores; it never embeds.
                embedder_without_key_requirement(&config)?
            };
            let stage = BuildStage::new(
                embedder,
                store,
                layout.enriched_ledger,
                layout.export,
                config.index.restore_batch_size,
            );
            let summary = if force {
                stage.rebuild().await?
            } else {
                stage.ensure_ready()?
            };
            print_summary(&summary);
        }

        Command::Search { query, k } => {
            let store = Arc::new(JsonVectorStore::open(&layout.index_path)?);
            let engine = QueryEngine::new(store, GeminiEmbedding::new(&config.embedding)?)
                .with_overfetch_factor(config.index.overfetch_factor);
            let results = engine.search(&query, k).await?;
            print_matches(&results, true);
        }

        Command::Similar { case_id, k } => {
            let store = Arc::new(JsonVectorStore::open(&layout.index_path)?);
            let engine = QueryEngine::new(store, embedder_without_key_requirement(&config)?)
                .with_overfetch_factor(config.index.overfetch_factor);
            let results = engine.similar(&case_id, k).await?;
            print_matches(&results, true);
        }

        Command::List { limit } => {
            let store = Arc::new(JsonVectorStore::open(&layout.index_path)?);
            let engine = QueryEngine::new(store, embedder_without_key_requirement(&config)?);
            let results = engine.list_all(limit)?;
            print_matches(&results, false);
        }

        Command::Status => {
            let raw = layout.raw_ledger.load()?;
            let enriched = layout.enriched_ledger.load()?;
            let complete = enriched.iter().filter(|e| e.is_fully_enriched()).count();
            let indexed = JsonVectorStore::open(&layout.index_path)?.count()?;
            let export_present = layout.export.exists();

            println!("Data directory: {}", data_dir.display());
            println!("  collected cases:   {}", raw.len());
            println!(
                "  enriched cases:    {} ({} fully captioned)",
                enriched.len(),
                complete
            );
            println!("  indexed records:   {}", indexed);
            println!(
                "  export snapshot:   {}",
                if export_present { "present" } else { "absent" }
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = CasebookConfig::load_or_default(&config_file);
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_file.display(),
        "Casebook starting"
    );

    let data_dir = resolve_data_dir(&config.general.data_dir);

    match run(args, config, data_dir).await {
        Ok(()) => {}
        Err(e) if e.is_not_ready() => {
            // "Nothing built yet" is guidance, not a stack trace.
            eprintln!("{}", e);
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_data_dir_passthrough() {
        assert_eq!(resolve_data_dir("/var/casebook"), PathBuf::from("/var/casebook"));
    }

    #[test]
    fn test_resolve_data_dir_expands_tilde() {
        let resolved = resolve_data_dir("~/casebook-data");
        assert!(!resolved.to_string_lossy().starts_with('~'));
        assert!(resolved.to_string_lossy().ends_with("casebook-data"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 140), "short");
        let long = "明るく開放的なオフィス".repeat(20);
        let cut = truncate(&long, 10);
        assert_eq!(cut.chars().count(), 11); // 10 chars + ellipsis
    }
}
