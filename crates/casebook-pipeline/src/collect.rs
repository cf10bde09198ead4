//! Collection stage: pull new case records from the content source.
//!
//! Enumerates listing pages, fetches detail pages for URLs not already in
//! the ledger, downloads their images, and checkpoints the ledger after
//! every new record. Re-running against an unchanged source is a no-op.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use casebook_core::error::Result;
use casebook_core::types::CaseRecord;
use casebook_source::{case_id_from_url, ContentSource};
use casebook_store::Ledger;

/// The collection stage. One instance per run.
pub struct CollectStage<S: ContentSource> {
    source: S,
    ledger: Ledger<CaseRecord>,
    images_dir: PathBuf,
    max_pages: u32,
    delay: Duration,
}

impl<S: ContentSource> CollectStage<S> {
    pub fn new(
        source: S,
        ledger: Ledger<CaseRecord>,
        images_dir: impl Into<PathBuf>,
        max_pages: u32,
        delay: Duration,
    ) -> Self {
        Self {
            source,
            ledger,
            images_dir: images_dir.into(),
            max_pages,
            delay,
        }
    }

    /// Run one collection pass and return the full updated ledger.
    pub async fn run(&self) -> Result<Vec<CaseRecord>> {
        std::fs::create_dir_all(&self.images_dir)?;

        let mut cases = self.ledger.load()?;
        let seen: HashSet<String> = cases.iter().map(|c| c.url.clone()).collect();

        let links = self.enumerate_links().await;
        let new_links: Vec<String> = links.into_iter().filter(|l| !seen.contains(l)).collect();
        info!(
            new = new_links.len(),
            known = seen.len(),
            "Collection candidates resolved"
        );

        for (i, url) in new_links.iter().enumerate() {
            let detail = match self.source.fetch_detail(url).await {
                Ok(detail) => detail,
                Err(e) => {
                    warn!(url = %url, error = %e, "Detail fetch failed; skipping case");
                    tokio::time::sleep(self.delay).await;
                    continue;
                }
            };

            let case_id = case_id_from_url(url);
            let image_refs = self.download_images(&case_id, &detail.image_urls).await?;

            cases.push(CaseRecord {
                case_id,
                url: url.clone(),
                project_name: detail.project_name,
                location: detail.location,
                products: detail.products,
                image_urls: detail.image_urls,
                image_refs,
                first_seen: Utc::now(),
            });

            // One durable checkpoint per record: an interruption loses at
            // most the in-flight case.
            self.ledger.checkpoint(&cases)?;
            info!(done = i + 1, total = new_links.len(), "Case collected and checkpointed");

            tokio::time::sleep(self.delay).await;
        }

        Ok(cases)
    }

    /// Access the content source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Enumerate candidate URLs across listing pages. A fetch error or a
    /// page without links ends enumeration; neither is fatal to data
    /// already collected.
    async fn enumerate_links(&self) -> Vec<String> {
        let mut links: Vec<String> = Vec::new();

        for page in 1..=self.max_pages {
            let page_links = match self.source.list_candidate_urls(page).await {
                Ok(page_links) => page_links,
                Err(e) => {
                    warn!(page, error = %e, "Listing fetch failed; stopping enumeration");
                    break;
                }
            };

            let fresh: Vec<String> = page_links
                .into_iter()
                .filter(|l| !links.contains(l))
                .collect();
            if fresh.is_empty() {
                debug!(page, "No new links on page; enumeration complete");
                break;
            }

            info!(page, found = fresh.len(), total = links.len() + fresh.len(), "Listing page read");
            links.extend(fresh);

            tokio::time::sleep(self.delay).await;
        }

        links
    }

    /// Download a case's images, reusing files already on disk. A single
    /// failed download skips that image only.
    async fn download_images(&self, case_id: &str, image_urls: &[String]) -> Result<Vec<String>> {
        let mut refs = Vec::new();

        for (idx, url) in image_urls.iter().enumerate() {
            let file_name = format!("{}_{}.jpg", case_id, idx);
            let path = self.images_dir.join(&file_name);

            if path.exists() {
                refs.push(file_name);
                continue;
            }

            match self.source.fetch_image(url).await {
                Ok(bytes) => {
                    std::fs::write(&path, bytes)?;
                    debug!(file = %file_name, "Image saved");
                    refs.push(file_name);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Image download failed; skipping image");
                }
            }
        }

        Ok(refs)
    }
}
