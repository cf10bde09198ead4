//! Enrichment stage: caption every collected image.
//!
//! Resume granularity is per case for the checkpoint and per image for the
//! work: a case whose description count already matches its image count is
//! passed through untouched, and an incomplete case reuses whatever
//! descriptions a previous run produced, captioning only the gaps.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use casebook_caption::{refine_products, CaptionContext, Captioner};
use casebook_core::error::Result;
use casebook_core::types::{CaseRecord, DescriptionEntry, EnrichedCase};
use casebook_store::Ledger;

/// The enrichment stage. One instance per run.
pub struct EnrichStage<C: Captioner> {
    captioner: C,
    raw_ledger: Ledger<CaseRecord>,
    enriched_ledger: Ledger<EnrichedCase>,
    images_dir: PathBuf,
    delay: Duration,
}

impl<C: Captioner> EnrichStage<C> {
    pub fn new(
        captioner: C,
        raw_ledger: Ledger<CaseRecord>,
        enriched_ledger: Ledger<EnrichedCase>,
        images_dir: impl Into<PathBuf>,
        delay: Duration,
    ) -> Self {
        Self {
            captioner,
            raw_ledger,
            enriched_ledger,
            images_dir: images_dir.into(),
            delay,
        }
    }

    /// Run one enrichment pass and return the full enriched list.
    pub async fn run(&self) -> Result<Vec<EnrichedCase>> {
        let raw_cases = self.raw_ledger.load_required("casebook collect")?;

        let existing: HashMap<String, EnrichedCase> = self
            .enriched_ledger
            .load()?
            .into_iter()
            .map(|e| (e.case.case_id.clone(), e))
            .collect();

        info!(total = raw_cases.len(), "Enrichment pass started");

        let mut enriched_list: Vec<EnrichedCase> = Vec::new();

        for (i, case) in raw_cases.iter().enumerate() {
            let prior = existing.get(&case.case_id);

            // Resume skip: already complete, pass through unchanged.
            if let Some(prev) = prior {
                if prev.is_complete_for(case) {
                    enriched_list.push(prev.clone());
                    continue;
                }
            }

            info!(
                done = i + 1,
                total = raw_cases.len(),
                project = %case.project_name,
                "Enriching case"
            );

            let descriptions = self.describe_case(case, prior).await?;
            enriched_list.push(EnrichedCase {
                case: case.clone(),
                descriptions,
            });

            // Per-case checkpoint: a crash mid-run keeps every case
            // finished so far.
            self.enriched_ledger.checkpoint(&enriched_list)?;
        }

        info!(total = enriched_list.len(), "Enrichment pass complete");
        Ok(enriched_list)
    }

    /// Access the captioning service.
    pub fn captioner(&self) -> &C {
        &self.captioner
    }

    /// Produce one description entry per image ref, reusing prior
    /// non-empty descriptions and captioning only the gaps.
    async fn describe_case(
        &self,
        case: &CaseRecord,
        prior: Option<&EnrichedCase>,
    ) -> Result<Vec<DescriptionEntry>> {
        let context = CaptionContext {
            project_name: case.project_name.clone(),
            products: case.products.clone(),
            location: case.location.clone(),
        };

        let mut descriptions = Vec::with_capacity(case.image_refs.len());

        for image_ref in &case.image_refs {
            let reused = prior
                .and_then(|p| p.description_for(image_ref))
                .filter(|d| !d.trim().is_empty())
                .map(str::to_string);

            let description = match reused {
                Some(description) => description,
                None => self.caption_image(image_ref, &context).await,
            };

            let refined_products = refine_products(&description, &case.products);
            descriptions.push(DescriptionEntry {
                image_ref: image_ref.clone(),
                description,
                refined_products,
            });
        }

        Ok(descriptions)
    }

    /// Caption one image. Every failure mode (unreadable file, service
    /// error) degrades to an empty description so the case still
    /// advances. Empty entries are re-attempted only while their case is
    /// still incomplete; once entry count matches image count the case is
    /// skipped wholesale on later passes.
    async fn caption_image(&self, image_ref: &str, context: &CaptionContext) -> String {
        let path = self.images_dir.join(image_ref);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(image = %path.display(), error = %e, "Image unreadable; leaving description empty");
                return String::new();
            }
        };

        let description = match self.captioner.caption(&bytes, context).await {
            Ok(text) => text,
            Err(e) => {
                warn!(image = image_ref, error = %e, "Captioning failed; leaving description empty");
                String::new()
            }
        };

        // Pacing toward the external service's throughput limits; policy,
        // not correctness.
        tokio::time::sleep(self.delay).await;

        description
    }
}
