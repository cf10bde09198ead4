use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel used when the content source exposes no value for a display
/// field (project name, location).
pub const UNKNOWN: &str = "unknown";

/// One physical project as collected from the content source.
///
/// `case_id` is derived from the source detail URL and is the primary key
/// across all pipeline stages. Records are never deleted; a later
/// collection pass must not produce a second record with the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub case_id: String,
    pub url: String,
    pub project_name: String,
    pub location: String,
    /// Product names as declared by the source, in page order, unfiltered.
    pub products: Vec<String>,
    /// Source image URLs, in page order.
    pub image_urls: Vec<String>,
    /// Locally resolved image file names (relative to the images
    /// directory). May be shorter than `image_urls` when a download
    /// failed; index order is the correlation key to description entries.
    pub image_refs: Vec<String>,
    /// When the collection stage first recorded this case.
    #[serde(default = "epoch")]
    pub first_seen: DateTime<Utc>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// One machine-generated description for one image within a case.
///
/// An empty `description` means "not yet captioned or the captioning call
/// failed" - the two are deliberately indistinguishable; an enrichment
/// pass fills empty entries whenever it revisits the case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionEntry {
    /// Back-reference to the owning image (correlation key, not ownership).
    pub image_ref: String,
    pub description: String,
    /// Subset of the case's products confirmed by textual matching against
    /// the description. Derived data; recomputed on every enrichment pass.
    #[serde(default)]
    pub refined_products: Vec<String>,
}

impl DescriptionEntry {
    pub fn is_captioned(&self) -> bool {
        !self.description.trim().is_empty()
    }
}

/// A case record together with its per-image descriptions.
///
/// Invariant: `descriptions` aligns 1:1, in order, with `case.image_refs`
/// once the enrichment stage has completed the case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedCase {
    #[serde(flatten)]
    pub case: CaseRecord,
    pub descriptions: Vec<DescriptionEntry>,
}

impl EnrichedCase {
    /// True when every image of the raw record has a description entry.
    ///
    /// This is the resume-skip criterion: a complete case is passed
    /// through unchanged on the next enrichment run.
    pub fn is_complete_for(&self, raw: &CaseRecord) -> bool {
        self.descriptions.len() == raw.image_refs.len()
    }

    /// True when every description entry carries non-empty text.
    pub fn is_fully_enriched(&self) -> bool {
        !self.descriptions.is_empty() && self.descriptions.iter().all(DescriptionEntry::is_captioned)
    }

    /// Look up a previously generated description by image reference.
    pub fn description_for(&self, image_ref: &str) -> Option<&str> {
        self.descriptions
            .iter()
            .find(|d| d.image_ref == image_ref)
            .map(|d| d.description.as_str())
    }
}

/// Metadata attached to every indexed vector record.
///
/// One row per captioned image; many rows may share a `case_id`. Every
/// `case_id` stored here must exist in the raw-record ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseMetadata {
    pub case_id: String,
    pub project_name: String,
    /// Product names joined with ", " - the refined set for this image
    /// when textual matching found any, else the case's full list.
    pub products: String,
    pub location: String,
    pub image_ref: String,
    pub url: String,
}
