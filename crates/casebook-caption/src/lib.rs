//! Captioning service for the enrichment stage.
//!
//! The core sees the captioner through the [`Captioner`] trait: image
//! bytes plus case context in, free-text description out. `GeminiCaptioner`
//! is the production backend; `MockCaptioner` provides deterministic text
//! and call counting for tests.

pub mod gemini;
pub mod products;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use casebook_core::error::{CasebookError, Result};
use casebook_core::types::UNKNOWN;

pub use gemini::GeminiCaptioner;
pub use products::refine_products;

/// Case context handed to the captioning service alongside the image.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionContext {
    pub project_name: String,
    pub products: Vec<String>,
    pub location: String,
}

impl CaptionContext {
    /// Products joined for prompt interpolation; `"unknown"` when the
    /// source declared none.
    pub fn products_joined(&self) -> String {
        if self.products.is_empty() {
            UNKNOWN.to_string()
        } else {
            self.products.join(", ")
        }
    }
}

/// External collaborator turning an image plus context into description
/// text.
pub trait Captioner: Send + Sync {
    /// Generate a description for the given image. A failure here is
    /// always recoverable from the pipeline's point of view - the caller
    /// records an empty description and moves on.
    fn caption(
        &self,
        image: &[u8],
        context: &CaptionContext,
    ) -> impl std::future::Future<Output = Result<String>> + Send;
}

// ---------------------------------------------------------------------------
// MockCaptioner - deterministic captions for testing
// ---------------------------------------------------------------------------

/// Mock captioner returning deterministic text derived from the image
/// bytes and context.
///
/// Identical inputs always produce identical captions, which lets resume
/// tests assert that re-captioning an already-described image would be
/// detectable. Calls are counted; bytes containing the configured failure
/// marker produce an error instead.
#[derive(Debug, Default)]
pub struct MockCaptioner {
    calls: AtomicUsize,
    fail_marker: Option<Vec<u8>>,
}

impl MockCaptioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any caption whose image bytes contain `marker`.
    pub fn failing_on(marker: &[u8]) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_marker: Some(marker.to_vec()),
        }
    }

    /// Number of caption calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Captioner for MockCaptioner {
    async fn caption(&self, image: &[u8], context: &CaptionContext) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(marker) = &self.fail_marker {
            if !marker.is_empty() && image.windows(marker.len()).any(|w| w == &marker[..]) {
                return Err(CasebookError::Caption("scripted caption failure".to_string()));
            }
        }

        let mut hasher = DefaultHasher::new();
        image.hash(&mut hasher);
        Ok(format!(
            "{} in {}: a space featuring {} (scene {:016x})",
            context.project_name,
            context.location,
            context.products_joined(),
            hasher.finish()
        ))
    }
}
