//! Content-source connector for the collection stage.
//!
//! The core sees the source through the [`ContentSource`] trait: enumerate
//! candidate detail URLs, fetch one detail page's fields, fetch one
//! image's bytes. `HttpContentSource` is the production implementation;
//! `MockContentSource` drives the pipeline in tests.

pub mod http;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use casebook_core::error::{CasebookError, Result};

pub use http::HttpContentSource;

/// Fields extracted from one detail page, before local image resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDetail {
    pub project_name: String,
    pub location: String,
    pub products: Vec<String>,
    pub image_urls: Vec<String>,
}

/// External collaborator producing raw case material.
///
/// Implementations convert a remote archive into candidate URLs, field
/// sets, and image bytes. All failures are returned as errors; the
/// collection stage decides what is skippable.
pub trait ContentSource: Send + Sync {
    /// Candidate detail-page URLs on the given listing page (1-based).
    /// An empty result means the listing is exhausted.
    fn list_candidate_urls(
        &self,
        page: u32,
    ) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;

    /// Fetch and extract one detail page.
    fn fetch_detail(
        &self,
        url: &str,
    ) -> impl std::future::Future<Output = Result<CaseDetail>> + Send;

    /// Fetch one image's bytes.
    fn fetch_image(
        &self,
        url: &str,
    ) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
}

/// Derive the stable case identifier from a detail URL.
///
/// The id is the last non-empty path segment, e.g.
/// `https://host/case/detail/3483/` → `3483`.
pub fn case_id_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

// ---------------------------------------------------------------------------
// MockContentSource - scripted source for tests
// ---------------------------------------------------------------------------

/// Scripted content source for tests.
///
/// Pages and details are fixed up front; every `fetch_detail` call is
/// recorded so tests can assert that already-collected cases are never
/// re-fetched.
#[derive(Debug, Default)]
pub struct MockContentSource {
    pages: Vec<Vec<String>>,
    details: HashMap<String, CaseDetail>,
    failing_details: HashSet<String>,
    failing_images: HashSet<String>,
    detail_calls: Mutex<Vec<String>>,
}

impl MockContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listing page containing the given detail URLs.
    pub fn with_page(mut self, urls: &[&str]) -> Self {
        self.pages.push(urls.iter().map(|u| u.to_string()).collect());
        self
    }

    /// Register the detail fields served for a URL.
    pub fn with_detail(mut self, url: &str, detail: CaseDetail) -> Self {
        self.details.insert(url.to_string(), detail);
        self
    }

    /// Make `fetch_detail` fail for a URL.
    pub fn with_failing_detail(mut self, url: &str) -> Self {
        self.failing_details.insert(url.to_string());
        self
    }

    /// Make `fetch_image` fail for an image URL.
    pub fn with_failing_image(mut self, url: &str) -> Self {
        self.failing_images.insert(url.to_string());
        self
    }

    /// URLs passed to `fetch_detail` so far, in call order.
    pub fn detail_calls(&self) -> Vec<String> {
        self.detail_calls.lock().expect("mock lock poisoned").clone()
    }
}

impl ContentSource for MockContentSource {
    async fn list_candidate_urls(&self, page: u32) -> Result<Vec<String>> {
        Ok(self
            .pages
            .get((page as usize).saturating_sub(1))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_detail(&self, url: &str) -> Result<CaseDetail> {
        self.detail_calls
            .lock()
            .expect("mock lock poisoned")
            .push(url.to_string());

        if self.failing_details.contains(url) {
            return Err(CasebookError::Source(format!("scripted failure for {}", url)));
        }
        self.details
            .get(url)
            .cloned()
            .ok_or_else(|| CasebookError::Source(format!("no detail scripted for {}", url)))
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        if self.failing_images.contains(url) {
            return Err(CasebookError::Source(format!(
                "scripted image failure for {}",
                url
            )));
        }
        // Deterministic bytes derived from the URL.
        Ok(url.as_bytes().to_vec())
    }
}
