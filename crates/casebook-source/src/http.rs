//! HTTP implementation of the content-source connector.
//!
//! Fetches listing and detail pages with `reqwest` and extracts fields
//! with `scraper` CSS selectors. All selectors come from configuration so
//! a differently structured archive is a config change, not a code change.

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use tracing::debug;

use casebook_core::config::SourceConfig;
use casebook_core::error::{CasebookError, Result};
use casebook_core::types::UNKNOWN;

use crate::{CaseDetail, ContentSource};

#[derive(Debug)]
struct Selectors {
    link: Selector,
    project: Selector,
    location: Selector,
    product: Selector,
    image: Selector,
}

fn parse_selector(css: &str, name: &str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| CasebookError::Config(format!("invalid {} selector '{}': {}", name, css, e)))
}

/// Connector fetching a live case archive over HTTP.
#[derive(Debug)]
pub struct HttpContentSource {
    client: Client,
    base: Url,
    listing_path: String,
    selectors: Selectors,
}

impl HttpContentSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| CasebookError::Config(format!("invalid user agent: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CasebookError::Source(format!("failed to build HTTP client: {}", e)))?;

        let base = Url::parse(&config.base_url)
            .map_err(|e| CasebookError::Config(format!("invalid base URL: {}", e)))?;

        let selectors = Selectors {
            link: parse_selector(&config.link_selector, "link")?,
            project: parse_selector(&config.project_selector, "project")?,
            location: parse_selector(&config.location_selector, "location")?,
            product: parse_selector(&config.product_selector, "product")?,
            image: parse_selector(&config.image_selector, "image")?,
        };

        Ok(Self {
            client,
            base,
            listing_path: config.listing_path.clone(),
            selectors,
        })
    }

    /// URL of the given 1-based listing page. Page 1 is the bare listing;
    /// later pages append `?page=N`.
    fn listing_url(&self, page: u32) -> Result<Url> {
        let mut url = self
            .base
            .join(&self.listing_path)
            .map_err(|e| CasebookError::Config(format!("invalid listing path: {}", e)))?;
        if page > 1 {
            url.set_query(Some(&format!("page={}", page)));
        }
        Ok(url)
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CasebookError::Source(format!("GET {} failed: {}", url, e)))?
            .error_for_status()
            .map_err(|e| CasebookError::Source(format!("GET {} failed: {}", url, e)))?;
        resp.text()
            .await
            .map_err(|e| CasebookError::Source(format!("reading {} failed: {}", url, e)))
    }

    /// Extract detail links from listing HTML, resolved against the base
    /// URL, order-preserving and deduplicated.
    fn extract_links(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let mut links = Vec::new();
        for el in document.select(&self.selectors.link) {
            let Some(href) = el.value().attr("href") else {
                continue;
            };
            let Ok(resolved) = self.base.join(href) else {
                continue;
            };
            let resolved = resolved.to_string();
            if !links.contains(&resolved) {
                links.push(resolved);
            }
        }
        links
    }

    /// Extract case fields from detail-page HTML. Missing fields become
    /// the `"unknown"` sentinel / empty lists rather than errors.
    fn extract_detail(&self, html: &str) -> CaseDetail {
        let document = Html::parse_document(html);

        let text_of = |selector: &Selector| -> Option<String> {
            document
                .select(selector)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let project_name = text_of(&self.selectors.project).unwrap_or_else(|| UNKNOWN.to_string());
        let location = text_of(&self.selectors.location).unwrap_or_else(|| UNKNOWN.to_string());

        let products = document
            .select(&self.selectors.product)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let image_urls = document
            .select(&self.selectors.image)
            .filter_map(|el| el.value().attr("src"))
            .filter(|src| !src.is_empty())
            .filter_map(|src| self.base.join(src).ok())
            .map(|u| u.to_string())
            .collect();

        CaseDetail {
            project_name,
            location,
            products,
            image_urls,
        }
    }
}

impl ContentSource for HttpContentSource {
    async fn list_candidate_urls(&self, page: u32) -> Result<Vec<String>> {
        let url = self.listing_url(page)?;
        debug!(page, url = %url, "Fetching listing page");
        let body = self.get_text(url.as_str()).await?;
        Ok(self.extract_links(&body))
    }

    async fn fetch_detail(&self, url: &str) -> Result<CaseDetail> {
        debug!(url, "Fetching detail page");
        let body = self.get_text(url).await?;
        Ok(self.extract_detail(&body))
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CasebookError::Source(format!("GET {} failed: {}", url, e)))?
            .error_for_status()
            .map_err(|e| CasebookError::Source(format!("GET {} failed: {}", url, e)))?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| CasebookError::Source(format!("reading {} failed: {}", url, e)))?;
        Ok(bytes.to_vec())
    }
}
