//! Gemini-backed captioning client.
//!
//! Sends the image inline (base64) together with a prompt rendered from
//! the configured template. One call captions one image; pacing between
//! calls is the enrichment stage's job, not the client's.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use casebook_core::config::CaptionConfig;
use casebook_core::error::{CasebookError, Result};

use crate::{CaptionContext, Captioner};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum RequestPart<'a> {
    Text(&'a str),
    InlineData { mime_type: &'a str, data: String },
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Captioning client for the Gemini `generateContent` API.
pub struct GeminiCaptioner {
    client: Client,
    endpoint: String,
    api_key: String,
    prompt_template: String,
}

impl GeminiCaptioner {
    /// Build a captioner from configuration, resolving the API key from
    /// the configured environment variables.
    pub fn new(config: &CaptionConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        Ok(Self::with_key(config, api_key))
    }

    pub fn with_key(config: &CaptionConfig, api_key: String) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/models/{}:generateContent", API_BASE, config.model),
            api_key,
            prompt_template: config.prompt_template.clone(),
        }
    }

    /// Render the prompt template with the case's context fields.
    fn render_prompt(&self, context: &CaptionContext) -> String {
        self.prompt_template
            .replace("{project_name}", &context.project_name)
            .replace("{products}", &context.products_joined())
            .replace("{location}", &context.location)
    }
}

/// Join the candidate's text parts; an empty answer is an error so the
/// caller's failure policy (empty description, continue) applies uniformly.
fn extract_text(response: GenerateResponse) -> Result<String> {
    let text = response
        .candidates
        .into_iter()
        .next()
        .map(|c| {
            c.content
                .parts
                .into_iter()
                .map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
        .trim()
        .to_string();

    if text.is_empty() {
        return Err(CasebookError::Caption(
            "captioning service returned no text".to_string(),
        ));
    }
    Ok(text)
}

impl Captioner for GeminiCaptioner {
    async fn caption(&self, image: &[u8], context: &CaptionContext) -> Result<String> {
        let prompt = self.render_prompt(context);
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart::Text(&prompt),
                    RequestPart::InlineData {
                        mime_type: "image/jpeg",
                        data: BASE64.encode(image),
                    },
                ],
            }],
        };

        debug!(
            project = %context.project_name,
            image_bytes = image.len(),
            "Requesting caption"
        );

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CasebookError::Caption(format!("request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            return Err(CasebookError::Caption(format!(
                "captioning request failed ({}): {}",
                status, body
            )));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| CasebookError::Caption(format!("invalid response: {}", e)))?;
        extract_text(parsed)
    }
}
