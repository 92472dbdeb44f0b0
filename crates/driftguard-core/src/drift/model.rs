//! Language-model client used by the primary drift path.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::drift::error::AiError;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

/// One-prompt, one-answer text model.
#[async_trait]
pub trait VerdictModel: Send + Sync {
    async fn generate(&self, api_key: &str, prompt: &str) -> Result<String, AiError>;
}

/// Gemini `generateContent` over REST.
#[derive(Debug, Clone)]
pub struct GeminiModel {
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl GeminiModel {
    pub fn new(model: impl Into<String>) -> Result<Self, AiError> {
        Self::with_base_url(DEFAULT_GEMINI_URL, model)
    }

    pub fn with_base_url(base_url: &str, model: impl Into<String>) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[async_trait]
impl VerdictModel for GeminiModel {
    async fn generate(&self, api_key: &str, prompt: &str) -> Result<String, AiError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        debug!(model = %self.model, prompt_chars = prompt.chars().count(), "calling model");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&json!({
                "contents": [{ "parts": [{ "text": prompt }] }],
                "generationConfig": { "responseMimeType": "application/json" }
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AiError::Http {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).map_err(|e| AiError::Parse(e.to_string()))?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .filter(|t| !t.trim().is_empty())
            .ok_or(AiError::EmptyResponse)
    }
}
