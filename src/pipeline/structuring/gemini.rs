use reqwest::blocking::RequestBuilder;
use serde::{Deserialize, Serialize};

use super::types::LlmClient;
use super::GenerationError;

pub const GEMINI_DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Credentials go in a header so they never appear in a URL or its errors.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Google Generative Language API client (blocking).
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

impl GeminiClient {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, GenerationError> {
        if api_key.trim().is_empty() {
            return Err(GenerationError::Other(
                "Gemini API key is missing (set GEMINI_API_KEY or extraction.api_key)".into(),
            ));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| GenerationError::Other(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    fn generate_url(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    fn generate_request(&self, model: &str, body: &GenerateContentRequest<'_>) -> RequestBuilder {
        self.client
            .post(self.generate_url(model))
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
    }

    fn list_request(&self) -> RequestBuilder {
        self.client
            .get(format!("{}/v1beta/models", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("pageSize", "1000")])
    }
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

/// Concatenate the text parts of the first candidate.
fn response_text(parsed: GenerateContentResponse) -> String {
    parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

impl LlmClient for GeminiClient {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerationError> {
        let body = GenerateContentRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
        };

        let response = self
            .generate_request(model, &body)
            .send()
            .map_err(|e| GenerationError::from_transport(&self.base_url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GenerationError::from_status(model, status.as_u16(), &body));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .map_err(|e| GenerationError::Other(format!("unreadable response: {e}")))?;

        let text = response_text(parsed);
        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(text)
    }

    fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        let response = self
            .list_request()
            .send()
            .map_err(|e| GenerationError::from_transport(&self.base_url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GenerationError::from_status("*", status.as_u16(), &body));
        }

        let parsed: ListModelsResponse = response
            .json()
            .map_err(|e| GenerationError::Other(format!("unreadable response: {e}")))?;

        Ok(parsed
            .models
            .into_iter()
            .map(|m| m.name.strip_prefix("models/").unwrap_or(&m.name).to_string())
            .collect())
    }

    fn provider(&self) -> &'static str {
        "gemini"
    }
}
