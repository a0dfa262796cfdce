use serde::{Deserialize, Serialize};

use super::types::LlmClient;
use super::GenerationError;

pub const OLLAMA_DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama HTTP client for local LLM inference.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl OllamaClient {
    /// Create a new OllamaClient pointing at an Ollama instance.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, GenerationError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| GenerationError::Other(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

impl LlmClient for OllamaClient {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| GenerationError::from_transport(&self.base_url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            // Ollama reports unknown models as 404 with "model '…' not found".
            return Err(GenerationError::from_status(model, status.as_u16(), &body));
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .map_err(|e| GenerationError::Other(format!("unreadable response: {e}")))?;

        if parsed.response.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(parsed.response)
    }

    fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| GenerationError::from_transport(&self.base_url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GenerationError::from_status("*", status.as_u16(), &body));
        }

        let parsed: OllamaTagsResponse = response
            .json()
            .map_err(|e| GenerationError::Other(format!("unreadable response: {e}")))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    fn provider(&self) -> &'static str {
        "ollama"
    }
}
