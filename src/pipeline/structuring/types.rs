use super::GenerationError;

/// Text-generation backend abstraction (allows mocking).
pub trait LlmClient: Send + Sync {
    /// Run one prompt against one model. An empty answer is an error.
    fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerationError>;

    /// Models the backend currently serves.
    fn list_models(&self) -> Result<Vec<String>, GenerationError>;

    /// Provider label for logs.
    fn provider(&self) -> &'static str;
}
