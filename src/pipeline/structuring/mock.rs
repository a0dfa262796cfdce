use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::types::LlmClient;
use super::GenerationError;

/// Scripted LLM client for tests.
///
/// Each model has a queue of outcomes consumed one per call; once the queue
/// is empty the model's fallback outcome repeats. Models with nothing
/// scripted answer `NotFound`. Every call is recorded.
pub struct MockLlmClient {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, GenerationError>>>>,
    fallback: Mutex<HashMap<String, Result<String, GenerationError>>>,
    calls: Mutex<Vec<(String, String)>>,
}

fn poisoned() -> GenerationError {
    GenerationError::Other("mock client lock poisoned".into())
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call to `model` returns `response`.
    pub fn with_response(self, model: &str, response: &str) -> Self {
        if let Ok(mut fallback) = self.fallback.lock() {
            fallback.insert(model.to_string(), Ok(response.to_string()));
        }
        self
    }

    /// Every call to `model` fails with `err`.
    pub fn with_error(self, model: &str, err: GenerationError) -> Self {
        if let Ok(mut fallback) = self.fallback.lock() {
            fallback.insert(model.to_string(), Err(err));
        }
        self
    }

    /// Queue one outcome for `model`, consumed before its fallback.
    pub fn then(self, model: &str, outcome: Result<&str, GenerationError>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(model.to_string())
                .or_default()
                .push_back(outcome.map(str::to_string));
        }
        self
    }

    /// `(model, prompt)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Models in call order.
    pub fn models_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|(m, _)| m).collect()
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmClient for MockLlmClient {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerationError> {
        self.calls
            .lock()
            .map_err(|_| poisoned())?
            .push((model.to_string(), prompt.to_string()));

        let scripted = self
            .scripts
            .lock()
            .map_err(|_| poisoned())?
            .get_mut(model)
            .and_then(VecDeque::pop_front);
        if let Some(outcome) = scripted {
            return outcome;
        }

        self.fallback
            .lock()
            .map_err(|_| poisoned())?
            .get(model)
            .cloned()
            .unwrap_or_else(|| {
                Err(GenerationError::NotFound {
                    model: model.to_string(),
                })
            })
    }

    fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        let mut models: Vec<String> = self
            .fallback
            .lock()
            .map_err(|_| poisoned())?
            .keys()
            .cloned()
            .collect();
        for model in self.scripts.lock().map_err(|_| poisoned())?.keys() {
            if !models.contains(model) {
                models.push(model.clone());
            }
        }
        models.sort();
        Ok(models)
    }

    fn provider(&self) -> &'static str {
        "mock"
    }
}
