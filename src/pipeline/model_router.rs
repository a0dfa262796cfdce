//! Model fallback selector.
//!
//! Walks an ordered roster of model identifiers until one produces usable
//! text. Each failure class has its own policy:
//! - quota exhausted, not found, empty or other → next model, no delay
//! - unavailable → same model after `attempt × backoff`
//! - rate limited → same model after a fixed cooldown
//!
//! Retries share one per-model attempt bound. Models reported as not found
//! can be disabled for the selector's lifetime.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::seq::SliceRandom;
use thiserror::Error;

use crate::config::{ExtractionConfig, RetryConfig};
use crate::models::SelectionStrategy;
use crate::pipeline::sleeper::Sleeper;
use crate::pipeline::structuring::{GenerationError, LlmClient};

// ──────────────────────────────────────────────
// Types
// ──────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("All models unavailable (tried: {})", tried.join(", "))]
    AllModelsUnavailable { tried: Vec<String> },
}

/// Successful generation and the model that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub model: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub unavailable_backoff: Duration,
    pub rate_limit_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            unavailable_backoff: Duration::from_secs(5),
            rate_limit_cooldown: Duration::from_secs(30),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            unavailable_backoff: Duration::from_secs(cfg.unavailable_backoff_secs),
            rate_limit_cooldown: Duration::from_secs(cfg.rate_limit_cooldown_secs),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after `err` on 1-based `attempt`, or `None` to
    /// move to the next model.
    pub fn retry_delay(&self, err: &GenerationError, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        match err {
            GenerationError::Unavailable(_) => Some(self.unavailable_backoff * attempt),
            GenerationError::RateLimited(_) => Some(self.rate_limit_cooldown),
            _ => None,
        }
    }
}

// ──────────────────────────────────────────────
// Selector
// ──────────────────────────────────────────────

pub struct ModelSelector {
    client: Arc<dyn LlmClient>,
    roster: Vec<String>,
    strategy: SelectionStrategy,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    disable_missing: bool,
    disabled: Mutex<HashSet<String>>,
    cursor: AtomicUsize,
}

impl ModelSelector {
    pub fn new(
        client: Arc<dyn LlmClient>,
        roster: Vec<String>,
        strategy: SelectionStrategy,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            client,
            roster,
            strategy,
            policy,
            sleeper,
            disable_missing: true,
            disabled: Mutex::new(HashSet::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn from_config(
        client: Arc<dyn LlmClient>,
        extraction: &ExtractionConfig,
        retry: &RetryConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self::new(
            client,
            extraction.roster.clone(),
            extraction.strategy,
            RetryPolicy::from(retry),
            sleeper,
        )
        .with_disable_missing(extraction.disable_missing_models)
    }

    pub fn with_disable_missing(mut self, enabled: bool) -> Self {
        self.disable_missing = enabled;
        self
    }

    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    pub fn disabled_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self
            .disabled
            .lock()
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default();
        models.sort();
        models
    }

    /// Generate starting at the selector's own rotation cursor.
    pub fn generate(&self, prompt: &str) -> Result<Generation, SelectionError> {
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.generate_from(prompt, slot)
    }

    /// Generate with round-robin rotation starting at `slot mod len`.
    pub fn generate_from(&self, prompt: &str, slot: usize) -> Result<Generation, SelectionError> {
        let candidates = match self.strategy {
            SelectionStrategy::RoundRobin => self.rotated_candidates(slot),
            SelectionStrategy::Random => self.random_candidate().into_iter().collect(),
        };

        let mut tried = Vec::with_capacity(candidates.len());
        for model in candidates {
            tried.push(model.clone());
            match self.try_model(&model, prompt) {
                Ok(text) => {
                    tracing::debug!(model = %model, chars = text.len(), "Generation succeeded");
                    return Ok(Generation { model, text });
                }
                Err(e) => {
                    tracing::warn!(model = %model, kind = e.kind(), error = %e, "Model failed, advancing");
                    if self.disable_missing && matches!(e, GenerationError::NotFound { .. }) {
                        self.disable(&model);
                    }
                }
            }
        }

        tracing::error!(tried = ?tried, "Roster exhausted");
        Err(SelectionError::AllModelsUnavailable { tried })
    }

    /// Roster rotated to start at `slot`, minus disabled models.
    fn rotated_candidates(&self, slot: usize) -> Vec<String> {
        if self.roster.is_empty() {
            return Vec::new();
        }
        let start = slot % self.roster.len();
        let rotated: Vec<String> = self.roster[start..]
            .iter()
            .chain(self.roster[..start].iter())
            .cloned()
            .collect();
        filter_enabled(&rotated, &self.disabled_models())
    }

    fn random_candidate(&self) -> Option<String> {
        let enabled = filter_enabled(&self.roster, &self.disabled_models());
        enabled.choose(&mut rand::thread_rng()).cloned()
    }

    fn disable(&self, model: &str) {
        if let Ok(mut disabled) = self.disabled.lock() {
            if disabled.insert(model.to_string()) {
                tracing::warn!(model = %model, "Model not found, removed from rotation");
            }
        }
    }

    /// One model with its retries. No delay follows the last attempt.
    fn try_model(&self, model: &str, prompt: &str) -> Result<String, GenerationError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::info!(model = %model, attempt, "Requesting extraction");
            let err = match self.client.generate(model, prompt) {
                Ok(text) if !text.trim().is_empty() => return Ok(text),
                Ok(_) => GenerationError::EmptyResponse,
                Err(e) => e,
            };
            match self.policy.retry_delay(&err, attempt) {
                Some(delay) => {
                    tracing::warn!(
                        model = %model,
                        attempt,
                        kind = err.kind(),
                        delay_secs = delay.as_secs(),
                        "Retrying after delay"
                    );
                    self.sleeper.sleep(delay);
                }
                None => return Err(err),
            }
        }
    }
}

/// Filter roster models to only those that are enabled.
fn filter_enabled(roster: &[String], disabled: &[String]) -> Vec<String> {
    roster
        .iter()
        .filter(|m| !disabled.contains(m))
        .cloned()
        .collect()
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
