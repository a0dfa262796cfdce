//! Application configuration.
//!
//! Layered the usual way: built-in defaults, then an optional TOML file,
//! then `FINSIGHT__SECTION__KEY` environment variables. `.env` is loaded
//! before the environment is read.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::{IdScheme, Provenance, SelectionStrategy};

/// Application-level constants
pub const APP_NAME: &str = "FinSight";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "finsight.toml";

/// Suffix that replaces a raw document's extension to name its artifact.
pub const ARTIFACT_SUFFIX: &str = "_processed.json";

/// Extension the dispatcher accepts in processed directories.
pub const ARTIFACT_EXTENSION: &str = "json";

/// Extension of raw scraped documents picked up by batch runs.
pub const RAW_EXTENSION: &str = "txt";

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> String {
    "info,finsight_lib=debug".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Model roster is empty, configure at least one model")]
    EmptyRoster,

    #[error("Invalid model identifier: '{0}'")]
    InvalidModelName(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ──────────────────────────────────────────────
// Sections
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    Ollama,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub provider: ProviderKind,
    /// Overrides the provider's default endpoint.
    pub base_url: Option<String>,
    /// Falls back to `GEMINI_API_KEY` when unset.
    pub api_key: Option<String>,
    pub roster: Vec<String>,
    pub strategy: SelectionStrategy,
    pub timeout_secs: u64,
    pub max_input_chars: usize,
    pub disable_missing_models: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            base_url: None,
            api_key: None,
            roster: vec![
                "gemini-3-flash-preview".into(),
                "gemini-2.5-flash".into(),
                "gemma-3-27b-it".into(),
                "gemma-3-12b-it".into(),
                "gemini-2.5-flash-lite".into(),
            ],
            strategy: SelectionStrategy::RoundRobin,
            timeout_secs: 120,
            max_input_chars: 30_000,
            disable_missing_models: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per model for unavailable / rate-limited responses.
    pub max_attempts: u32,
    /// Backoff step; attempt N waits N × this.
    pub unavailable_backoff_secs: u64,
    pub rate_limit_cooldown_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            unavailable_backoff_secs: 5,
            rate_limit_cooldown_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub pause_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { pause_secs: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub debounce_secs: u64,
    pub poll_interval_ms: u64,
    /// Report files already present at startup as new.
    pub catch_up: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_secs: 1,
            poll_interval_ms: 1000,
            catch_up: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub batch_size: usize,
    pub min_text_len: usize,
    pub id_scheme: IdScheme,
    pub embedding_base_url: String,
    pub embedding_model: String,
    pub embedding_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("knowledge.db"),
            batch_size: 100,
            min_text_len: crate::models::MIN_RECORD_TEXT_CHARS,
            id_scheme: IdScheme::Deterministic,
            embedding_base_url: "http://localhost:11434".into(),
            embedding_model: "all-minilm".into(),
            embedding_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_filter(),
            format: LogFormat::Pretty,
        }
    }
}

// ──────────────────────────────────────────────
// Top level
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub extraction: ExtractionConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub watch: WatchConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            extraction: ExtractionConfig::default(),
            retry: RetryConfig::default(),
            batch: BatchConfig::default(),
            watch: WatchConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path` (optional on disk) and the environment, then validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("FINSIGHT")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("extraction.roster")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: AppConfig = settings.try_deserialize()?;

        if cfg.extraction.api_key.is_none() {
            cfg.extraction.api_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extraction.roster.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }
        for model in &self.extraction.roster {
            validate_model_name(model)?;
        }
        if self.store.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "store.batch_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.extraction.max_input_chars == 0 {
            return Err(ConfigError::Invalid {
                field: "extraction.max_input_chars",
                reason: "must be at least 1".into(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if self.watch.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "watch.poll_interval_ms",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn dirs(&self) -> PipelineDirs {
        PipelineDirs::under(&self.data_dir)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_secs(self.batch.pause_secs)
    }
}

/// Validate a model identifier before it goes anywhere near a URL path.
///
/// Accepts `name`, `name:tag`, `namespace/name:tag` and the `models/name`
/// form Gemini uses. Rejects traversal, whitespace and shell metacharacters.
pub fn validate_model_name(name: &str) -> Result<(), ConfigError> {
    let valid = regex::Regex::new(
        r"^[a-zA-Z0-9][a-zA-Z0-9._-]*(/[a-zA-Z0-9][a-zA-Z0-9._-]*)?(:[a-zA-Z0-9._-]+)?$",
    )
    .map_err(|e| ConfigError::Invalid {
        field: "extraction.roster",
        reason: e.to_string(),
    })?;

    if name.is_empty() || name.contains("..") || !valid.is_match(name) {
        return Err(ConfigError::InvalidModelName(name.to_string()));
    }
    Ok(())
}

// ──────────────────────────────────────────────
// Directory layout
// ──────────────────────────────────────────────

/// The four watched directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDirs {
    pub raw_retail: PathBuf,
    pub raw_institutional: PathBuf,
    pub processed_retail: PathBuf,
    pub processed_institutional: PathBuf,
}

impl PipelineDirs {
    /// `<data_dir>/{retail,institutional}/{scraped,processed}`
    pub fn under(data_dir: &Path) -> Self {
        Self {
            raw_retail: data_dir.join("retail").join("scraped"),
            raw_institutional: data_dir.join("institutional").join("scraped"),
            processed_retail: data_dir.join("retail").join("processed"),
            processed_institutional: data_dir.join("institutional").join("processed"),
        }
    }

    pub fn raw(&self, provenance: Provenance) -> &Path {
        match provenance {
            Provenance::Retail => &self.raw_retail,
            Provenance::Institutional => &self.raw_institutional,
        }
    }

    pub fn processed(&self, provenance: Provenance) -> &Path {
        match provenance {
            Provenance::Retail => &self.processed_retail,
            Provenance::Institutional => &self.processed_institutional,
        }
    }

    pub fn all(&self) -> [&Path; 4] {
        [
            &self.raw_retail,
            &self.raw_institutional,
            &self.processed_retail,
            &self.processed_institutional,
        ]
    }

    pub fn ensure_exist(&self) -> std::io::Result<()> {
        for dir in self.all() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_constants() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.extraction.max_input_chars, 30_000);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.unavailable_backoff_secs, 5);
        assert_eq!(cfg.retry.rate_limit_cooldown_secs, 30);
        assert_eq!(cfg.batch.pause_secs, 10);
        assert_eq!(cfg.store.batch_size, 100);
        assert_eq!(cfg.store.min_text_len, 5);
        assert_eq!(cfg.store.id_scheme, IdScheme::Deterministic);
        assert_eq!(cfg.watch.debounce_secs, 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finsight.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/srv/finsight"

[extraction]
provider = "ollama"
roster = ["llama3.1:8b", "gemma3:12b"]
strategy = "random"

[store]
id_scheme = "random"
batch_size = 25
"#,
        )
        .unwrap();

        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/srv/finsight"));
        assert_eq!(cfg.extraction.provider, ProviderKind::Ollama);
        assert_eq!(cfg.extraction.roster, vec!["llama3.1:8b", "gemma3:12b"]);
        assert_eq!(cfg.extraction.strategy, SelectionStrategy::Random);
        assert_eq!(cfg.store.id_scheme, IdScheme::Random);
        assert_eq!(cfg.store.batch_size, 25);
        // Untouched sections keep defaults.
        assert_eq!(cfg.retry.max_attempts, 3);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert!(!cfg.extraction.roster.is_empty());
    }

    #[test]
    fn empty_roster_rejected() {
        let mut cfg = AppConfig::default();
        cfg.extraction.roster.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyRoster)));
    }

    #[test]
    fn zero_batch_size_rejected() {
        let mut cfg = AppConfig::default();
        cfg.store.batch_size = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let mut cfg = AppConfig::default();
        cfg.watch.poll_interval_ms = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                field: "watch.poll_interval_ms",
                ..
            })
        ));
    }

    #[test]
    fn model_name_validation() {
        assert!(validate_model_name("gemini-2.5-flash").is_ok());
        assert!(validate_model_name("llama3.1:8b").is_ok());
        assert!(validate_model_name("models/gemma-3-27b-it").is_ok());
        assert!(validate_model_name("../etc/passwd").is_err());
        assert!(validate_model_name("a b").is_err());
        assert!(validate_model_name("x; rm -rf /").is_err());
        assert!(validate_model_name("").is_err());
    }

    #[test]
    fn dirs_layout() {
        let dirs = PipelineDirs::under(Path::new("data"));
        assert_eq!(dirs.raw(Provenance::Retail), Path::new("data/retail/scraped"));
        assert_eq!(
            dirs.processed(Provenance::Institutional),
            Path::new("data/institutional/processed")
        );
        assert_eq!(dirs.all().len(), 4);
    }

    #[test]
    fn ensure_exist_creates_all_four() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = PipelineDirs::under(tmp.path());
        dirs.ensure_exist().unwrap();
        for dir in dirs.all() {
            assert!(dir.is_dir());
        }
    }

    #[test]
    fn app_name_is_finsight() {
        assert_eq!(APP_NAME, "FinSight");
    }
}
