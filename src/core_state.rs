//! Long-lived pipeline handles.
//!
//! `CoreState` owns everything the CLI commands share: the extraction client,
//! the model selector, the vector store and the components built on them.
//! Built once in `open`, released in `close`.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{AppConfig, ConfigError, PipelineDirs, ProviderKind};
use crate::pipeline::artifact::cleanup_orphaned_temp_files;
use crate::pipeline::batch::BatchRunner;
use crate::pipeline::model_router::ModelSelector;
use crate::pipeline::processor::DocumentProcessor;
use crate::pipeline::rag::RetrievalService;
use crate::pipeline::sleeper::{Sleeper, ThreadSleeper};
use crate::pipeline::storage::{
    KnowledgeWriter, OllamaEmbedder, SqliteVectorStore, StorageError, VectorStore,
};
use crate::pipeline::structuring::{
    GeminiClient, GenerationError, LlmClient, OllamaClient, GEMINI_DEFAULT_BASE_URL,
    OLLAMA_DEFAULT_BASE_URL,
};
use crate::pipeline::watch::{PollingObserver, WatchDispatcher};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Extraction client: {0}")]
    Client(#[from] GenerationError),

    #[error("Knowledge store: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the extraction client for the configured provider.
pub fn build_llm_client(config: &AppConfig) -> Result<Arc<dyn LlmClient>, CoreError> {
    let ext = &config.extraction;
    let client: Arc<dyn LlmClient> = match ext.provider {
        ProviderKind::Gemini => {
            let key = ext.api_key.as_deref().unwrap_or_default();
            let base = ext.base_url.as_deref().unwrap_or(GEMINI_DEFAULT_BASE_URL);
            Arc::new(GeminiClient::new(base, key, ext.timeout_secs)?)
        }
        ProviderKind::Ollama => {
            let base = ext.base_url.as_deref().unwrap_or(OLLAMA_DEFAULT_BASE_URL);
            Arc::new(OllamaClient::new(base, ext.timeout_secs)?)
        }
    };
    Ok(client)
}

pub struct CoreState {
    config: AppConfig,
    dirs: PipelineDirs,
    client: Arc<dyn LlmClient>,
    sleeper: Arc<dyn Sleeper>,
    processor: Arc<DocumentProcessor>,
    store: Arc<dyn VectorStore>,
    writer: Arc<KnowledgeWriter>,
}

impl CoreState {
    /// Open real handles: provider client, SQLite store, Ollama embedder.
    pub fn open(config: AppConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let client = build_llm_client(&config)?;
        let embedder = Arc::new(OllamaEmbedder::new(
            &config.store.embedding_base_url,
            &config.store.embedding_model,
            config.store.embedding_timeout_secs,
        )?);
        let store = Arc::new(SqliteVectorStore::open(&config.store.path, embedder)?);
        tracing::info!(
            provider = client.provider(),
            store = %config.store.path.display(),
            "Pipeline handles opened"
        );
        Self::with_components(config, client, store, Arc::new(ThreadSleeper))
    }

    /// Assemble from caller-supplied capabilities.
    pub fn with_components(
        config: AppConfig,
        client: Arc<dyn LlmClient>,
        store: Arc<dyn VectorStore>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, CoreError> {
        let dirs = config.dirs();
        dirs.ensure_exist()?;
        for provenance in crate::models::Provenance::ALL {
            cleanup_orphaned_temp_files(dirs.processed(provenance));
        }

        let selector = Arc::new(ModelSelector::from_config(
            client.clone(),
            &config.extraction,
            &config.retry,
            sleeper.clone(),
        ));
        let processor = Arc::new(DocumentProcessor::new(
            selector,
            config.extraction.max_input_chars,
            config.store.min_text_len,
        ));
        let writer = Arc::new(KnowledgeWriter::new(
            store.clone(),
            config.store.batch_size,
            config.store.min_text_len,
            config.store.id_scheme,
        ));

        Ok(Self {
            config,
            dirs,
            client,
            sleeper,
            processor,
            store,
            writer,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn dirs(&self) -> &PipelineDirs {
        &self.dirs
    }

    pub fn client(&self) -> &Arc<dyn LlmClient> {
        &self.client
    }

    pub fn sleeper(&self) -> &Arc<dyn Sleeper> {
        &self.sleeper
    }

    pub fn processor(&self) -> &Arc<DocumentProcessor> {
        &self.processor
    }

    pub fn writer(&self) -> &Arc<KnowledgeWriter> {
        &self.writer
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn retrieval(&self) -> RetrievalService {
        RetrievalService::new(self.store.clone())
    }

    pub fn batch_runner(&self) -> BatchRunner {
        BatchRunner::new(
            self.processor.clone(),
            self.sleeper.clone(),
            self.config.batch_pause(),
        )
    }

    pub fn dispatcher(&self) -> WatchDispatcher {
        WatchDispatcher::new(
            self.dirs.clone(),
            self.processor.clone(),
            self.writer.clone(),
            self.sleeper.clone(),
            Duration::from_secs(self.config.watch.debounce_secs),
        )
    }

    pub fn observer(&self, catch_up: bool) -> PollingObserver {
        let roots = self.dirs.all().iter().map(|p| p.to_path_buf()).collect();
        PollingObserver::new(roots).with_catch_up(catch_up)
    }

    /// Release all handles. The SQLite connection closes when the last
    /// reference drops.
    pub fn close(self) {
        let refs = Arc::strong_count(&self.store);
        drop(self);
        tracing::info!(store_refs = refs, "Pipeline handles closed");
    }
}
