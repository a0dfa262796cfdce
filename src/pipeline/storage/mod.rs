pub mod embedder;
pub mod types;
pub mod vectordb;
pub mod writer;

pub use embedder::*;
pub use types::*;
pub use vectordb::*;
pub use writer::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration v{version} failed: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Vector DB error: {0}")]
    VectorDb(String),

    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}
