use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};

use super::embedder::cosine_distance;
use super::types::{EmbeddingModel, VectorStore};
use super::StorageError;
use crate::models::{EntryMetadata, KnowledgeEntry, Provenance, ScoredEntry};

// ──────────────────────────────────────────────
// SQLite store
// ──────────────────────────────────────────────

const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    "CREATE TABLE IF NOT EXISTS schema_version (
         version INTEGER PRIMARY KEY,
         applied_at TEXT NOT NULL DEFAULT (datetime('now'))
     );
     CREATE TABLE IF NOT EXISTS knowledge_entries (
         id TEXT PRIMARY KEY,
         document TEXT NOT NULL,
         source_type TEXT NOT NULL,
         filename TEXT NOT NULL,
         category TEXT NOT NULL,
         origin_source TEXT NOT NULL,
         embedding BLOB NOT NULL,
         updated_at TEXT NOT NULL DEFAULT (datetime('now'))
     );
     CREATE INDEX IF NOT EXISTS idx_knowledge_source_type ON knowledge_entries(source_type);
     INSERT INTO schema_version (version) VALUES (1);",
)];

/// Knowledge index on SQLite with brute-force cosine search.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    embedder: Arc<dyn EmbeddingModel>,
}

impl SqliteVectorStore {
    /// Open a store at `path` and run migrations.
    pub fn open(path: &Path, embedder: Arc<dyn EmbeddingModel>) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::VectorDb(format!("{}: {e}", parent.display())))?;
        }
        Self::from_connection(Connection::open(path)?, embedder)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory(embedder: Arc<dyn EmbeddingModel>) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?, embedder)
    }

    fn from_connection(conn: Connection, embedder: Arc<dyn EmbeddingModel>) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StorageError> {
    let current_version = get_current_version(conn);
    for &(version, sql) in MIGRATIONS {
        if version > current_version {
            tracing::info!("Running migration v{version}");
            conn.execute_batch(sql)
                .map_err(|e| StorageError::MigrationFailed {
                    version,
                    reason: e.to_string(),
                })?;
        }
    }
    Ok(())
}

/// Current schema version (0 if no schema exists yet)
fn get_current_version(conn: &Connection) -> i64 {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, i64>(0)
    })
    .unwrap_or(0)
}

fn encode_embedding(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn check_lengths(entries: usize, embeddings: usize) -> Result<(), StorageError> {
    if entries != embeddings {
        return Err(StorageError::VectorDb(format!(
            "Entry count {entries} does not match embedding count {embeddings}"
        )));
    }
    Ok(())
}

impl VectorStore for SqliteVectorStore {
    fn upsert(&self, entries: &[KnowledgeEntry]) -> Result<usize, StorageError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let texts: Vec<&str> = entries.iter().map(|e| e.document.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;
        check_lengths(entries.len(), embeddings.len())?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO knowledge_entries
                     (id, document, source_type, filename, category, origin_source, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     document = excluded.document,
                     source_type = excluded.source_type,
                     filename = excluded.filename,
                     category = excluded.category,
                     origin_source = excluded.origin_source,
                     embedding = excluded.embedding,
                     updated_at = datetime('now')",
            )?;
            for (entry, embedding) in entries.iter().zip(&embeddings) {
                stmt.execute(params![
                    entry.id,
                    entry.document,
                    entry.metadata.source_type.as_str(),
                    entry.metadata.filename,
                    entry.metadata.category,
                    entry.metadata.origin_source,
                    encode_embedding(embedding),
                ])?;
            }
        }
        tx.commit()?;
        Ok(entries.len())
    }

    fn query(
        &self,
        text: &str,
        n: usize,
        filter: Option<Provenance>,
    ) -> Result<Vec<ScoredEntry>, StorageError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed(text)?;

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, document, source_type, filename, category, origin_source, embedding
             FROM knowledge_entries
             WHERE ?1 IS NULL OR source_type = ?1",
        )?;

        let rows = stmt.query_map(params![filter.map(|p| p.as_str())], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Vec<u8>>(6)?,
            ))
        })?;

        let mut scored = Vec::new();
        for row in rows {
            let (id, document, source_type, filename, category, origin_source, blob) = row?;
            let Ok(source_type) = source_type.parse::<Provenance>() else {
                tracing::warn!(id = %id, source_type = %source_type, "Skipping entry with unknown source_type");
                continue;
            };
            scored.push(ScoredEntry {
                distance: cosine_distance(&query_vec, &decode_embedding(&blob)),
                id,
                document,
                metadata: EntryMetadata {
                    source_type,
                    filename,
                    category,
                    origin_source,
                },
            });
        }

        sort_and_truncate(&mut scored, n);
        Ok(scored)
    }

    fn count(&self) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM knowledge_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn sort_and_truncate(scored: &mut Vec<ScoredEntry>, n: usize) {
    scored.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
    scored.truncate(n);
}

// ──────────────────────────────────────────────
// In-memory store
// ──────────────────────────────────────────────

/// In-memory vector store for testing.
pub struct InMemoryVectorStore {
    entries: Mutex<Vec<(KnowledgeEntry, Vec<f32>)>>,
    embedder: Arc<dyn EmbeddingModel>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            embedder,
        }
    }

    pub fn entries(&self) -> Vec<KnowledgeEntry> {
        self.entries
            .lock()
            .map(|e| e.iter().map(|(entry, _)| entry.clone()).collect())
            .unwrap_or_default()
    }
}

impl VectorStore for InMemoryVectorStore {
    fn upsert(&self, entries: &[KnowledgeEntry]) -> Result<usize, StorageError> {
        let texts: Vec<&str> = entries.iter().map(|e| e.document.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;
        check_lengths(entries.len(), embeddings.len())?;

        let mut stored = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
        for (entry, embedding) in entries.iter().zip(embeddings) {
            match stored.iter_mut().find(|(e, _)| e.id == entry.id) {
                Some(slot) => *slot = (entry.clone(), embedding),
                None => stored.push((entry.clone(), embedding)),
            }
        }
        Ok(entries.len())
    }

    fn query(
        &self,
        text: &str,
        n: usize,
        filter: Option<Provenance>,
    ) -> Result<Vec<ScoredEntry>, StorageError> {
        let query_vec = self.embedder.embed(text)?;
        let stored = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
        let mut scored: Vec<ScoredEntry> = stored
            .iter()
            .filter(|(e, _)| filter.map_or(true, |p| e.metadata.source_type == p))
            .map(|(e, v)| ScoredEntry {
                id: e.id.clone(),
                document: e.document.clone(),
                metadata: e.metadata.clone(),
                distance: cosine_distance(&query_vec, v),
            })
            .collect();
        sort_and_truncate(&mut scored, n);
        Ok(scored)
    }

    fn count(&self) -> Result<usize, StorageError> {
        Ok(self.entries.lock().map_err(|_| StorageError::LockPoisoned)?.len())
    }
}
