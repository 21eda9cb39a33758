use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::chunk::chunk_text;
use crate::db::{blob_to_vector, vector_to_blob};
use crate::embedder::{cosine_similarity, Embedder, EMBEDDING_MODEL_ID};
use crate::error::RetrievalError;
use crate::types::{ChunkRecord, DocumentInfo, Passage};

const CHUNK_SIZE_WORDS: usize = 500;
const CHUNK_OVERLAP_WORDS: usize = 50;

/// Run embedding on the blocking thread pool so ONNX inference never stalls
/// a tokio worker thread. Generic over the embedder so tests can substitute
/// a cheap stand-in for fastembed.
async fn embed_async(embedder: &Arc<dyn Embedder>, text: String) -> Result<Vec<f32>, RetrievalError> {
    let embedder = embedder.clone();
    tokio::task::spawn_blocking(move || embedder.embed(&text))
        .await
        .map_err(|e| RetrievalError::Embedding(format!("embedding task panicked: {e}")))?
}

async fn embed_batch_async(embedder: &Arc<dyn Embedder>, texts: Vec<String>) -> Result<Vec<Vec<f32>>, RetrievalError> {
    let embedder = embedder.clone();
    tokio::task::spawn_blocking(move || {
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        embedder.embed_batch(&refs)
    })
    .await
    .map_err(|e| RetrievalError::Embedding(format!("batch embedding task panicked: {e}")))?
}

/// Embedded vector index over a documents folder.
///
/// Durable state lives in SQLite (`chunks`/`documents`/`index_meta`); an
/// in-memory snapshot (`index`) serves queries so a reload's writer lock is
/// only held while swapping the snapshot pointer, never during the scan or
/// embedding pass. This gives queries an RCU-style view: always consistent,
/// never blocked for more than a single commit.
pub struct RetrievalStore {
    db: Mutex<Connection>,
    embedder: Arc<dyn Embedder>,
    index: RwLock<Vec<ChunkRecord>>,
    docs_folder: PathBuf,
    score_floor: f32,
}

impl RetrievalStore {
    pub fn new(conn: Connection, embedder: Arc<dyn Embedder>, docs_folder: PathBuf, score_floor: f32) -> Result<Self, RetrievalError> {
        crate::db::init_db(&conn)?;
        ensure_index_meta(&conn, embedder.dimension())?;

        let index = load_index_from_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            embedder,
            index: RwLock::new(index),
            docs_folder,
            score_floor,
        })
    }

    /// Ranked passages for a free-text query. Floor-filtered; ties broken by
    /// document id, then chunk index, both ascending.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<Passage>, RetrievalError> {
        let query_vec = embed_async(&self.embedder, text.to_string()).await?;

        let snapshot = self.index.read().unwrap();
        let mut scored: Vec<(f32, &ChunkRecord)> = snapshot
            .iter()
            .map(|rec| (cosine_similarity(&query_vec, &rec.vector), rec))
            .filter(|(score, _)| *score >= self.score_floor)
            .collect();

        scored.sort_by(|(score_a, rec_a), (score_b, rec_b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| rec_a.document_id.cmp(&rec_b.document_id))
                .then_with(|| rec_a.chunk_index.cmp(&rec_b.chunk_index))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, rec)| Passage {
                text: rec.text.clone(),
                document_id: rec.document_id.clone(),
                score,
            })
            .collect())
    }

    /// Chunk, embed, and atomically commit a document's contents. Callers
    /// pass the extracted text directly — office-format extraction is
    /// assumed to happen upstream.
    pub async fn add_document(&self, id: &str, text: &str) -> Result<(), RetrievalError> {
        let chunks = chunk_text(text, CHUNK_SIZE_WORDS, CHUNK_OVERLAP_WORDS);
        if chunks.is_empty() {
            warn!(document_id = id, "document produced zero chunks, skipping");
            return Ok(());
        }

        let owned_chunks = chunks.clone();
        let vectors = embed_batch_async(&self.embedder, owned_chunks).await?;

        let hash = hex_sha256(text.as_bytes());
        let now = Utc::now().to_rfc3339();

        {
            let mut db = self.db.lock().unwrap();
            let tx = db.transaction()?;
            tx.execute("DELETE FROM chunks WHERE document_id = ?1", rusqlite::params![id])?;
            for (idx, (chunk, vector)) in chunks.iter().zip(vectors.iter()).enumerate() {
                tx.execute(
                    "INSERT INTO chunks (document_id, chunk_index, text, vector) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![id, idx as i64, chunk, vector_to_blob(vector)],
                )?;
            }
            tx.execute(
                "INSERT INTO documents (id, content_hash, ingested_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET content_hash = excluded.content_hash, ingested_at = excluded.ingested_at",
                rusqlite::params![id, hash, now],
            )?;
            tx.commit()?;
        }

        self.refresh_snapshot()?;
        info!(document_id = id, chunk_count = chunks.len(), "document ingested");
        Ok(())
    }

    pub fn delete_document(&self, id: &str) -> Result<(), RetrievalError> {
        let affected = {
            let db = self.db.lock().unwrap();
            db.execute("DELETE FROM chunks WHERE document_id = ?1", rusqlite::params![id])?;
            db.execute("DELETE FROM documents WHERE id = ?1", rusqlite::params![id])?
        };
        if affected == 0 {
            return Err(RetrievalError::DocumentNotFound { id: id.to_string() });
        }
        self.refresh_snapshot()?;
        Ok(())
    }

    pub fn list_documents(&self) -> Result<Vec<DocumentInfo>, RetrievalError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT d.id, d.ingested_at, COUNT(c.chunk_index)
             FROM documents d LEFT JOIN chunks c ON c.document_id = d.id
             GROUP BY d.id ORDER BY d.id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DocumentInfo {
                id: row.get(0)?,
                ingested_at: row.get(1)?,
                chunk_count: row.get::<_, i64>(2)? as usize,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Re-scan the documents folder: ingest new/changed files, delete
    /// documents whose file disappeared. Safe to call concurrently with
    /// queries; idempotent when nothing on disk has changed.
    pub async fn reload(&self) -> Result<(), RetrievalError> {
        let on_disk = scan_docs_folder(&self.docs_folder)?;
        let known_hashes = self.known_hashes()?;

        let mut seen_ids = HashSet::new();
        for (id, path) in &on_disk {
            seen_ids.insert(id.clone());
            let bytes = match std::fs::read(path) {
                Ok(b) => b,
                Err(e) => {
                    error!(document = %id, err = %e, "failed to read document during reload");
                    continue;
                }
            };
            let text = extract_text(&bytes);
            let hash = hex_sha256(text.as_bytes());

            if known_hashes.get(id) == Some(&hash) {
                continue;
            }
            if let Err(e) = self.add_document(id, &text).await {
                error!(document = %id, err = %e, "failed to ingest document during reload");
            }
        }

        for known_id in known_hashes.keys() {
            if !seen_ids.contains(known_id) {
                if let Err(e) = self.delete_document(known_id) {
                    error!(document = %known_id, err = %e, "failed to delete stale document during reload");
                }
            }
        }

        Ok(())
    }

    fn known_hashes(&self) -> Result<std::collections::HashMap<String, String>, RetrievalError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT id, content_hash FROM documents")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn refresh_snapshot(&self) -> Result<(), RetrievalError> {
        let fresh = {
            let db = self.db.lock().unwrap();
            load_index_from_db(&db)?
        };
        let mut index = self.index.write().unwrap();
        *index = fresh;
        Ok(())
    }
}

fn ensure_index_meta(conn: &Connection, dimension: usize) -> Result<(), RetrievalError> {
    let existing: Option<(String, i64)> = conn
        .query_row("SELECT model_id, dimension FROM index_meta WHERE id = 0", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .ok();

    match existing {
        Some((model_id, dim)) if model_id == EMBEDDING_MODEL_ID && dim as usize == dimension => Ok(()),
        Some((model_id, dim)) => {
            warn!(
                stored_model = %model_id,
                stored_dim = dim,
                current_model = EMBEDDING_MODEL_ID,
                current_dim = dimension,
                "embedding model mismatch, clearing stale index"
            );
            conn.execute_batch("DELETE FROM chunks; DELETE FROM documents;")?;
            conn.execute(
                "INSERT OR REPLACE INTO index_meta (id, model_id, dimension) VALUES (0, ?1, ?2)",
                rusqlite::params![EMBEDDING_MODEL_ID, dimension as i64],
            )?;
            Ok(())
        }
        None => {
            conn.execute(
                "INSERT INTO index_meta (id, model_id, dimension) VALUES (0, ?1, ?2)",
                rusqlite::params![EMBEDDING_MODEL_ID, dimension as i64],
            )?;
            Ok(())
        }
    }
}

fn load_index_from_db(conn: &Connection) -> Result<Vec<ChunkRecord>, RetrievalError> {
    let mut stmt = conn.prepare("SELECT document_id, chunk_index, text, vector FROM chunks")?;
    let rows = stmt.query_map([], |row| {
        let vector_blob: Vec<u8> = row.get(3)?;
        Ok(ChunkRecord {
            document_id: row.get(0)?,
            chunk_index: row.get::<_, i64>(1)? as usize,
            text: row.get(2)?,
            vector: blob_to_vector(&vector_blob),
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn scan_docs_folder(folder: &Path) -> Result<Vec<(String, PathBuf)>, RetrievalError> {
    if !folder.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            let name = entry.file_name().to_string_lossy().to_string();
            out.push((name, entry.path()));
        }
    }
    Ok(out)
}

/// Text extraction for common office formats is assumed to be a black-box
/// utility upstream of this store; plain files are decoded as UTF-8 with
/// lossy fallback.
fn extract_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_string()
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::Embedder;

    /// Deterministic bag-of-keywords stand-in for fastembed, so
    /// query/ranking logic can be exercised without the ONNX model.
    struct FakeEmbedder;

    impl Embedder for FakeEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
            let lower = text.to_lowercase();
            Ok(vec![
                lower.matches("france").count() as f32,
                lower.matches("germany").count() as f32,
                0.1,
            ])
        }
        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }
        fn dimension(&self) -> usize {
            3
        }
    }

    fn test_store(docs_folder: PathBuf) -> RetrievalStore {
        let conn = Connection::open_in_memory().unwrap();
        RetrievalStore::new(conn, Arc::new(FakeEmbedder), docs_folder, 0.2).unwrap()
    }

    #[tokio::test]
    async fn query_ranks_matching_document_first() {
        let store = test_store(PathBuf::from("/nonexistent"));
        store.add_document("docA.txt", "Paris is the capital of France").await.unwrap();
        store.add_document("docB.txt", "Berlin is the capital of Germany").await.unwrap();

        let results = store.query("capital of France?", 5).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].document_id, "docA.txt");
        assert!(results.iter().all(|p| p.document_id != "docB.txt"));
    }

    #[tokio::test]
    async fn delete_document_removes_it_from_future_queries() {
        let store = test_store(PathBuf::from("/nonexistent"));
        store.add_document("docA.txt", "Paris is the capital of France").await.unwrap();
        store.delete_document("docA.txt").unwrap();

        let results = store.query("capital of France?", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn reload_ingests_new_files_and_removes_deleted_ones() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("docA.txt"), "Paris is the capital of France").unwrap();
        let store = test_store(dir.path().to_path_buf());

        store.reload().await.unwrap();
        assert_eq!(store.list_documents().unwrap().len(), 1);

        std::fs::remove_file(dir.path().join("docA.txt")).unwrap();
        store.reload().await.unwrap();
        assert_eq!(store.list_documents().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn reload_twice_with_no_changes_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("docA.txt"), "Paris is the capital of France").unwrap();
        let store = test_store(dir.path().to_path_buf());

        store.reload().await.unwrap();
        let before = store.list_documents().unwrap();
        store.reload().await.unwrap();
        let after = store.list_documents().unwrap();
        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].ingested_at, after[0].ingested_at);
    }

    #[test]
    fn chunk_text_helper_is_available() {
        assert!(!chunk_text("a b c", 2, 0).is_empty());
    }
}
