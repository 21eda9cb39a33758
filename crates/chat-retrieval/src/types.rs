use serde::{Deserialize, Serialize};

/// One embedded passage, ready to be matched against a query vector.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub vector: Vec<f32>,
}

/// A single ranked result returned by [`crate::store::RetrievalStore::query`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub document_id: String,
    pub score: f32,
}

/// Admin-facing summary of one indexed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    pub chunk_count: usize,
    pub ingested_at: chrono::DateTime<chrono::Utc>,
}
