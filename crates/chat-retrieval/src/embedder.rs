//! Text embedding via fastembed. A trait abstracts over the backend so a
//! future API-based embedder can stand in without touching the store.

use std::sync::Mutex;

use crate::error::RetrievalError;

pub const EMBEDDING_DIMENSION: usize = 768;
pub const EMBEDDING_MODEL_ID: &str = "nomic-embed-text-v1.5";

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError>;
    fn dimension(&self) -> usize;
}

/// Local embedder backed by fastembed's ONNX runtime (nomic-embed-text-v1.5).
///
/// Loaded once at startup (a few seconds) and kept resident for the
/// process's lifetime. `fastembed::TextEmbedding::embed` takes `&mut self`,
/// hence the mutex.
pub struct LocalEmbedder {
    model: Mutex<fastembed::TextEmbedding>,
}

impl LocalEmbedder {
    pub fn new() -> Result<Self, RetrievalError> {
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed::EmbeddingModel::NomicEmbedTextV15)
                .with_show_download_progress(true),
        )
        .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        Ok(Self { model: Mutex::new(model) })
    }
}

impl Embedder for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut model = self
            .model
            .lock()
            .map_err(|e| RetrievalError::Embedding(format!("lock poisoned: {e}")))?;
        let results = model
            .embed(vec![text], None)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::Embedding("no embedding returned".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let mut model = self
            .model
            .lock()
            .map_err(|e| RetrievalError::Embedding(format!("lock poisoned: {e}")))?;
        model.embed(owned, None).map_err(|e| RetrievalError::Embedding(e.to_string()))
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_is_defined_as_zero_similarity() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
