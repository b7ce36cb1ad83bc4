//! Embedding backends.

use async_trait::async_trait;

use docflow_core::{defaults, Result};

/// Produces one embedding vector per chunk of text.
///
/// An HTTP embedder against a real model service slots in behind the
/// same trait; the pipeline never knows which one it has.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Output vector dimension.
    fn dimension(&self) -> usize;
}

/// Deterministic local embedder.
///
/// Derives the vector from a keyed hash of the text, so the same text
/// always embeds identically and vectors are unit-normalized. Useful
/// as a default backend and for tests; the vectors carry no semantic
/// meaning.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(defaults::EMBED_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingBackend for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(text.as_bytes());
        let mut reader = hasher.finalize_xof();

        let mut bytes = vec![0u8; self.dimension * 4];
        reader.fill(&mut bytes);

        let mut vector: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| {
                let raw = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                (raw as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32
            })
            .collect();

        let norm = vector.iter().map(|v| (*v as f64) * (*v as f64)).sum::<f64>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v = (*v as f64 / norm) as f32;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_embedding_is_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("the same text").await.unwrap();
        let b = embedder.embed("the same text").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_different_texts_differ() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("first").await.unwrap();
        let b = embedder.embed("second").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_dimension_respected() {
        let embedder = HashEmbedder::new(384);
        let v = embedder.embed("text").await.unwrap();
        assert_eq!(v.len(), 384);
        assert_eq!(embedder.dimension(), 384);
    }

    #[tokio::test]
    async fn test_vector_is_unit_normalized() {
        let embedder = HashEmbedder::new(128);
        let v = embedder.embed("normalize me").await.unwrap();
        let norm: f64 = v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3, "norm was {}", norm);
    }
}
