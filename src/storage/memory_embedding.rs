//! Deterministic in-process `EmbeddingProvider`: hashes whitespace tokens
//! into a fixed-width vector. No network calls and no model weights — the
//! provider used when no embedding backend is configured, and by tests
//! that exercise the vector-retrieval leg without a live HTTP dependency.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{EmbeddingProvider, StorageResult};

pub struct InMemoryEmbeddingProvider {
    dimensions: usize,
}

impl InMemoryEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }
}

impl Default for InMemoryEmbeddingProvider {
    fn default() -> Self {
        Self::new(64)
    }
}

fn embed_one(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0f32; dimensions];
    for token in text.split_whitespace() {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        for (i, chunk) in digest.chunks(4).enumerate() {
            if chunk.len() < 4 {
                continue;
            }
            let bucket = i % dimensions;
            let value = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            vector[bucket] += value as f32 / i32::MAX as f32;
        }
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for InMemoryEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> StorageResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_one(t, self.dimensions)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hash-shingle-v1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_embeds_identically() {
        let provider = InMemoryEmbeddingProvider::new(32);
        let a = provider.embed(&["retry with backoff".to_string()]).await.unwrap();
        let b = provider.embed(&["retry with backoff".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn shared_tokens_score_closer_than_disjoint_text() {
        let provider = InMemoryEmbeddingProvider::new(32);
        let mut vectors = provider
            .embed(&[
                "exponential backoff with jitter".to_string(),
                "backoff with jitter and retries".to_string(),
                "migrate the database schema".to_string(),
            ])
            .await
            .unwrap();
        let different = vectors.pop().unwrap();
        let similar = vectors.pop().unwrap();
        let base = vectors.pop().unwrap();

        let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        assert!(dot(&base, &similar) > dot(&base, &different));
    }
}
