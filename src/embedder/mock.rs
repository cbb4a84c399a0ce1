/// Deterministic offline embedder.
///
/// Hashes lower-cased word tokens into a fixed number of buckets
/// (feature hashing) and L2-normalizes the counts, so texts that share
/// vocabulary end up close in cosine distance. Used by tests and anywhere a
/// network- and model-free embedder is needed.
use std::hash::{DefaultHasher, Hash, Hasher};

use super::{Embedder, EmbedderError, l2_normalize};

pub struct MockEmbedder {
    pub dimensions: usize,
    model_name: String,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model_name: format!("mock-hashing-{dimensions}"),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() % self.dimensions as u64) as usize
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut counts = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
        {
            counts[self.bucket(&token.to_lowercase())] += 1.0;
        }

        // Empty or stop-word-only input still gets a valid unit vector
        if counts.iter().all(|v| *v == 0.0) {
            counts[0] = 1.0;
        }

        Ok(l2_normalize(&counts))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
