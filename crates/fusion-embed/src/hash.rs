//! Deterministic feature-hashing embedder.

use async_trait::async_trait;

use fusion_core::{EmbeddingConfig, Embedder, FusionError, Result};

/// Embedder that hashes lowercase terms into signed buckets.
///
/// No model is loaded, so output is stable across runs and machines. Two
/// texts sharing terms have positive cosine similarity; disjoint texts are
/// near orthogonal.
pub struct HashEmbedder {
    dimension: usize,
    model: String,
    version: String,
}

impl HashEmbedder {
    /// Create a hash embedder with default settings.
    pub fn new() -> Self {
        Self::with_config(384, "hash-embedder", "1")
    }

    /// Create a hash embedder with custom settings.
    pub fn with_config(
        dimension: usize,
        model: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            dimension: dimension.max(1),
            model: model.into(),
            version: version.into(),
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::with_config(config.dimension, &config.model, &config.version)
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(FusionError::embedding("cannot embed empty text"));
        }

        let mut terms: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();
        if terms.is_empty() {
            terms.push(text.to_string());
        }

        let mut embedding = vec![0.0f32; self.dimension];
        for term in &terms {
            let hash = blake3::hash(term.as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]) as usize
                % self.dimension;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign;
        }

        // L2 normalize
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        Ok(embedding)
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn model_version(&self) -> &str {
        &self.version
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
