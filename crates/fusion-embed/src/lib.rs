//! fusion-embed - Embedding providers
//!
//! This crate provides the [`Embedder`] implementations the worker and the
//! query side use:
//!
//! - [`HashEmbedder`]: deterministic feature-hashing embedder for local
//!   development and tests. Texts sharing words land close together.
//! - [`HttpEmbedder`]: OpenAI-compatible `/v1/embeddings` client.

use std::sync::Arc;

use fusion_core::{EmbeddingConfig, ProviderKind, Result};

mod hash;
mod http;

pub use hash::HashEmbedder;
pub use http::HttpEmbedder;

// Re-export the Embedder trait for convenience
pub use fusion_core::Embedder;

/// Build the provider selected by configuration.
pub fn build_embedder(config: &EmbeddingConfig, timeout_ms: u64) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.provider {
        ProviderKind::Hash => Arc::new(HashEmbedder::from_config(config)),
        ProviderKind::Http => Arc::new(HttpEmbedder::new(config, timeout_ms)?),
    };

    tracing::info!(
        "Embedding provider {:?}: {}@{} ({} dims)",
        config.provider,
        embedder.model_name(),
        embedder.model_version(),
        embedder.dimension()
    );

    Ok(embedder)
}
