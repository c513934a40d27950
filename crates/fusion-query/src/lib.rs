//! fusion-query - Multi-signal retrieval and rank fusion
//!
//! For every query rewrite the retriever runs three independently ranked
//! signals against the index store: trigram similarity, full-text relevance
//! and vector cosine similarity. A scoring strategy combines them and the
//! assembler imposes a deterministic total order.
//!
//! # Features
//!
//! - Reciprocal Rank Fusion across signals, max across rewrites
//! - Weighted vector + entity-match strategy
//! - Graceful degradation when a signal is unavailable
//!
//! # Example
//!
//! ```rust,ignore
//! use fusion_query::SearchEngine;
//! use std::sync::Arc;
//!
//! let engine = SearchEngine::new(Arc::new(store), config.search, config.hybrid);
//! let response = engine.search(request).await?;
//! ```

mod assemble;
mod engine;
mod fusion;
mod retriever;

pub use assemble::{assemble, compare_hits};
pub use engine::SearchEngine;
pub use fusion::{
    entity_match, rrf_contribution, FusedCandidate, RrfStrategy, ScoringStrategy,
    WeightedStrategy,
};
pub use retriever::{MultiSignalRetriever, RankedList, Retrieval, RetrievalParams, RewriteSignals};

// Re-export for convenience
pub use fusion_core::{SearchHit, SearchRequest, SearchResponse};
