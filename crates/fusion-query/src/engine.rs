//! Search engine: validation, retrieval, fusion and assembly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use fusion_core::{
    validate_filters, Embedder, FusionError, HybridConfig, IndexStore, Result, ScoringMode,
    SearchConfig, SearchRequest, SearchResponse, SearchScope,
};

use crate::assemble::assemble;
use crate::fusion::{RrfStrategy, ScoringStrategy, WeightedStrategy};
use crate::retriever::{MultiSignalRetriever, RetrievalParams};

/// Request parameters after defaults and range checks.
#[derive(Debug, Clone, Copy)]
struct ResolvedParams {
    rrf_k: u32,
    limit: u32,
    fuzzy_threshold: f32,
}

/// Hybrid search engine.
///
/// Stateless between requests: all fusion state lives in the request, so
/// concurrent searches never contend with each other.
pub struct SearchEngine<S: IndexStore> {
    store: Arc<S>,
    retriever: MultiSignalRetriever<S>,
    config: SearchConfig,
    hybrid: HybridConfig,
}

impl<S: IndexStore> SearchEngine<S> {
    /// Create a new search engine.
    pub fn new(store: Arc<S>, config: SearchConfig, hybrid: HybridConfig) -> Self {
        Self {
            retriever: MultiSignalRetriever::new(store.clone(), None),
            store,
            config,
            hybrid,
        }
    }

    /// Embed rewrites that arrive without a vector, bounded by
    /// `query_embed_timeout_ms`.
    pub fn with_query_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.retriever = MultiSignalRetriever::new(self.store.clone(), Some(embedder))
            .with_embed_timeout(Duration::from_millis(self.config.query_embed_timeout_ms));
        self
    }

    /// Run a search.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let start = Instant::now();
        let params = self.resolve(&request)?;

        if request.rewrites.is_empty() {
            debug!("Search with no rewrites, returning empty result");
            return Ok(SearchResponse::empty());
        }

        let scope = SearchScope {
            tenant: request.tenant_scope.clone(),
            object_types: request.object_types.clone(),
            filters: request.filters.clone(),
        };

        let retrieval = self
            .retriever
            .retrieve(
                &scope,
                &request.rewrites,
                RetrievalParams {
                    cap: self.config.signal_cap,
                    fuzzy_threshold: params.fuzzy_threshold,
                },
            )
            .await?;

        let keys = retrieval.candidate_keys();
        let objects: HashMap<_, _> = self
            .store
            .get_objects(&keys)
            .await?
            .into_iter()
            .map(|o| (o.key(), o))
            .collect();

        let strategy: Box<dyn ScoringStrategy> = match request.scoring {
            ScoringMode::Rrf => Box::new(RrfStrategy::new(params.rrf_k)),
            ScoringMode::Weighted => Box::new(WeightedStrategy::new(
                self.hybrid.clone(),
                request.entities.clone(),
            )),
        };

        let fused = strategy.fuse(&retrieval, &objects);
        debug!(
            "{} fused {} candidates from {} rewrites",
            strategy.name(),
            fused.len(),
            retrieval.rewrites.len()
        );

        let hits = assemble(fused, &objects, params.limit as usize);
        let latency_ms = start.elapsed().as_millis() as u64;

        info!(
            "Search for yacht {} completed in {}ms, returned {} hits",
            request.tenant_scope.yacht_id,
            latency_ms,
            hits.len()
        );

        Ok(SearchResponse {
            hits,
            degraded_signals: retrieval.degraded,
            latency_ms,
        })
    }

    fn resolve(&self, request: &SearchRequest) -> Result<ResolvedParams> {
        if request.tenant_scope.yacht_id.trim().is_empty() {
            return Err(FusionError::validation("tenant scope requires a yacht_id"));
        }

        if request.rewrites.len() > self.config.max_rewrites {
            return Err(FusionError::validation(format!(
                "at most {} rewrites are allowed, got {}",
                self.config.max_rewrites,
                request.rewrites.len()
            )));
        }

        for (index, rewrite) in request.rewrites.iter().enumerate() {
            if let Some(embedding) = &rewrite.embedding {
                if embedding.is_empty() || embedding.iter().any(|v| !v.is_finite()) {
                    return Err(FusionError::validation(format!(
                        "rewrite {} embedding must be a non-empty finite vector",
                        index
                    )));
                }
            }
        }

        if request.object_types.iter().any(|t| t.trim().is_empty()) {
            return Err(FusionError::validation("object_types must not contain empty names"));
        }

        validate_filters(&request.filters)?;

        let limit = request.limit.unwrap_or(self.config.default_limit);
        if limit == 0 || limit > self.config.max_limit {
            return Err(FusionError::validation(format!(
                "limit must be between 1 and {}",
                self.config.max_limit
            )));
        }

        let fuzzy_threshold = request
            .fuzzy_threshold
            .unwrap_or(self.config.fuzzy_threshold);
        if !(0.0..=1.0).contains(&fuzzy_threshold) {
            return Err(FusionError::validation("fuzzy_threshold must be within [0, 1]"));
        }

        Ok(ResolvedParams {
            rrf_k: request.rrf_k.unwrap_or(self.config.rrf_k),
            limit,
            fuzzy_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fusion_core::{
        content_hash, now_millis, EmbeddingOutput, FilterValue, ObjectKey, Rewrite, Signal,
        TenantScope, UpsertRecord,
    };
    use fusion_embed::HashEmbedder;
    use fusion_index::{IndexingGateway, UpsertRequest};
    use fusion_store::SqliteStore;

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        async fn embed_document(&self, _text: &str) -> Result<Vec<f32>> {
            Err(FusionError::embedding("provider unavailable"))
        }
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Err(FusionError::embedding("provider unavailable"))
        }
        fn model_name(&self) -> &str {
            "down"
        }
        fn model_version(&self) -> &str {
            "0"
        }
        fn dimension(&self) -> usize {
            4
        }
    }

    fn engine(store: Arc<SqliteStore>) -> SearchEngine<SqliteStore> {
        SearchEngine::new(store, SearchConfig::default(), HybridConfig::default())
    }

    async fn seeded() -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let gateway = IndexingGateway::new(store.clone());

        let rows = [
            ("fault", "f-1", "y1", "Port generator coolant leak"),
            ("fault", "f-2", "y1", "Starboard generator fails to start"),
            ("work_order", "wo-1", "y1", "Replace generator coolant hose"),
            ("document", "d-1", "y1", "Anchor windlass service manual"),
            ("fault", "f-9", "y2", "Port generator coolant leak"),
        ];
        for (object_type, object_id, yacht, text) in rows {
            let mut request = UpsertRequest::new(object_type, object_id, yacht, text);
            request.payload = serde_json::json!({ "title": text });
            gateway.upsert(request).await.unwrap();
        }

        store
    }

    /// Embed everything queued, the way the worker would.
    async fn embed_all(store: &SqliteStore, embedder: &HashEmbedder) {
        while let Some(job) = store.claim_embedding_job(now_millis(), 0, 5).await.unwrap() {
            let vector = embedder.embed_document(&job.search_text).await.unwrap();
            let output = EmbeddingOutput {
                vector,
                model: embedder.model_name().to_string(),
                version: embedder.model_version().to_string(),
            };
            assert!(store
                .complete_embedding_job(&job, &output, now_millis())
                .await
                .unwrap());
        }
    }

    fn request(yacht: &str, rewrites: &[&str]) -> SearchRequest {
        SearchRequest::new(
            TenantScope::new(yacht),
            rewrites.iter().map(|r| Rewrite::text(*r)).collect(),
        )
    }

    #[tokio::test]
    async fn test_empty_rewrites_return_empty() {
        let engine = engine(seeded().await);

        let response = engine.search(request("y1", &[])).await.unwrap();
        assert!(response.hits.is_empty());
        assert!(response.degraded_signals.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_invalid_requests() {
        let engine = engine(seeded().await);

        let err = engine
            .search(request("y1", &["a", "b", "c", "d"]))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let mut zero_limit = request("y1", &["generator"]);
        zero_limit.limit = Some(0);
        assert!(engine.search(zero_limit).await.is_err());

        let mut too_many = request("y1", &["generator"]);
        too_many.limit = Some(101);
        assert!(engine.search(too_many).await.is_err());

        let mut threshold = request("y1", &["generator"]);
        threshold.fuzzy_threshold = Some(-0.1);
        assert!(engine.search(threshold).await.is_err());

        assert!(engine.search(request(" ", &["generator"])).await.is_err());

        let mut bad_vector = request("y1", &[]);
        bad_vector.rewrites = vec![Rewrite::text("x").with_embedding(vec![f32::NAN])];
        assert!(engine.search(bad_vector).await.is_err());
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let engine = engine(seeded().await);

        let response = engine
            .search(request("y1", &["port generator coolant leak"]))
            .await
            .unwrap();
        assert!(!response.hits.is_empty());
        assert!(response.hits.iter().all(|h| h.object_id != "f-9"));

        let other = engine
            .search(request("y2", &["port generator coolant leak"]))
            .await
            .unwrap();
        let ids: Vec<_> = other.hits.iter().map(|h| h.object_id.as_str()).collect();
        assert_eq!(ids, vec!["f-9"]);
    }

    #[tokio::test]
    async fn test_exclusion_and_payload() {
        let engine = engine(seeded().await);

        let response = engine
            .search(request("y1", &["generator coolant"]))
            .await
            .unwrap();

        assert!(response.hits.iter().all(|h| h.object_id != "d-1"));
        let top = &response.hits[0];
        assert!(top.payload["title"].as_str().unwrap().contains("coolant"));
        assert!(top.updated_at.is_some());
        assert!(top.signal_ranks.lexical.is_some());
        assert!(top.signal_ranks.vector.is_none());
    }

    #[tokio::test]
    async fn test_determinism() {
        let engine = engine(seeded().await);

        let mut req = request("y1", &["generator", "coolant hose"]);
        req.limit = Some(10);
        let first = engine.search(req.clone()).await.unwrap();
        let second = engine.search(req).await.unwrap();

        assert_eq!(first.hits, second.hits);
    }

    #[tokio::test]
    async fn test_hits_sorted_and_limited() {
        let engine = engine(seeded().await);

        let mut req = request("y1", &["generator"]);
        req.limit = Some(2);
        let response = engine.search(req).await.unwrap();

        assert_eq!(response.hits.len(), 2);
        assert!(response.hits[0].fused_score >= response.hits[1].fused_score);
    }

    #[tokio::test]
    async fn test_best_rewrite_index() {
        let engine = engine(seeded().await);

        let response = engine
            .search(request("y1", &["zzzz qqqq", "windlass service manual"]))
            .await
            .unwrap();

        let doc = response
            .hits
            .iter()
            .find(|h| h.object_id == "d-1")
            .unwrap();
        assert_eq!(doc.best_rewrite_index, 1);
    }

    #[tokio::test]
    async fn test_filters_and_types_narrow() {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let gateway = IndexingGateway::new(store.clone());

        for (id, status) in [("wo-1", "open"), ("wo-2", "closed")] {
            let mut request = UpsertRequest::new("work_order", id, "y1", "Antifouling haul out");
            request
                .filters
                .insert("status".into(), FilterValue::from(status));
            gateway.upsert(request).await.unwrap();
        }
        gateway
            .upsert(UpsertRequest::new("document", "d-1", "y1", "Antifouling spec sheet"))
            .await
            .unwrap();

        let engine = engine(store);

        let mut req = request("y1", &["antifouling"]);
        req.filters.insert("status".into(), FilterValue::from("open"));
        let ids: Vec<_> = engine
            .search(req)
            .await
            .unwrap()
            .hits
            .into_iter()
            .map(|h| h.object_id)
            .collect();
        assert_eq!(ids, vec!["wo-1"]);

        let mut req = request("y1", &["antifouling"]);
        req.object_types = vec!["document".into()];
        let ids: Vec<_> = engine
            .search(req)
            .await
            .unwrap()
            .hits
            .into_iter()
            .map(|h| h.object_id)
            .collect();
        assert_eq!(ids, vec!["d-1"]);
    }

    #[tokio::test]
    async fn test_vector_signal_with_query_embedder() {
        let store = seeded().await;
        let embedder = HashEmbedder::new();
        embed_all(&store, &embedder).await;

        let engine = engine(store).with_query_embedder(Arc::new(HashEmbedder::new()));
        let response = engine
            .search(request("y1", &["port generator coolant leak"]))
            .await
            .unwrap();

        let top = &response.hits[0];
        assert_eq!(top.object_id, "f-1");
        assert_eq!(top.signal_ranks.vector, Some(1));
        assert!(top.signal_scores.vector.unwrap() > 0.99);
        assert!(response.degraded_signals.is_empty());
    }

    #[tokio::test]
    async fn test_vector_outage_degrades() {
        let store = seeded().await;
        let engine = engine(store).with_query_embedder(Arc::new(DownEmbedder));

        let response = engine
            .search(request("y1", &["generator coolant"]))
            .await
            .unwrap();

        assert_eq!(response.degraded_signals, vec![Signal::Vector]);
        assert!(!response.hits.is_empty());
        assert!(response.hits.iter().all(|h| h.signal_ranks.vector.is_none()));
    }

    #[tokio::test]
    async fn test_newer_object_wins_tie() {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        for (id, text, at) in [("a", "alpha gearbox", 100), ("b", "bravo gearbox", 200)] {
            store
                .upsert_object(
                    UpsertRecord {
                        key: ObjectKey::new("part", id),
                        scope: TenantScope::new("y1"),
                        search_text: text.to_string(),
                        content_hash: content_hash(text),
                        filters: Default::default(),
                        payload: serde_json::Value::Null,
                        source_version: None,
                        priority: 0,
                    },
                    at,
                )
                .await
                .unwrap();
        }

        // Each object is first in one rewrite's lexical list only.
        let engine = engine(store);
        let mut req = request("y1", &["alpha", "bravo"]);
        req.fuzzy_threshold = Some(1.0);
        let response = engine.search(req).await.unwrap();

        let ids: Vec<_> = response.hits.iter().map(|h| h.object_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(response.hits[0].fused_score, response.hits[1].fused_score);
    }

    #[tokio::test]
    async fn test_weighted_strategy() {
        let store = seeded().await;
        embed_all(&store, &HashEmbedder::new()).await;

        let engine = SearchEngine::new(
            store,
            SearchConfig::default(),
            HybridConfig {
                min_entity_match: 1.0,
                ..HybridConfig::default()
            },
        );

        let embedder = HashEmbedder::new();
        let query = embedder.embed_query("coolant").await.unwrap();
        let mut req = SearchRequest::new(
            TenantScope::new("y1"),
            vec![Rewrite::text("generator coolant").with_embedding(query)],
        );
        req.scoring = ScoringMode::Weighted;
        req.entities = vec!["coolant".into(), "generator".into()];

        let response = engine.search(req).await.unwrap();
        let mut ids: Vec<_> = response.hits.iter().map(|h| h.object_id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["f-1", "wo-1"]);
        assert!(response.hits.iter().all(|h| h.fused_score >= 0.3));
    }
}
