//! Tool server implementation.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use fusion_core::{
    now_millis, Embedder, EmbeddingStatus, FusionConfig, FusionError, IndexStore, ObjectKey,
    Result, SearchRequest,
};
use fusion_embed::build_embedder;
use fusion_index::{IndexingGateway, UpsertRequest};
use fusion_query::SearchEngine;
use fusion_store::SqliteStore;

/// Search service state.
pub struct FusionServer {
    store: Arc<SqliteStore>,

    /// Provider for workers built on this server; the query path uses it
    /// only when `search.embed_queries` is set.
    embedder: Arc<dyn Embedder>,

    gateway: IndexingGateway<SqliteStore>,
    engine: SearchEngine<SqliteStore>,
}

/// Queue introspection parameters.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StatusParams {
    /// Restrict counts and listed rows to one yacht.
    pub yacht_id: Option<String>,

    /// Also list rows in this status.
    pub status: Option<String>,

    /// Maximum rows listed (default: 50).
    #[serde(default = "default_list_limit")]
    pub limit: u32,
}

/// Dead-letter listing parameters.
#[derive(Debug, Deserialize, Serialize)]
pub struct DeadLetterParams {
    pub yacht_id: Option<String>,

    #[serde(default = "default_list_limit")]
    pub limit: u32,
}

impl Default for DeadLetterParams {
    fn default() -> Self {
        Self {
            yacht_id: None,
            limit: default_list_limit(),
        }
    }
}

fn default_list_limit() -> u32 {
    50
}

/// Operator requeue parameters.
#[derive(Debug, Deserialize, Serialize)]
pub struct RequeueParams {
    pub object_type: String,
    pub object_id: String,
}

/// Tool result.
#[derive(Debug, Serialize)]
pub struct ToolResult {
    /// Whether the operation was successful.
    pub success: bool,

    /// JSON body on success, error text otherwise.
    pub message: String,
}

impl ToolResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string_pretty(value) {
            Ok(body) => Self::success(body),
            Err(e) => Self::error(format!("Failed to encode result: {}", e)),
        }
    }

    fn failure(context: &str, error: &FusionError) -> Self {
        Self::error(format!("{} [{}]: {}", context, error.error_code(), error))
    }
}

impl FusionServer {
    /// Create a server over the database at `db_path` with default settings.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let mut config = FusionConfig::default();
        config.database.path = db_path.into();
        Self::from_config(&config)
    }

    /// Create a server with an in-memory database and default settings.
    pub fn new_memory() -> Result<Self> {
        info!("Initializing fusion server with in-memory database");

        let config = FusionConfig::default();
        let store = Arc::new(SqliteStore::open_memory()?);
        Self::with_store(store, &config)
    }

    /// Create a server from a full configuration.
    pub fn from_config(config: &FusionConfig) -> Result<Self> {
        info!(
            "Initializing fusion server with database at {:?}",
            config.database.path
        );

        let store = Arc::new(SqliteStore::from_config(&config.database)?);
        Self::with_store(store, config)
    }

    fn with_store(store: Arc<SqliteStore>, config: &FusionConfig) -> Result<Self> {
        let embedder = build_embedder(&config.embedding, config.worker.provider_timeout_ms)?;
        Ok(Self::with_embedder(store, embedder, config))
    }

    /// Assemble a server from an open store and a provider.
    pub fn with_embedder(
        store: Arc<SqliteStore>,
        embedder: Arc<dyn Embedder>,
        config: &FusionConfig,
    ) -> Self {
        let gateway = IndexingGateway::new(store.clone());
        let mut engine =
            SearchEngine::new(store.clone(), config.search.clone(), config.hybrid.clone());
        if config.search.embed_queries {
            engine = engine.with_query_embedder(embedder.clone());
        }

        Self {
            store,
            embedder,
            gateway,
            engine,
        }
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Get the server info.
    pub fn info() -> ServerInfo {
        ServerInfo {
            name: "fusion".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Multi-tenant hybrid search with reciprocal rank fusion".to_string(),
        }
    }

    /// List available tools.
    pub fn tools() -> Vec<ToolInfo> {
        vec![
            ToolInfo {
                name: "fusion_upsert".to_string(),
                description: "Index or update one object".to_string(),
            },
            ToolInfo {
                name: "fusion_search".to_string(),
                description: "Search with fuzzy, lexical and vector signals fused by rank"
                    .to_string(),
            },
            ToolInfo {
                name: "fusion_embedding_status".to_string(),
                description: "Count embedding jobs per status and list rows in one status"
                    .to_string(),
            },
            ToolInfo {
                name: "fusion_dead_letters".to_string(),
                description: "List dead-lettered embedding jobs with their last error"
                    .to_string(),
            },
            ToolInfo {
                name: "fusion_requeue".to_string(),
                description: "Move a dead-lettered object back to pending".to_string(),
            },
            ToolInfo {
                name: "fusion_stats".to_string(),
                description: "Get statistics about the index".to_string(),
            },
        ]
    }

    /// Index or update one object.
    pub async fn upsert(&self, params: UpsertRequest) -> ToolResult {
        match self.gateway.upsert(params).await {
            Ok(response) => ToolResult::json(&response),
            Err(e) => ToolResult::failure("Upsert rejected", &e),
        }
    }

    /// Run a hybrid search.
    pub async fn search(&self, params: SearchRequest) -> ToolResult {
        info!(
            "Searching yacht {} with {} rewrites",
            params.tenant_scope.yacht_id,
            params.rewrites.len()
        );

        match self.engine.search(params).await {
            Ok(response) => ToolResult::json(&response),
            Err(e) => ToolResult::failure("Search failed", &e),
        }
    }

    /// Queue counts, optionally with the rows in one status.
    pub async fn embedding_status(&self, params: StatusParams) -> ToolResult {
        let status = match params.status.as_deref().map(str::parse::<EmbeddingStatus>) {
            Some(Ok(status)) => Some(status),
            Some(Err(e)) => return ToolResult::failure("Invalid status", &e),
            None => None,
        };

        let counts = match self.store.status_counts(params.yacht_id.as_deref()).await {
            Ok(counts) => counts,
            Err(e) => return ToolResult::failure("Failed to count jobs", &e),
        };

        let jobs = match status {
            Some(status) => match self
                .store
                .list_by_status(status, params.yacht_id.as_deref(), params.limit)
                .await
            {
                Ok(jobs) => jobs,
                Err(e) => return ToolResult::failure("Failed to list jobs", &e),
            },
            None => Vec::new(),
        };

        ToolResult::json(&serde_json::json!({
            "counts": counts,
            "jobs": jobs,
        }))
    }

    /// Dead-lettered rows with their last error.
    pub async fn dead_letters(&self, params: DeadLetterParams) -> ToolResult {
        match self
            .store
            .list_by_status(EmbeddingStatus::Dlq, params.yacht_id.as_deref(), params.limit)
            .await
        {
            Ok(jobs) => ToolResult::json(&jobs),
            Err(e) => ToolResult::failure("Failed to list dead letters", &e),
        }
    }

    /// Move one dead-lettered row back to pending.
    pub async fn requeue(&self, params: RequeueParams) -> ToolResult {
        let key = ObjectKey::new(params.object_type, params.object_id);
        info!("Requeueing dead-lettered object {}", key);

        match self.store.requeue_dead_letter(&key, now_millis()).await {
            Ok(true) => ToolResult::json(&serde_json::json!({ "requeued": true })),
            Ok(false) => ToolResult::error(format!("Object {} is not dead-lettered", key)),
            Err(e) => ToolResult::failure("Requeue failed", &e),
        }
    }

    /// Get statistics.
    pub async fn stats(&self) -> ToolResult {
        match self.store.get_stats().await {
            Ok(stats) => ToolResult::json(&stats),
            Err(e) => ToolResult::failure("Failed to get stats", &e),
        }
    }
}

/// Server info.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// Tool info.
#[derive(Debug, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}
