//! Idempotent upsert entry point.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fusion_core::{
    content_hash, now_millis, validate_filters, Filters, FusionError, IndexStore, ObjectKey,
    Result, TenantScope, UpsertOutcome, UpsertRecord,
};

/// Upsert request as received from callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertRequest {
    pub object_type: String,
    pub object_id: String,
    pub yacht_id: String,

    #[serde(default)]
    pub org_id: Option<String>,

    pub search_text: String,

    #[serde(default)]
    pub filters: Filters,

    /// Opaque display data; must be a JSON object or null.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Monotonic version from the source system, if it has one.
    #[serde(default)]
    pub source_version: Option<i64>,

    /// Embedding priority; higher is claimed first.
    #[serde(default)]
    pub priority: i32,
}

impl UpsertRequest {
    pub fn new(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        yacht_id: impl Into<String>,
        search_text: impl Into<String>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
            yacht_id: yacht_id.into(),
            org_id: None,
            search_text: search_text.into(),
            filters: Filters::new(),
            payload: serde_json::Value::Null,
            source_version: None,
            priority: 0,
        }
    }
}

/// Result of an accepted upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertResponse {
    pub accepted: bool,
    pub outcome: UpsertOutcome,
}

/// Indexing gateway over an index store.
pub struct IndexingGateway<S: IndexStore> {
    store: Arc<S>,
}

impl<S: IndexStore> IndexingGateway<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Validate and write one object.
    ///
    /// Repeating an upsert with the same text is a no-op for the embedding
    /// lifecycle; only payload, filters and `updated_at` move.
    pub async fn upsert(&self, request: UpsertRequest) -> Result<UpsertResponse> {
        let record = Self::prepare(request)?;
        let key = record.key.clone();

        let outcome = self.store.upsert_object(record, now_millis()).await?;

        match outcome {
            UpsertOutcome::Created | UpsertOutcome::ContentChanged => {
                info!("Upsert {}: {:?}, queued for embedding", key, outcome);
            }
            UpsertOutcome::Unchanged | UpsertOutcome::StaleVersion => {
                debug!("Upsert {}: {:?}", key, outcome);
            }
        }

        Ok(UpsertResponse {
            accepted: true,
            outcome,
        })
    }

    /// Turn a request into a store record, rejecting malformed input.
    pub fn prepare(request: UpsertRequest) -> Result<UpsertRecord> {
        let object_type = request.object_type.trim();
        let object_id = request.object_id.trim();
        let yacht_id = request.yacht_id.trim();

        if object_type.is_empty() || object_id.is_empty() {
            return Err(FusionError::validation(
                "object_type and object_id must not be empty",
            ));
        }
        if yacht_id.is_empty() {
            return Err(FusionError::validation("tenant scope requires a yacht_id"));
        }
        if request.search_text.trim().is_empty() {
            return Err(FusionError::validation("search_text must not be empty"));
        }
        if !(request.payload.is_object() || request.payload.is_null()) {
            return Err(FusionError::validation("payload must be a JSON object"));
        }
        validate_filters(&request.filters)?;

        let org_id = request
            .org_id
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty());

        Ok(UpsertRecord {
            key: ObjectKey::new(object_type, object_id),
            scope: TenantScope {
                yacht_id: yacht_id.to_string(),
                org_id,
            },
            content_hash: content_hash(&request.search_text),
            search_text: request.search_text,
            filters: request.filters,
            payload: request.payload,
            source_version: request.source_version,
            priority: request.priority,
        })
    }

    /// Get the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusion_core::{EmbeddingStatus, FilterValue};
    use fusion_store::SqliteStore;

    fn gateway() -> IndexingGateway<SqliteStore> {
        IndexingGateway::new(Arc::new(SqliteStore::open_memory().unwrap()))
    }

    #[tokio::test]
    async fn test_create_then_duplicate() {
        let gateway = gateway();
        let request = UpsertRequest::new("fault", "f-1", "y1", "Port engine overheating");

        let first = gateway.upsert(request.clone()).await.unwrap();
        assert!(first.accepted);
        assert_eq!(first.outcome, UpsertOutcome::Created);

        let second = gateway.upsert(request).await.unwrap();
        assert!(second.accepted);
        assert_eq!(second.outcome, UpsertOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_unchanged_upsert_keeps_queue_state() {
        let gateway = gateway();
        let key = ObjectKey::new("work_order", "wo-7");
        let mut request = UpsertRequest::new("work_order", "wo-7", "y1", "Service watermaker");
        gateway.upsert(request.clone()).await.unwrap();

        // One failed attempt waiting out its backoff.
        let store = gateway.store();
        let now = now_millis();
        let job = store.claim_embedding_job(now, 0, 5).await.unwrap().unwrap();
        store
            .fail_embedding_job(&job, "503 from provider", 5, now + 60_000, now)
            .await
            .unwrap();

        let before = store.get_object(&key).await.unwrap().unwrap();
        assert_eq!(before.embedding_attempts, 1);

        request.payload = serde_json::json!({ "assignee": "bosun" });
        request
            .filters
            .insert("status".into(), FilterValue::from("in_progress"));
        let response = gateway.upsert(request).await.unwrap();
        assert_eq!(response.outcome, UpsertOutcome::Unchanged);

        let after = gateway.store().get_object(&key).await.unwrap().unwrap();
        assert_eq!(after.queued_at, before.queued_at);
        assert_eq!(after.embedding_attempts, 1);
        assert_eq!(after.embedding_status, EmbeddingStatus::Failed);
        assert_eq!(after.embedding_error.as_deref(), Some("503 from provider"));
        assert_eq!(after.payload["assignee"], "bosun");
        assert_eq!(
            after.filters.get("status"),
            Some(&FilterValue::from("in_progress"))
        );
    }

    #[tokio::test]
    async fn test_changed_text_requeues() {
        let gateway = gateway();
        gateway
            .upsert(UpsertRequest::new("document", "d-1", "y1", "Rev A"))
            .await
            .unwrap();

        let response = gateway
            .upsert(UpsertRequest::new("document", "d-1", "y1", "Rev B"))
            .await
            .unwrap();
        assert_eq!(response.outcome, UpsertOutcome::ContentChanged);
        assert!(response.outcome.queued());
    }

    #[test]
    fn test_prepare_rejects_bad_input() {
        type Gateway = IndexingGateway<SqliteStore>;

        assert!(Gateway::prepare(UpsertRequest::new("", "x", "y1", "text")).is_err());
        assert!(Gateway::prepare(UpsertRequest::new("fault", " ", "y1", "text")).is_err());
        assert!(Gateway::prepare(UpsertRequest::new("fault", "f-1", "", "text")).is_err());
        assert!(Gateway::prepare(UpsertRequest::new("fault", "f-1", "y1", "   ")).is_err());

        let mut bad_payload = UpsertRequest::new("fault", "f-1", "y1", "text");
        bad_payload.payload = serde_json::json!([1, 2, 3]);
        assert!(Gateway::prepare(bad_payload).is_err());

        let mut bad_filter = UpsertRequest::new("fault", "f-1", "y1", "text");
        bad_filter
            .filters
            .insert("status;drop".into(), FilterValue::from("open"));
        let err = Gateway::prepare(bad_filter).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_prepare_hashes_text() {
        let mut request = UpsertRequest::new(" fault ", "f-1", "y1", "Bilge alarm");
        request.org_id = Some("  ".into());

        let record = IndexingGateway::<SqliteStore>::prepare(request).unwrap();
        assert_eq!(record.key, ObjectKey::new("fault", "f-1"));
        assert_eq!(record.content_hash, content_hash("Bilge alarm"));
        assert_eq!(record.scope.org_id, None);
    }

    #[tokio::test]
    async fn test_cross_tenant_overwrite_rejected() {
        let gateway = gateway();
        gateway
            .upsert(UpsertRequest::new("part", "p-1", "y1", "impeller"))
            .await
            .unwrap();

        let err = gateway
            .upsert(UpsertRequest::new("part", "p-1", "y2", "impeller"))
            .await
            .unwrap_err();
        assert!(matches!(err, FusionError::TenantMismatch { .. }));
    }
}
