//! Core domain types for the search engine.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::FusionError;

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Hex-encoded blake3 hash of a search text.
pub fn content_hash(text: &str) -> String {
    hex::encode(blake3::hash(text.as_bytes()).as_bytes())
}

/// Identity of an indexed object, unique across the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub object_type: String,
    pub object_id: String,
}

impl ObjectKey {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.object_type, self.object_id)
    }
}

/// The yacht/organisation boundary every read and write respects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantScope {
    pub yacht_id: String,

    #[serde(default)]
    pub org_id: Option<String>,
}

impl TenantScope {
    pub fn new(yacht_id: impl Into<String>) -> Self {
        Self {
            yacht_id: yacht_id.into(),
            org_id: None,
        }
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }
}

/// Embedding lifecycle state of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Pending,
    Processing,
    Indexed,
    Failed,
    Dlq,
}

impl EmbeddingStatus {
    pub const ALL: [EmbeddingStatus; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Indexed,
        Self::Failed,
        Self::Dlq,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Indexed => "indexed",
            Self::Failed => "failed",
            Self::Dlq => "dlq",
        }
    }

    /// No automatic transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Dlq)
    }
}

impl FromStr for EmbeddingStatus {
    type Err = FusionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "indexed" => Ok(Self::Indexed),
            "failed" => Ok(Self::Failed),
            "dlq" => Ok(Self::Dlq),
            other => Err(FusionError::validation(format!(
                "unknown embedding status: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for EmbeddingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed filter attribute value.
///
/// Variant order matters for untagged deserialization: booleans and
/// integers must be tried before floats and strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Structured key/value attributes used for narrowing.
pub type Filters = BTreeMap<String, FilterValue>;

/// Maximum number of filter attributes on one object or request.
pub const MAX_FILTERS: usize = 32;

/// Check filter keys against `[A-Za-z0-9_]{1,64}` and values for finiteness.
pub fn validate_filters(filters: &Filters) -> Result<(), FusionError> {
    if filters.len() > MAX_FILTERS {
        return Err(FusionError::validation(format!(
            "at most {} filters are allowed, got {}",
            MAX_FILTERS,
            filters.len()
        )));
    }

    for (key, value) in filters {
        let valid_key = !key.is_empty()
            && key.len() <= 64
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_key {
            return Err(FusionError::validation(format!("invalid filter key: {:?}", key)));
        }

        if let FilterValue::Float(f) = value {
            if !f.is_finite() {
                return Err(FusionError::validation(format!(
                    "filter {} must be a finite number",
                    key
                )));
            }
        }
    }

    Ok(())
}

/// The unit of search, as persisted by the index store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedObject {
    pub object_type: String,
    pub object_id: String,
    pub yacht_id: String,
    pub org_id: Option<String>,

    /// Raw text the lexical and fuzzy signals read.
    pub search_text: String,

    /// Hash of `search_text`.
    pub content_hash: String,

    #[serde(default)]
    pub filters: Filters,

    /// Display data returned to callers, never scored.
    #[serde(default)]
    pub payload: serde_json::Value,

    pub source_version: Option<i64>,

    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub embedding_version: Option<String>,

    /// Hash of the text that produced `embedding`.
    pub embedding_hash: Option<String>,

    pub embedding_status: EmbeddingStatus,
    pub embedding_priority: i32,
    pub embedding_attempts: u32,
    pub embedding_error: Option<String>,

    /// Timestamps are Unix millis.
    pub queued_at: Option<u64>,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub updated_at: u64,
}

impl IndexedObject {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.object_type, &self.object_id)
    }

    /// True when the stored embedding no longer matches `search_text`.
    pub fn embedding_is_stale(&self) -> bool {
        match &self.embedding_hash {
            Some(hash) => hash != &self.content_hash,
            None => true,
        }
    }
}

/// A validated upsert, ready to be written by the store.
#[derive(Debug, Clone)]
pub struct UpsertRecord {
    pub key: ObjectKey,
    pub scope: TenantScope,
    pub search_text: String,
    pub content_hash: String,
    pub filters: Filters,
    pub payload: serde_json::Value,
    pub source_version: Option<i64>,
    pub priority: i32,
}

/// What an upsert did to the stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// First write of this identity; queued for embedding.
    Created,
    /// Text changed; lexical index rebuilt and re-queued for embedding.
    ContentChanged,
    /// Same content hash; only payload/filters/updated_at touched.
    Unchanged,
    /// Older `source_version` than stored; nothing written.
    StaleVersion,
}

impl UpsertOutcome {
    /// Whether this upsert made the object eligible for embedding work.
    pub fn queued(&self) -> bool {
        matches!(self, Self::Created | Self::ContentChanged)
    }
}

/// A claimed unit of embedding work.
#[derive(Debug, Clone)]
pub struct EmbeddingJob {
    pub key: ObjectKey,
    pub search_text: String,

    /// Content hash at claim time; the commit is discarded if it changed.
    pub content_hash: String,

    /// Failed attempts so far, including abandoned claims.
    pub attempts: u32,

    /// Token written by the claim; later updates compare against it.
    pub claim_id: Ulid,
}

/// A vector produced by an embedding provider.
#[derive(Debug, Clone)]
pub struct EmbeddingOutput {
    pub vector: Vec<f32>,
    pub model: String,
    pub version: String,
}

/// Read-only view of one object's embedding lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub object_type: String,
    pub object_id: String,
    pub yacht_id: String,
    pub status: EmbeddingStatus,
    pub priority: i32,
    pub attempts: u32,
    pub error: Option<String>,
    pub queued_at: Option<u64>,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
}

/// Number of objects per embedding status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub indexed: u64,
    pub failed: u64,
    pub dlq: u64,
}

impl StatusCounts {
    pub fn set(&mut self, status: EmbeddingStatus, count: u64) {
        match status {
            EmbeddingStatus::Pending => self.pending = count,
            EmbeddingStatus::Processing => self.processing = count,
            EmbeddingStatus::Indexed => self.indexed = count,
            EmbeddingStatus::Failed => self.failed = count,
            EmbeddingStatus::Dlq => self.dlq = count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.indexed + self.failed + self.dlq
    }
}

/// Statistics about the index store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    /// Number of indexed objects.
    pub objects: u64,

    /// Number of objects carrying an embedding.
    pub embeddings: u64,

    /// Per-status breakdown.
    pub statuses: StatusCounts,

    /// Database size in bytes.
    pub storage_bytes: u64,
}

/// One independent relevance computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Fuzzy,
    Lexical,
    Vector,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fuzzy => "fuzzy",
            Self::Lexical => "lexical",
            Self::Vector => "vector",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scored object from one signal; its rank is its position in the list.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalHit {
    pub key: ObjectKey,
    pub score: f32,
}

/// Row-level narrowing applied inside every signal query.
#[derive(Debug, Clone)]
pub struct SearchScope {
    pub tenant: TenantScope,

    /// Empty means every object type.
    pub object_types: Vec<String>,

    /// Equality constraints on `filters`.
    pub filters: Filters,
}

impl SearchScope {
    pub fn tenant(tenant: TenantScope) -> Self {
        Self {
            tenant,
            object_types: Vec::new(),
            filters: Filters::new(),
        }
    }
}

/// One alternate phrasing of the caller's query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rewrite {
    pub text: String,

    /// Precomputed query embedding; absent means no vector signal.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl Rewrite {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Which scoring strategy combines the retrieved signals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMode {
    /// Reciprocal rank fusion across all three signals.
    #[default]
    Rrf,
    /// Linear vector + entity-match score.
    Weighted,
}

/// A search request as received from callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub tenant_scope: TenantScope,

    #[serde(default)]
    pub object_types: Vec<String>,

    #[serde(default)]
    pub filters: Filters,

    #[serde(default)]
    pub rewrites: Vec<Rewrite>,

    #[serde(default)]
    pub rrf_k: Option<u32>,

    #[serde(default)]
    pub limit: Option<u32>,

    #[serde(default)]
    pub fuzzy_threshold: Option<f32>,

    #[serde(default)]
    pub scoring: ScoringMode,

    /// Entities for the weighted strategy; rewrite terms are used when empty.
    #[serde(default)]
    pub entities: Vec<String>,
}

impl SearchRequest {
    pub fn new(tenant_scope: TenantScope, rewrites: Vec<Rewrite>) -> Self {
        Self {
            tenant_scope,
            object_types: Vec::new(),
            filters: Filters::new(),
            rewrites,
            rrf_k: None,
            limit: None,
            fuzzy_threshold: None,
            scoring: ScoringMode::Rrf,
            entities: Vec::new(),
        }
    }
}

/// Per-signal values for one hit; `None` means the object was absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalBreakdown<T> {
    pub fuzzy: Option<T>,
    pub lexical: Option<T>,
    pub vector: Option<T>,
}

impl<T: Copy> SignalBreakdown<T> {
    pub fn get(&self, signal: Signal) -> Option<T> {
        match signal {
            Signal::Fuzzy => self.fuzzy,
            Signal::Lexical => self.lexical,
            Signal::Vector => self.vector,
        }
    }

    pub fn set(&mut self, signal: Signal, value: T) {
        match signal {
            Signal::Fuzzy => self.fuzzy = Some(value),
            Signal::Lexical => self.lexical = Some(value),
            Signal::Vector => self.vector = Some(value),
        }
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub object_type: String,
    pub object_id: String,
    pub payload: serde_json::Value,
    pub fused_score: f64,
    pub best_rewrite_index: usize,
    pub signal_ranks: SignalBreakdown<u32>,
    pub signal_scores: SignalBreakdown<f32>,
    pub updated_at: Option<u64>,
}

/// Search results container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Ordered hits, best first.
    pub hits: Vec<SearchHit>,

    /// Signals that failed and contributed nothing.
    #[serde(default)]
    pub degraded_signals: Vec<Signal>,

    /// Search latency in milliseconds.
    pub latency_ms: u64,
}

impl SearchResponse {
    pub fn empty() -> Self {
        Self {
            hits: Vec::new(),
            degraded_signals: Vec::new(),
            latency_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("engine overheat"), content_hash("engine overheat"));
        assert_ne!(content_hash("engine overheat"), content_hash("engine overheat "));
        assert_eq!(content_hash("x").len(), 64);
    }

    #[test]
    fn test_status_roundtrip_and_terminal() {
        for status in EmbeddingStatus::ALL {
            assert_eq!(status.as_str().parse::<EmbeddingStatus>().unwrap(), status);
        }
        assert!(EmbeddingStatus::Dlq.is_terminal());
        assert!(!EmbeddingStatus::Failed.is_terminal());
        assert!("archived".parse::<EmbeddingStatus>().is_err());
    }

    #[test]
    fn test_filter_value_untagged() {
        let filters: Filters =
            serde_json::from_str(r#"{"status":"open","priority":2,"hours":1.5,"urgent":true}"#)
                .unwrap();
        assert_eq!(filters["status"], FilterValue::Text("open".into()));
        assert_eq!(filters["priority"], FilterValue::Integer(2));
        assert_eq!(filters["hours"], FilterValue::Float(1.5));
        assert_eq!(filters["urgent"], FilterValue::Bool(true));
    }

    #[test]
    fn test_validate_filters() {
        let mut filters = Filters::new();
        filters.insert("equipment_id".into(), FilterValue::from("gen-2"));
        assert!(validate_filters(&filters).is_ok());

        filters.insert("bad key".into(), FilterValue::from(1));
        assert!(validate_filters(&filters).is_err());

        let mut filters = Filters::new();
        filters.insert("hours".into(), FilterValue::Float(f64::NAN));
        assert!(validate_filters(&filters).is_err());

        let many: Filters = (0..=MAX_FILTERS)
            .map(|i| (format!("k{}", i), FilterValue::from(i as i64)))
            .collect();
        assert!(validate_filters(&many).is_err());
    }

    #[test]
    fn test_search_request_defaults() {
        let req: SearchRequest = serde_json::from_str(
            r#"{"tenant_scope":{"yacht_id":"y1"},"rewrites":[{"text":"bilge pump"}]}"#,
        )
        .unwrap();
        assert_eq!(req.tenant_scope.org_id, None);
        assert_eq!(req.rewrites.len(), 1);
        assert!(req.rewrites[0].embedding.is_none());
        assert_eq!(req.scoring, ScoringMode::Rrf);
        assert!(req.limit.is_none());
    }

    #[test]
    fn test_stale_embedding_detection() {
        let mut obj = IndexedObject {
            object_type: "fault".into(),
            object_id: "f-1".into(),
            yacht_id: "y1".into(),
            org_id: None,
            search_text: "gen set".into(),
            content_hash: content_hash("gen set"),
            filters: Filters::new(),
            payload: serde_json::Value::Null,
            source_version: None,
            embedding: None,
            embedding_model: None,
            embedding_version: None,
            embedding_hash: None,
            embedding_status: EmbeddingStatus::Pending,
            embedding_priority: 0,
            embedding_attempts: 0,
            embedding_error: None,
            queued_at: None,
            started_at: None,
            completed_at: None,
            updated_at: 0,
        };
        assert!(obj.embedding_is_stale());
        obj.embedding_hash = Some(content_hash("gen set"));
        assert!(!obj.embedding_is_stale());
    }
}
