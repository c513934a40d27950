//! Core traits defining the interfaces between components.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    EmbeddingJob, EmbeddingOutput, EmbeddingStatus, IndexedObject, JobInfo, ObjectKey,
    SearchScope, SignalHit, Stats, StatusCounts, UpsertOutcome, UpsertRecord,
};

/// Storage layer trait.
///
/// Timestamps are passed in by callers (Unix millis) so that lifecycle
/// transitions are reproducible under test.
#[async_trait]
pub trait IndexStore: Send + Sync {
    // Object operations
    async fn upsert_object(&self, record: UpsertRecord, now: u64) -> Result<UpsertOutcome>;
    async fn get_object(&self, key: &ObjectKey) -> Result<Option<IndexedObject>>;
    async fn get_objects(&self, keys: &[ObjectKey]) -> Result<Vec<IndexedObject>>;

    // Retrieval signals, each ranked best first with a total order
    async fn fuzzy_search(
        &self,
        scope: &SearchScope,
        text: &str,
        threshold: f32,
        limit: u32,
    ) -> Result<Vec<SignalHit>>;

    async fn lexical_search(
        &self,
        scope: &SearchScope,
        text: &str,
        limit: u32,
    ) -> Result<Vec<SignalHit>>;

    async fn vector_search(
        &self,
        scope: &SearchScope,
        embedding: &[f32],
        limit: u32,
    ) -> Result<Vec<SignalHit>>;

    // Embedding queue
    /// Atomically move the most urgent eligible row to `processing`.
    ///
    /// `processing` rows started before `stale_before` are eligible again;
    /// each such reclaim counts as a failed attempt, and a row whose
    /// attempts reach `max_attempts` this way is dead-lettered instead.
    async fn claim_embedding_job(
        &self,
        now: u64,
        stale_before: u64,
        max_attempts: u32,
    ) -> Result<Option<EmbeddingJob>>;

    /// Store the vector; returns false when the claim was superseded.
    async fn complete_embedding_job(
        &self,
        job: &EmbeddingJob,
        output: &EmbeddingOutput,
        now: u64,
    ) -> Result<bool>;

    /// Record a failure; returns the resulting status, or `None` when the
    /// claim was superseded.
    async fn fail_embedding_job(
        &self,
        job: &EmbeddingJob,
        error: &str,
        max_attempts: u32,
        retry_at: u64,
        now: u64,
    ) -> Result<Option<EmbeddingStatus>>;

    /// Move `failed` rows whose backoff has elapsed back to `pending`.
    async fn release_retries(&self, now: u64) -> Result<u64>;

    /// Re-queue `indexed` rows whose embedding hash no longer matches.
    async fn requeue_stale_embeddings(&self, now: u64) -> Result<u64>;

    /// Operator action: move one `dlq` row back to `pending`.
    async fn requeue_dead_letter(&self, key: &ObjectKey, now: u64) -> Result<bool>;

    // Introspection
    async fn status_counts(&self, yacht_id: Option<&str>) -> Result<StatusCounts>;
    async fn list_by_status(
        &self,
        status: EmbeddingStatus,
        yacht_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<JobInfo>>;
    async fn get_stats(&self) -> Result<Stats>;
}

/// Embedding provider trait.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed the search text of an indexed object.
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a query rewrite.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Model identifier recorded with each embedding.
    fn model_name(&self) -> &str;

    /// Model version recorded with each embedding.
    fn model_version(&self) -> &str;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}
