//! SQLite-based index store implementation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::{Type, Value};
use rusqlite::{
    params, params_from_iter, Connection, OpenFlags, OptionalExtension, TransactionBehavior,
};
use tracing::{debug, info, warn};
use ulid::Ulid;

use fusion_core::{
    DatabaseConfig, EmbeddingJob, EmbeddingOutput, EmbeddingStatus, FilterValue, FusionError,
    IndexStore, IndexedObject, JobInfo, ObjectKey, Result, SearchScope, SignalHit, Stats,
    StatusCounts, UpsertOutcome, UpsertRecord,
};

use crate::schema::{SCHEMA, SCHEMA_VERSION};
use crate::similarity::{bytes_to_vec, register_functions, vec_to_bytes};

/// Columns read by `row_to_object`, in order.
const OBJECT_COLUMNS: &str = "object_type, object_id, yacht_id, org_id, search_text, \
    content_hash, filters, payload, source_version, embedding, embedding_model, \
    embedding_version, embedding_hash, embedding_status, embedding_priority, \
    embedding_attempts, embedding_error, queued_at, started_at, completed_at, updated_at";

const JOB_COLUMNS: &str = "object_type, object_id, yacht_id, embedding_status, \
    embedding_priority, embedding_attempts, embedding_error, queued_at, started_at, completed_at";

/// How many queue candidates one claim attempt inspects before giving up.
const CLAIM_CANDIDATES: u32 = 8;

/// Error recorded when a row runs out of attempts through expired claims.
const ABANDONED_CLAIM_ERROR: &str = "embedding claim expired without a result";

fn db(e: rusqlite::Error) -> FusionError {
    FusionError::database(e.to_string())
}

/// SQLite-based index store.
///
/// A single connection guarded by a blocking Mutex. Queue transitions are
/// still written as conditional updates so that several processes sharing
/// one database file cannot double-claim a row.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_timeout(path, 30000)
    }

    /// Open the database described by a config section.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::open_with_timeout(&config.path, config.busy_timeout_ms)
    }

    fn open_with_timeout(path: impl AsRef<Path>, busy_timeout_ms: u32) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| FusionError::database(format!("Failed to open database: {}", e)))?;

        Self::init(conn, path, busy_timeout_ms)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            FusionError::database(format!("Failed to open in-memory database: {}", e))
        })?;

        Self::init(conn, Path::new(":memory:"), 30000)
    }

    fn init(conn: Connection, path: &Path, busy_timeout_ms: u32) -> Result<Self> {
        Self::configure_connection(&conn, busy_timeout_ms)?;

        register_functions(&conn)
            .map_err(|e| FusionError::database(format!("Failed to register functions: {}", e)))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| FusionError::database(format!("Failed to initialize schema: {}", e)))?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )
        .map_err(db)?;

        info!("Index store opened at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure_connection(conn: &Connection, busy_timeout_ms: u32) -> Result<()> {
        conn.execute_batch(&format!(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA busy_timeout = {};
            PRAGMA temp_store = MEMORY;
            "#,
            busy_timeout_ms
        ))
        .map_err(|e| FusionError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| FusionError::database(e.to_string()))?;
        f(&conn)
    }

    fn with_conn_mut<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| FusionError::database(e.to_string()))?;
        f(&mut conn)
    }
}

#[async_trait]
impl IndexStore for SqliteStore {
    // Object operations

    async fn upsert_object(&self, record: UpsertRecord, now: u64) -> Result<UpsertOutcome> {
        let filters = serde_json::to_string(&record.filters)?;
        let payload = serde_json::to_string(&record.payload)?;

        self.with_conn_mut(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db)?;

            let existing: Option<(String, String, Option<i64>)> = tx
                .query_row(
                    "SELECT yacht_id, content_hash, source_version FROM index_objects \
                     WHERE object_type = ?1 AND object_id = ?2",
                    params![record.key.object_type, record.key.object_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(db)?;

            let outcome = match existing {
                None => {
                    tx.execute(
                        r#"
                        INSERT INTO index_objects (object_type, object_id, org_id, yacht_id,
                            search_text, content_hash, filters, payload, source_version,
                            embedding_status, embedding_priority, embedding_attempts,
                            queued_at, available_at, updated_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10, 0, ?11, ?11, ?11)
                        "#,
                        params![
                            record.key.object_type,
                            record.key.object_id,
                            record.scope.org_id,
                            record.scope.yacht_id,
                            record.search_text,
                            record.content_hash,
                            filters,
                            payload,
                            record.source_version,
                            record.priority,
                            now as i64,
                        ],
                    )
                    .map_err(|e| FusionError::database(format!("Failed to insert object: {}", e)))?;

                    UpsertOutcome::Created
                }
                Some((owner, _, _)) if owner != record.scope.yacht_id => {
                    return Err(FusionError::TenantMismatch {
                        key: record.key.to_string(),
                        owner,
                        requested: record.scope.yacht_id.clone(),
                    });
                }
                Some((_, _, Some(stored)))
                    if record.source_version.map_or(false, |v| v < stored) =>
                {
                    return Ok(UpsertOutcome::StaleVersion);
                }
                Some((_, stored_hash, _)) if stored_hash == record.content_hash => {
                    tx.execute(
                        r#"
                        UPDATE index_objects
                        SET filters = ?3, payload = ?4,
                            source_version = COALESCE(?5, source_version),
                            updated_at = ?6
                        WHERE object_type = ?1 AND object_id = ?2
                        "#,
                        params![
                            record.key.object_type,
                            record.key.object_id,
                            filters,
                            payload,
                            record.source_version,
                            now as i64,
                        ],
                    )
                    .map_err(db)?;

                    UpsertOutcome::Unchanged
                }
                Some(_) => {
                    tx.execute(
                        r#"
                        UPDATE index_objects
                        SET org_id = ?3, search_text = ?4, content_hash = ?5,
                            filters = ?6, payload = ?7,
                            source_version = COALESCE(?8, source_version),
                            embedding_status = 'pending', embedding_priority = ?9,
                            embedding_attempts = 0, embedding_error = NULL,
                            embedding_claim_id = NULL,
                            queued_at = ?10, available_at = ?10,
                            started_at = NULL, completed_at = NULL,
                            updated_at = ?10
                        WHERE object_type = ?1 AND object_id = ?2
                        "#,
                        params![
                            record.key.object_type,
                            record.key.object_id,
                            record.scope.org_id,
                            record.search_text,
                            record.content_hash,
                            filters,
                            payload,
                            record.source_version,
                            record.priority,
                            now as i64,
                        ],
                    )
                    .map_err(db)?;

                    UpsertOutcome::ContentChanged
                }
            };

            tx.commit().map_err(db)?;

            debug!("Upserted {}: {:?}", record.key, outcome);
            Ok(outcome)
        })
    }

    async fn get_object(&self, key: &ObjectKey) -> Result<Option<IndexedObject>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM index_objects WHERE object_type = ?1 AND object_id = ?2",
                OBJECT_COLUMNS
            );

            conn.query_row(&sql, params![key.object_type, key.object_id], |row| {
                Self::row_to_object(row)
            })
            .optional()
            .map_err(db)
        })
    }

    async fn get_objects(&self, keys: &[ObjectKey]) -> Result<Vec<IndexedObject>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM index_objects WHERE object_type = ?1 AND object_id = ?2",
                OBJECT_COLUMNS
            );
            let mut stmt = conn.prepare_cached(&sql).map_err(db)?;

            let mut objects = Vec::with_capacity(keys.len());
            for key in keys {
                let found = stmt
                    .query_row(params![key.object_type, key.object_id], |row| {
                        Self::row_to_object(row)
                    })
                    .optional()
                    .map_err(db)?;

                if let Some(object) = found {
                    objects.push(object);
                }
            }

            Ok(objects)
        })
    }

    // Retrieval signals

    async fn fuzzy_search(
        &self,
        scope: &SearchScope,
        text: &str,
        threshold: f32,
        limit: u32,
    ) -> Result<Vec<SignalHit>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut values = vec![Value::Text(text.to_string())];
        let mut sql = String::from(
            "SELECT object_type, object_id, score FROM ( \
             SELECT o.object_type, o.object_id, \
                    trigram_similarity(?, o.search_text) AS score \
             FROM index_objects o WHERE 1 = 1",
        );
        Self::push_scope(&mut sql, scope, &mut values);
        sql.push_str(
            ") WHERE score > 0 AND score >= ? \
             ORDER BY score DESC, object_id ASC, object_type ASC LIMIT ?",
        );
        values.push(Value::Real(f64::from(threshold)));
        values.push(Value::Integer(i64::from(limit)));

        self.with_conn(|conn| Self::query_hits(conn, &sql, &values))
    }

    async fn lexical_search(
        &self,
        scope: &SearchScope,
        text: &str,
        limit: u32,
    ) -> Result<Vec<SignalHit>> {
        let Some(match_query) = Self::fts5_match_query(text) else {
            return Ok(Vec::new());
        };

        let mut values = vec![Value::Text(match_query)];
        let mut sql = String::from(
            "SELECT o.object_type, o.object_id, -bm25(index_objects_fts) AS score \
             FROM index_objects_fts \
             JOIN index_objects o ON o.id = index_objects_fts.rowid \
             WHERE index_objects_fts MATCH ?",
        );
        Self::push_scope(&mut sql, scope, &mut values);
        sql.push_str(" ORDER BY score DESC, o.object_id ASC, o.object_type ASC LIMIT ?");
        values.push(Value::Integer(i64::from(limit)));

        self.with_conn(|conn| Self::query_hits(conn, &sql, &values))
    }

    async fn vector_search(
        &self,
        scope: &SearchScope,
        embedding: &[f32],
        limit: u32,
    ) -> Result<Vec<SignalHit>> {
        if embedding.is_empty() {
            return Ok(Vec::new());
        }

        let mut values = vec![Value::Blob(vec_to_bytes(embedding))];
        let mut sql = String::from(
            "SELECT object_type, object_id, score FROM ( \
             SELECT o.object_type, o.object_id, \
                    cosine_similarity(?, o.embedding) AS score \
             FROM index_objects o WHERE o.embedding IS NOT NULL",
        );
        Self::push_scope(&mut sql, scope, &mut values);
        sql.push_str(
            ") WHERE score IS NOT NULL \
             ORDER BY score DESC, object_id ASC, object_type ASC LIMIT ?",
        );
        values.push(Value::Integer(i64::from(limit)));

        self.with_conn(|conn| Self::query_hits(conn, &sql, &values))
    }

    // Embedding queue

    async fn claim_embedding_job(
        &self,
        now: u64,
        stale_before: u64,
        max_attempts: u32,
    ) -> Result<Option<EmbeddingJob>> {
        self.with_conn_mut(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db)?;

            let candidates = {
                let mut stmt = tx
                    .prepare_cached(
                        r#"
                        SELECT id, object_type, object_id, search_text, content_hash,
                               embedding_attempts, embedding_status, embedding_claim_id
                        FROM index_objects
                        WHERE embedding_status = 'pending'
                           OR (embedding_status = 'processing' AND started_at < ?1)
                        ORDER BY embedding_priority DESC, queued_at ASC, id ASC
                        LIMIT ?2
                        "#,
                    )
                    .map_err(db)?;

                let rows = stmt
                    .query_map(params![stale_before as i64, CLAIM_CANDIDATES], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            ObjectKey::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, u32>(5)?,
                            row.get::<_, String>(6)?,
                            row.get::<_, Option<String>>(7)?,
                        ))
                    })
                    .map_err(db)?;

                let collected = rows
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(db)?;
                collected
            };

            let mut claimed = None;
            for (id, key, search_text, content_hash, attempts, status, prior_claim) in candidates {
                // An expired claim counts as a failed attempt.
                let reclaim = status == EmbeddingStatus::Processing.as_str();
                let attempts = if reclaim { attempts + 1 } else { attempts };

                if reclaim && attempts >= max_attempts {
                    let changed = tx
                        .execute(
                            r#"
                            UPDATE index_objects
                            SET embedding_status = 'dlq', embedding_attempts = ?1,
                                embedding_error = ?2, embedding_claim_id = NULL
                            WHERE id = ?3 AND embedding_status = 'processing'
                              AND embedding_claim_id IS ?4
                            "#,
                            params![attempts, ABANDONED_CLAIM_ERROR, id, prior_claim],
                        )
                        .map_err(db)?;
                    if changed == 1 {
                        warn!(
                            "Embedding job {} dead-lettered after {} abandoned claims",
                            key, attempts
                        );
                    }
                    continue;
                }

                let claim_id = Ulid::new();
                let changed = tx
                    .execute(
                        r#"
                        UPDATE index_objects
                        SET embedding_status = 'processing', embedding_claim_id = ?1,
                            embedding_attempts = ?2, started_at = ?3, completed_at = NULL
                        WHERE id = ?4 AND embedding_status = ?5 AND embedding_claim_id IS ?6
                        "#,
                        params![
                            claim_id.to_string(),
                            attempts,
                            now as i64,
                            id,
                            status,
                            prior_claim
                        ],
                    )
                    .map_err(db)?;

                if changed == 1 {
                    if reclaim {
                        info!("Reclaimed stale embedding job {}", key);
                    }
                    claimed = Some(EmbeddingJob {
                        key,
                        search_text,
                        content_hash,
                        attempts,
                        claim_id,
                    });
                    break;
                }
            }

            tx.commit().map_err(db)?;

            if let Some(job) = &claimed {
                debug!("Claimed embedding job {} ({})", job.key, job.claim_id);
            }
            Ok(claimed)
        })
    }

    async fn complete_embedding_job(
        &self,
        job: &EmbeddingJob,
        output: &EmbeddingOutput,
        now: u64,
    ) -> Result<bool> {
        let embedding = vec_to_bytes(&output.vector);

        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    r#"
                    UPDATE index_objects
                    SET embedding = ?1, embedding_hash = ?2, embedding_model = ?3,
                        embedding_version = ?4, embedding_status = 'indexed',
                        embedding_error = NULL, embedding_claim_id = NULL,
                        completed_at = ?5
                    WHERE object_type = ?6 AND object_id = ?7
                      AND embedding_status = 'processing'
                      AND embedding_claim_id = ?8
                      AND content_hash = ?2
                    "#,
                    params![
                        embedding,
                        job.content_hash,
                        output.model,
                        output.version,
                        now as i64,
                        job.key.object_type,
                        job.key.object_id,
                        job.claim_id.to_string(),
                    ],
                )
                .map_err(db)?;

            Ok(changed == 1)
        })
    }

    async fn fail_embedding_job(
        &self,
        job: &EmbeddingJob,
        error: &str,
        max_attempts: u32,
        retry_at: u64,
        _now: u64,
    ) -> Result<Option<EmbeddingStatus>> {
        self.with_conn(|conn| {
            let status: Option<String> = conn
                .query_row(
                    r#"
                    UPDATE index_objects
                    SET embedding_attempts = embedding_attempts + 1,
                        embedding_status = CASE
                            WHEN embedding_attempts + 1 >= ?1 THEN 'dlq'
                            ELSE 'failed'
                        END,
                        embedding_error = ?2,
                        embedding_claim_id = NULL,
                        available_at = ?3
                    WHERE object_type = ?4 AND object_id = ?5
                      AND embedding_status = 'processing'
                      AND embedding_claim_id = ?6
                    RETURNING embedding_status
                    "#,
                    params![
                        max_attempts,
                        error,
                        retry_at as i64,
                        job.key.object_type,
                        job.key.object_id,
                        job.claim_id.to_string(),
                    ],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db)?;

            status.map(|s| s.parse::<EmbeddingStatus>()).transpose()
        })
    }

    async fn release_retries(&self, now: u64) -> Result<u64> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE index_objects SET embedding_status = 'pending' \
                     WHERE embedding_status = 'failed' AND COALESCE(available_at, 0) <= ?1",
                    params![now as i64],
                )
                .map_err(db)?;

            Ok(changed as u64)
        })
    }

    async fn requeue_stale_embeddings(&self, now: u64) -> Result<u64> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    r#"
                    UPDATE index_objects
                    SET embedding_status = 'pending', embedding_attempts = 0,
                        embedding_error = NULL, queued_at = ?1, available_at = ?1
                    WHERE embedding_status = 'indexed'
                      AND (embedding_hash IS NULL OR embedding_hash != content_hash)
                    "#,
                    params![now as i64],
                )
                .map_err(db)?;

            Ok(changed as u64)
        })
    }

    async fn requeue_dead_letter(&self, key: &ObjectKey, now: u64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    r#"
                    UPDATE index_objects
                    SET embedding_status = 'pending', embedding_attempts = 0,
                        embedding_error = NULL, queued_at = ?1, available_at = ?1
                    WHERE object_type = ?2 AND object_id = ?3 AND embedding_status = 'dlq'
                    "#,
                    params![now as i64, key.object_type, key.object_id],
                )
                .map_err(db)?;

            Ok(changed == 1)
        })
    }

    // Introspection

    async fn status_counts(&self, yacht_id: Option<&str>) -> Result<StatusCounts> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT embedding_status, COUNT(*) FROM index_objects \
                     WHERE ?1 IS NULL OR yacht_id = ?1 GROUP BY embedding_status",
                )
                .map_err(db)?;

            let rows = stmt
                .query_map(params![yacht_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
                })
                .map_err(db)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db)?;

            let mut counts = StatusCounts::default();
            for (status, count) in rows {
                counts.set(status.parse()?, count);
            }

            Ok(counts)
        })
    }

    async fn list_by_status(
        &self,
        status: EmbeddingStatus,
        yacht_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<JobInfo>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM index_objects \
                 WHERE embedding_status = ?1 AND (?2 IS NULL OR yacht_id = ?2) \
                 ORDER BY embedding_priority DESC, queued_at ASC, object_type ASC, object_id ASC \
                 LIMIT ?3",
                JOB_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(db)?;

            let jobs = stmt
                .query_map(params![status.as_str(), yacht_id, limit], |row| {
                    Self::row_to_job(row)
                })
                .map_err(db)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db)?;

            Ok(jobs)
        })
    }

    async fn get_stats(&self) -> Result<Stats> {
        let statuses = self.status_counts(None).await?;

        self.with_conn(|conn| {
            let objects: u64 = conn
                .query_row("SELECT COUNT(*) FROM index_objects", [], |row| row.get(0))
                .map_err(db)?;

            let embeddings: u64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM index_objects WHERE embedding IS NOT NULL",
                    [],
                    |row| row.get(0),
                )
                .map_err(db)?;

            // Get page count and page size to estimate storage
            let page_count: u64 = conn
                .query_row("PRAGMA page_count", [], |row| row.get(0))
                .unwrap_or(0);
            let page_size: u64 = conn
                .query_row("PRAGMA page_size", [], |row| row.get(0))
                .unwrap_or(4096);

            Ok(Stats {
                objects,
                embeddings,
                statuses,
                storage_bytes: page_count * page_size,
            })
        })
    }
}

// Helper methods
impl SqliteStore {
    /// Append tenant, type and filter predicates for alias `o`.
    fn push_scope(sql: &mut String, scope: &SearchScope, values: &mut Vec<Value>) {
        sql.push_str(" AND o.yacht_id = ?");
        values.push(Value::Text(scope.tenant.yacht_id.clone()));

        if let Some(org_id) = &scope.tenant.org_id {
            sql.push_str(" AND o.org_id = ?");
            values.push(Value::Text(org_id.clone()));
        }

        if !scope.object_types.is_empty() {
            let placeholders = vec!["?"; scope.object_types.len()].join(", ");
            sql.push_str(&format!(" AND o.object_type IN ({})", placeholders));
            values.extend(scope.object_types.iter().cloned().map(Value::Text));
        }

        for (key, value) in &scope.filters {
            sql.push_str(" AND json_extract(o.filters, ?) = ?");
            values.push(Value::Text(format!("$.\"{}\"", key)));
            values.push(match value {
                FilterValue::Bool(b) => Value::Integer(i64::from(*b)),
                FilterValue::Integer(i) => Value::Integer(*i),
                FilterValue::Float(f) => Value::Real(*f),
                FilterValue::Text(s) => Value::Text(s.clone()),
            });
        }
    }

    fn query_hits(conn: &Connection, sql: &str, values: &[Value]) -> Result<Vec<SignalHit>> {
        let mut stmt = conn.prepare(sql).map_err(db)?;

        let hits = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(SignalHit {
                    key: ObjectKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                    score: row.get::<_, f64>(2)? as f32,
                })
            })
            .map_err(db)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db)?;

        Ok(hits)
    }

    /// Build an FTS5 query matching any term of the text.
    ///
    /// Terms are quoted so operators and punctuation in user text are
    /// never interpreted as query syntax.
    fn fts5_match_query(text: &str) -> Option<String> {
        let mut terms: Vec<String> = Vec::new();
        for term in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
        {
            if !terms.contains(&term) {
                terms.push(term);
            }
        }

        if terms.is_empty() {
            return None;
        }

        Some(
            terms
                .iter()
                .map(|t| format!("\"{}\"", t))
                .collect::<Vec<_>>()
                .join(" OR "),
        )
    }

    fn row_to_object(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexedObject> {
        let filters: String = row.get(6)?;
        let payload: String = row.get(7)?;
        let embedding: Option<Vec<u8>> = row.get(9)?;
        let status: String = row.get(13)?;

        Ok(IndexedObject {
            object_type: row.get(0)?,
            object_id: row.get(1)?,
            yacht_id: row.get(2)?,
            org_id: row.get(3)?,
            search_text: row.get(4)?,
            content_hash: row.get(5)?,
            filters: serde_json::from_str(&filters)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
            payload: serde_json::from_str(&payload)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?,
            source_version: row.get(8)?,
            embedding: embedding.and_then(|b| bytes_to_vec(&b)),
            embedding_model: row.get(10)?,
            embedding_version: row.get(11)?,
            embedding_hash: row.get(12)?,
            embedding_status: status
                .parse()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(13, Type::Text, Box::new(e)))?,
            embedding_priority: row.get(14)?,
            embedding_attempts: row.get(15)?,
            embedding_error: row.get(16)?,
            queued_at: row.get::<_, Option<i64>>(17)?.map(|v| v as u64),
            started_at: row.get::<_, Option<i64>>(18)?.map(|v| v as u64),
            completed_at: row.get::<_, Option<i64>>(19)?.map(|v| v as u64),
            updated_at: row.get::<_, i64>(20)? as u64,
        })
    }

    fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobInfo> {
        let status: String = row.get(3)?;

        Ok(JobInfo {
            object_type: row.get(0)?,
            object_id: row.get(1)?,
            yacht_id: row.get(2)?,
            status: status
                .parse()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
            priority: row.get(4)?,
            attempts: row.get(5)?,
            error: row.get(6)?,
            queued_at: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
            started_at: row.get::<_, Option<i64>>(8)?.map(|v| v as u64),
            completed_at: row.get::<_, Option<i64>>(9)?.map(|v| v as u64),
        })
    }
}
