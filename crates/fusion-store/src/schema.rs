//! Database schema definitions.

/// Main schema SQL for initializing the database.
pub const SCHEMA: &str = r#"
-- One row per searchable object
CREATE TABLE IF NOT EXISTS index_objects (
    id INTEGER PRIMARY KEY,
    object_type TEXT NOT NULL,
    object_id TEXT NOT NULL,
    org_id TEXT,
    yacht_id TEXT NOT NULL,
    search_text TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    filters TEXT NOT NULL DEFAULT '{}',
    payload TEXT NOT NULL DEFAULT 'null',
    source_version INTEGER,
    embedding BLOB,
    embedding_model TEXT,
    embedding_version TEXT,
    embedding_hash TEXT,
    embedding_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (embedding_status IN ('pending', 'processing', 'indexed', 'failed', 'dlq')),
    embedding_priority INTEGER NOT NULL DEFAULT 0,
    embedding_attempts INTEGER NOT NULL DEFAULT 0,
    embedding_error TEXT,
    embedding_claim_id TEXT,
    queued_at INTEGER,
    available_at INTEGER,
    started_at INTEGER,
    completed_at INTEGER,
    updated_at INTEGER NOT NULL,
    UNIQUE (object_type, object_id)
);

CREATE INDEX IF NOT EXISTS idx_index_objects_tenant
    ON index_objects(yacht_id, org_id, object_type);
CREATE INDEX IF NOT EXISTS idx_index_objects_queue
    ON index_objects(embedding_status, embedding_priority DESC, queued_at);

-- FTS5 lexical index over search_text (porter stemming)
CREATE VIRTUAL TABLE IF NOT EXISTS index_objects_fts USING fts5(
    search_text,
    content=index_objects,
    content_rowid=id,
    tokenize='porter unicode61 remove_diacritics 2'
);

-- Triggers to keep FTS5 in sync with index_objects
CREATE TRIGGER IF NOT EXISTS index_objects_ai AFTER INSERT ON index_objects BEGIN
    INSERT INTO index_objects_fts(rowid, search_text) VALUES (NEW.id, NEW.search_text);
END;

CREATE TRIGGER IF NOT EXISTS index_objects_ad AFTER DELETE ON index_objects BEGIN
    INSERT INTO index_objects_fts(index_objects_fts, rowid, search_text)
        VALUES ('delete', OLD.id, OLD.search_text);
END;

CREATE TRIGGER IF NOT EXISTS index_objects_au AFTER UPDATE OF search_text ON index_objects BEGIN
    INSERT INTO index_objects_fts(index_objects_fts, rowid, search_text)
        VALUES ('delete', OLD.id, OLD.search_text);
    INSERT INTO index_objects_fts(rowid, search_text) VALUES (NEW.id, NEW.search_text);
END;

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;
