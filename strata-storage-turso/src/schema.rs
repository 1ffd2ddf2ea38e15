//! Database schema for the durable relational store.

/// SQL to create the L1 backup table
pub const CREATE_ACTIVE_CONTEXT_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS active_context (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    turn_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    tier TEXT NOT NULL DEFAULT 'L1',
    metadata TEXT NOT NULL DEFAULT '{}',
    ttl_expires_at INTEGER
)
";

/// SQL to create the L2 facts table
pub const CREATE_WORKING_MEMORY_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS working_memory (
    fact_id TEXT PRIMARY KEY NOT NULL,
    session_id TEXT NOT NULL,
    content TEXT NOT NULL,
    ciar_score REAL NOT NULL,
    certainty REAL NOT NULL,
    impact REAL NOT NULL,
    age_decay REAL NOT NULL,
    recency_boost REAL NOT NULL,
    source_uri TEXT,
    source_type TEXT NOT NULL DEFAULT 'extracted',
    topic_segment_id TEXT,
    topic_label TEXT,
    fact_type TEXT,
    fact_category TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    extracted_at INTEGER NOT NULL,
    last_accessed INTEGER NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0
)
";

/// Index for session-scoped turn lookups in timestamp order
pub const CREATE_ACTIVE_CONTEXT_SESSION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_active_context_session
ON active_context(session_id, tier, timestamp DESC)
";

/// Index for session-scoped fact queries ordered by score
pub const CREATE_WORKING_MEMORY_SESSION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_working_memory_session
ON working_memory(session_id, ciar_score DESC)
";

/// Index for the TTL sweep
pub const CREATE_WORKING_MEMORY_EXTRACTED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_working_memory_extracted
ON working_memory(extracted_at)
";

/// FTS5 virtual table over fact content.
///
/// `fact_id` is UNINDEXED so it is available for joins without being
/// tokenized. Tokenizer: porter unicode61 for stemming and Unicode-aware
/// tokenization.
pub const CREATE_WORKING_MEMORY_FTS_TABLE: &str = r"
CREATE VIRTUAL TABLE IF NOT EXISTS working_memory_fts USING fts5(
    fact_id UNINDEXED,
    content,
    tokenize='porter unicode61'
)
";

/// Triggers keeping the FTS table in sync with `working_memory`
pub const CREATE_WORKING_MEMORY_FTS_TRIGGERS: [&str; 3] = [
    r"
CREATE TRIGGER IF NOT EXISTS working_memory_ai AFTER INSERT ON working_memory BEGIN
    INSERT INTO working_memory_fts(fact_id, content)
    VALUES (new.fact_id, new.content);
END;
",
    r"
CREATE TRIGGER IF NOT EXISTS working_memory_au AFTER UPDATE ON working_memory BEGIN
    UPDATE working_memory_fts SET content = new.content WHERE fact_id = new.fact_id;
END;
",
    r"
CREATE TRIGGER IF NOT EXISTS working_memory_ad AFTER DELETE ON working_memory BEGIN
    DELETE FROM working_memory_fts WHERE fact_id = old.fact_id;
END;
",
];

/// Existence probe for the full-text index
pub const FULLTEXT_INDEX_PROBE: &str = r"
SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'working_memory_fts'
";
