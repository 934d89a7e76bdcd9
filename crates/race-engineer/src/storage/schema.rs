//! `SQLite` schema definitions for race-engineer.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the cached sessions table.
///
/// `payload` holds the serialized session; the other columns exist for
/// lookups and listings without decoding it.
pub const CREATE_SESSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    year INTEGER NOT NULL,
    grand_prix TEXT NOT NULL,
    kind TEXT NOT NULL,
    event_name TEXT NOT NULL,
    session_name TEXT NOT NULL,
    lap_count INTEGER NOT NULL,
    fetched_at TEXT NOT NULL,
    payload TEXT NOT NULL,
    UNIQUE (year, grand_prix, kind)
)
";

/// SQL statement to create the knowledge base chunk table.
pub const CREATE_KB_CHUNKS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS kb_chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create an index on chunk source for ordered reads.
pub const CREATE_KB_SOURCE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_kb_chunks_source ON kb_chunks(source, chunk_index)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_SESSIONS_TABLE,
    CREATE_KB_CHUNKS_TABLE,
    CREATE_KB_SOURCE_INDEX,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.is_empty());
        }
    }

    #[test]
    fn test_sessions_table_is_unique_per_session() {
        assert!(CREATE_SESSIONS_TABLE.contains("UNIQUE (year, grand_prix, kind)"));
        assert!(CREATE_SESSIONS_TABLE.contains("payload TEXT NOT NULL"));
    }

    #[test]
    fn test_kb_chunks_table_structure() {
        assert!(CREATE_KB_CHUNKS_TABLE.contains("content TEXT NOT NULL"));
        assert!(CREATE_KB_CHUNKS_TABLE.contains("embedding BLOB NOT NULL"));
    }
}
