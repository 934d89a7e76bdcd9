//! Storage layer for race-engineer.
//!
//! This module provides `SQLite`-based persistent storage for fetched
//! sessions and for the embedded knowledge base chunks.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::telemetry::{Session, SessionId, SessionKind};

/// Metadata key holding the knowledge base fingerprint.
const KB_FINGERPRINT_KEY: &str = "kb_fingerprint";

/// Storage engine for cached sessions and knowledge base chunks.
///
/// Provides persistent storage using `SQLite` with support for:
/// - Session caching keyed by year, grand prix and session kind
/// - Knowledge base chunks with their embeddings
/// - Key/value metadata
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

/// Listing entry for a cached session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedSession {
    /// Session identity.
    pub id: SessionId,
    /// Event name.
    pub event_name: String,
    /// Session name.
    pub session_name: String,
    /// Number of laps stored.
    pub lap_count: usize,
    /// When the session was fetched.
    pub fetched_at: DateTime<Utc>,
}

/// A knowledge base chunk with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    /// Source document path, relative to the knowledge base directory.
    pub source: String,
    /// Position of the chunk within its document.
    pub chunk_index: usize,
    /// Chunk text.
    pub content: String,
    /// Embedding vector.
    pub embedding: Vec<f32>,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        debug!("Database ready at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    // === Sessions ===

    /// Store a session, replacing any cached copy of the same session.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database operation fails.
    pub fn put_session(&self, session: &Session) -> Result<()> {
        let payload = serde_json::to_string(session)?;
        let lap_count = i64::try_from(session.laps.len()).unwrap_or(i64::MAX);
        self.conn.execute(
            r"
            INSERT INTO sessions
                (year, grand_prix, kind, event_name, session_name, lap_count, fetched_at, payload)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (year, grand_prix, kind) DO UPDATE SET
                event_name = excluded.event_name,
                session_name = excluded.session_name,
                lap_count = excluded.lap_count,
                fetched_at = excluded.fetched_at,
                payload = excluded.payload
            ",
            params![
                session.id.year,
                session.id.grand_prix_key(),
                session.id.kind.code(),
                session.event_name,
                session.session_name,
                lap_count,
                Utc::now().to_rfc3339(),
                payload,
            ],
        )?;
        debug!("Cached session {}", session.id);
        Ok(())
    }

    /// Get a cached session.
    ///
    /// The returned session carries `id` exactly as requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation or decoding fails.
    pub fn get_session(&self, id: &SessionId) -> Result<Option<Session>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM sessions WHERE year = ?1 AND grand_prix = ?2 AND kind = ?3",
                params![id.year, id.grand_prix_key(), id.kind.code()],
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(|p| {
                let mut session: Session = serde_json::from_str(&p)?;
                session.id = id.clone();
                Ok(session)
            })
            .transpose()
    }

    /// List cached sessions, newest season first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_sessions(&self) -> Result<Vec<CachedSession>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT year, grand_prix, kind, event_name, session_name, lap_count, fetched_at
            FROM sessions ORDER BY year DESC, grand_prix ASC, kind ASC
            ",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (year, grand_prix, kind, event_name, session_name, lap_count, fetched_at) in rows {
            let Ok(kind) = kind.parse::<SessionKind>() else {
                warn!("Skipping cached session with unknown kind {}", kind);
                continue;
            };
            let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
                .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc));
            out.push(CachedSession {
                id: SessionId::new(year, grand_prix, kind),
                event_name,
                session_name,
                lap_count: usize::try_from(lap_count).unwrap_or(0),
                fetched_at,
            });
        }
        Ok(out)
    }

    /// Delete one cached session.
    ///
    /// Returns `true` if a session was deleted, `false` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_session(&self, id: &SessionId) -> Result<bool> {
        let affected = self.conn.execute(
            "DELETE FROM sessions WHERE year = ?1 AND grand_prix = ?2 AND kind = ?3",
            params![id.year, id.grand_prix_key(), id.kind.code()],
        )?;
        Ok(affected > 0)
    }

    /// Delete all cached sessions.
    ///
    /// Returns the number of sessions deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_sessions(&self) -> Result<usize> {
        let affected = self.conn.execute("DELETE FROM sessions", [])?;
        if affected > 0 {
            info!("Cleared {} cached sessions", affected);
        }
        Ok(affected)
    }

    // === Knowledge base ===

    /// Fingerprint of the currently stored knowledge base, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn kb_fingerprint(&self) -> Result<Option<String>> {
        self.get_meta(KB_FINGERPRINT_KEY)
    }

    /// Replace all knowledge base chunks and record their fingerprint.
    ///
    /// Runs in one transaction: readers see either the old or the new set.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn replace_kb_chunks(&self, fingerprint: &str, chunks: &[StoredChunk]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM kb_chunks", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO kb_chunks (source, chunk_index, content, embedding) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for chunk in chunks {
                stmt.execute(params![
                    chunk.source,
                    i64::try_from(chunk.chunk_index).unwrap_or(i64::MAX),
                    chunk.content,
                    encode_embedding(&chunk.embedding),
                ])?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![KB_FINGERPRINT_KEY, fingerprint],
        )?;
        tx.commit()?;
        info!("Stored {} knowledge base chunks", chunks.len());
        Ok(())
    }

    /// Load all knowledge base chunks ordered by source and position.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or an embedding
    /// blob is corrupt.
    pub fn load_kb_chunks(&self) -> Result<Vec<StoredChunk>> {
        let mut stmt = self.conn.prepare(
            "SELECT source, chunk_index, content, embedding FROM kb_chunks ORDER BY source, chunk_index",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(source, index, content, blob)| {
                Ok(StoredChunk {
                    embedding: decode_embedding(&blob)?,
                    source,
                    chunk_index: usize::try_from(index).unwrap_or(0),
                    content,
                })
            })
            .collect()
    }

    /// Delete all knowledge base chunks and the fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_kb(&self) -> Result<usize> {
        let affected = self.conn.execute("DELETE FROM kb_chunks", [])?;
        self.conn
            .execute("DELETE FROM metadata WHERE key = ?1", [KB_FINGERPRINT_KEY])?;
        Ok(affected)
    }

    // === Metadata ===

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let sessions: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        let laps: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(lap_count), 0) FROM sessions",
            [],
            |row| row.get(0),
        )?;
        let kb_chunks: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM kb_chunks", [], |row| row.get(0))?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            sessions,
            laps,
            kb_chunks,
            db_size_bytes,
        })
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of cached sessions.
    pub sessions: i64,
    /// Laps across all cached sessions.
    pub laps: i64,
    /// Number of knowledge base chunks.
    pub kb_chunks: i64,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(Error::knowledge_base(format!(
            "corrupt embedding blob of {} bytes",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::fixtures::{lap, session};
    use crate::telemetry::Compound;

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    fn chunk(source: &str, index: usize, content: &str, embedding: Vec<f32>) -> StoredChunk {
        StoredChunk {
            source: source.to_string(),
            chunk_index: index,
            content: content.to_string(),
            embedding,
        }
    }

    #[test]
    fn test_open_in_memory() {
        assert!(Storage::open_in_memory().is_ok());
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.sqlite");
        let storage = Storage::open(&path).unwrap();
        assert_eq!(storage.path(), path.as_path());
        assert!(path.exists());
        assert!(storage.stats().unwrap().db_size_bytes > 0);
    }

    #[test]
    fn test_put_and_get_session() {
        let storage = create_test_storage();
        let s = session(vec![
            lap("VER", 1, Some(95.0), Some(1), Some(Compound::Soft)),
            lap("VER", 2, Some(94.5), Some(1), Some(Compound::Soft)),
        ]);
        storage.put_session(&s).unwrap();

        let lookup = SessionId::new(2024, " BAHRAIN", s.id.kind);
        let cached = storage.get_session(&lookup).unwrap().unwrap();
        assert_eq!(cached.laps, s.laps);
        assert_eq!(cached.event_name, s.event_name);
        assert_eq!(cached.id, lookup);
    }

    #[test]
    fn test_get_missing_session() {
        let storage = create_test_storage();
        let id = SessionId::new(2019, "Monaco", SessionKind::Q);
        assert!(storage.get_session(&id).unwrap().is_none());
    }

    #[test]
    fn test_put_session_replaces_existing() {
        let storage = create_test_storage();
        let mut s = session(vec![lap("VER", 1, Some(95.0), None, None)]);
        storage.put_session(&s).unwrap();

        s.laps.push(lap("VER", 2, Some(94.0), None, None));
        storage.put_session(&s).unwrap();

        let listed = storage.list_sessions().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].lap_count, 2);
        assert_eq!(storage.get_session(&s.id).unwrap().unwrap().laps.len(), 2);
    }

    #[test]
    fn test_list_sessions_ordering() {
        let storage = create_test_storage();
        let mut a = session(vec![]);
        a.id = SessionId::new(2023, "Monaco", SessionKind::Q);
        let mut b = session(vec![]);
        b.id = SessionId::new(2024, "Bahrain", SessionKind::R);
        storage.put_session(&a).unwrap();
        storage.put_session(&b).unwrap();

        let listed = storage.list_sessions().unwrap();
        assert_eq!(listed[0].id.year, 2024);
        assert_eq!(listed[1].id.grand_prix, "monaco");
    }

    #[test]
    fn test_delete_and_clear_sessions() {
        let storage = create_test_storage();
        let s = session(vec![]);
        storage.put_session(&s).unwrap();

        assert!(storage.delete_session(&s.id).unwrap());
        assert!(!storage.delete_session(&s.id).unwrap());

        storage.put_session(&s).unwrap();
        assert_eq!(storage.clear_sessions().unwrap(), 1);
        assert_eq!(storage.stats().unwrap().sessions, 0);
    }

    #[test]
    fn test_replace_and_load_kb_chunks() {
        let storage = create_test_storage();
        assert!(storage.kb_fingerprint().unwrap().is_none());

        let chunks = vec![
            chunk("b.md", 0, "undercut basics", vec![0.5, -1.0]),
            chunk("a.md", 1, "second", vec![1.0, 0.0]),
            chunk("a.md", 0, "first", vec![0.0, 1.0]),
        ];
        storage.replace_kb_chunks("hash-1", &chunks).unwrap();

        let loaded = storage.load_kb_chunks().unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].content, "first");
        assert_eq!(loaded[1].content, "second");
        assert_eq!(loaded[2].embedding, vec![0.5, -1.0]);
        assert_eq!(storage.kb_fingerprint().unwrap().as_deref(), Some("hash-1"));

        storage
            .replace_kb_chunks("hash-2", &[chunk("c.md", 0, "only", vec![1.0])])
            .unwrap();
        assert_eq!(storage.load_kb_chunks().unwrap().len(), 1);
        assert_eq!(storage.kb_fingerprint().unwrap().as_deref(), Some("hash-2"));
    }

    #[test]
    fn test_clear_kb() {
        let storage = create_test_storage();
        storage
            .replace_kb_chunks("h", &[chunk("a.md", 0, "x", vec![1.0])])
            .unwrap();
        assert_eq!(storage.clear_kb().unwrap(), 1);
        assert!(storage.kb_fingerprint().unwrap().is_none());
    }

    #[test]
    fn test_stats() {
        let storage = create_test_storage();
        storage
            .put_session(&session(vec![
                lap("VER", 1, Some(95.0), None, None),
                lap("LEC", 1, Some(95.2), None, None),
            ]))
            .unwrap();
        storage
            .replace_kb_chunks("h", &[chunk("a.md", 0, "x", vec![1.0])])
            .unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.laps, 2);
        assert_eq!(stats.kb_chunks, 1);
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_embedding_encoding() {
        let v = vec![1.5_f32, -0.25, 0.0];
        assert_eq!(decode_embedding(&encode_embedding(&v)).unwrap(), v);
        assert!(decode_embedding(&[1, 2, 3]).is_err());
    }
}
