//! Error types for race-engineer.
//!
//! This module defines all error types used throughout the crate, providing
//! detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for race-engineer operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Session Data Errors ===
    /// No session matched the requested year, grand prix and kind.
    #[error("no {kind} session found for {grand_prix} {year}")]
    SessionNotFound {
        /// Season year.
        year: i32,
        /// Grand prix name as requested.
        grand_prix: String,
        /// Session kind code.
        kind: String,
    },

    /// The caller supplied input that cannot be used.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A data source returned something unusable.
    #[error("data source '{source_name}' failed: {message}")]
    DataSource {
        /// Name of the data source.
        source_name: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    // === HTTP Errors ===
    /// The HTTP transport failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A server answered with a non-success status.
    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Status code.
        status: u16,
        /// Response body (possibly truncated).
        body: String,
    },

    // === LLM Errors ===
    /// The language model returned an unusable response.
    #[error("LLM response error: {0}")]
    LlmResponse(String),

    /// The language model is disabled by configuration.
    #[error("LLM is disabled")]
    LlmDisabled,

    // === Knowledge Base Errors ===
    /// Building or querying the knowledge base failed.
    #[error("knowledge base error: {0}")]
    KnowledgeBase(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV parsing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// A specialized Result type for race-engineer operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new invalid input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a new data source error.
    #[must_use]
    pub fn data_source(source_name: &'static str, message: impl Into<String>) -> Self {
        Self::DataSource {
            source_name,
            message: message.into(),
        }
    }

    /// Create a new LLM response error.
    #[must_use]
    pub fn llm_response(message: impl Into<String>) -> Self {
        Self::LlmResponse(message.into())
    }

    /// Create a new knowledge base error.
    #[must_use]
    pub fn knowledge_base(message: impl Into<String>) -> Self {
        Self::KnowledgeBase(message.into())
    }

    /// Check if this error means the requested session does not exist.
    #[must_use]
    pub fn is_session_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound { .. })
    }

    /// Check if this error is worth retrying (transport failures, 429 and 5xx).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
