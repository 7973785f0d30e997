//! Error types
//!
//! Every validation failure is raised before a statement reaches the session.
//! Errors coming back from the database are carried through untouched in
//! [`Error::Database`].

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while managing hypertables or building queries
#[derive(Error, Debug)]
pub enum Error {
    /// Referenced time column is absent from the model
    #[error("Model {table} does not have a valid time column: '{column}' not found")]
    InvalidTimeColumn { table: String, column: String },

    /// Time column exists but is not a temporal type
    #[error(
        "Model {table} has an invalid data type for the time column '{column}': {found} (expected timestamp, timestamptz or date)"
    )]
    InvalidTimeColumnType {
        table: String,
        column: String,
        found: String,
    },

    /// Chunk interval on a model could not be reduced to a valid interval
    #[error("Invalid chunk time interval for {table}: {reason}")]
    InvalidChunkTimeInterval { table: String, reason: String },

    /// Raw interval value is not a positive duration or `<n> <unit>` text
    #[error("Invalid interval '{raw}': {reason}")]
    InvalidInterval { raw: String, reason: String },

    /// Segment-by column missing or of an unsupported type
    #[error("Invalid segmentby field '{field}' in model {table}: {reason}")]
    InvalidSegmentByField {
        table: String,
        field: String,
        reason: String,
    },

    /// Order-by column missing or of an unorderable type
    #[error("Invalid orderby field '{field}' in model {table}: {reason}")]
    InvalidOrderByField {
        table: String,
        field: String,
        reason: String,
    },

    /// A column appears in both compress_orderby and compress_segmentby
    #[error("Column(s) {columns:?} of {table} cannot be both segmentby and orderby")]
    OverlappingCompressionColumns { table: String, columns: Vec<String> },

    /// Mutually exclusive selectors given together (or neither), or a
    /// required derived value is missing
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Query builder field is not a column of the model
    #[error("Field '{field}' not found in model {table}")]
    FieldNotFound { table: String, field: String },

    /// Gapfill range where finish is not after start
    #[error("Invalid time range: finish ({finish}) must be after start ({start})")]
    Range {
        start: DateTime<Utc>,
        finish: DateTime<Utc>,
    },

    /// Compression policy requested on a table without compression enabled
    #[error("Compression is not enabled on {0}")]
    CompressionNotEnabled(String),

    /// Caller-supplied identifier failed the identifier grammar
    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    /// Error reported by the database engine
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// True for errors raised by local validation, before any I/O
    pub fn is_validation(&self) -> bool {
        !matches!(self, Error::Database(_))
    }
}

/// Result type alias for hypertable operations
pub type Result<T> = std::result::Result<T, Error>;
