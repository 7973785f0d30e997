//! Database Session Abstraction
//!
//! The hypertable managers only need three things from the surrounding
//! database layer: run a parameterized statement, fetch rows, and commit.
//!
//! - **statement**: `Statement`, the placeholder builder and identifier quoting
//! - **postgres**: `PgSession`, the sqlx-backed implementation
//!
//! # Example
//!
//! ```rust,no_run
//! use hypertables::session::{connect, PgSession};
//! use hypertables::config::DatabaseConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = connect(&DatabaseConfig::default()).await?;
//!     let mut session = PgSession::new(pool);
//!     let tables = hypertables::list_hypertables(&mut session).await?;
//!     println!("{} hypertables", tables.len());
//!     Ok(())
//! }
//! ```

mod postgres;
#[cfg(test)]
pub(crate) mod recording;
mod statement;

pub use postgres::{connect, PgSession};
pub use statement::{quote_ident, quote_literal, Statement, StatementBuilder, TableRef};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Execution handle supplied by the caller
///
/// Implementations decide how statements map onto transactions; the
/// managers call [`Session::commit`] only when their `commit` flag is set.
/// Anything not committed is rolled back when the session is dropped.
#[async_trait]
pub trait Session: Send {
    /// Execute a statement, returning the number of affected rows
    async fn execute(&mut self, statement: &Statement) -> Result<u64, sqlx::Error>;

    /// Execute a statement and collect all result rows
    async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<Row>, sqlx::Error>;

    /// Commit the work done so far
    async fn commit(&mut self) -> Result<(), sqlx::Error>;

    /// Discard the work done so far
    async fn rollback(&mut self) -> Result<(), sqlx::Error>;
}

/// A value bound to a statement or read back from a row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    TextArray(Vec<String>),
}

impl SqlValue {
    /// Name of the variant, used in decode errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
            Self::TextArray(_) => "text[]",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{}", v),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Self::TextArray(v) => write!(f, "{{{}}}", v.join(",")),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Vec<String>> for SqlValue {
    fn from(v: Vec<String>) -> Self {
        Self::TextArray(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// One result row, columns kept in select order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: append a column
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<SqlValue>) {
        self.columns.push((name.into(), value.into()));
    }

    /// Raw value by column name
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    /// Columns in select order
    pub fn columns(&self) -> &[(String, SqlValue)] {
        &self.columns
    }

    fn require(&self, name: &str) -> Result<&SqlValue, sqlx::Error> {
        self.get(name)
            .ok_or_else(|| sqlx::Error::ColumnNotFound(name.to_string()))
    }

    pub fn try_text(&self, name: &str) -> Result<String, sqlx::Error> {
        match self.require(name)? {
            SqlValue::Text(s) => Ok(s.clone()),
            other => Err(mismatch(name, "text", other)),
        }
    }

    pub fn try_opt_text(&self, name: &str) -> Result<Option<String>, sqlx::Error> {
        match self.require(name)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s.clone())),
            other => Err(mismatch(name, "text", other)),
        }
    }

    pub fn try_i64(&self, name: &str) -> Result<i64, sqlx::Error> {
        match self.require(name)? {
            SqlValue::Int(v) => Ok(*v),
            other => Err(mismatch(name, "int", other)),
        }
    }

    pub fn try_bool(&self, name: &str) -> Result<bool, sqlx::Error> {
        match self.require(name)? {
            SqlValue::Bool(v) => Ok(*v),
            other => Err(mismatch(name, "bool", other)),
        }
    }

    /// Numeric column as f64; NULL becomes `None`
    pub fn try_opt_f64(&self, name: &str) -> Result<Option<f64>, sqlx::Error> {
        match self.require(name)? {
            SqlValue::Null => Ok(None),
            SqlValue::Float(v) => Ok(Some(*v)),
            SqlValue::Int(v) => Ok(Some(*v as f64)),
            other => Err(mismatch(name, "float", other)),
        }
    }

    pub fn try_timestamp(&self, name: &str) -> Result<DateTime<Utc>, sqlx::Error> {
        match self.require(name)? {
            SqlValue::Timestamp(ts) => Ok(*ts),
            other => Err(mismatch(name, "timestamp", other)),
        }
    }

    pub fn try_opt_text_array(&self, name: &str) -> Result<Option<Vec<String>>, sqlx::Error> {
        match self.require(name)? {
            SqlValue::Null => Ok(None),
            SqlValue::TextArray(v) => Ok(Some(v.clone())),
            other => Err(mismatch(name, "text[]", other)),
        }
    }
}

fn mismatch(column: &str, expected: &str, found: &SqlValue) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("expected {}, found {}", expected, found.kind()).into(),
    }
}
