//! PostgreSQL session backed by sqlx
//!
//! A transaction is opened lazily on the first statement and stays open until
//! `commit` or `rollback`, so several administrative statements can share one
//! transaction when the caller defers the commit.

use super::{Row, Session, SqlValue, Statement};
use crate::config::DatabaseConfig;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, Postgres, Row as _, Transaction, TypeInfo};
use std::time::Duration;

/// Build a connection pool from configuration
///
/// Every pooled connection gets the configured `statement_timeout`, which
/// bounds how long any administrative statement may block.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let timeout_ms = config.statement_timeout_secs * 1000;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                if timeout_ms > 0 {
                    conn.execute(format!("SET statement_timeout = {}", timeout_ms).as_str())
                        .await?;
                }
                Ok(())
            })
        })
        .connect(&config.url)
        .await?;

    tracing::info!(
        "Connected to database (max_connections={})",
        config.max_connections
    );
    Ok(pool)
}

/// Session over a pooled PostgreSQL connection
pub struct PgSession {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSession {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, tx: None }
    }

    /// Whether a transaction is currently open
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    async fn transaction(&mut self) -> Result<&mut Transaction<'static, Postgres>, sqlx::Error> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => self.pool.begin().await?,
        };
        Ok(self.tx.insert(tx))
    }
}

#[async_trait]
impl Session for PgSession {
    async fn execute(&mut self, statement: &Statement) -> Result<u64, sqlx::Error> {
        tracing::debug!("execute: {}", statement);
        let tx = self.transaction().await?;
        let result = bind_all(sqlx::query(statement.sql()), statement.params())
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<Row>, sqlx::Error> {
        tracing::debug!("fetch: {}", statement);
        let tx = self.transaction().await?;
        let rows = bind_all(sqlx::query(statement.sql()), statement.params())
            .fetch_all(&mut **tx)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
            SqlValue::Timestamp(v) => query.bind(*v),
            SqlValue::TextArray(v) => query.bind(v.clone()),
        };
    }
    query
}

/// Convert a driver row into an ordered [`Row`]
fn decode_row(row: &PgRow) -> Result<Row, sqlx::Error> {
    let mut out = Row::new();

    for (i, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name().to_string();
        let value: SqlValue = match type_name.as_str() {
            "BOOL" => row.try_get::<Option<bool>, _>(i)?.into(),
            "INT2" => row.try_get::<Option<i16>, _>(i)?.map(i64::from).into(),
            "INT4" => row.try_get::<Option<i32>, _>(i)?.map(i64::from).into(),
            "INT8" => row.try_get::<Option<i64>, _>(i)?.into(),
            "FLOAT4" => row.try_get::<Option<f32>, _>(i)?.map(f64::from).into(),
            "FLOAT8" => row.try_get::<Option<f64>, _>(i)?.into(),
            "TEXT" | "VARCHAR" | "NAME" | "BPCHAR" => row.try_get::<Option<String>, _>(i)?.into(),
            "TIMESTAMPTZ" => row.try_get::<Option<DateTime<Utc>>, _>(i)?.into(),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(i)?
                .map(|ts| ts.and_utc())
                .into(),
            "DATE" => row
                .try_get::<Option<NaiveDate>, _>(i)?
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|ts| ts.and_utc())
                .into(),
            "TEXT[]" | "VARCHAR[]" => row.try_get::<Option<Vec<String>>, _>(i)?.into(),
            other => {
                return Err(sqlx::Error::ColumnDecode {
                    index: column.name().to_string(),
                    source: format!("unsupported column type {}", other).into(),
                })
            }
        };
        out.push(column.name(), value);
    }

    Ok(out)
}
