//! # Hypertables
//!
//! TimescaleDB hypertable administration and time-bucket queries over a
//! caller-supplied database session.
//!
//! ## Features
//!
//! - **Hypertables**: convert model tables into hypertables with validated
//!   time columns and chunk widths
//! - **Compression**: enable columnar compression and attach compression policies
//! - **Retention**: add, drop, list and synchronize retention policies
//! - **Queries**: per-bucket aggregates, optionally gap-filled with null,
//!   last-observation-carried-forward or linear interpolation
//!
//! ## Modules
//!
//! - [`model`]: static model metadata and the model registry
//! - [`interval`]: interval normalization
//! - [`validators`]: metadata checks run before any statement is issued
//! - [`hypertable`], [`compression`], [`retention`]: lifecycle managers
//! - [`query`]: time-bucket query builder
//! - [`session`]: the session abstraction and its sqlx implementation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hypertables::model::{ColumnType, ModelDescriptor, ModelRegistry};
//! use hypertables::session::{connect, PgSession};
//! use hypertables::{setup_all, time_bucket_query, BucketOptions, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let mut session = PgSession::new(connect(&config.database).await?);
//!
//!     let metrics = ModelDescriptor::new("metrics")
//!         .column("time", ColumnType::TimestampTz)
//!         .column("value", ColumnType::Double)
//!         .chunk_time_interval("1 day")
//!         .retention("90 days");
//!
//!     let registry = ModelRegistry::new().with(metrics.clone());
//!     setup_all(&mut session, &registry).await?;
//!
//!     let rows = time_bucket_query(
//!         &mut session,
//!         &metrics,
//!         "1 hour",
//!         "time",
//!         "value",
//!         &BucketOptions::new(),
//!     )
//!     .await?;
//!     println!("{} buckets", rows.len());
//!
//!     Ok(())
//! }
//! ```

pub mod compression;
pub mod config;
pub mod error;
pub mod hypertable;
pub mod interval;
pub mod model;
pub mod query;
pub mod retention;
pub mod session;
pub mod setup;
pub mod validators;

// Re-export top-level types for convenience
pub use error::{Error, Result};

pub use interval::{normalize, BucketWidth, IntervalInput, IntervalSpec};

pub use model::{
    ColumnType, CompressionSettings, ModelDescriptor, ModelRegistry, OrderByColumn,
    OrderDirection,
};

pub use hypertable::{
    create_all_hypertables, create_hypertable, create_hypertable_for_table, is_hypertable,
    list_hypertables, show_chunks, ChunkFilter, HypertableInfo, HypertableOptions,
};

pub use compression::{
    add_compression_policy, add_table_compression_policy, enable_compression,
    enable_compression_for_all, enable_table_compression, sync_compression_policies,
    CompressionTrigger,
};

pub use retention::{
    add_retention_policy, drop_retention_policy, list_retention_policies,
    sync_retention_policies,
};

pub use query::{
    time_bucket_gapfill_query, time_bucket_query, AggregationFunc, BucketOptions, BucketRow,
    FillPolicy, GapfillOptions, Operator, QueryFilter,
};

pub use session::{PgSession, Session, SqlValue, Statement};

pub use setup::{activate_extension, setup_all, SetupReport};

pub use config::{Config, ConfigError, DatabaseConfig, DefaultsConfig, LoggingConfig};
