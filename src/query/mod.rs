//! Time-Bucket Query Builder
//!
//! Aggregates one metric column of a model into fixed-width time buckets:
//!
//! - **ast**: aggregates, filters and the [`BucketRow`] result
//! - **bucket**: `time_bucket_query` (sparse) and `time_bucket_gapfill_query` (dense)
//! - **gapfill**: bucket enumeration and the null/LOCF/interpolate fill policies
//!
//! # Examples
//!
//! ```rust,ignore
//! use hypertables::query::{time_bucket_gapfill_query, GapfillOptions, QueryFilter};
//!
//! // Daily averages, only days with data
//! let rows = time_bucket_query(&mut session, &metrics, "1 day", "time", "value",
//!     &BucketOptions::new()).await?;
//!
//! // Hourly, one row per hour, gaps carried forward
//! let options = GapfillOptions::new(start, finish)
//!     .filter(QueryFilter::eq("sensor_id", 1))
//!     .locf();
//! let rows = time_bucket_gapfill_query(&mut session, &metrics, "1 hour", "time", "value",
//!     &options).await?;
//! ```

mod ast;
mod bucket;
mod gapfill;

pub use ast::{AggregationFunc, BucketRow, Operator, QueryFilter};
pub use bucket::{
    time_bucket_gapfill_query, time_bucket_query, BucketOptions, GapfillOptions,
    DEFAULT_DECIMAL_PLACES,
};
pub use gapfill::{align, bucket_starts, densify, FillPolicy, MAX_GAPFILL_BUCKETS};
