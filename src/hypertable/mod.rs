//! Hypertable Manager
//!
//! Converts plain tables into hypertables and reads the hypertable catalog:
//!
//! - **create**: `create_hypertable` from a model, or from a raw table name
//! - **list**: `list_hypertables`, `is_hypertable`
//! - **chunks**: `show_chunks` with age and creation-time filters
//!
//! # Statement shape
//!
//! ```text
//! SELECT create_hypertable($1::regclass,
//!        by_range($2::name, $3::bigint | $3::interval),
//!        if_not_exists => $4, migrate_data => $5)
//! ```
//!
//! The relation is bound as text and resolved by the `regclass` cast; the
//! chunk width is passed as integer microseconds for duration intervals and
//! as an `interval` for textual ones.

mod chunks;
mod create;
mod list;

pub use chunks::{show_chunks, ChunkFilter};
pub use create::{
    create_all_hypertables, create_hypertable, create_hypertable_for_table, HypertableOptions,
};
pub use list::{is_hypertable, list_hypertables, HypertableInfo};
