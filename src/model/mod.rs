//! Model Metadata
//!
//! A [`ModelDescriptor`] is the static description of one time-series table:
//! its columns and types, the time column, the chunk width and the optional
//! compression and retention settings. Descriptors are built once when the
//! application defines its models and are only ever borrowed afterwards.
//!
//! # Example
//!
//! ```rust
//! use hypertables::model::{ColumnType, ModelDescriptor, OrderDirection};
//!
//! let views = ModelDescriptor::new("page_views")
//!     .column("time", ColumnType::TimestampTz)
//!     .column("path", ColumnType::Text)
//!     .column("duration", ColumnType::Integer)
//!     .chunk_time_interval("30 days")
//!     .compress_segmentby("path")
//!     .compress_orderby("time", OrderDirection::Desc)
//!     .compress_after("7 days")
//!     .retention("1 year");
//!
//! assert!(views.compression.enabled);
//! ```

mod introspect;
mod registry;

pub use introspect::introspect_table;
pub use registry::ModelRegistry;

use crate::interval::IntervalInput;
use crate::session::TableRef;
use std::fmt;

/// Default time column name
pub const DEFAULT_TIME_COLUMN: &str = "time";

/// Default chunk width for new hypertables
pub const DEFAULT_CHUNK_TIME_INTERVAL: &str = "INTERVAL 7 days";

/// SQL type tag of a column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    TimestampTz,
    Timestamp,
    Date,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Numeric,
    Text,
    Boolean,
    /// Enumerated type, by type name
    Enum(String),
    Json,
    Array,
    /// Opaque binary payload
    Blob,
    /// Anything else, by SQL type name
    Other(String),
}

impl ColumnType {
    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::TimestampTz | Self::Timestamp | Self::Date)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::SmallInt | Self::Integer | Self::BigInt)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, Self::Real | Self::Double | Self::Numeric)
    }

    /// Types a compression segment-by column may have
    pub fn is_segmentable(&self) -> bool {
        self.is_numeric()
            || self.is_temporal()
            || matches!(self, Self::Text | Self::Boolean | Self::Enum(_))
    }

    /// Types a compression order-by column may have
    pub fn is_orderable(&self) -> bool {
        !matches!(self, Self::Json | Self::Array | Self::Blob)
    }

    /// Map an `information_schema.columns.data_type` value
    pub fn from_sql_name(data_type: &str, udt_name: &str) -> Self {
        match data_type.to_lowercase().as_str() {
            "timestamp with time zone" => Self::TimestampTz,
            "timestamp without time zone" => Self::Timestamp,
            "date" => Self::Date,
            "smallint" => Self::SmallInt,
            "integer" => Self::Integer,
            "bigint" => Self::BigInt,
            "real" => Self::Real,
            "double precision" => Self::Double,
            "numeric" => Self::Numeric,
            "text" | "character varying" | "character" | "citext" => Self::Text,
            "boolean" => Self::Boolean,
            "json" | "jsonb" => Self::Json,
            "array" => Self::Array,
            "bytea" => Self::Blob,
            "user-defined" => Self::Enum(udt_name.to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimestampTz => write!(f, "timestamptz"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Date => write!(f, "date"),
            Self::SmallInt => write!(f, "smallint"),
            Self::Integer => write!(f, "integer"),
            Self::BigInt => write!(f, "bigint"),
            Self::Real => write!(f, "real"),
            Self::Double => write!(f, "double precision"),
            Self::Numeric => write!(f, "numeric"),
            Self::Text => write!(f, "text"),
            Self::Boolean => write!(f, "boolean"),
            Self::Enum(name) => write!(f, "enum {}", name),
            Self::Json => write!(f, "json"),
            Self::Array => write!(f, "array"),
            Self::Blob => write!(f, "bytea"),
            Self::Other(name) => write!(f, "{}", name),
        }
    }
}

/// One column of a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

/// Sort direction of a compression order-by column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "ASC"),
            Self::Desc => write!(f, "DESC"),
        }
    }
}

/// Compression order-by entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByColumn {
    pub column: String,
    pub direction: OrderDirection,
}

impl OrderByColumn {
    pub fn new(column: impl Into<String>, direction: OrderDirection) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }
}

/// Declared compression settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompressionSettings {
    pub enabled: bool,
    pub order_by: Vec<OrderByColumn>,
    pub segment_by: Vec<String>,
    /// Age after which chunks are compressed
    pub compress_after: Option<IntervalInput>,
    /// Target width of compressed chunks
    pub chunk_time_interval: Option<IntervalInput>,
    /// Age after which chunks are dropped
    pub drop_after: Option<IntervalInput>,
}

/// Static description of a hypertable-backed model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub schema: Option<String>,
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
    pub time_column: String,
    pub chunk_time_interval: Option<IntervalInput>,
    pub compression: CompressionSettings,
    /// Retention age; falls back to `compression.drop_after`
    pub retention: Option<IntervalInput>,
    /// Whether bulk operations treat this model as a hypertable
    pub hypertable: bool,
}

impl ModelDescriptor {
    /// New descriptor with default time column and chunk interval
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            schema: None,
            table_name: table_name.into(),
            columns: Vec::new(),
            time_column: DEFAULT_TIME_COLUMN.to_string(),
            chunk_time_interval: Some(IntervalInput::Text(DEFAULT_CHUNK_TIME_INTERVAL.to_string())),
            compression: CompressionSettings::default(),
            retention: None,
            hypertable: true,
        }
    }

    /// Builder method: set the schema
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Builder method: add a column
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            column_type,
        });
        self
    }

    /// Builder method: set the time column
    pub fn time_column(mut self, name: impl Into<String>) -> Self {
        self.time_column = name.into();
        self
    }

    /// Builder method: set the chunk width
    pub fn chunk_time_interval(mut self, interval: impl Into<IntervalInput>) -> Self {
        self.chunk_time_interval = Some(interval.into());
        self
    }

    /// Builder method: add a segment-by column (enables compression)
    pub fn compress_segmentby(mut self, column: impl Into<String>) -> Self {
        self.compression.enabled = true;
        self.compression.segment_by.push(column.into());
        self
    }

    /// Builder method: add an order-by column (enables compression)
    pub fn compress_orderby(mut self, column: impl Into<String>, direction: OrderDirection) -> Self {
        self.compression.enabled = true;
        self.compression
            .order_by
            .push(OrderByColumn::new(column, direction));
        self
    }

    /// Builder method: set the compression age (enables compression)
    pub fn compress_after(mut self, age: impl Into<IntervalInput>) -> Self {
        self.compression.enabled = true;
        self.compression.compress_after = Some(age.into());
        self
    }

    /// Builder method: set the compressed chunk width
    pub fn compress_chunk_time_interval(mut self, interval: impl Into<IntervalInput>) -> Self {
        self.compression.chunk_time_interval = Some(interval.into());
        self
    }

    /// Builder method: set the drop age declared with compression
    pub fn drop_after(mut self, age: impl Into<IntervalInput>) -> Self {
        self.compression.drop_after = Some(age.into());
        self
    }

    /// Builder method: enable or disable compression explicitly
    pub fn compression_enabled(mut self, enabled: bool) -> Self {
        self.compression.enabled = enabled;
        self
    }

    /// Builder method: set the retention age
    pub fn retention(mut self, age: impl Into<IntervalInput>) -> Self {
        self.retention = Some(age.into());
        self
    }

    /// Builder method: exclude from bulk hypertable operations
    pub fn plain_table(mut self) -> Self {
        self.hypertable = false;
        self
    }

    /// Look up a column by name
    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::new(self.schema.as_deref(), &self.table_name)
    }

    /// Retention age: explicit setting first, then the compression drop age
    pub fn default_retention(&self) -> Option<&IntervalInput> {
        self.retention
            .as_ref()
            .or(self.compression.drop_after.as_ref())
    }
}
