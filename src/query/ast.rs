//! Query building blocks
//!
//! Aggregates, comparison filters and the result row shared by the bucket
//! and gapfill queries.

use crate::error::{Error, Result};
use crate::model::ModelDescriptor;
use crate::session::{quote_ident, SqlValue, StatementBuilder};
use crate::validators::validate_field;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Aggregation functions available per bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationFunc {
    /// Average of values
    #[default]
    Avg,
    /// Sum of values
    Sum,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Count of non-null values
    Count,
    /// Value at the latest time in the bucket
    Last,
    /// Value at the earliest time in the bucket
    First,
}

impl AggregationFunc {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "avg" | "average" => Some(Self::Avg),
            "sum" => Some(Self::Sum),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "count" => Some(Self::Count),
            "last" => Some(Self::Last),
            "first" => Some(Self::First),
            _ => None,
        }
    }

    /// Key of the aggregate in result rows
    pub fn name(&self) -> &'static str {
        match self {
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::Last => "last",
            Self::First => "first",
        }
    }

    /// SQL expression over quoted `metric` and `time` columns
    pub(crate) fn sql(&self, metric: &str, time: &str) -> String {
        match self {
            Self::First | Self::Last => format!("{}({}, {})", self.name(), metric, time),
            _ => format!("{}({})", self.name(), metric),
        }
    }
}

impl std::fmt::Display for AggregationFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Avg => write!(f, "AVG"),
            Self::Sum => write!(f, "SUM"),
            Self::Min => write!(f, "MIN"),
            Self::Max => write!(f, "MAX"),
            Self::Count => write!(f, "COUNT"),
            Self::Last => write!(f, "LAST"),
            Self::First => write!(f, "FIRST"),
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Greater than or equal to
    Gte,
    /// Less than
    Lt,
    /// Less than or equal to
    Lte,
}

impl Operator {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "=" | "==" => Some(Self::Eq),
            "!=" | "<>" => Some(Self::Ne),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Gte),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Lte),
            _ => None,
        }
    }

    fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

/// A `column <op> value` predicate ANDed into the query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFilter {
    pub column: String,
    pub op: Operator,
    pub value: SqlValue,
}

impl QueryFilter {
    pub fn new(column: impl Into<String>, op: Operator, value: impl Into<SqlValue>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Equality filter
    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(column, Operator::Eq, value)
    }

    /// Parse `column<op>value`, e.g. `sensor_id=1` or `path!=/home`
    ///
    /// Integer and float literals are bound as numbers, anything else as
    /// text.
    pub fn parse(raw: &str) -> Option<Self> {
        const OPERATORS: [&str; 7] = ["!=", "<>", ">=", "<=", "=", ">", "<"];
        let (idx, op) = OPERATORS
            .iter()
            .filter_map(|op| raw.find(op).map(|idx| (idx, *op)))
            .min_by_key(|(idx, op)| (*idx, std::cmp::Reverse(op.len())))?;

        let column = raw[..idx].trim();
        let literal = raw[idx + op.len()..].trim();
        if column.is_empty() {
            return None;
        }

        let value = if let Ok(i) = literal.parse::<i64>() {
            SqlValue::Int(i)
        } else if let Ok(f) = literal.parse::<f64>() {
            SqlValue::Float(f)
        } else {
            SqlValue::Text(literal.to_string())
        };
        Some(Self::new(column, Operator::from_str(op)?, value))
    }

    /// Check the column and append the predicate, binding its value
    pub(crate) fn push_sql(&self, model: &ModelDescriptor, builder: &mut StatementBuilder) -> Result<()> {
        validate_field(model, &self.column)?;
        let column = quote_ident(&self.column);

        if self.value.is_null() {
            let test = match self.op {
                Operator::Eq => "IS NULL",
                Operator::Ne => "IS NOT NULL",
                other => {
                    return Err(Error::Configuration(format!(
                        "operator {} cannot compare {} with NULL",
                        other, self.column
                    )))
                }
            };
            builder.push(&format!("{} {}", column, test));
            return Ok(());
        }

        builder
            .push(&format!("{} {} ", column, self.op.as_sql()))
            .push_bind(self.value.clone());
        Ok(())
    }
}

/// One output row of a bucket query
///
/// Serializes as a map with `bucket`, the grouping columns and the
/// aggregate under its name, e.g. `{"bucket": ..., "avg": 23.0}`.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketRow {
    pub bucket: DateTime<Utc>,
    pub aggregate: AggregationFunc,
    pub value: Option<f64>,
    /// Grouping columns in group-by order
    pub groups: Vec<(String, SqlValue)>,
}

impl BucketRow {
    pub fn new(bucket: DateTime<Utc>, aggregate: AggregationFunc, value: Option<f64>) -> Self {
        Self {
            bucket,
            aggregate,
            value,
            groups: Vec::new(),
        }
    }

    /// Value of a grouping column
    pub fn group(&self, column: &str) -> Option<&SqlValue> {
        self.groups
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }
}

impl Serialize for BucketRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.groups.len() + 2))?;
        map.serialize_entry(
            "bucket",
            &self.bucket.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        )?;
        for (name, value) in &self.groups {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry(self.aggregate.name(), &self.value)?;
        map.end()
    }
}
