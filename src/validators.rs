//! Metadata Validators
//!
//! Pure checks over a [`ModelDescriptor`]. They run before any statement is
//! built, so a failed check never leaves a partial change behind.

use crate::error::{Error, Result};
use crate::interval::{normalize, IntervalInput, IntervalSpec};
use crate::model::{ColumnDef, ModelDescriptor};

/// Check that `column` exists and has a temporal type
pub fn validate_time_column<'m>(model: &'m ModelDescriptor, column: &str) -> Result<&'m ColumnDef> {
    let def = model
        .get_column(column)
        .ok_or_else(|| Error::InvalidTimeColumn {
            table: model.table_name.clone(),
            column: column.to_string(),
        })?;

    if !def.column_type.is_temporal() {
        return Err(Error::InvalidTimeColumnType {
            table: model.table_name.clone(),
            column: column.to_string(),
            found: def.column_type.to_string(),
        });
    }

    Ok(def)
}

/// Check a chunk interval against the model's time column and normalize it
pub fn validate_chunk_interval(
    model: &ModelDescriptor,
    time_column: &str,
    raw: Option<&IntervalInput>,
) -> Result<IntervalSpec> {
    let def = model
        .get_column(time_column)
        .ok_or_else(|| Error::InvalidTimeColumn {
            table: model.table_name.clone(),
            column: time_column.to_string(),
        })?;

    let invalid = |reason: String| Error::InvalidChunkTimeInterval {
        table: model.table_name.clone(),
        reason,
    };

    if !def.column_type.is_temporal() {
        return Err(invalid(format!(
            "Unsupported time column type {} for '{}'",
            def.column_type, time_column
        )));
    }

    let raw = raw.ok_or_else(|| invalid("chunk time interval is not set".to_string()))?;

    normalize(raw).map_err(|e| match (raw, e) {
        (IntervalInput::Duration(_), Error::InvalidInterval { reason, .. }) => invalid(format!(
            "chunk time interval must be an integer number of microseconds ({})",
            reason
        )),
        (IntervalInput::Text(text), Error::InvalidInterval { reason, .. }) => invalid(format!(
            "chunk time interval must be an INTERVAL '<n> <unit>' expression, got '{}' ({})",
            text, reason
        )),
        (_, Error::InvalidInterval { reason, .. }) => invalid(reason),
        (_, other) => other,
    })
}

/// Check that `column` exists and may be used to segment compressed data
pub fn validate_segment_by<'m>(model: &'m ModelDescriptor, column: &str) -> Result<&'m ColumnDef> {
    let invalid = |reason: String| Error::InvalidSegmentByField {
        table: model.table_name.clone(),
        field: column.to_string(),
        reason,
    };

    let def = model
        .get_column(column)
        .ok_or_else(|| invalid("field not found".to_string()))?;

    if !def.column_type.is_segmentable() {
        return Err(invalid(format!(
            "type {} is not supported; must be text, integer, boolean, date/time, enum, float or numeric",
            def.column_type
        )));
    }

    Ok(def)
}

/// Check that `column` exists and is orderable
pub fn validate_order_by<'m>(model: &'m ModelDescriptor, column: &str) -> Result<&'m ColumnDef> {
    let invalid = |reason: String| Error::InvalidOrderByField {
        table: model.table_name.clone(),
        field: column.to_string(),
        reason,
    };

    let def = model
        .get_column(column)
        .ok_or_else(|| invalid("field not found".to_string()))?;

    if !def.column_type.is_orderable() {
        return Err(invalid(format!(
            "type {} is not supported; json, array and binary columns cannot be ordered",
            def.column_type
        )));
    }

    Ok(def)
}

/// Check that no column is both segment-by and order-by
pub fn validate_no_overlap(
    model: &ModelDescriptor,
    segment_by: &[&str],
    order_by: &[&str],
) -> Result<()> {
    let overlap: Vec<String> = segment_by
        .iter()
        .filter(|c| order_by.contains(c))
        .map(|c| c.to_string())
        .collect();

    if overlap.is_empty() {
        Ok(())
    } else {
        Err(Error::OverlappingCompressionColumns {
            table: model.table_name.clone(),
            columns: overlap,
        })
    }
}

/// Run every compression column check declared on the model
pub fn validate_compression_columns(model: &ModelDescriptor) -> Result<()> {
    let segment_by: Vec<&str> = model
        .compression
        .segment_by
        .iter()
        .map(String::as_str)
        .collect();
    let order_by: Vec<&str> = model
        .compression
        .order_by
        .iter()
        .map(|o| o.column.as_str())
        .collect();

    for column in &segment_by {
        validate_segment_by(model, column)?;
    }
    for column in &order_by {
        validate_order_by(model, column)?;
    }
    validate_no_overlap(model, &segment_by, &order_by)
}

/// Check that a query field is a column of the model
pub fn validate_field<'m>(model: &'m ModelDescriptor, field: &str) -> Result<&'m ColumnDef> {
    model.get_column(field).ok_or_else(|| Error::FieldNotFound {
        table: model.table_name.clone(),
        field: field.to_string(),
    })
}
