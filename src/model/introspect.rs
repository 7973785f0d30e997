//! Build a descriptor for an existing table from `information_schema`

use super::{ColumnType, ModelDescriptor};
use crate::error::{Error, Result};
use crate::session::{Session, StatementBuilder, TableRef};

/// Read the column metadata of `table` into a [`ModelDescriptor`]
///
/// The descriptor gets the default time column and chunk interval and no
/// compression settings; callers override what they need.
pub async fn introspect_table<S: Session + ?Sized>(
    session: &mut S,
    table: &TableRef,
) -> Result<ModelDescriptor> {
    let mut builder = StatementBuilder::new();
    builder
        .push(
            "SELECT column_name::text AS column_name, data_type::text AS data_type, \
             udt_name::text AS udt_name \
             FROM information_schema.columns WHERE table_schema = ",
        )
        .push_bind(table.schema_or_public())
        .push(" AND table_name = ")
        .push_bind(table.name.as_str())
        .push(" ORDER BY ordinal_position");

    let rows = session.fetch_all(&builder.build()).await?;
    if rows.is_empty() {
        return Err(Error::Configuration(format!("table {} does not exist", table)));
    }

    let mut model = ModelDescriptor::new(table.name.clone());
    model.schema = table.schema.clone();
    for row in rows {
        let name = row.try_text("column_name")?;
        let data_type = row.try_text("data_type")?;
        let udt_name = row.try_text("udt_name")?;
        model = model.column(name, ColumnType::from_sql_name(&data_type, &udt_name));
    }

    tracing::debug!("Introspected {} ({} columns)", table, model.columns.len());
    Ok(model)
}
