use crate::error::Result;
use crate::session::{Row, Session, Statement, StatementBuilder, TableRef};
use serde::Serialize;

const LIST_HYPERTABLES_SQL: &str = "SELECT hypertable_schema::text AS hypertable_schema, \
     hypertable_name::text AS hypertable_name, owner::text AS owner, \
     num_dimensions::bigint AS num_dimensions, num_chunks::bigint AS num_chunks, \
     compression_enabled, tablespaces::text[] AS tablespaces \
     FROM timescaledb_information.hypertables \
     ORDER BY hypertable_schema, hypertable_name";

/// One row of the hypertable catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HypertableInfo {
    pub hypertable_schema: String,
    pub hypertable_name: String,
    pub owner: String,
    pub num_dimensions: i64,
    pub num_chunks: i64,
    pub compression_enabled: bool,
    pub tablespaces: Option<Vec<String>>,
}

impl HypertableInfo {
    fn from_row(row: &Row) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            hypertable_schema: row.try_text("hypertable_schema")?,
            hypertable_name: row.try_text("hypertable_name")?,
            owner: row.try_text("owner")?,
            num_dimensions: row.try_i64("num_dimensions")?,
            num_chunks: row.try_i64("num_chunks")?,
            compression_enabled: row.try_bool("compression_enabled")?,
            tablespaces: row.try_opt_text_array("tablespaces")?,
        })
    }

    /// Reference to the hypertable, schema-qualified
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(Some(&self.hypertable_schema), &self.hypertable_name)
    }
}

/// List every hypertable in the database
pub async fn list_hypertables<S: Session + ?Sized>(session: &mut S) -> Result<Vec<HypertableInfo>> {
    let rows = session
        .fetch_all(&Statement::new(LIST_HYPERTABLES_SQL))
        .await?;

    let infos = rows
        .iter()
        .map(HypertableInfo::from_row)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(infos)
}

/// Whether `table` is registered as a hypertable
pub async fn is_hypertable<S: Session + ?Sized>(session: &mut S, table: &TableRef) -> Result<bool> {
    let mut builder = StatementBuilder::new();
    builder
        .push(
            "SELECT EXISTS (SELECT 1 FROM timescaledb_information.hypertables \
             WHERE hypertable_schema = ",
        )
        .push_bind(table.schema_or_public())
        .push(" AND hypertable_name = ")
        .push_bind(table.name.as_str())
        .push(") AS is_hypertable");

    let rows = session.fetch_all(&builder.build()).await?;
    match rows.first() {
        Some(row) => Ok(row.try_bool("is_hypertable")?),
        None => Ok(false),
    }
}
