//! Compression Manager
//!
//! Two separate steps make a hypertable compress itself:
//!
//! ```text
//! ALTER TABLE "page_views" SET (timescaledb.compress = on,
//!     timescaledb.compress_orderby = '"time" ASC',
//!     timescaledb.compress_segmentby = '"path"')
//!
//! SELECT add_compression_policy($1::regclass, compress_after => $2::interval, ...)
//! ```
//!
//! `ALTER TABLE ... SET` cannot take bind parameters, so its option values
//! are built only from column names that passed validation against the
//! model, quoted as identifiers and then as a literal.

use crate::error::{Error, Result};
use crate::interval::{normalize, IntervalInput, IntervalSpec};
use crate::model::{introspect_table, CompressionSettings, ModelDescriptor};
use crate::session::{quote_ident, quote_literal, Session, Statement, StatementBuilder, TableRef};
use crate::validators::validate_compression_columns;
use std::collections::HashSet;
use tracing::{debug, info};

/// What makes the compression job pick up a chunk
#[derive(Debug, Clone, PartialEq)]
pub enum CompressionTrigger {
    /// Chunk data is older than the age
    After(IntervalInput),
    /// Chunk was created longer ago than the age
    CreatedBefore(IntervalInput),
}

impl CompressionTrigger {
    /// Build a trigger from two mutually exclusive options
    pub fn from_options(
        compress_after: Option<IntervalInput>,
        created_before: Option<IntervalInput>,
    ) -> Result<Self> {
        match (compress_after, created_before) {
            (Some(after), None) => Ok(Self::After(after)),
            (None, Some(before)) => Ok(Self::CreatedBefore(before)),
            (Some(_), Some(_)) => Err(Error::Configuration(
                "compress_after and compress_created_before cannot both be given".to_string(),
            )),
            (None, None) => Err(Error::Configuration(
                "one of compress_after or compress_created_before is required".to_string(),
            )),
        }
    }

    fn argument(&self) -> &'static str {
        match self {
            Self::After(_) => "compress_after",
            Self::CreatedBefore(_) => "compress_created_before",
        }
    }

    fn interval(&self) -> &IntervalInput {
        match self {
            Self::After(age) | Self::CreatedBefore(age) => age,
        }
    }
}

/// Turn on compression for the model's hypertable
///
/// Does nothing when the model does not declare compression. A declared
/// compression needs a `compress_after` age, since that age is what
/// triggers the compression job.
pub async fn enable_compression<S: Session + ?Sized>(
    session: &mut S,
    model: &ModelDescriptor,
    commit: bool,
) -> Result<()> {
    if !model.compression.enabled {
        debug!("Compression not declared for {}, skipping", model.table_name);
        return Ok(());
    }

    let compress_after = model.compression.compress_after.as_ref().ok_or_else(|| {
        Error::Configuration(format!(
            "Missing required compression parameter compress_after for model {}",
            model.table_name
        ))
    })?;
    normalize(compress_after)?;
    validate_compression_columns(model)?;

    let chunk_interval = model
        .compression
        .chunk_time_interval
        .as_ref()
        .map(normalize)
        .transpose()?;

    let statement = alter_statement(model, chunk_interval.as_ref());
    debug!("enable_compression: {}", statement);
    session.execute(&statement).await?;

    if commit {
        session.commit().await?;
    }

    info!("Enabled compression on {}", model.table_ref());
    Ok(())
}

/// Turn on compression for a table named by the caller
///
/// Column metadata comes from the catalog; `settings` is applied as if it
/// had been declared on a model, with compression forced on.
pub async fn enable_table_compression<S: Session + ?Sized>(
    session: &mut S,
    table: &str,
    settings: CompressionSettings,
    commit: bool,
) -> Result<()> {
    let table = TableRef::parse(table)?;
    let mut model = introspect_table(session, &table).await?;
    model.compression = CompressionSettings {
        enabled: true,
        ..settings
    };
    enable_compression(session, &model, commit).await
}

/// Attach a compression policy using the model's `compress_after` age
pub async fn add_compression_policy<S: Session + ?Sized>(
    session: &mut S,
    model: &ModelDescriptor,
    commit: bool,
) -> Result<()> {
    let table = model.table_ref();
    if !model.compression.enabled {
        return Err(Error::CompressionNotEnabled(table.to_string()));
    }
    let compress_after = model.compression.compress_after.clone().ok_or_else(|| {
        Error::Configuration(format!(
            "Missing required compression parameter compress_after for model {}",
            model.table_name
        ))
    })?;

    add_policy(session, &table, &CompressionTrigger::After(compress_after), commit).await
}

/// Attach a compression policy to a table named by the caller
pub async fn add_table_compression_policy<S: Session + ?Sized>(
    session: &mut S,
    table: &str,
    trigger: &CompressionTrigger,
    commit: bool,
) -> Result<()> {
    let table = TableRef::parse(table)?;
    add_policy(session, &table, trigger, commit).await
}

/// Enable compression and attach its policy for every given model
///
/// Stops at the first failure; models already handled keep their changes.
/// Returns the number of models that declare compression.
pub async fn enable_compression_for_all<'a, S, I>(session: &mut S, models: I) -> Result<usize>
where
    S: Session + ?Sized,
    I: IntoIterator<Item = &'a ModelDescriptor>,
{
    let mut enabled = 0;
    for model in models {
        if !model.compression.enabled {
            continue;
        }
        enable_compression(session, model, true).await?;
        add_compression_policy(session, model, true).await?;
        enabled += 1;
    }
    Ok(enabled)
}

/// Add compression policies that are declared on models but missing in
/// the database
///
/// Existing policies are left as they are. Returns the tables that got a
/// new policy.
pub async fn sync_compression_policies<'a, S, I>(session: &mut S, models: I) -> Result<Vec<String>>
where
    S: Session + ?Sized,
    I: IntoIterator<Item = &'a ModelDescriptor>,
{
    let existing = compression_policy_tables(session).await?;

    let mut added = Vec::new();
    for model in models {
        if !model.compression.enabled {
            continue;
        }
        let table = model.table_ref();
        if existing.contains(&(table.schema_or_public().to_string(), table.name.clone())) {
            debug!("Compression policy for {} already present", table);
            continue;
        }
        add_compression_policy(session, model, true).await?;
        added.push(table.to_string());
    }
    Ok(added)
}

async fn add_policy<S: Session + ?Sized>(
    session: &mut S,
    table: &TableRef,
    trigger: &CompressionTrigger,
    commit: bool,
) -> Result<()> {
    let age = normalize(trigger.interval())?;

    if !compression_enabled(session, table).await? {
        return Err(Error::CompressionNotEnabled(table.to_string()));
    }

    let statement = policy_statement(table, trigger.argument(), &age);
    debug!("add_compression_policy: {}", statement);
    session.execute(&statement).await?;

    if commit {
        session.commit().await?;
    }

    info!(
        "Added compression policy on {} ({} {})",
        table,
        trigger.argument(),
        age
    );
    Ok(())
}

/// Whether the catalog reports compression enabled for `table`
async fn compression_enabled<S: Session + ?Sized>(session: &mut S, table: &TableRef) -> Result<bool> {
    let mut builder = StatementBuilder::new();
    builder
        .push(
            "SELECT compression_enabled FROM timescaledb_information.hypertables \
             WHERE hypertable_schema = ",
        )
        .push_bind(table.schema_or_public())
        .push(" AND hypertable_name = ")
        .push_bind(table.name.as_str());

    let rows = session.fetch_all(&builder.build()).await?;
    match rows.first() {
        Some(row) => Ok(row.try_bool("compression_enabled")?),
        None => Ok(false),
    }
}

async fn compression_policy_tables<S: Session + ?Sized>(
    session: &mut S,
) -> Result<HashSet<(String, String)>> {
    let statement = Statement::new(
        "SELECT hypertable_schema::text AS hypertable_schema, \
         hypertable_name::text AS hypertable_name \
         FROM timescaledb_information.jobs WHERE proc_name = 'policy_compression'",
    );
    let rows = session.fetch_all(&statement).await?;

    let mut tables = HashSet::new();
    for row in rows {
        tables.insert((row.try_text("hypertable_schema")?, row.try_text("hypertable_name")?));
    }
    Ok(tables)
}

fn alter_statement(model: &ModelDescriptor, chunk_interval: Option<&IntervalSpec>) -> Statement {
    let settings = &model.compression;
    let mut options = vec!["timescaledb.compress = on".to_string()];

    if !settings.order_by.is_empty() {
        let order_by: Vec<String> = settings
            .order_by
            .iter()
            .map(|o| format!("{} {}", quote_ident(&o.column), o.direction))
            .collect();
        options.push(format!(
            "timescaledb.compress_orderby = {}",
            quote_literal(&order_by.join(", "))
        ));
    }

    if !settings.segment_by.is_empty() {
        let segment_by: Vec<String> = settings.segment_by.iter().map(|c| quote_ident(c)).collect();
        options.push(format!(
            "timescaledb.compress_segmentby = {}",
            quote_literal(&segment_by.join(", "))
        ));
    }

    if let Some(interval) = chunk_interval {
        options.push(format!(
            "timescaledb.compress_chunk_time_interval = {}",
            quote_literal(&interval.to_literal())
        ));
    }

    Statement::new(format!(
        "ALTER TABLE {} SET ({})",
        model.table_ref().quoted(),
        options.join(", ")
    ))
}

fn policy_statement(table: &TableRef, argument: &str, age: &IntervalSpec) -> Statement {
    let mut builder = StatementBuilder::new();
    builder
        .push("SELECT add_compression_policy(")
        .push_bind(table.quoted())
        .push("::regclass, ")
        .push(argument)
        .push(" => ");
    let age = age.bind_interval(&mut builder);
    builder.push(&age).push(", if_not_exists => true)");
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{fixtures, ColumnType, OrderByColumn, OrderDirection};
    use crate::session::recording::RecordingSession;
    use crate::session::{Row, SqlValue};

    fn enabled_row(enabled: bool) -> Vec<Row> {
        vec![Row::new().with("compression_enabled", enabled)]
    }

    #[tokio::test]
    async fn test_disabled_compression_is_noop() {
        let mut session = RecordingSession::new();
        enable_compression(&mut session, &fixtures::metric(), true)
            .await
            .unwrap();
        assert!(session.statements.is_empty());
        assert_eq!(session.commits, 0);
    }

    #[tokio::test]
    async fn test_enable_full_settings() {
        let mut session = RecordingSession::new();
        let model = fixtures::page_view().compress_chunk_time_interval("1 week");

        enable_compression(&mut session, &model, true).await.unwrap();

        assert_eq!(
            session.last().sql(),
            "ALTER TABLE \"page_views\" SET (timescaledb.compress = on, \
             timescaledb.compress_orderby = '\"time\" ASC', \
             timescaledb.compress_segmentby = '\"path\"', \
             timescaledb.compress_chunk_time_interval = '1 week')"
        );
        assert!(session.last().params().is_empty());
        assert_eq!(session.commits, 1);
    }

    #[tokio::test]
    async fn test_enable_omits_unset_clauses() {
        let mut session = RecordingSession::new();
        let model = fixtures::metric().compress_after("7 days");

        enable_compression(&mut session, &model, false).await.unwrap();

        let sql = session.last().sql();
        assert_eq!(sql, "ALTER TABLE \"metrics\" SET (timescaledb.compress = on)");
        assert!(!sql.contains("NULL"));
        assert_eq!(session.commits, 0);
    }

    #[tokio::test]
    async fn test_enable_requires_compress_after() {
        let mut session = RecordingSession::new();
        let model = fixtures::metric().compress_segmentby("sensor_id");

        let err = enable_compression(&mut session, &model, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("compress_after"));
        assert!(session.statements.is_empty());
    }

    #[tokio::test]
    async fn test_enable_validates_columns_before_io() {
        let mut session = RecordingSession::new();

        let model = fixtures::page_view().compress_segmentby("payload");
        let result = enable_compression(&mut session, &model, true).await;
        assert!(matches!(result, Err(Error::InvalidSegmentByField { .. })));

        let model = fixtures::page_view().compress_orderby("path", OrderDirection::Desc);
        let result = enable_compression(&mut session, &model, true).await;
        assert!(matches!(
            result,
            Err(Error::OverlappingCompressionColumns { .. })
        ));

        let model = fixtures::page_view().compress_orderby("missing", OrderDirection::Asc);
        let result = enable_compression(&mut session, &model, true).await;
        assert!(matches!(result, Err(Error::InvalidOrderByField { .. })));

        assert!(session.statements.is_empty());
    }

    #[tokio::test]
    async fn test_enable_table_compression() {
        let mut session = RecordingSession::new();
        session.push_result(vec![
            Row::new()
                .with("column_name", "time")
                .with("data_type", "timestamp with time zone")
                .with("udt_name", "timestamptz"),
            Row::new()
                .with("column_name", "device")
                .with("data_type", "text")
                .with("udt_name", "text"),
        ]);

        let settings = CompressionSettings {
            order_by: vec![OrderByColumn::new("time", OrderDirection::Desc)],
            segment_by: vec!["device".to_string()],
            compress_after: Some("1 day".into()),
            ..Default::default()
        };
        enable_table_compression(&mut session, "readings", settings, true)
            .await
            .unwrap();

        let sql = session.last().sql();
        assert!(sql.starts_with("ALTER TABLE \"readings\""));
        assert!(sql.contains("compress_orderby = '\"time\" DESC'"));
        assert!(sql.contains("compress_segmentby = '\"device\"'"));
    }

    #[tokio::test]
    async fn test_add_policy_after_age() {
        let mut session = RecordingSession::new();
        session.push_result(enabled_row(true));

        add_compression_policy(&mut session, &fixtures::page_view(), true)
            .await
            .unwrap();

        let stmt = session.last();
        assert_eq!(
            stmt.sql(),
            "SELECT add_compression_policy($1::regclass, compress_after => $2::interval, \
             if_not_exists => true)"
        );
        assert_eq!(stmt.params()[1], SqlValue::Text("7 days".to_string()));
        assert_eq!(session.commits, 1);
    }

    #[tokio::test]
    async fn test_add_policy_rejects_when_not_enabled() {
        let mut session = RecordingSession::new();
        let result = add_compression_policy(&mut session, &fixtures::metric(), true).await;
        assert!(matches!(result, Err(Error::CompressionNotEnabled(_))));
        assert!(session.statements.is_empty());

        // Declared on the model but never enabled in the database
        session.push_result(enabled_row(false));
        let result = add_compression_policy(&mut session, &fixtures::page_view(), true).await;
        assert!(matches!(result, Err(Error::CompressionNotEnabled(_))));
        assert_eq!(session.statements.len(), 1);
    }

    #[tokio::test]
    async fn test_add_table_policy_created_before() {
        let mut session = RecordingSession::new();
        session.push_result(enabled_row(true));

        let trigger = CompressionTrigger::from_options(None, Some("30 days".into())).unwrap();
        add_table_compression_policy(&mut session, "public.readings", &trigger, false)
            .await
            .unwrap();

        let stmt = session.last();
        assert!(stmt.sql().contains("compress_created_before => $2::interval"));
        assert_eq!(stmt.params()[0], SqlValue::Text("\"public\".\"readings\"".to_string()));
        assert_eq!(session.commits, 0);
    }

    #[test]
    fn test_trigger_selectors_are_exclusive() {
        assert!(matches!(
            CompressionTrigger::from_options(Some("1 day".into()), Some("2 days".into())),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            CompressionTrigger::from_options(None, None),
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_enable_for_all_skips_uncompressed_and_fails_fast() {
        let mut session = RecordingSession::new();
        session.push_result(enabled_row(true));

        let broken = ModelDescriptor::new("events")
            .column("time", ColumnType::TimestampTz)
            .column("tags", ColumnType::Array)
            .compress_segmentby("tags")
            .compress_after("1 day");
        let models = vec![fixtures::metric(), fixtures::page_view(), broken];

        let result = enable_compression_for_all(&mut session, &models).await;

        assert!(matches!(result, Err(Error::InvalidSegmentByField { .. })));
        // ALTER, catalog probe and policy for page_views only
        assert_eq!(session.statements.len(), 3);
        assert_eq!(session.commits, 2);
    }

    #[tokio::test]
    async fn test_sync_adds_only_missing_policies() {
        let mut session = RecordingSession::new();
        session.push_result(vec![Row::new()
            .with("hypertable_schema", "public")
            .with("hypertable_name", "page_views")]);
        session.push_result(enabled_row(true));

        let readings = ModelDescriptor::new("readings")
            .column("time", ColumnType::TimestampTz)
            .compress_after("2 days");
        let models = vec![fixtures::page_view(), fixtures::metric(), readings];

        let added = sync_compression_policies(&mut session, &models)
            .await
            .unwrap();

        assert_eq!(added, vec!["readings"]);
        assert_eq!(
            session.last().params()[1],
            SqlValue::Text("2 days".to_string())
        );
    }
}
