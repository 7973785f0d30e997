use crate::error::Result;
use crate::interval::{IntervalInput, IntervalSpec};
use crate::model::{introspect_table, ModelDescriptor};
use crate::session::{Session, Statement, StatementBuilder, TableRef};
use crate::validators::{validate_chunk_interval, validate_time_column};
use tracing::{debug, info};

/// Options for `create_hypertable`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HypertableOptions {
    /// Succeed without changes if the table already is a hypertable
    pub if_not_exists: bool,
    /// Move rows already in the table into chunks
    pub migrate_data: bool,
}

impl Default for HypertableOptions {
    fn default() -> Self {
        Self {
            if_not_exists: true,
            migrate_data: true,
        }
    }
}

/// Convert the model's table into a hypertable
///
/// The time column and chunk interval are validated first; on failure no
/// statement is issued. Commits afterwards when `commit` is set.
pub async fn create_hypertable<S: Session + ?Sized>(
    session: &mut S,
    model: &ModelDescriptor,
    options: HypertableOptions,
    commit: bool,
) -> Result<()> {
    validate_time_column(model, &model.time_column)?;
    let chunk = validate_chunk_interval(
        model,
        &model.time_column,
        model.chunk_time_interval.as_ref(),
    )?;

    let table = model.table_ref();
    let statement = create_statement(&table, &model.time_column, &chunk, options);
    debug!("create_hypertable: {}", statement);
    session.execute(&statement).await?;

    if commit {
        session.commit().await?;
    }

    info!(
        "Created hypertable {} on {} (chunk interval {})",
        table, model.time_column, chunk
    );
    Ok(())
}

/// Convert an existing table, named by the caller, into a hypertable
///
/// The table's columns are read from the catalog so the same time column
/// and interval checks apply as for a declared model.
pub async fn create_hypertable_for_table<S: Session + ?Sized>(
    session: &mut S,
    table: &str,
    time_column: &str,
    chunk_time_interval: impl Into<IntervalInput>,
    options: HypertableOptions,
    commit: bool,
) -> Result<()> {
    let table = TableRef::parse(table)?;
    let model = introspect_table(session, &table)
        .await?
        .time_column(time_column)
        .chunk_time_interval(chunk_time_interval);

    create_hypertable(session, &model, options, commit).await
}

/// Create a hypertable for every given model, stopping at the first failure
///
/// Each model is created and committed on its own, so models handled before
/// a failure stay converted. Returns the number of models converted.
pub async fn create_all_hypertables<'a, S, I>(session: &mut S, models: I) -> Result<usize>
where
    S: Session + ?Sized,
    I: IntoIterator<Item = &'a ModelDescriptor>,
{
    let mut created = 0;
    for model in models {
        create_hypertable(session, model, HypertableOptions::default(), true).await?;
        created += 1;
    }
    Ok(created)
}

fn create_statement(
    table: &TableRef,
    time_column: &str,
    chunk: &IntervalSpec,
    options: HypertableOptions,
) -> Statement {
    let mut builder = StatementBuilder::new();
    builder
        .push("SELECT create_hypertable(")
        .push_bind(table.quoted())
        .push("::regclass, by_range(")
        .push_bind(time_column)
        .push("::name, ");
    let width = chunk.bind_chunk_width(&mut builder);
    builder
        .push(&width)
        .push("), if_not_exists => ")
        .push_bind(options.if_not_exists)
        .push(", migrate_data => ")
        .push_bind(options.migrate_data)
        .push(")");
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::model::{fixtures, ColumnType};
    use crate::session::recording::RecordingSession;
    use crate::session::{Row, SqlValue};

    #[tokio::test]
    async fn test_create_textual_interval() {
        let mut session = RecordingSession::new();
        let model = fixtures::metric();

        create_hypertable(&mut session, &model, HypertableOptions::default(), true)
            .await
            .unwrap();

        let stmt = session.last();
        assert_eq!(
            stmt.sql(),
            "SELECT create_hypertable($1::regclass, by_range($2::name, $3::interval), \
             if_not_exists => $4, migrate_data => $5)"
        );
        assert_eq!(
            stmt.params(),
            &[
                SqlValue::Text("\"metrics\"".to_string()),
                SqlValue::Text("time".to_string()),
                SqlValue::Text("7 days".to_string()),
                SqlValue::Bool(true),
                SqlValue::Bool(true),
            ]
        );
        assert_eq!(session.commits, 1);
    }

    #[tokio::test]
    async fn test_create_duration_interval_binds_microseconds() {
        let mut session = RecordingSession::new();
        let model = fixtures::page_view().schema("web");
        let options = HypertableOptions {
            if_not_exists: false,
            migrate_data: false,
        };

        create_hypertable(&mut session, &model, options, false)
            .await
            .unwrap();

        let stmt = session.last();
        assert!(stmt.sql().contains("by_range($2::name, $3::bigint)"));
        assert_eq!(stmt.params()[0], SqlValue::Text("\"web\".\"page_views\"".to_string()));
        assert_eq!(stmt.params()[2], SqlValue::Int(30 * 86_400_000_000));
        assert_eq!(stmt.params()[3], SqlValue::Bool(false));
        assert_eq!(session.commits, 0);
    }

    #[tokio::test]
    async fn test_validation_failure_issues_no_statement() {
        let mut session = RecordingSession::new();

        let result = create_hypertable(
            &mut session,
            &fixtures::record(),
            HypertableOptions::default(),
            true,
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidTimeColumn { .. })));

        let model = fixtures::metric().chunk_time_interval("1 fortnight");
        let result =
            create_hypertable(&mut session, &model, HypertableOptions::default(), true).await;
        assert!(matches!(result, Err(Error::InvalidChunkTimeInterval { .. })));

        let model = fixtures::metric().time_column("value");
        let result =
            create_hypertable(&mut session, &model, HypertableOptions::default(), true).await;
        assert!(matches!(result, Err(Error::InvalidTimeColumnType { .. })));

        assert!(session.statements.is_empty());
        assert_eq!(session.commits, 0);
    }

    #[tokio::test]
    async fn test_create_for_table_introspects_columns() {
        let mut session = RecordingSession::new();
        session.push_result(vec![
            Row::new()
                .with("column_name", "id")
                .with("data_type", "integer")
                .with("udt_name", "int4"),
            Row::new()
                .with("column_name", "created_at")
                .with("data_type", "timestamp without time zone")
                .with("udt_name", "timestamp"),
        ]);

        create_hypertable_for_table(
            &mut session,
            "manual_hypertable",
            "created_at",
            "INTERVAL '1 day'",
            HypertableOptions::default(),
            true,
        )
        .await
        .unwrap();

        assert_eq!(session.statements.len(), 2);
        let stmt = session.last();
        assert_eq!(stmt.params()[1], SqlValue::Text("created_at".to_string()));
        assert_eq!(stmt.params()[2], SqlValue::Text("1 day".to_string()));
    }

    #[tokio::test]
    async fn test_create_for_table_rejects_bad_name() {
        let mut session = RecordingSession::new();
        let result = create_hypertable_for_table(
            &mut session,
            "x; DROP TABLE y",
            "time",
            "1 day",
            HypertableOptions::default(),
            true,
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidIdentifier(_))));
        assert!(session.statements.is_empty());
    }

    #[tokio::test]
    async fn test_create_all_fails_fast() {
        let mut session = RecordingSession::new();
        let broken = crate::model::ModelDescriptor::new("broken").column("time", ColumnType::Text);
        let models = vec![fixtures::metric(), broken, fixtures::page_view()];

        let result = create_all_hypertables(&mut session, &models).await;

        assert!(matches!(result, Err(Error::InvalidTimeColumnType { .. })));
        // The first model stays converted, the third is never attempted
        assert_eq!(session.statements.len(), 1);
        assert_eq!(session.commits, 1);
    }

    #[tokio::test]
    async fn test_create_all_propagates_database_error() {
        let mut session = RecordingSession::new();
        session.fail_next_execute("relation \"metrics\" does not exist");
        let models = vec![fixtures::metric(), fixtures::page_view()];

        let result = create_all_hypertables(&mut session, &models).await;
        match result {
            Err(Error::Database(sqlx::Error::Protocol(msg))) => assert!(msg.contains("metrics")),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(session.commits, 0);
    }
}
