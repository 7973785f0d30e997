//! Retention Manager
//!
//! Retention policies are background jobs that drop whole chunks once all of
//! their data is older than a configured age. Every operation addressing a
//! single table takes either a model or a raw table name, never both.

use crate::error::{Error, Result};
use crate::hypertable::list_hypertables;
use crate::interval::{normalize, IntervalInput};
use crate::model::ModelDescriptor;
use crate::session::{Session, Statement, StatementBuilder, TableRef};
use std::collections::BTreeMap;
use tracing::{debug, info};

const LIST_RETENTION_SQL: &str = "SELECT hypertable_schema::text AS hypertable_schema, \
     hypertable_name::text AS hypertable_name, \
     COALESCE(config->>'drop_after', config->>'drop_created_before') AS drop_after \
     FROM timescaledb_information.jobs WHERE proc_name = 'policy_retention' \
     ORDER BY hypertable_schema, hypertable_name";

/// Resolve the table addressed by a model-or-name selector
fn resolve_target(model: Option<&ModelDescriptor>, table: Option<&str>) -> Result<TableRef> {
    match (model, table) {
        (Some(model), None) => Ok(model.table_ref()),
        (None, Some(table)) => TableRef::parse(table),
        (Some(_), Some(_)) => Err(Error::Configuration(
            "specify either a model or a table name, not both".to_string(),
        )),
        (None, None) => Err(Error::Configuration(
            "either a model or a table name is required".to_string(),
        )),
    }
}

/// Key used for a table in [`list_retention_policies`]: the bare name for
/// the `public` schema, `schema.name` otherwise
pub(crate) fn policy_key(schema: &str, name: &str) -> String {
    if schema == "public" {
        name.to_string()
    } else {
        format!("{}.{}", schema, name)
    }
}

/// Register a retention policy
///
/// The age is taken from `drop_after`, else from the model's retention
/// setting, else from its compression `drop_after`. A duplicate policy is
/// reported by the database and surfaces as [`Error::Database`].
pub async fn add_retention_policy<S: Session + ?Sized>(
    session: &mut S,
    model: Option<&ModelDescriptor>,
    table: Option<&str>,
    drop_after: Option<IntervalInput>,
    commit: bool,
) -> Result<()> {
    let target = resolve_target(model, table)?;

    let drop_after = drop_after
        .or_else(|| model.and_then(|m| m.default_retention().cloned()))
        .ok_or_else(|| {
            Error::Configuration(format!("no drop_after age given or declared for {}", target))
        })?;
    let age = normalize(&drop_after)?;

    let mut builder = StatementBuilder::new();
    builder
        .push("SELECT add_retention_policy(")
        .push_bind(target.quoted())
        .push("::regclass, drop_after => ");
    let expr = age.bind_interval(&mut builder);
    builder.push(&expr).push(")");
    let statement = builder.build();

    debug!("add_retention_policy: {}", statement);
    session.execute(&statement).await?;

    if commit {
        session.commit().await?;
    }

    info!("Added retention policy on {} (drop after {})", target, age);
    Ok(())
}

/// Remove the retention policy of a table; succeeds if there is none
pub async fn drop_retention_policy<S: Session + ?Sized>(
    session: &mut S,
    model: Option<&ModelDescriptor>,
    table: Option<&str>,
    commit: bool,
) -> Result<()> {
    let target = resolve_target(model, table)?;

    let mut builder = StatementBuilder::new();
    builder
        .push("SELECT remove_retention_policy(")
        .push_bind(target.quoted())
        .push("::regclass, if_exists => true)");
    let statement = builder.build();

    debug!("drop_retention_policy: {}", statement);
    session.execute(&statement).await?;

    if commit {
        session.commit().await?;
    }

    info!("Dropped retention policy on {}", target);
    Ok(())
}

/// Map of table to configured retention age
pub async fn list_retention_policies<S: Session + ?Sized>(
    session: &mut S,
) -> Result<BTreeMap<String, String>> {
    let rows = session.fetch_all(&Statement::new(LIST_RETENTION_SQL)).await?;

    let mut policies = BTreeMap::new();
    for row in rows {
        let schema = row.try_text("hypertable_schema")?;
        let name = row.try_text("hypertable_name")?;
        let drop_after = row.try_opt_text("drop_after")?.unwrap_or_default();
        policies.insert(policy_key(&schema, &name), drop_after);
    }
    Ok(policies)
}

/// Give every hypertable without a retention policy one with `drop_after`
///
/// Existing policies are kept even when their age differs. Stops at the
/// first failure. Returns the tables that got a new policy.
pub async fn sync_retention_policies<S: Session + ?Sized>(
    session: &mut S,
    drop_after: impl Into<IntervalInput>,
) -> Result<Vec<String>> {
    let drop_after = drop_after.into();
    normalize(&drop_after)?;

    let existing = list_retention_policies(session).await?;
    let hypertables = list_hypertables(session).await?;

    let mut added = Vec::new();
    for info in hypertables {
        let key = policy_key(&info.hypertable_schema, &info.hypertable_name);
        if existing.contains_key(&key) {
            debug!("Retention policy for {} already present", key);
            continue;
        }
        add_retention_policy(
            session,
            None,
            Some(key.as_str()),
            Some(drop_after.clone()),
            true,
        )
        .await?;
        added.push(key);
    }

    info!("Synchronized retention policies, {} added", added.len());
    Ok(added)
}
