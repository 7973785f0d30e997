//! Schema setup
//!
//! Runs the whole lifecycle for every registered model in order:
//!
//! ```text
//! CREATE EXTENSION -> create_hypertable -> enable_compression
//!                  -> add_compression_policy -> add_retention_policy
//! ```

use crate::compression::enable_compression_for_all;
use crate::error::Result;
use crate::hypertable::create_all_hypertables;
use crate::model::ModelRegistry;
use crate::retention::{add_retention_policy, list_retention_policies, policy_key};
use crate::session::{Session, Statement};
use serde::Serialize;
use tracing::info;

/// What [`setup_all`] did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SetupReport {
    pub hypertables: usize,
    pub compressed: usize,
    /// Tables that got a new retention policy
    pub retention_policies: Vec<String>,
}

/// Make sure the timescaledb extension is installed
pub async fn activate_extension<S: Session + ?Sized>(session: &mut S) -> Result<()> {
    session
        .execute(&Statement::new("CREATE EXTENSION IF NOT EXISTS timescaledb"))
        .await?;
    session.commit().await?;
    info!("timescaledb extension active");
    Ok(())
}

/// Apply every registered model's hypertable, compression and retention
/// settings
///
/// Stops at the first failure. Steps already committed are kept. Retention
/// policies that already exist are left alone so the setup can be rerun.
pub async fn setup_all<S: Session + ?Sized>(
    session: &mut S,
    registry: &ModelRegistry,
) -> Result<SetupReport> {
    activate_extension(session).await?;

    let hypertables = create_all_hypertables(session, registry.hypertables()).await?;
    let compressed = enable_compression_for_all(session, registry.hypertables()).await?;

    let existing = list_retention_policies(session).await?;
    let mut retention_policies = Vec::new();
    for model in registry.hypertables() {
        if model.default_retention().is_none() {
            continue;
        }
        let table = model.table_ref();
        let key = policy_key(table.schema_or_public(), &table.name);
        if existing.contains_key(&key) {
            continue;
        }
        add_retention_policy(session, Some(model), None, None, true).await?;
        retention_policies.push(key);
    }

    let report = SetupReport {
        hypertables,
        compressed,
        retention_policies,
    };
    info!(
        "Setup complete: {} hypertables, {} compressed, {} retention policies added",
        report.hypertables,
        report.compressed,
        report.retention_policies.len()
    );
    Ok(report)
}
