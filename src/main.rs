//! Hypertables CLI
//!
//! Command-line interface for TimescaleDB administration:
//! - Create hypertables and inspect their chunks
//! - Enable compression and compression policies
//! - Manage retention policies
//! - Run time-bucket queries

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use hypertables::model::introspect_table;
use hypertables::session::{connect, TableRef};
use hypertables::{
    add_retention_policy, add_table_compression_policy, create_hypertable_for_table,
    drop_retention_policy, enable_table_compression, list_hypertables, list_retention_policies,
    show_chunks, sync_retention_policies, time_bucket_gapfill_query, time_bucket_query,
    AggregationFunc, BucketOptions, BucketRow, ChunkFilter, CompressionSettings,
    CompressionTrigger, Config, GapfillOptions, HypertableOptions, IntervalInput, OrderByColumn,
    OrderDirection, PgSession, QueryFilter,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hypertables")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "TimescaleDB hypertable administration")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate default config file
    InitConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    #[command(flatten)]
    Admin(AdminCommand),
}

/// Commands that talk to the database
#[derive(Subcommand)]
pub enum AdminCommand {
    /// List hypertables
    List,

    /// Convert a table into a hypertable
    Create {
        /// Table name, optionally schema-qualified
        table: String,
        /// Time column
        #[arg(short, long, default_value = "time")]
        time_column: String,
        /// Chunk width (default: from config)
        #[arg(short = 'i', long)]
        chunk_interval: Option<String>,
        /// Leave existing rows out of the chunks
        #[arg(long)]
        no_migrate: bool,
    },

    /// Enable compression on a hypertable
    Compress {
        table: String,
        /// Age after which chunks are compressed
        #[arg(long)]
        compress_after: String,
        /// Order-by column, `column` or `column:desc`
        #[arg(short, long)]
        orderby: Vec<String>,
        /// Segment-by column
        #[arg(short, long)]
        segmentby: Vec<String>,
        /// Width of compressed chunks
        #[arg(long)]
        chunk_interval: Option<String>,
    },

    /// Attach a compression policy
    CompressPolicy {
        table: String,
        /// Compress chunks whose data is older than this
        #[arg(long)]
        after: Option<String>,
        /// Compress chunks created longer ago than this
        #[arg(long)]
        created_before: Option<String>,
    },

    /// Manage retention policies
    Retention {
        #[command(subcommand)]
        action: RetentionAction,
    },

    /// Show chunk names of a hypertable
    Chunks {
        table: String,
        #[arg(long)]
        older_than: Option<String>,
        #[arg(long)]
        newer_than: Option<String>,
        #[arg(long)]
        created_before: Option<String>,
        #[arg(long)]
        created_after: Option<String>,
    },

    /// Aggregate a column per time bucket
    Bucket {
        table: String,
        /// Bucket width (e.g. "1 hour", "1 day")
        #[arg(short, long)]
        interval: String,
        /// Column to aggregate
        #[arg(short, long)]
        metric: String,
        #[arg(short, long, default_value = "time")]
        time_column: String,
        /// Aggregation function (avg, sum, min, max, count, first, last)
        #[arg(short, long, default_value = "avg")]
        aggregate: String,
        /// Filters in column<op>value format (e.g. sensor_id=1)
        #[arg(short = 'w', long = "where")]
        filters: Vec<String>,
        /// Extra grouping columns
        #[arg(short, long)]
        group_by: Vec<String>,
        /// Decimal places (negative keeps full precision)
        #[arg(long, default_value = "2", allow_hyphen_values = true)]
        decimals: i32,
        /// Range start (RFC 3339); enables gap filling together with --finish
        #[arg(long, value_parser = parse_timestamp)]
        start: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_timestamp)]
        finish: Option<DateTime<Utc>>,
        /// Carry the last value forward into empty buckets
        #[arg(long)]
        locf: bool,
        /// Interpolate empty buckets linearly
        #[arg(long)]
        interpolate: bool,
        /// Bucket in this time zone
        #[arg(long)]
        timezone: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum RetentionAction {
    /// Add a retention policy
    Add {
        table: String,
        /// Drop chunks older than this (default: from config)
        drop_after: Option<String>,
    },
    /// Remove a retention policy
    Drop { table: String },
    /// List retention policies
    List,
    /// Add a policy to every hypertable without one
    Sync {
        /// Default: from config
        drop_after: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config);

    let command = match cli.command {
        Commands::InitConfig { output } => {
            let content = hypertables::config::generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("writing config to {:?}", path))?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
            return Ok(());
        }
        Commands::Admin(command) => command,
    };

    let pool = connect(&config.database)
        .await
        .context("connecting to database")?;
    let mut session = PgSession::new(pool);
    let qualify = |table: &str| config.database.qualify(table);
    let json = cli.format == "json";

    match command {
        AdminCommand::List => {
            let tables = list_hypertables(&mut session).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            } else if tables.is_empty() {
                println!("No hypertables.");
            } else {
                println!(
                    "{:<30} {:<12} {:>8} {:>11}",
                    "Hypertable", "Owner", "Chunks", "Compressed"
                );
                println!("{}", "-".repeat(64));
                for table in tables {
                    println!(
                        "{:<30} {:<12} {:>8} {:>11}",
                        table.table_ref().to_string(),
                        table.owner,
                        table.num_chunks,
                        if table.compression_enabled { "yes" } else { "no" }
                    );
                }
            }
        }

        AdminCommand::Create {
            table,
            time_column,
            chunk_interval,
            no_migrate,
        } => {
            let interval = chunk_interval
                .map(IntervalInput::Text)
                .unwrap_or_else(|| config.defaults.chunk_time_interval());
            let options = HypertableOptions {
                migrate_data: !no_migrate,
                ..HypertableOptions::default()
            };
            create_hypertable_for_table(
                &mut session,
                &qualify(&table),
                &time_column,
                interval,
                options,
                true,
            )
            .await?;
            println!("Created hypertable {}", table);
        }

        AdminCommand::Compress {
            table,
            compress_after,
            orderby,
            segmentby,
            chunk_interval,
        } => {
            let order_by = orderby
                .iter()
                .map(|raw| parse_order_by(raw))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let settings = CompressionSettings {
                enabled: true,
                order_by,
                segment_by: segmentby,
                compress_after: Some(IntervalInput::Text(compress_after)),
                chunk_time_interval: chunk_interval.map(IntervalInput::Text),
                drop_after: None,
            };
            enable_table_compression(&mut session, &qualify(&table), settings, true).await?;
            println!("Enabled compression on {}", table);
        }

        AdminCommand::CompressPolicy {
            table,
            after,
            created_before,
        } => {
            let trigger = CompressionTrigger::from_options(
                after.map(IntervalInput::Text),
                created_before.map(IntervalInput::Text),
            )?;
            add_table_compression_policy(&mut session, &qualify(&table), &trigger, true).await?;
            println!("Added compression policy on {}", table);
        }

        AdminCommand::Retention { action } => match action {
            RetentionAction::Add { table, drop_after } => {
                let drop_after = drop_after
                    .map(IntervalInput::Text)
                    .or_else(|| config.defaults.retention());
                if drop_after.is_none() {
                    bail!("no drop_after given and no retention_drop_after configured");
                }
                add_retention_policy(
                    &mut session,
                    None,
                    Some(qualify(&table).as_str()),
                    drop_after,
                    true,
                )
                .await?;
                println!("Added retention policy on {}", table);
            }
            RetentionAction::Drop { table } => {
                drop_retention_policy(&mut session, None, Some(qualify(&table).as_str()), true)
                    .await?;
                println!("Dropped retention policy on {}", table);
            }
            RetentionAction::List => {
                let policies = list_retention_policies(&mut session).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&policies)?);
                } else if policies.is_empty() {
                    println!("No retention policies.");
                } else {
                    println!("{:<30} {}", "Hypertable", "Drop after");
                    println!("{}", "-".repeat(45));
                    for (table, age) in policies {
                        println!("{:<30} {}", table, age);
                    }
                }
            }
            RetentionAction::Sync { drop_after } => {
                let drop_after = match drop_after.map(IntervalInput::Text) {
                    Some(age) => age,
                    None => config
                        .defaults
                        .retention()
                        .context("no drop_after given and no retention_drop_after configured")?,
                };
                let added = sync_retention_policies(&mut session, drop_after).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&added)?);
                } else {
                    println!("Added {} retention policies", added.len());
                    for table in added {
                        println!("  {}", table);
                    }
                }
            }
        },

        AdminCommand::Chunks {
            table,
            older_than,
            newer_than,
            created_before,
            created_after,
        } => {
            let mut filter = ChunkFilter::new();
            if let Some(age) = older_than {
                filter = filter.older_than(age);
            }
            if let Some(age) = newer_than {
                filter = filter.newer_than(age);
            }
            if let Some(age) = created_before {
                filter = filter.created_before(age);
            }
            if let Some(age) = created_after {
                filter = filter.created_after(age);
            }
            let chunks = show_chunks(&mut session, &qualify(&table), &filter).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&chunks)?);
            } else {
                for chunk in chunks {
                    println!("{}", chunk);
                }
            }
        }

        AdminCommand::Bucket {
            table,
            interval,
            metric,
            time_column,
            aggregate,
            filters,
            group_by,
            decimals,
            start,
            finish,
            locf,
            interpolate,
            timezone,
        } => {
            let aggregate = AggregationFunc::from_str(&aggregate)
                .with_context(|| format!("unknown aggregate '{}'", aggregate))?;
            let filters = filters
                .iter()
                .map(|raw| {
                    QueryFilter::parse(raw)
                        .with_context(|| format!("invalid filter '{}', expected column<op>value", raw))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            let decimal_places = u32::try_from(decimals).ok();

            let table_ref = TableRef::parse(&qualify(&table))?;
            let model = introspect_table(&mut session, &table_ref).await?;

            let rows = match (start, finish) {
                (Some(start), Some(finish)) => {
                    if timezone.is_some() {
                        bail!("--timezone is not supported with gap filling");
                    }
                    let mut options = GapfillOptions::new(start, finish)
                        .aggregate(aggregate)
                        .decimal_places(decimal_places);
                    options.filters = filters;
                    options.group_by = group_by;
                    options.use_locf = locf;
                    options.use_interpolate = interpolate;
                    time_bucket_gapfill_query(
                        &mut session,
                        &model,
                        interval,
                        &time_column,
                        &metric,
                        &options,
                    )
                    .await?
                }
                (None, None) => {
                    if locf || interpolate {
                        bail!("--locf and --interpolate need --start and --finish");
                    }
                    let mut options = BucketOptions::new()
                        .aggregate(aggregate)
                        .decimal_places(decimal_places);
                    options.filters = filters;
                    options.group_by = group_by;
                    options.timezone = timezone;
                    time_bucket_query(
                        &mut session,
                        &model,
                        interval,
                        &time_column,
                        &metric,
                        &options,
                    )
                    .await?
                }
                _ => bail!("--start and --finish must be given together"),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_buckets(&rows);
            }
        }
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp '{}': {}", s, e))
}

fn parse_order_by(raw: &str) -> anyhow::Result<OrderByColumn> {
    let (column, direction) = match raw.split_once(':') {
        Some((column, dir)) if dir.eq_ignore_ascii_case("desc") => (column, OrderDirection::Desc),
        Some((column, dir)) if dir.eq_ignore_ascii_case("asc") => (column, OrderDirection::Asc),
        Some((_, dir)) => bail!("invalid order direction '{}', expected asc or desc", dir),
        None => (raw, OrderDirection::Asc),
    };
    Ok(OrderByColumn::new(column, direction))
}

fn print_buckets(rows: &[BucketRow]) {
    if rows.is_empty() {
        println!("No data.");
        return;
    }

    for row in rows {
        let mut line = row.bucket.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        for (column, value) in &row.groups {
            line.push_str(&format!("  {}={}", column, value));
        }
        match row.value {
            Some(value) => line.push_str(&format!("  {}={}", row.aggregate, value)),
            None => line.push_str(&format!("  {}=null", row.aggregate)),
        }
        println!("{}", line);
    }
}
