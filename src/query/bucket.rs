use super::ast::{AggregationFunc, BucketRow, QueryFilter};
use super::gapfill::{bucket_starts, densify, FillPolicy};
use crate::error::{Error, Result};
use crate::interval::{normalize, IntervalInput, IntervalSpec};
use crate::model::{ColumnType, ModelDescriptor};
use crate::session::{quote_ident, Row, Session, Statement, StatementBuilder};
use crate::validators::validate_field;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Decimal places applied when the caller does not choose
pub const DEFAULT_DECIMAL_PLACES: u32 = 2;

const BUCKET_ALIAS: &str = "bucket";
const VALUE_ALIAS: &str = "agg_value";

/// Options for [`time_bucket_query`]
#[derive(Debug, Clone, PartialEq)]
pub struct BucketOptions {
    pub filters: Vec<QueryFilter>,
    /// Round the aggregate; `None` keeps full precision
    pub decimal_places: Option<u32>,
    pub aggregate: AggregationFunc,
    /// Extra columns to group by, returned with each row
    pub group_by: Vec<String>,
    /// Bucket alignment origin
    pub origin: Option<DateTime<Utc>>,
    /// Bucket in this time zone (timestamptz columns only)
    pub timezone: Option<String>,
}

impl Default for BucketOptions {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            decimal_places: Some(DEFAULT_DECIMAL_PLACES),
            aggregate: AggregationFunc::Avg,
            group_by: Vec::new(),
            origin: None,
            timezone: None,
        }
    }
}

impl BucketOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn decimal_places(mut self, places: Option<u32>) -> Self {
        self.decimal_places = places;
        self
    }

    pub fn aggregate(mut self, aggregate: AggregationFunc) -> Self {
        self.aggregate = aggregate;
        self
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    pub fn origin(mut self, origin: DateTime<Utc>) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }
}

/// Options for [`time_bucket_gapfill_query`]
#[derive(Debug, Clone, PartialEq)]
pub struct GapfillOptions {
    pub start: DateTime<Utc>,
    pub finish: DateTime<Utc>,
    pub use_interpolate: bool,
    pub use_locf: bool,
    pub filters: Vec<QueryFilter>,
    pub decimal_places: Option<u32>,
    pub aggregate: AggregationFunc,
    pub group_by: Vec<String>,
    pub origin: Option<DateTime<Utc>>,
}

impl GapfillOptions {
    pub fn new(start: DateTime<Utc>, finish: DateTime<Utc>) -> Self {
        Self {
            start,
            finish,
            use_interpolate: false,
            use_locf: false,
            filters: Vec::new(),
            decimal_places: Some(DEFAULT_DECIMAL_PLACES),
            aggregate: AggregationFunc::Avg,
            group_by: Vec::new(),
            origin: None,
        }
    }

    pub fn interpolate(mut self) -> Self {
        self.use_interpolate = true;
        self
    }

    pub fn locf(mut self) -> Self {
        self.use_locf = true;
        self
    }

    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn decimal_places(mut self, places: Option<u32>) -> Self {
        self.decimal_places = places;
        self
    }

    pub fn aggregate(mut self, aggregate: AggregationFunc) -> Self {
        self.aggregate = aggregate;
        self
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    pub fn origin(mut self, origin: DateTime<Utc>) -> Self {
        self.origin = Some(origin);
        self
    }

    fn fill_policy(&self) -> FillPolicy {
        FillPolicy::from_flags(self.use_interpolate, self.use_locf)
    }
}

/// Aggregate `metric_field` per time bucket
///
/// Only buckets containing rows are returned, ordered by bucket and then by
/// the group-by columns.
pub async fn time_bucket_query<S: Session + ?Sized>(
    session: &mut S,
    model: &ModelDescriptor,
    interval: impl Into<IntervalInput>,
    time_field: &str,
    metric_field: &str,
    options: &BucketOptions,
) -> Result<Vec<BucketRow>> {
    let width = normalize(&interval.into())?;
    let plan = BucketPlan {
        model,
        width: &width,
        time_field,
        metric_field,
        filters: &options.filters,
        decimal_places: options.decimal_places,
        aggregate: options.aggregate,
        group_by: &options.group_by,
        origin: options.origin,
        timezone: options.timezone.as_deref(),
        range: None,
    };
    let statement = plan.statement()?;

    debug!("time_bucket_query: {}", statement);
    let rows = session.fetch_all(&statement).await?;
    plan.decode(&rows)
}

/// Aggregate `metric_field` per time bucket over `[start, finish]`, with
/// one row for every bucket whether or not it has data
///
/// Empty buckets are null unless `use_interpolate` or `use_locf` is set;
/// when both are set interpolation is used. Buckets are enumerated from
/// the one containing `start` up to the last one starting before `finish`;
/// a bucket starting exactly at `finish` appears only when it has data.
pub async fn time_bucket_gapfill_query<S: Session + ?Sized>(
    session: &mut S,
    model: &ModelDescriptor,
    interval: impl Into<IntervalInput>,
    time_field: &str,
    metric_field: &str,
    options: &GapfillOptions,
) -> Result<Vec<BucketRow>> {
    let width = normalize(&interval.into())?;
    let plan = BucketPlan {
        model,
        width: &width,
        time_field,
        metric_field,
        filters: &options.filters,
        decimal_places: options.decimal_places,
        aggregate: options.aggregate,
        group_by: &options.group_by,
        origin: options.origin,
        timezone: None,
        range: Some((options.start, options.finish)),
    };
    let statement = plan.statement()?;
    let starts = bucket_starts(
        width.bucket_width()?,
        options.origin,
        options.start,
        options.finish,
    )?;
    let policy = options.fill_policy();

    debug!("time_bucket_gapfill_query: {}", statement);
    let rows = session.fetch_all(&statement).await?;
    let sparse = plan.decode(&rows)?;

    Ok(densify(
        sparse,
        &starts,
        options.aggregate,
        policy,
        options.decimal_places,
        !options.group_by.is_empty(),
    ))
}

/// Everything needed to build and decode one bucket statement
struct BucketPlan<'a> {
    model: &'a ModelDescriptor,
    width: &'a IntervalSpec,
    time_field: &'a str,
    metric_field: &'a str,
    filters: &'a [QueryFilter],
    decimal_places: Option<u32>,
    aggregate: AggregationFunc,
    group_by: &'a [String],
    origin: Option<DateTime<Utc>>,
    timezone: Option<&'a str>,
    range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl BucketPlan<'_> {
    fn statement(&self) -> Result<Statement> {
        let time_type = &validate_field(self.model, self.time_field)?.column_type;
        validate_field(self.model, self.metric_field)?;
        let mut group_types = Vec::with_capacity(self.group_by.len());
        for column in self.group_by {
            group_types.push(&validate_field(self.model, column)?.column_type);
        }
        if !time_type.is_temporal() {
            return Err(Error::InvalidTimeColumnType {
                table: self.model.table_name.clone(),
                column: self.time_field.to_string(),
                found: time_type.to_string(),
            });
        }
        if let Some((start, finish)) = self.range {
            if finish <= start {
                return Err(Error::Range { start, finish });
            }
        }
        if self.timezone.is_some() && *time_type != ColumnType::TimestampTz {
            return Err(Error::Configuration(format!(
                "timezone bucketing needs a timestamptz column, {} is {}",
                self.time_field, time_type
            )));
        }

        let time = quote_ident(self.time_field);
        let metric = quote_ident(self.metric_field);
        let table = self.model.table_ref().quoted();
        // Grouped by the table column, so a text-cast output keeps the
        // column's own ordering
        let groups: Vec<String> = self
            .group_by
            .iter()
            .map(|c| format!("{}.{}", table, quote_ident(c)))
            .collect();

        let mut builder = StatementBuilder::new();
        builder.push("SELECT time_bucket(");
        let width = self.width.bind_interval(&mut builder);
        builder.push(&width).push(", ").push(&time);
        if let Some(timezone) = self.timezone {
            builder.push(", timezone => ").push_bind(timezone);
        }
        if let Some(origin) = self.origin {
            builder
                .push(", origin => ")
                .push_bind(origin)
                .push(origin_cast(time_type));
        }
        builder.push(") AS ").push(BUCKET_ALIAS);
        let selected = self.group_by.iter().zip(&groups).zip(&group_types);
        for ((column, group), column_type) in selected {
            builder.push(", ").push(group);
            if !decodes_natively(column_type) {
                builder.push("::text");
            }
            builder.push(" AS ").push(&quote_ident(column));
        }

        let aggregate = self.aggregate.sql(&metric, &time);
        builder.push(", ");
        match self.decimal_places {
            Some(places) => {
                builder
                    .push("round((")
                    .push(&aggregate)
                    .push(")::numeric, ")
                    .push_bind(places as i64)
                    .push("::integer)::float8");
            }
            None => {
                builder.push("(").push(&aggregate).push(")::float8");
            }
        }
        builder.push(" AS ").push(VALUE_ALIAS);

        builder.push(" FROM ").push(&table);

        let mut conditions = 0;
        let mut and = |builder: &mut StatementBuilder| {
            builder.push(if conditions == 0 { " WHERE " } else { " AND " });
            conditions += 1;
        };
        if let Some((start, finish)) = self.range {
            and(&mut builder);
            builder.push(&time).push(" >= ").push_bind(start);
            and(&mut builder);
            builder.push(&time).push(" <= ").push_bind(finish);
        }
        for filter in self.filters {
            and(&mut builder);
            filter.push_sql(self.model, &mut builder)?;
        }

        let mut order = vec![BUCKET_ALIAS.to_string()];
        order.extend(groups);
        let order = order.join(", ");
        builder
            .push(" GROUP BY ")
            .push(&order)
            .push(" ORDER BY ")
            .push(&order);

        Ok(builder.build())
    }

    fn decode(&self, rows: &[Row]) -> Result<Vec<BucketRow>> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut bucket = BucketRow::new(
                row.try_timestamp(BUCKET_ALIAS)?,
                self.aggregate,
                row.try_opt_f64(VALUE_ALIAS)?,
            );
            for column in self.group_by {
                let value = row
                    .get(column)
                    .cloned()
                    .ok_or_else(|| sqlx::Error::ColumnNotFound(column.clone()))?;
                bucket.groups.push((column.clone(), value));
            }
            out.push(bucket);
        }
        Ok(out)
    }
}

/// Types the session returns as typed values; other group-by columns
/// (enums, numeric, json, ...) are selected as text
fn decodes_natively(column_type: &ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::Boolean
            | ColumnType::SmallInt
            | ColumnType::Integer
            | ColumnType::BigInt
            | ColumnType::Real
            | ColumnType::Double
            | ColumnType::Text
            | ColumnType::TimestampTz
            | ColumnType::Timestamp
            | ColumnType::Date
    )
}

fn origin_cast(time_type: &ColumnType) -> &'static str {
    match time_type {
        ColumnType::Timestamp => "::timestamp",
        ColumnType::Date => "::date",
        _ => "::timestamptz",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;
    use crate::query::Operator;
    use crate::session::recording::RecordingSession;
    use crate::session::SqlValue;
    use chrono::{TimeDelta, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn sparse(hour: i64, value: f64) -> Row {
        Row::new()
            .with("bucket", base() + TimeDelta::hours(hour))
            .with("agg_value", value)
    }

    #[tokio::test]
    async fn test_bucket_query_daily_average() {
        let mut session = RecordingSession::new();
        session.push_result(vec![Row::new()
            .with("bucket", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .with("agg_value", 23.0)]);

        let rows = time_bucket_query(
            &mut session,
            &fixtures::metric(),
            "1 day",
            "time",
            "value",
            &BucketOptions::new(),
        )
        .await
        .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, Some(23.0));
        let json = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(json["avg"], 23.0);
        assert!(json.get("bucket").is_some());

        let stmt = session.last();
        assert_eq!(
            stmt.sql(),
            "SELECT time_bucket($1::interval, \"time\") AS bucket, \
             round((avg(\"value\"))::numeric, $2::integer)::float8 AS agg_value \
             FROM \"metrics\" GROUP BY bucket ORDER BY bucket"
        );
        assert_eq!(
            stmt.params(),
            &[SqlValue::Text("1 day".to_string()), SqlValue::Int(2)]
        );
    }

    #[tokio::test]
    async fn test_bucket_query_filters_groups_and_origin() {
        let mut session = RecordingSession::new();
        session.push_result(vec![Row::new()
            .with("bucket", base())
            .with("sensor_id", 1i64)
            .with("agg_value", 26.0)]);

        let options = BucketOptions::new()
            .filter(QueryFilter::eq("sensor_id", 1i64))
            .filter(QueryFilter::new("value", Operator::Gt, 10.0))
            .aggregate(AggregationFunc::Max)
            .group_by("sensor_id")
            .decimal_places(None)
            .origin(base())
            .timezone("Europe/Berlin");

        let rows = time_bucket_query(
            &mut session,
            &fixtures::metric(),
            TimeDelta::hours(1),
            "time",
            "value",
            &options,
        )
        .await
        .unwrap();

        assert_eq!(rows[0].group("sensor_id"), Some(&SqlValue::Int(1)));
        let json = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(json["max"], 26.0);

        assert_eq!(
            session.last().sql(),
            "SELECT time_bucket(($1::bigint * INTERVAL '1 microsecond'), \"time\", \
             timezone => $2, origin => $3::timestamptz) AS bucket, \
             \"metrics\".\"sensor_id\" AS \"sensor_id\", \
             (max(\"value\"))::float8 AS agg_value FROM \"metrics\" \
             WHERE \"sensor_id\" = $4 AND \"value\" > $5 \
             GROUP BY bucket, \"metrics\".\"sensor_id\" \
             ORDER BY bucket, \"metrics\".\"sensor_id\""
        );
    }

    #[tokio::test]
    async fn test_group_by_enum_column_is_selected_as_text() {
        let readings = ModelDescriptor::new("readings")
            .schema("lab")
            .column("time", ColumnType::TimestampTz)
            .column("mood", ColumnType::Enum("mood".to_string()))
            .column("score", ColumnType::Numeric)
            .column("value", ColumnType::Double);

        let mut session = RecordingSession::new();
        session.push_result(vec![Row::new()
            .with("bucket", base())
            .with("mood", "happy")
            .with("score", "1.50")
            .with("agg_value", 3.0)]);

        let options = BucketOptions::new().group_by("mood").group_by("score");
        let rows = time_bucket_query(
            &mut session,
            &readings,
            "1 hour",
            "time",
            "value",
            &options,
        )
        .await
        .unwrap();

        assert_eq!(rows[0].group("mood"), Some(&SqlValue::Text("happy".to_string())));
        let sql = session.last().sql();
        assert!(sql.contains(
            "AS bucket, \"lab\".\"readings\".\"mood\"::text AS \"mood\", \
             \"lab\".\"readings\".\"score\"::text AS \"score\","
        ));
        assert!(sql.ends_with(
            "GROUP BY bucket, \"lab\".\"readings\".\"mood\", \"lab\".\"readings\".\"score\" \
             ORDER BY bucket, \"lab\".\"readings\".\"mood\", \"lab\".\"readings\".\"score\""
        ));
    }

    #[tokio::test]
    async fn test_missing_fields_fail_before_io() {
        let mut session = RecordingSession::new();
        let model = fixtures::metric();

        let err = time_bucket_query(
            &mut session,
            &model,
            "1 day",
            "time",
            "nonexistent_field",
            &BucketOptions::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::FieldNotFound { .. }));
        assert!(err.to_string().contains("nonexistent_field"));

        let err = time_bucket_query(
            &mut session,
            &model,
            "1 day",
            "nonexistent_time",
            "value",
            &BucketOptions::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("nonexistent_time"));

        let options = BucketOptions::new().filter(QueryFilter::eq("room", "kitchen"));
        let result =
            time_bucket_query(&mut session, &model, "1 day", "time", "value", &options).await;
        assert!(matches!(result, Err(Error::FieldNotFound { .. })));

        assert!(session.statements.is_empty());
    }

    #[tokio::test]
    async fn test_timezone_requires_timestamptz() {
        let mut session = RecordingSession::new();
        let model = fixtures::metric().column("logged_at", ColumnType::Timestamp);
        let options = BucketOptions::new().timezone("UTC");

        let result =
            time_bucket_query(&mut session, &model, "1 day", "logged_at", "value", &options).await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_gapfill_locf() {
        let mut session = RecordingSession::new();
        session.push_result(vec![sparse(0, 20.0), sparse(1, 22.0)]);

        let options = GapfillOptions::new(base(), base() + TimeDelta::hours(4))
            .filter(QueryFilter::eq("sensor_id", 1i64))
            .locf();
        let rows = time_bucket_gapfill_query(
            &mut session,
            &fixtures::metric(),
            "1 hour",
            "time",
            "value",
            &options,
        )
        .await
        .unwrap();

        let values: Vec<Option<f64>> = rows.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![Some(20.0), Some(22.0), Some(22.0), Some(22.0)]);

        let stmt = session.last();
        assert!(stmt
            .sql()
            .contains("WHERE \"time\" >= $3 AND \"time\" <= $4 AND \"sensor_id\" = $5"));
        assert_eq!(stmt.params()[2], SqlValue::Timestamp(base()));
    }

    #[tokio::test]
    async fn test_gapfill_locf_leading_gap_is_null() {
        let mut session = RecordingSession::new();
        session.push_result(vec![
            sparse(1, 20.0),
            sparse(2, 22.0),
            sparse(5, 24.0),
            sparse(6, 26.0),
        ]);

        let options = GapfillOptions::new(base(), base() + TimeDelta::hours(7)).locf();
        let rows = time_bucket_gapfill_query(
            &mut session,
            &fixtures::metric(),
            "1 hour",
            "time",
            "value",
            &options,
        )
        .await
        .unwrap();

        assert_eq!(rows.len(), 7);
        assert_eq!(rows[0].value, None);
        assert_eq!(rows[3].value, Some(22.0));
        assert_eq!(rows[4].value, Some(22.0));
    }

    #[tokio::test]
    async fn test_gapfill_interpolate() {
        let mut session = RecordingSession::new();
        session.push_result(vec![
            sparse(0, 20.0),
            sparse(1, 22.0),
            sparse(4, 24.0),
            sparse(5, 26.0),
        ]);

        let options = GapfillOptions::new(base(), base() + TimeDelta::hours(5)).interpolate();
        let rows = time_bucket_gapfill_query(
            &mut session,
            &fixtures::metric(),
            "1 hour",
            "time",
            "value",
            &options,
        )
        .await
        .unwrap();

        assert_eq!(rows.len(), 6);
        assert!(rows.iter().all(|r| r.value.is_some()));
        assert_eq!(rows[2].value, Some(22.67));
        assert_eq!(rows[3].value, Some(23.33));
    }

    #[tokio::test]
    async fn test_gapfill_without_fill_leaves_nulls() {
        let mut session = RecordingSession::new();
        session.push_result(vec![sparse(0, 20.0), sparse(1, 22.0)]);

        let options = GapfillOptions::new(base(), base() + TimeDelta::hours(4));
        let rows = time_bucket_gapfill_query(
            &mut session,
            &fixtures::metric(),
            "1 hour",
            "time",
            "value",
            &options,
        )
        .await
        .unwrap();

        let values: Vec<Option<f64>> = rows.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![Some(20.0), Some(22.0), None, None]);
        let json = serde_json::to_value(&rows[3]).unwrap();
        assert!(json["avg"].is_null());
    }

    #[tokio::test]
    async fn test_gapfill_monthly_buckets_follow_origin_day() {
        let mid_month = |month: u32| Utc.with_ymd_and_hms(2024, month, 15, 0, 0, 0).unwrap();

        let mut session = RecordingSession::new();
        session.push_result(vec![Row::new()
            .with("bucket", mid_month(2))
            .with("agg_value", 5.0)]);

        let options = GapfillOptions::new(
            Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
        )
        .origin(mid_month(1));
        let rows = time_bucket_gapfill_query(
            &mut session,
            &fixtures::metric(),
            "1 month",
            "time",
            "value",
            &options,
        )
        .await
        .unwrap();

        let buckets: Vec<DateTime<Utc>> = rows.iter().map(|r| r.bucket).collect();
        assert_eq!(buckets, vec![mid_month(1), mid_month(2), mid_month(3)]);
        let values: Vec<Option<f64>> = rows.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![None, Some(5.0), None]);
    }

    #[tokio::test]
    async fn test_gapfill_rejects_oversized_month_width() {
        let mut session = RecordingSession::new();
        let options = GapfillOptions::new(base(), base() + TimeDelta::days(1));

        let result = time_bucket_gapfill_query(
            &mut session,
            &fixtures::metric(),
            "4294967296 months",
            "time",
            "value",
            &options,
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidInterval { .. })));
        assert!(session.statements.is_empty());
    }

    #[tokio::test]
    async fn test_gapfill_invalid_range() {
        let mut session = RecordingSession::new();
        let options = GapfillOptions::new(base(), base() - TimeDelta::hours(1));

        let result = time_bucket_gapfill_query(
            &mut session,
            &fixtures::metric(),
            "1 hour",
            "time",
            "value",
            &options,
        )
        .await;
        assert!(matches!(result, Err(Error::Range { .. })));

        let options = GapfillOptions::new(base(), base() + TimeDelta::hours(1));
        let result = time_bucket_gapfill_query(
            &mut session,
            &fixtures::metric(),
            "1 hour",
            "time",
            "missing",
            &options,
        )
        .await;
        assert!(matches!(result, Err(Error::FieldNotFound { .. })));
        assert!(session.statements.is_empty());
    }
}
