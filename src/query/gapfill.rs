//! Client-side gap filling
//!
//! The database returns one row per bucket that has data. This module lays
//! those rows over the full list of bucket starts in the requested range and
//! fills the holes:
//!
//! ```text
//! sparse:       20   22    .    .   24   26
//! Null:         20   22  null null  24   26
//! Locf:         20   22   22   22   24   26
//! Interpolate:  20   22 22.67 23.33 24   26
//! ```
//!
//! Bucket starts are computed the same way `time_bucket` aligns them, from
//! a fixed origin, so enumerated and returned buckets coincide.

use super::ast::{AggregationFunc, BucketRow};
use crate::error::{Error, Result};
use crate::interval::BucketWidth;
use crate::session::SqlValue;
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use std::collections::BTreeMap;

/// Upper bound on enumerated buckets per series
pub const MAX_GAPFILL_BUCKETS: usize = 100_000;

/// How empty buckets are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillPolicy {
    /// Leave empty buckets null
    #[default]
    Null,
    /// Repeat the last known value
    Locf,
    /// Interpolate linearly between the known neighbours
    Interpolate,
}

impl FillPolicy {
    /// Policy for the two caller flags; interpolation wins over LOCF
    pub fn from_flags(use_interpolate: bool, use_locf: bool) -> Self {
        match (use_interpolate, use_locf) {
            (true, true) => {
                tracing::warn!("Both interpolate and locf requested, using interpolate");
                Self::Interpolate
            }
            (true, false) => Self::Interpolate,
            (false, true) => Self::Locf,
            (false, false) => Self::Null,
        }
    }
}

/// Default origin of fixed-width buckets, 2000-01-03 00:00 UTC (a Monday)
const DEFAULT_FIXED_ORIGIN_MICROS: i64 = 946_857_600_000_000;

/// Default origin of month-based buckets, January 2000
const DEFAULT_ORIGIN_MONTH: i64 = 2000 * 12;

fn month_index(ts: &DateTime<Utc>) -> i64 {
    ts.year() as i64 * 12 + ts.month0() as i64
}

fn month_start(index: i64) -> Option<DateTime<Utc>> {
    let year = i32::try_from(index.div_euclid(12)).ok()?;
    let month = index.rem_euclid(12) as u32 + 1;
    let date = NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

fn month_origin(origin: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match origin {
        Some(origin) => Some(origin),
        None => month_start(DEFAULT_ORIGIN_MONTH),
    }
}

/// `origin` moved by a signed number of calendar months; the day is
/// clamped to the end of shorter months
fn shift_months(origin: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let count = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        origin.checked_add_months(count)
    } else {
        origin.checked_sub_months(count)
    }
}

/// Index of the month bucket whose start is in the same month as `bucket`
fn month_bucket_index(months: i64, origin: &DateTime<Utc>, bucket: &DateTime<Utc>) -> i64 {
    (month_index(bucket) - month_index(origin)).div_euclid(months)
}

/// Start of the bucket containing `ts`
///
/// Month buckets keep the origin's day and time of day, so an origin on
/// the 15th yields buckets starting on the 15th.
pub fn align(
    width: BucketWidth,
    origin: Option<DateTime<Utc>>,
    ts: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match width {
        BucketWidth::Fixed(micros) => {
            let origin = origin
                .map(|o| o.timestamp_micros())
                .unwrap_or(DEFAULT_FIXED_ORIGIN_MICROS);
            let offset = ts.timestamp_micros().checked_sub(origin)?;
            let start = offset.div_euclid(micros).checked_mul(micros)?.checked_add(origin)?;
            DateTime::from_timestamp_micros(start)
        }
        BucketWidth::Months(months) => {
            let months = i64::from(months);
            let origin = month_origin(origin)?;
            let index = month_bucket_index(months, &origin, &ts);
            let start = shift_months(origin, index.checked_mul(months)?)?;
            if start <= ts {
                Some(start)
            } else {
                // ts falls in the same month but before the origin's day
                shift_months(origin, (index - 1).checked_mul(months)?)
            }
        }
    }
}

fn advance(
    width: BucketWidth,
    origin: Option<DateTime<Utc>>,
    bucket: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match width {
        BucketWidth::Fixed(micros) => {
            DateTime::from_timestamp_micros(bucket.timestamp_micros().checked_add(micros)?)
        }
        BucketWidth::Months(months) => {
            // Step from the origin rather than the previous bucket so a
            // clamped day (Jan 31 -> Feb 29) does not stick
            let months = i64::from(months);
            let origin = month_origin(origin)?;
            let next = month_bucket_index(months, &origin, &bucket).checked_add(1)?;
            shift_months(origin, next.checked_mul(months)?)
        }
    }
}

/// Every bucket start from the bucket containing `start` up to, but not
/// including, `finish`
pub fn bucket_starts(
    width: BucketWidth,
    origin: Option<DateTime<Utc>>,
    start: DateTime<Utc>,
    finish: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>> {
    if finish <= start {
        return Err(Error::Range { start, finish });
    }
    let out_of_range = || Error::Configuration("bucket start out of representable range".to_string());

    let mut starts = Vec::new();
    let mut bucket = align(width, origin, start).ok_or_else(out_of_range)?;
    while bucket < finish {
        if starts.len() >= MAX_GAPFILL_BUCKETS {
            return Err(Error::Configuration(format!(
                "gapfill range covers more than {} buckets",
                MAX_GAPFILL_BUCKETS
            )));
        }
        starts.push(bucket);
        bucket = advance(width, origin, bucket).ok_or_else(out_of_range)?;
    }
    Ok(starts)
}

struct Series {
    groups: Vec<(String, SqlValue)>,
    values: BTreeMap<DateTime<Utc>, Option<f64>>,
}

/// Lay sparse rows over `starts` and fill the gaps
///
/// Rows are split into one series per distinct grouping key. Buckets that
/// have data but fall outside `starts` are kept. With no rows and no
/// grouping columns, a single all-empty series is produced.
pub fn densify(
    rows: Vec<BucketRow>,
    starts: &[DateTime<Utc>],
    aggregate: AggregationFunc,
    policy: FillPolicy,
    decimal_places: Option<u32>,
    grouped: bool,
) -> Vec<BucketRow> {
    let mut series: Vec<Series> = Vec::new();
    for row in rows {
        let idx = match series.iter().position(|s| s.groups == row.groups) {
            Some(idx) => idx,
            None => {
                series.push(Series {
                    groups: row.groups.clone(),
                    values: BTreeMap::new(),
                });
                series.len() - 1
            }
        };
        series[idx].values.insert(row.bucket, row.value);
    }
    if series.is_empty() && !grouped {
        series.push(Series {
            groups: Vec::new(),
            values: BTreeMap::new(),
        });
    }

    let mut out = Vec::new();
    for (order, mut s) in series.into_iter().enumerate() {
        for start in starts {
            s.values.entry(*start).or_insert(None);
        }
        let (buckets, mut values): (Vec<_>, Vec<_>) = s.values.into_iter().unzip();
        fill(&buckets, &mut values, policy, decimal_places);

        for (bucket, value) in buckets.into_iter().zip(values) {
            out.push((
                order,
                BucketRow {
                    bucket,
                    aggregate,
                    value,
                    groups: s.groups.clone(),
                },
            ));
        }
    }

    out.sort_by(|(a_order, a), (b_order, b)| a.bucket.cmp(&b.bucket).then(a_order.cmp(b_order)));
    out.into_iter().map(|(_, row)| row).collect()
}

fn fill(
    buckets: &[DateTime<Utc>],
    values: &mut [Option<f64>],
    policy: FillPolicy,
    decimal_places: Option<u32>,
) {
    match policy {
        FillPolicy::Null => {}
        FillPolicy::Locf => {
            let mut last = None;
            for value in values.iter_mut() {
                if value.is_some() {
                    last = *value;
                } else {
                    *value = last;
                }
            }
        }
        FillPolicy::Interpolate => {
            let known: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_some()).collect();
            for pair in known.windows(2) {
                let (lo, hi) = (pair[0], pair[1]);
                let (Some(v0), Some(v1)) = (values[lo], values[hi]) else {
                    continue;
                };
                let t0 = buckets[lo].timestamp_micros() as f64;
                let span = buckets[hi].timestamp_micros() as f64 - t0;
                for i in lo + 1..hi {
                    let fraction = (buckets[i].timestamp_micros() as f64 - t0) / span;
                    values[i] = Some(round(v0 + (v1 - v0) * fraction, decimal_places));
                }
            }
        }
    }
}

fn round(value: f64, decimal_places: Option<u32>) -> f64 {
    match decimal_places {
        Some(places) => {
            let factor = 10f64.powi(places as i32);
            (value * factor).round() / factor
        }
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn row(hour: u32, value: f64) -> BucketRow {
        BucketRow::new(at(hour), AggregationFunc::Avg, Some(value))
    }

    const HOUR: BucketWidth = BucketWidth::Fixed(3_600_000_000);

    fn fill_avg(
        rows: Vec<BucketRow>,
        starts: &[DateTime<Utc>],
        policy: FillPolicy,
        decimal_places: Option<u32>,
    ) -> Vec<BucketRow> {
        let grouped = rows.iter().any(|r| !r.groups.is_empty());
        densify(rows, starts, AggregationFunc::Avg, policy, decimal_places, grouped)
    }

    #[test]
    fn test_align_fixed_and_months() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 34, 56).unwrap();
        assert_eq!(align(HOUR, None, ts), Some(at(12)));

        let day = BucketWidth::Fixed(86_400_000_000);
        assert_eq!(align(day, None, ts), Some(at(0)));

        // Weekly buckets start on Mondays
        let week = BucketWidth::Fixed(7 * 86_400_000_000);
        let monday = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let thursday = Utc.with_ymd_and_hms(2024, 1, 4, 8, 0, 0).unwrap();
        assert_eq!(align(week, None, thursday), Some(monday));

        let quarter = BucketWidth::Months(3);
        let may = Utc.with_ymd_and_hms(2024, 5, 17, 0, 0, 0).unwrap();
        assert_eq!(
            align(quarter, None, may),
            Some(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_align_with_origin() {
        let origin = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 3, 10, 0).unwrap();
        assert_eq!(
            align(HOUR, Some(origin), ts),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 2, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_month_buckets_keep_origin_day() {
        let day = |m: u32, d: u32| Utc.with_ymd_and_hms(2024, m, d, 0, 0, 0).unwrap();
        let month = BucketWidth::Months(1);
        let origin = Some(day(1, 15));

        assert_eq!(align(month, origin, day(1, 20)), Some(day(1, 15)));
        assert_eq!(align(month, origin, day(2, 10)), Some(day(1, 15)));
        assert_eq!(align(month, origin, day(2, 15)), Some(day(2, 15)));

        let starts = bucket_starts(month, origin, day(1, 20), day(4, 1)).unwrap();
        assert_eq!(starts, vec![day(1, 15), day(2, 15), day(3, 15)]);

        let rows = vec![BucketRow::new(day(2, 15), AggregationFunc::Avg, Some(5.0))];
        let dense = fill_avg(rows, &starts, FillPolicy::Null, Some(2));
        let buckets: Vec<DateTime<Utc>> = dense.iter().map(|r| r.bucket).collect();
        assert_eq!(buckets, starts);
        let values: Vec<Option<f64>> = dense.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![None, Some(5.0), None]);
    }

    #[test]
    fn test_month_buckets_from_end_of_month_origin() {
        let day = |m: u32, d: u32| Utc.with_ymd_and_hms(2024, m, d, 0, 0, 0).unwrap();
        let month = BucketWidth::Months(1);
        let origin = Some(day(1, 31));

        let starts = bucket_starts(month, origin, day(1, 31), day(5, 1)).unwrap();
        assert_eq!(starts, vec![day(1, 31), day(2, 29), day(3, 31), day(4, 30)]);

        // Before the clamped February start
        assert_eq!(align(month, origin, day(2, 28)), Some(day(1, 31)));
    }

    #[test]
    fn test_bucket_starts() {
        let starts = bucket_starts(HOUR, None, at(0), at(4)).unwrap();
        assert_eq!(starts, vec![at(0), at(1), at(2), at(3)]);

        let months = bucket_starts(
            BucketWidth::Months(1),
            None,
            Utc.with_ymd_and_hms(2023, 11, 15, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();
        assert_eq!(months.len(), 3);
        assert_eq!(months[2], Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_bucket_starts_range_errors() {
        assert!(matches!(
            bucket_starts(HOUR, None, at(5), at(5)),
            Err(Error::Range { .. })
        ));
        assert!(matches!(
            bucket_starts(HOUR, None, at(5), at(4)),
            Err(Error::Range { .. })
        ));

        let second = BucketWidth::Fixed(1_000_000);
        let far = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            bucket_starts(second, None, at(0), far),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_null_fill() {
        let starts = bucket_starts(HOUR, None, at(0), at(4)).unwrap();
        let out = fill_avg(vec![row(0, 20.0), row(1, 22.0)], &starts, FillPolicy::Null, None);
        let values: Vec<Option<f64>> = out.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![Some(20.0), Some(22.0), None, None]);
    }

    #[test]
    fn test_locf_fill_keeps_leading_nulls() {
        let starts = bucket_starts(HOUR, None, at(0), at(7)).unwrap();
        let rows = vec![row(1, 20.0), row(2, 22.0), row(5, 24.0), row(6, 26.0)];

        let out = fill_avg(rows, &starts, FillPolicy::Locf, None);
        let values: Vec<Option<f64>> = out.iter().map(|r| r.value).collect();
        assert_eq!(
            values,
            vec![None, Some(20.0), Some(22.0), Some(22.0), Some(22.0), Some(24.0), Some(26.0)]
        );
    }

    #[test]
    fn test_interpolate_fill() {
        let starts = bucket_starts(HOUR, None, at(0), at(5)).unwrap();
        let rows = vec![row(0, 20.0), row(1, 22.0), row(4, 24.0), row(5, 26.0)];

        let out = fill_avg(rows, &starts, FillPolicy::Interpolate, Some(2));

        // The bucket at hour 5 has data and is kept past the range end
        assert_eq!(out.len(), 6);
        assert_eq!(out[2].value, Some(22.67));
        assert_eq!(out[3].value, Some(23.33));
        assert_eq!(out[5].bucket, at(5));
    }

    #[test]
    fn test_interpolate_leaves_edges_null() {
        let starts = bucket_starts(HOUR, None, at(0), at(5)).unwrap();
        let out = fill_avg(vec![row(2, 10.0)], &starts, FillPolicy::Interpolate, None);
        let values: Vec<Option<f64>> = out.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![None, None, Some(10.0), None, None]);
    }

    #[test]
    fn test_grouped_series_fill_independently() {
        let starts = bucket_starts(HOUR, None, at(0), at(3)).unwrap();
        let mut a = row(0, 1.0);
        a.groups.push(("sensor_id".to_string(), SqlValue::Int(1)));
        let mut b = row(1, 5.0);
        b.groups.push(("sensor_id".to_string(), SqlValue::Int(2)));

        let out = fill_avg(vec![a, b], &starts, FillPolicy::Locf, None);

        assert_eq!(out.len(), 6);
        assert_eq!(out[0].group("sensor_id"), Some(&SqlValue::Int(1)));
        assert_eq!(out[1].group("sensor_id"), Some(&SqlValue::Int(2)));
        assert_eq!(out[1].value, None);
        assert_eq!(out[4].value, Some(1.0));
        assert_eq!(out[5].value, Some(5.0));
    }

    #[test]
    fn test_empty_rows_produce_null_series() {
        let starts = bucket_starts(HOUR, None, at(0), at(2)).unwrap();
        let out = fill_avg(Vec::new(), &starts, FillPolicy::Locf, None);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.value.is_none()));
    }

    #[test]
    fn test_both_flags_prefer_interpolate() {
        assert_eq!(FillPolicy::from_flags(true, true), FillPolicy::Interpolate);
        assert_eq!(FillPolicy::from_flags(false, true), FillPolicy::Locf);
        assert_eq!(FillPolicy::from_flags(false, false), FillPolicy::Null);
    }
}
