//! Interval Normalizer
//!
//! Chunk widths, policy ages and bucket widths arrive in three shapes:
//!
//! ```text
//! Duration(TimeDelta)      -> whole microseconds
//! Micros(i64)              -> already microseconds
//! Text("INTERVAL '7 days'") -> "<n> <unit>"
//! ```
//!
//! [`normalize`] reduces any of them to an [`IntervalSpec`], which knows how
//! to render itself as a bound SQL expression.

use crate::error::{Error, Result};
use crate::session::StatementBuilder;
use chrono::TimeDelta;
use nom::{
    bytes::complete::tag_no_case,
    character::complete::{alpha1, digit1, multispace0, multispace1, one_of},
    combinator::{eof, opt, recognize},
    sequence::{pair, terminated},
    IResult,
};
use std::fmt;

const MICROS_PER_SECOND: i64 = 1_000_000;

/// A raw interval as declared on a model or passed by a caller
#[derive(Debug, Clone, PartialEq)]
pub enum IntervalInput {
    /// A duration value
    Duration(TimeDelta),
    /// A count of microseconds
    Micros(i64),
    /// Textual form such as `7 days` or `INTERVAL '1 month'`
    Text(String),
}

impl From<TimeDelta> for IntervalInput {
    fn from(d: TimeDelta) -> Self {
        Self::Duration(d)
    }
}

impl From<i64> for IntervalInput {
    fn from(us: i64) -> Self {
        Self::Micros(us)
    }
}

impl From<&str> for IntervalInput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for IntervalInput {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl fmt::Display for IntervalInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duration(d) => write!(f, "{}", d),
            Self::Micros(us) => write!(f, "{}", us),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Units accepted in textual intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl IntervalUnit {
    /// Parse a singular or plural unit name, case-insensitively
    pub fn from_token(token: &str) -> Option<Self> {
        let lower = token.to_lowercase();
        let singular = lower.strip_suffix('s').unwrap_or(&lower);
        match singular {
            "second" => Some(Self::Second),
            "minute" => Some(Self::Minute),
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "year" => Some(Self::Year),
            _ => None,
        }
    }

    /// Length in microseconds for units of fixed length
    pub fn fixed_micros(&self) -> Option<i64> {
        match self {
            Self::Second => Some(MICROS_PER_SECOND),
            Self::Minute => Some(60 * MICROS_PER_SECOND),
            Self::Hour => Some(3600 * MICROS_PER_SECOND),
            Self::Day => Some(86_400 * MICROS_PER_SECOND),
            Self::Week => Some(7 * 86_400 * MICROS_PER_SECOND),
            Self::Month | Self::Year => None,
        }
    }

    pub fn all() -> &'static [IntervalUnit] {
        &[
            Self::Second,
            Self::Minute,
            Self::Hour,
            Self::Day,
            Self::Week,
            Self::Month,
            Self::Year,
        ]
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Second => write!(f, "second"),
            Self::Minute => write!(f, "minute"),
            Self::Hour => write!(f, "hour"),
            Self::Day => write!(f, "day"),
            Self::Week => write!(f, "week"),
            Self::Month => write!(f, "month"),
            Self::Year => write!(f, "year"),
        }
    }
}

/// Which SQL form a normalized interval takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalKind {
    /// Passed as an integer count of microseconds
    Duration,
    /// Passed as an `INTERVAL` value
    Textual,
}

/// Width of a time bucket, as needed for client-side bucket enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketWidth {
    /// Fixed number of microseconds
    Fixed(i64),
    /// Whole calendar months
    Months(u32),
}

/// Canonical form of an interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntervalSpec {
    Duration {
        microseconds: i64,
    },
    Textual {
        quantity: i64,
        unit: IntervalUnit,
        /// `<n> <unit>` with the unit spelled as given
        expression: String,
    },
}

impl IntervalSpec {
    pub fn kind(&self) -> IntervalKind {
        match self {
            Self::Duration { .. } => IntervalKind::Duration,
            Self::Textual { .. } => IntervalKind::Textual,
        }
    }

    pub fn microseconds(&self) -> Option<i64> {
        match self {
            Self::Duration { microseconds } => Some(*microseconds),
            Self::Textual { .. } => None,
        }
    }

    pub fn expression(&self) -> Option<&str> {
        match self {
            Self::Duration { .. } => None,
            Self::Textual { expression, .. } => Some(expression),
        }
    }

    /// Bind this interval and return an SQL expression of type `interval`
    pub fn bind_interval(&self, builder: &mut StatementBuilder) -> String {
        match self {
            Self::Duration { microseconds } => {
                let p = builder.bind(*microseconds);
                format!("({}::bigint * INTERVAL '1 microsecond')", p)
            }
            Self::Textual { expression, .. } => {
                let p = builder.bind(expression.as_str());
                format!("{}::interval", p)
            }
        }
    }

    /// Bind this interval in the form accepted for a chunk width: integer
    /// microseconds for durations, `interval` for text
    pub fn bind_chunk_width(&self, builder: &mut StatementBuilder) -> String {
        match self {
            Self::Duration { microseconds } => {
                let p = builder.bind(*microseconds);
                format!("{}::bigint", p)
            }
            Self::Textual { expression, .. } => {
                let p = builder.bind(expression.as_str());
                format!("{}::interval", p)
            }
        }
    }

    /// Interval text usable inside a quoted DDL literal
    pub fn to_literal(&self) -> String {
        match self {
            Self::Duration { microseconds } => format!("{} microseconds", microseconds),
            Self::Textual { expression, .. } => expression.clone(),
        }
    }

    /// Width used to enumerate buckets; fails when the width does not fit
    pub fn bucket_width(&self) -> Result<BucketWidth> {
        let too_wide = || Error::InvalidInterval {
            raw: self.to_literal(),
            reason: "interval is too wide to bucket by".to_string(),
        };
        match self {
            Self::Duration { microseconds } => Ok(BucketWidth::Fixed(*microseconds)),
            Self::Textual { quantity, unit, .. } => {
                let months = match unit {
                    IntervalUnit::Month => Some(1),
                    IntervalUnit::Year => Some(12),
                    _ => None,
                };
                match (months, unit.fixed_micros()) {
                    (Some(per_unit), _) => u32::try_from(*quantity)
                        .ok()
                        .and_then(|q| q.checked_mul(per_unit))
                        .map(BucketWidth::Months)
                        .ok_or_else(too_wide),
                    (None, Some(micros)) => quantity
                        .checked_mul(micros)
                        .map(BucketWidth::Fixed)
                        .ok_or_else(too_wide),
                    (None, None) => Err(too_wide()),
                }
            }
        }
    }
}

impl fmt::Display for IntervalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_literal())
    }
}

/// Whole microseconds in `d`, rounded to the nearest one
fn round_micros(d: &TimeDelta) -> Option<i64> {
    let whole = d.num_seconds().checked_mul(MICROS_PER_SECOND)?;
    let nanos = i64::from(d.subsec_nanos());
    whole.checked_add((nanos + nanos.signum() * 500) / 1000)
}

/// Normalize a raw interval
pub fn normalize(raw: &IntervalInput) -> Result<IntervalSpec> {
    match raw {
        IntervalInput::Duration(d) => {
            let microseconds = round_micros(d).ok_or_else(|| Error::InvalidInterval {
                raw: raw.to_string(),
                reason: "duration must be an integer number of microseconds".to_string(),
            })?;
            if microseconds == 0 && *d > TimeDelta::zero() {
                return Err(Error::InvalidInterval {
                    raw: raw.to_string(),
                    reason: "duration is shorter than one microsecond".to_string(),
                });
            }
            if microseconds <= 0 {
                return Err(Error::InvalidInterval {
                    raw: raw.to_string(),
                    reason: "duration must be positive".to_string(),
                });
            }
            Ok(IntervalSpec::Duration { microseconds })
        }
        IntervalInput::Micros(us) => {
            if *us <= 0 {
                return Err(Error::InvalidInterval {
                    raw: raw.to_string(),
                    reason: "microsecond count must be positive".to_string(),
                });
            }
            Ok(IntervalSpec::Duration { microseconds: *us })
        }
        IntervalInput::Text(text) => parse_interval_text(text),
    }
}

/// Parse `[INTERVAL] ['"]<n> <unit>['"]`
pub fn parse_interval_text(text: &str) -> Result<IntervalSpec> {
    let invalid = |reason: String| Error::InvalidInterval {
        raw: text.to_string(),
        reason,
    };

    let (_, (number, unit_token)) = interval_expression(text).map_err(|_| {
        invalid("expected format '<number> <unit>', optionally prefixed by INTERVAL".to_string())
    })?;

    let quantity: i64 = number
        .parse()
        .map_err(|_| invalid(format!("'{}' is not a valid integer", number)))?;
    if quantity <= 0 {
        return Err(invalid(format!(
            "interval number {} must be a positive integer",
            quantity
        )));
    }

    let unit = IntervalUnit::from_token(unit_token).ok_or_else(|| {
        let names: Vec<String> = IntervalUnit::all().iter().map(|u| u.to_string()).collect();
        invalid(format!(
            "unknown unit '{}', must be one of: {}",
            unit_token,
            names.join(", ")
        ))
    })?;

    Ok(IntervalSpec::Textual {
        quantity,
        unit,
        expression: format!("{} {}", quantity, unit_token),
    })
}

fn interval_expression(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, _) = multispace0(input)?;
    let (input, _) = opt(terminated(tag_no_case("INTERVAL"), multispace0))(input)?;
    let (input, open) = opt(one_of("'\""))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, number) = recognize(pair(opt(one_of("+-")), digit1))(input)?;
    let (input, _) = multispace1(input)?;
    let (input, unit) = alpha1(input)?;
    let (input, _) = multispace0(input)?;
    let (input, close) = opt(one_of("'\""))(input)?;
    if open != close {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        )));
    }
    let (input, _) = multispace0(input)?;
    let (input, _) = eof(input)?;
    Ok((input, (number, unit)))
}
