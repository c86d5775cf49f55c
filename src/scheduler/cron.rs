//! Cron expression parsing and matching.
//!
//! Supports standard 5-field expressions (minute, hour, day-of-month, month,
//! day-of-week) with `*`, single integers, `a-b` ranges, and comma-separated
//! lists, in any combination. Step values (`*/n`) are not supported. A
//! timestamp matches only when all five fields independently accept it;
//! there is no day-of-month/day-of-week OR special-casing.

use chrono::{DateTime, Datelike, Duration, Local, Timelike};

use crate::error::{ForemanError, Result};

/// How far ahead `next_after` scans for a matching minute: 7 days.
const NEXT_RUN_SCAN_MINUTES: i64 = 7 * 24 * 60;

/// One of the five time-unit slots in a schedule expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronField {
    /// `*`, the full range.
    Any,
    /// An explicit sorted set of accepted values.
    Values(Vec<u32>),
}

impl CronField {
    fn accepts(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Values(values) => values.binary_search(&value).is_ok(),
        }
    }
}

/// A parsed 5-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    pub minute: CronField,
    pub hour: CronField,
    pub day_of_month: CronField,
    pub month: CronField,
    pub day_of_week: CronField,
}

impl CronExpr {
    /// Parse an expression like `"30 9 * * 1-5"`.
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ForemanError::InvalidCron(format!(
                "expected 5 fields, got {} in '{}'",
                fields.len(),
                expression
            )));
        }

        Ok(Self {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day_of_month: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            day_of_week: parse_field(fields[4], 0, 6)?,
        })
    }

    /// Whether the given wall-clock minute matches. All five fields must
    /// accept it.
    pub fn matches(&self, at: DateTime<Local>) -> bool {
        self.minute.accepts(at.minute())
            && self.hour.accepts(at.hour())
            && self.day_of_month.accepts(at.day())
            && self.month.accepts(at.month())
            && self.day_of_week.accepts(at.weekday().num_days_from_sunday())
    }

    /// First matching minute strictly after `from`, scanning minute-by-minute
    /// from the next whole minute up to 7 days ahead. `None` if nothing in
    /// that window matches.
    pub fn next_after(&self, from: DateTime<Local>) -> Option<DateTime<Local>> {
        let floor = from
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(from);
        let mut candidate = floor + Duration::minutes(1);
        for _ in 0..NEXT_RUN_SCAN_MINUTES {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

/// Parse one field: `*`, an integer, an `a-b` range, or a comma list of
/// integers and ranges.
fn parse_field(field: &str, min: u32, max: u32) -> Result<CronField> {
    if field == "*" {
        return Ok(CronField::Any);
    }
    if field.contains('/') {
        return Err(ForemanError::InvalidCron(format!(
            "step values are not supported: '{}'",
            field
        )));
    }

    let mut values = Vec::new();
    for part in field.split(',') {
        if let Some((start, end)) = part.split_once('-') {
            let start = parse_value(start, min, max)?;
            let end = parse_value(end, min, max)?;
            if start > end {
                return Err(ForemanError::InvalidCron(format!(
                    "descending range '{}'",
                    part
                )));
            }
            values.extend(start..=end);
        } else {
            values.push(parse_value(part, min, max)?);
        }
    }

    values.sort_unstable();
    values.dedup();
    Ok(CronField::Values(values))
}

fn parse_value(text: &str, min: u32, max: u32) -> Result<u32> {
    let value: u32 = text
        .trim()
        .parse()
        .map_err(|_| ForemanError::InvalidCron(format!("not a number: '{}'", text)))?;
    if value < min || value > max {
        return Err(ForemanError::InvalidCron(format!(
            "value {} out of range {}-{}",
            value, min, max
        )));
    }
    Ok(value)
}
