use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Upper bound on the minute walk in [`CronExpr::next_fire_after`]: a full
/// leap year of minutes. An expression that matches nothing within that
/// horizon never fires.
const MAX_MINUTE_STEPS: u32 = 366 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("Invalid cron expression: {0}")]
    Invalid(String),
    #[error("Cron expression never fires")]
    NeverFires,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    values: BTreeSet<u8>,
    /// True only for a bare `*`; drives the day-of-month/day-of-week rule.
    wildcard: bool,
}

impl CronField {
    fn contains(&self, value: u8) -> bool {
        self.values.contains(&value)
    }
}

/// A standard 5-field cron expression:
/// `minute hour day-of-month month day-of-week` (Sunday = 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::Invalid(format!(
                "expected 5 fields, got {}",
                fields.len()
            )));
        }

        Ok(CronExpr {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day_of_month: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            day_of_week: parse_field(fields[4], 0, 6)?,
        })
    }

    /// The first matching instant strictly after `after`, at minute
    /// granularity (seconds and subseconds zeroed).
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
        let mut cursor = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(after)
            + Duration::minutes(1);

        for _ in 0..MAX_MINUTE_STEPS {
            if self.matches(cursor) {
                return Ok(cursor);
            }
            cursor += Duration::minutes(1);
        }

        Err(CronError::NeverFires)
    }

    fn matches(&self, t: DateTime<Utc>) -> bool {
        if !self.minute.contains(t.minute() as u8)
            || !self.hour.contains(t.hour() as u8)
            || !self.month.contains(t.month() as u8)
        {
            return false;
        }
        self.day_matches(t)
    }

    /// Standard cron day rule: if both day fields are `*`, match any day; if
    /// one is `*`, the other decides; if neither is, either may match.
    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        let dom_ok = self.day_of_month.contains(t.day() as u8);
        let dow_ok = self
            .day_of_week
            .contains(t.weekday().num_days_from_sunday() as u8);

        match (self.day_of_month.wildcard, self.day_of_week.wildcard) {
            (true, true) => true,
            (false, true) => dom_ok,
            (true, false) => dow_ok,
            (false, false) => dom_ok || dow_ok,
        }
    }
}

impl FromStr for CronExpr {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronExpr::parse(s)
    }
}

fn parse_field(field: &str, min: u8, max: u8) -> Result<CronField, CronError> {
    if field.is_empty() {
        return Err(CronError::Invalid("empty field".to_string()));
    }

    let mut values = BTreeSet::new();
    for term in field.split(',') {
        let (base, step) = match term.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| CronError::Invalid(format!("invalid step in '{term}'")))?;
                if step == 0 {
                    return Err(CronError::Invalid(format!("zero step in '{term}'")));
                }
                (base, step)
            }
            None => (term, 1),
        };

        let (start, end) = if base == "*" {
            (min, max)
        } else if let Some((a, b)) = base.split_once('-') {
            let a = parse_bounded(a, min, max)?;
            let b = parse_bounded(b, min, max)?;
            if a > b {
                return Err(CronError::Invalid(format!("inverted range '{base}'")));
            }
            (a, b)
        } else {
            let a = parse_bounded(base, min, max)?;
            // A stepped single value means "from the value to the field max".
            if term.contains('/') {
                (a, max)
            } else {
                (a, a)
            }
        };

        let mut value = start as u32;
        while value <= end as u32 {
            values.insert(value as u8);
            value += step;
        }
    }

    Ok(CronField {
        values,
        wildcard: field == "*",
    })
}

fn parse_bounded(value: &str, min: u8, max: u8) -> Result<u8, CronError> {
    let parsed: u8 = value
        .parse()
        .map_err(|_| CronError::Invalid(format!("invalid value '{value}'")))?;
    if parsed < min || parsed > max {
        return Err(CronError::Invalid(format!(
            "value {parsed} out of range {min}-{max}"
        )));
    }
    Ok(parsed)
}
