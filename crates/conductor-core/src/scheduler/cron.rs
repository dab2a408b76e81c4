//! 5-field cron expression parsing and next-occurrence resolution.
//!
//! Format: `minute hour day-of-month month day-of-week`, whitespace
//! separated. Field syntax: `*`, explicit lists (`a,b,c`), inclusive ranges
//! (`a-b`), and `*/n` (every n units from the field's minimum). Any other
//! field count is a validation error raised when the schedule is created,
//! not at first fire.
//!
//! The resolver walks forward minute-by-minute from "now, rounded up to the
//! next whole minute," testing the five fields independently, and returns
//! the first minute where all five match. The walk is bounded at one year of
//! minutes; an expression with no occurrence inside the bound is a fatal
//! configuration error, not an infinite loop.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};
use thiserror::Error;

/// Upper bound on the minute walk: one year (366 * 24 * 60).
pub const MAX_CRON_SEARCH_MINUTES: u32 = 527_040;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from cron parsing or resolution.
#[derive(Debug, Error)]
pub enum CronError {
    /// The expression does not have exactly 5 fields.
    #[error("cron expression must have exactly 5 fields, got {0}")]
    FieldCount(usize),

    /// A field failed to parse or is out of range.
    #[error("invalid cron field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// No occurrence within the one-year search bound.
    #[error("cron expression has no occurrence within a year")]
    Unsatisfiable,
}

// ---------------------------------------------------------------------------
// Field representation
// ---------------------------------------------------------------------------

/// One parsed cron field: either a wildcard or an explicit value set.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CronField {
    Any,
    Values(BTreeSet<u32>),
}

impl CronField {
    fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Values(values) => values.contains(&value),
        }
    }
}

fn parse_field(text: &str, min: u32, max: u32) -> Result<CronField, CronError> {
    let invalid = |reason: String| CronError::InvalidField {
        field: text.to_string(),
        reason,
    };

    if text == "*" {
        return Ok(CronField::Any);
    }

    let mut values = BTreeSet::new();
    for part in text.split(',') {
        if let Some(step_text) = part.strip_prefix("*/") {
            // Every n units starting from the field's minimum.
            let n: u32 = step_text
                .parse()
                .map_err(|_| invalid(format!("'{step_text}' is not a number")))?;
            if n == 0 {
                return Err(invalid("step must be > 0".to_string()));
            }
            let mut value = min;
            while value <= max {
                values.insert(value);
                value += n;
            }
        } else if let Some((start_text, end_text)) = part.split_once('-') {
            let start: u32 = start_text
                .parse()
                .map_err(|_| invalid(format!("'{start_text}' is not a number")))?;
            let end: u32 = end_text
                .parse()
                .map_err(|_| invalid(format!("'{end_text}' is not a number")))?;
            if start > end {
                return Err(invalid(format!("range {start}-{end} is inverted")));
            }
            if start < min || end > max {
                return Err(invalid(format!(
                    "range {start}-{end} outside [{min}, {max}]"
                )));
            }
            values.extend(start..=end);
        } else {
            let value: u32 = part
                .parse()
                .map_err(|_| invalid(format!("'{part}' is not a number")))?;
            if value < min || value > max {
                return Err(invalid(format!("{value} outside [{min}, {max}]")));
            }
            values.insert(value);
        }
    }

    if values.is_empty() {
        return Err(invalid("empty field".to_string()));
    }
    Ok(CronField::Values(values))
}

// ---------------------------------------------------------------------------
// CronSchedule
// ---------------------------------------------------------------------------

/// A parsed 5-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronSchedule {
    /// Parse a 5-field cron expression. Day-of-week 7 normalizes to 0
    /// (Sunday).
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let day_of_week = match parse_field(fields[4], 0, 7)? {
            CronField::Any => CronField::Any,
            CronField::Values(values) => {
                CronField::Values(values.into_iter().map(|v| v % 7).collect())
            }
        };

        Ok(Self {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day_of_month: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            day_of_week,
        })
    }

    /// Does this schedule match the given instant (to minute precision)?
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day_of_month.matches(at.day())
            && self.month.matches(at.month())
            && self.day_of_week.matches(at.weekday().num_days_from_sunday())
    }

    /// First matching minute at or after `after` rounded up to the next
    /// whole minute.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
        let mut candidate = after
            .duration_trunc(Duration::minutes(1))
            .expect("minute truncation cannot fail in range");
        if candidate < after {
            candidate += Duration::minutes(1);
        }

        for _ in 0..MAX_CRON_SEARCH_MINUTES {
            if self.matches(candidate) {
                return Ok(candidate);
            }
            candidate += Duration::minutes(1);
        }
        Err(CronError::Unsatisfiable)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    // -------------------------------------------------------------------
    // Parsing
    // -------------------------------------------------------------------

    #[test]
    fn test_wrong_field_count_rejected() {
        assert!(matches!(
            CronSchedule::parse("* * * *"),
            Err(CronError::FieldCount(4))
        ));
        assert!(matches!(
            CronSchedule::parse("0 * * * * *"),
            Err(CronError::FieldCount(6))
        ));
        assert!(matches!(
            CronSchedule::parse(""),
            Err(CronError::FieldCount(0))
        ));
    }

    #[test]
    fn test_all_wildcards_parse() {
        assert!(CronSchedule::parse("* * * * *").is_ok());
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("* 24 * * *").is_err());
        assert!(CronSchedule::parse("* * 0 * *").is_err());
        assert!(CronSchedule::parse("* * 32 * *").is_err());
        assert!(CronSchedule::parse("* * * 13 *").is_err());
        assert!(CronSchedule::parse("* * * * 8").is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(CronSchedule::parse("a * * * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("5-2 * * * *").is_err());
        assert!(CronSchedule::parse(", * * * *").is_err());
    }

    #[test]
    fn test_dow_seven_normalizes_to_sunday() {
        let with_seven = CronSchedule::parse("0 0 * * 7").unwrap();
        let with_zero = CronSchedule::parse("0 0 * * 0").unwrap();
        assert_eq!(with_seven, with_zero);
    }

    // -------------------------------------------------------------------
    // Matching
    // -------------------------------------------------------------------

    #[test]
    fn test_list_and_range_matching() {
        let schedule = CronSchedule::parse("0,30 9-17 * * 1-5").unwrap();
        // Monday 2026-01-05 09:30
        assert!(schedule.matches(at(2026, 1, 5, 9, 30, 0)));
        // Monday 09:15 -- minute not in list
        assert!(!schedule.matches(at(2026, 1, 5, 9, 15, 0)));
        // Sunday 2026-01-04 09:30 -- weekday out of range
        assert!(!schedule.matches(at(2026, 1, 4, 9, 30, 0)));
        // Monday 18:00 -- hour out of range
        assert!(!schedule.matches(at(2026, 1, 5, 18, 0, 0)));
    }

    #[test]
    fn test_step_values_from_minimum() {
        let schedule = CronSchedule::parse("*/15 * * * *").unwrap();
        for minute in [0, 15, 30, 45] {
            assert!(schedule.matches(at(2026, 1, 1, 0, minute, 0)));
        }
        assert!(!schedule.matches(at(2026, 1, 1, 0, 10, 0)));
    }

    #[test]
    fn test_dom_and_dow_both_required() {
        // The resolver tests each field independently: both day-of-month and
        // day-of-week must match.
        let schedule = CronSchedule::parse("0 0 1 * 1").unwrap();
        // 2026-06-01 is a Monday and the 1st.
        assert!(schedule.matches(at(2026, 6, 1, 0, 0, 0)));
        // 2026-01-01 is a Thursday: dom matches, dow doesn't.
        assert!(!schedule.matches(at(2026, 1, 1, 0, 0, 0)));
    }

    // -------------------------------------------------------------------
    // next_occurrence
    // -------------------------------------------------------------------

    #[test]
    fn test_wildcard_next_is_next_whole_minute() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        let now = at(2026, 3, 10, 14, 7, 23);
        assert_eq!(schedule.next_occurrence(now).unwrap(), at(2026, 3, 10, 14, 8, 0));
    }

    #[test]
    fn test_wildcard_exact_minute_is_itself() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        let now = at(2026, 3, 10, 14, 7, 0);
        // Already a whole minute: next occurrence >= now is now.
        assert_eq!(schedule.next_occurrence(now).unwrap(), now);
    }

    #[test]
    fn test_step_minute_divisible() {
        let schedule = CronSchedule::parse("*/5 * * * *").unwrap();
        let now = at(2026, 3, 10, 14, 7, 23);
        let next = schedule.next_occurrence(now).unwrap();
        assert_eq!(next.minute() % 5, 0);
        assert!(next > now);
        assert_eq!(next, at(2026, 3, 10, 14, 10, 0));
    }

    #[test]
    fn test_daily_rollover() {
        let schedule = CronSchedule::parse("0 9 * * *").unwrap();
        // 10:00 -> next 09:00 is tomorrow
        let next = schedule.next_occurrence(at(2026, 3, 10, 10, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 11, 9, 0, 0));
    }

    #[test]
    fn test_weekday_rollover() {
        let schedule = CronSchedule::parse("30 8 * * 1").unwrap();
        // Tuesday 2026-03-10 -> next Monday is 2026-03-16
        let next = schedule.next_occurrence(at(2026, 3, 10, 9, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 16, 8, 30, 0));
    }

    #[test]
    fn test_month_specific_date() {
        let schedule = CronSchedule::parse("0 0 29 2 *").unwrap();
        // Feb 29 exists in 2028 (leap year); searching from mid-2027 finds it.
        let next = schedule.next_occurrence(at(2027, 6, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2028, 2, 29, 0, 0, 0));
    }

    #[test]
    fn test_unsatisfiable_is_fatal_not_infinite() {
        // Feb 30 never exists; the bounded walk reports it.
        let schedule = CronSchedule::parse("0 0 30 2 *").unwrap();
        let err = schedule.next_occurrence(at(2026, 1, 1, 0, 0, 0)).unwrap_err();
        assert!(matches!(err, CronError::Unsatisfiable));
    }
}
