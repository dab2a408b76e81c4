//! Next-run computation across the three schedule kinds.

use chrono::{DateTime, Duration, Utc};
use conductor_types::task::ScheduleConfig;

use super::cron::{CronError, CronSchedule};

/// Compute when a task should run next.
///
/// - `At`: the fixed timestamp; once the task has fired (`is_complete`) the
///   answer is `None` and the task retires.
/// - `Interval`: `now + interval_ms`. `now` is the completion time of the
///   current run, so intervals measure from completion, not from firing.
/// - `Cron`: the next matching minute after `now`.
pub fn next_run_at(
    schedule: &ScheduleConfig,
    now: DateTime<Utc>,
    is_complete: bool,
) -> Result<Option<DateTime<Utc>>, CronError> {
    match schedule {
        ScheduleConfig::At { at } => Ok(if is_complete { None } else { Some(*at) }),
        ScheduleConfig::Interval { interval_ms } => {
            Ok(Some(now + Duration::milliseconds(*interval_ms as i64)))
        }
        ScheduleConfig::Cron { expression } => {
            Ok(Some(CronSchedule::parse(expression)?.next_occurrence(now)?))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_one_time_before_and_after_completion() {
        let at = Utc::now() + Duration::hours(1);
        let schedule = ScheduleConfig::At { at };
        assert_eq!(next_run_at(&schedule, Utc::now(), false).unwrap(), Some(at));
        // After firing, a one-time task never re-arms.
        assert_eq!(next_run_at(&schedule, Utc::now(), true).unwrap(), None);
    }

    #[test]
    fn test_interval_relative_to_completion_time() {
        let schedule = ScheduleConfig::Interval { interval_ms: 60_000 };
        let completion = Utc::now();
        let next = next_run_at(&schedule, completion, true).unwrap().unwrap();
        assert_eq!(next, completion + Duration::milliseconds(60_000));
    }

    #[test]
    fn test_cron_next_minute_multiple_of_five() {
        let schedule = ScheduleConfig::Cron {
            expression: "*/5 * * * *".to_string(),
        };
        let now = Utc::now();
        let next = next_run_at(&schedule, now, false).unwrap().unwrap();
        assert_eq!(next.minute() % 5, 0);
        assert!(next > now);
    }

    #[test]
    fn test_cron_invalid_expression_errors() {
        let schedule = ScheduleConfig::Cron {
            expression: "not a cron".to_string(),
        };
        assert!(next_run_at(&schedule, Utc::now(), false).is_err());
    }
}
