//! Scheduled task domain types for Conductor.
//!
//! A `ScheduledTask` is a persisted rule describing when to trigger a
//! workflow (or a bare payload): one-time, fixed-interval, or cron-based.
//! Each firing appends a `TaskRun` record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Schedule configuration
// ---------------------------------------------------------------------------

/// Kind of schedule driving a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    OneTime,
    Recurring,
    Cron,
}

/// When a task should run, variant-matched to its `TaskType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleConfig {
    /// Fire once at a fixed timestamp.
    At { at: DateTime<Utc> },
    /// Fire every `interval_ms` milliseconds, measured from run completion.
    Interval { interval_ms: u64 },
    /// Fire per a 5-field cron expression (minute hour dom month dow).
    Cron { expression: String },
}

impl ScheduleConfig {
    /// The task type this schedule variant corresponds to.
    pub fn task_type(&self) -> TaskType {
        match self {
            ScheduleConfig::At { .. } => TaskType::OneTime,
            ScheduleConfig::Interval { .. } => TaskType::Recurring,
            ScheduleConfig::Cron { .. } => TaskType::Cron,
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduled task
// ---------------------------------------------------------------------------

/// A persisted scheduling rule.
///
/// Mutated by the scheduler on every run (counters, `next_run_at`,
/// `last_run_at`). Cancelled via `is_active = false` rather than hard delete
/// while run history exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// UUIDv7 task ID.
    pub id: Uuid,
    pub name: String,
    pub task_type: TaskType,
    pub schedule: ScheduleConfig,
    /// Workflow to execute when the task fires. When absent the task just
    /// echoes its payload into the run record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    /// Payload handed to the workflow execution (or echoed as run output).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// When > 0, the scheduler auto-pauses the task once `failure_count`
    /// reaches this value.
    #[serde(default)]
    pub max_retries: u32,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_count: u32,
    #[serde(default)]
    pub failure_count: u32,
    /// User (or workflow step) that created the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Task run history
// ---------------------------------------------------------------------------

/// Status of one task firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskRunStatus {
    Running,
    Completed,
    Failed,
}

/// One historical firing of a scheduled task. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    /// UUIDv7 run ID.
    pub id: Uuid,
    /// Parent task ID.
    pub task_id: Uuid,
    pub status: TaskRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_task(schedule: ScheduleConfig) -> ScheduledTask {
        let task_type = schedule.task_type();
        ScheduledTask {
            id: Uuid::now_v7(),
            name: "nightly-report".to_string(),
            task_type,
            schedule,
            workflow_id: Some(Uuid::now_v7()),
            payload: Some(json!({ "report": "daily" })),
            max_retries: 3,
            is_active: true,
            next_run_at: Some(Utc::now()),
            last_run_at: None,
            run_count: 0,
            failure_count: 0,
            created_by: Some(Uuid::now_v7()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    // -----------------------------------------------------------------------
    // ScheduleConfig
    // -----------------------------------------------------------------------

    #[test]
    fn test_schedule_config_task_type() {
        assert_eq!(
            ScheduleConfig::At { at: Utc::now() }.task_type(),
            TaskType::OneTime
        );
        assert_eq!(
            ScheduleConfig::Interval { interval_ms: 1000 }.task_type(),
            TaskType::Recurring
        );
        assert_eq!(
            ScheduleConfig::Cron {
                expression: "*/5 * * * *".to_string()
            }
            .task_type(),
            TaskType::Cron
        );
    }

    #[test]
    fn test_schedule_config_serde_tags() {
        let at = ScheduleConfig::At { at: Utc::now() };
        let json = serde_json::to_string(&at).unwrap();
        assert!(json.contains("\"kind\":\"at\""));

        let interval = ScheduleConfig::Interval { interval_ms: 60_000 };
        let json = serde_json::to_string(&interval).unwrap();
        assert!(json.contains("\"kind\":\"interval\""));
        let parsed: ScheduleConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, interval);

        let cron = ScheduleConfig::Cron {
            expression: "0 9 * * 1-5".to_string(),
        };
        let json = serde_json::to_string(&cron).unwrap();
        assert!(json.contains("\"kind\":\"cron\""));
    }

    #[test]
    fn test_task_type_serde() {
        assert_eq!(
            serde_json::to_string(&TaskType::OneTime).unwrap(),
            "\"ONE_TIME\""
        );
        assert_eq!(
            serde_json::to_string(&TaskType::Recurring).unwrap(),
            "\"RECURRING\""
        );
        assert_eq!(serde_json::to_string(&TaskType::Cron).unwrap(), "\"CRON\"");
    }

    // -----------------------------------------------------------------------
    // ScheduledTask / TaskRun roundtrips
    // -----------------------------------------------------------------------

    #[test]
    fn test_scheduled_task_json_roundtrip() {
        let task = sample_task(ScheduleConfig::Cron {
            expression: "*/5 * * * *".to_string(),
        });
        let json_str = serde_json::to_string(&task).unwrap();
        let parsed: ScheduledTask = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.name, "nightly-report");
        assert_eq!(parsed.task_type, TaskType::Cron);
        assert!(parsed.is_active);
        assert_eq!(parsed.max_retries, 3);
    }

    #[test]
    fn test_task_run_json_roundtrip() {
        let run = TaskRun {
            id: Uuid::now_v7(),
            task_id: Uuid::now_v7(),
            status: TaskRunStatus::Completed,
            output: Some(json!({ "execution_id": "abc" })),
            error: None,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
        };
        let json_str = serde_json::to_string(&run).unwrap();
        let parsed: TaskRun = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.status, TaskRunStatus::Completed);
        assert!(parsed.error.is_none());
    }

    #[test]
    fn test_task_run_status_serde() {
        for status in [
            TaskRunStatus::Running,
            TaskRunStatus::Completed,
            TaskRunStatus::Failed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let parsed: TaskRunStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, status);
        }
    }
}
