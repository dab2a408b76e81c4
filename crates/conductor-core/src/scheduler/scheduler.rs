//! The scheduler: per-task in-process timers plus a backstop poll loop.
//!
//! Each active task with a known `next_run_at` gets one logical timer
//! (invariant: at most one per task id -- arming always aborts the prior
//! handle). The backstop poll scans for due tasks on a coarse interval and
//! fires any that are not timer-armed or already in flight. The dual
//! mechanism exists because in-memory timers die with the process and because
//! the timer primitive cannot represent delays beyond ~24.8 days -- the poll
//! is the recovery path for both.
//!
//! The scheduler is an explicit struct holding its timer map and repository
//! references, instantiated once per process and passed by reference -- never
//! module-level global state. Two different tasks may run concurrently, but
//! a single task never has two firings in flight. Only one scheduler
//! instance should run per persistence backend, or duplicate firings will
//! occur; multi-node coordination is out of scope.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use conductor_types::task::{ScheduleConfig, ScheduledTask, TaskRun, TaskRunStatus, TaskType};
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::repository::task::TaskRepository;
use crate::repository::workflow::WorkflowRepository;
use crate::workflow::engine::WorkflowEngine;

use super::cron::{CronError, CronSchedule};
use super::schedule::next_run_at;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Largest delay the timer primitive can represent: 2^31 - 1 milliseconds
/// (about 24.8 days). Delays beyond this are never armed; the poll loop
/// picks the task up once it is within the pollable horizon.
pub const MAX_TIMER_DELAY_MS: u64 = 2_147_483_647;

/// Default backstop poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Errors + outcomes
// ---------------------------------------------------------------------------

/// Errors from scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("repository error: {0}")]
    Repository(String),
}

impl From<conductor_types::error::RepositoryError> for SchedulerError {
    fn from(e: conductor_types::error::RepositoryError) -> Self {
        SchedulerError::Repository(e.to_string())
    }
}

impl From<CronError> for SchedulerError {
    fn from(e: CronError) -> Self {
        SchedulerError::InvalidSchedule(e.to_string())
    }
}

/// What arming a timer did. `DeferredToPoll` is a recorded deferral (delay
/// beyond [`MAX_TIMER_DELAY_MS`]), not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    Armed,
    DeferredToPoll,
    NotScheduled,
}

/// Input for creating a scheduled task.
#[derive(Debug, Clone)]
pub struct TaskInput {
    pub name: String,
    pub schedule: ScheduleConfig,
    pub workflow_id: Option<Uuid>,
    pub payload: Option<Value>,
    pub max_retries: u32,
    pub created_by: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct Inner<T: TaskRepository, R: WorkflowRepository> {
    tasks: T,
    engine: WorkflowEngine<R>,
    /// Invariant: at most one in-process timer per task id.
    timers: DashMap<Uuid, JoinHandle<()>>,
    /// Tasks currently executing a run (poll skips these).
    in_flight: DashMap<Uuid, ()>,
    shutdown: std::sync::Mutex<CancellationToken>,
    poll_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
    running: AtomicBool,
}

/// Persistence-backed timer system driving task runs and workflow
/// executions.
pub struct Scheduler<T: TaskRepository, R: WorkflowRepository> {
    inner: Arc<Inner<T, R>>,
}

impl<T: TaskRepository, R: WorkflowRepository> Clone for Scheduler<T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: TaskRepository + 'static, R: WorkflowRepository + 'static> Scheduler<T, R> {
    /// Create a scheduler over a task repository and a workflow engine.
    pub fn new(tasks: T, engine: WorkflowEngine<R>) -> Self {
        Self::with_poll_interval(tasks, engine, DEFAULT_POLL_INTERVAL)
    }

    /// Create a scheduler with a custom backstop poll interval.
    pub fn with_poll_interval(tasks: T, engine: WorkflowEngine<R>, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks,
                engine,
                timers: DashMap::new(),
                in_flight: DashMap::new(),
                shutdown: std::sync::Mutex::new(CancellationToken::new()),
                poll_handle: std::sync::Mutex::new(None),
                poll_interval,
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Access the underlying task repository.
    pub fn tasks(&self) -> &T {
        &self.inner.tasks
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.lock().expect("shutdown lock").clone()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Arm timers for every active task with a known `next_run_at` and start
    /// the backstop poll loop.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let token = CancellationToken::new();
        *self.inner.shutdown.lock().expect("shutdown lock") = token.clone();

        let active = self.inner.tasks.list_active_tasks().await?;
        let mut armed = 0usize;
        for task in &active {
            if self.arm_task(task) == ArmOutcome::Armed {
                armed += 1;
            }
        }
        tracing::info!(
            tasks = active.len(),
            armed,
            poll_secs = self.inner.poll_interval.as_secs_f64(),
            "scheduler started"
        );

        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.inner.poll_interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = scheduler.poll_once().await {
                            tracing::error!(error = %e, "backstop poll failed");
                        }
                    }
                }
            }
        });
        *self.inner.poll_handle.lock().expect("poll lock") = Some(handle);

        Ok(())
    }

    /// Stop the poll loop and abort all pending timers. Runs already in
    /// flight complete; they are not interrupted.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner
            .shutdown
            .lock()
            .expect("shutdown lock")
            .cancel();
        if let Some(handle) = self.inner.poll_handle.lock().expect("poll lock").take() {
            handle.abort();
        }
        for entry in self.inner.timers.iter() {
            entry.value().abort();
        }
        self.inner.timers.clear();
        tracing::info!("scheduler stopped");
    }

    /// Whether `start` has been called without a matching `stop`.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Task management
    // -----------------------------------------------------------------------

    /// Validate the schedule, compute the initial `next_run_at`, persist the
    /// task, and arm a timer if the scheduler is running.
    pub async fn create_task(&self, input: TaskInput) -> Result<Uuid, SchedulerError> {
        match &input.schedule {
            ScheduleConfig::Cron { expression } => {
                // Malformed cron is rejected here, not at first fire.
                CronSchedule::parse(expression)?;
            }
            ScheduleConfig::Interval { interval_ms } => {
                if *interval_ms == 0 {
                    return Err(SchedulerError::InvalidSchedule(
                        "interval must be > 0".to_string(),
                    ));
                }
            }
            ScheduleConfig::At { .. } => {}
        }

        let now = Utc::now();
        let task = ScheduledTask {
            id: Uuid::now_v7(),
            name: input.name,
            task_type: input.schedule.task_type(),
            next_run_at: next_run_at(&input.schedule, now, false)?,
            schedule: input.schedule,
            workflow_id: input.workflow_id,
            payload: input.payload,
            max_retries: input.max_retries,
            is_active: true,
            last_run_at: None,
            run_count: 0,
            failure_count: 0,
            created_by: input.created_by,
            created_at: now,
            updated_at: now,
        };
        self.inner.tasks.create_task(&task).await?;

        if self.is_running() {
            self.arm_task(&task);
        }
        tracing::info!(
            task_id = %task.id,
            name = task.name.as_str(),
            next_run = ?task.next_run_at,
            "task created"
        );
        Ok(task.id)
    }

    /// Fetch a task.
    pub async fn get_task(&self, task_id: Uuid) -> Result<ScheduledTask, SchedulerError> {
        self.inner
            .tasks
            .get_task(&task_id)
            .await?
            .ok_or(SchedulerError::TaskNotFound(task_id))
    }

    /// Clear the task's timer and deactivate it. The persisted `next_run_at`
    /// is kept for `resume_task`.
    pub async fn pause_task(&self, task_id: Uuid) -> Result<(), SchedulerError> {
        let mut task = self.get_task(task_id).await?;
        if let Some((_, handle)) = self.inner.timers.remove(&task_id) {
            handle.abort();
        }
        task.is_active = false;
        task.updated_at = Utc::now();
        self.inner.tasks.update_task(&task).await?;
        tracing::info!(task_id = %task_id, "task paused");
        Ok(())
    }

    /// Soft-delete: same mechanics as pause. Run history stays.
    pub async fn cancel_task(&self, task_id: Uuid) -> Result<(), SchedulerError> {
        self.pause_task(task_id).await
    }

    /// Reactivate a task. Re-arms from the stored `next_run_at` when it is
    /// still in the future, otherwise recomputes from the schedule.
    pub async fn resume_task(&self, task_id: Uuid) -> Result<(), SchedulerError> {
        let mut task = self.get_task(task_id).await?;
        let now = Utc::now();

        task.is_active = true;
        if task.next_run_at.is_none_or(|at| at < now) {
            task.next_run_at = next_run_at(&task.schedule, now, false)?;
        }
        task.updated_at = now;
        self.inner.tasks.update_task(&task).await?;

        if self.is_running() {
            self.arm_task(&task);
        }
        tracing::info!(task_id = %task_id, next_run = ?task.next_run_at, "task resumed");
        Ok(())
    }

    /// Run a task immediately, regardless of schedule, without disturbing
    /// the persisted `next_run_at` or the armed timer.
    pub async fn trigger_now(&self, task_id: Uuid) -> Result<(), SchedulerError> {
        // Existence check up front so callers get NotFound synchronously.
        self.get_task(task_id).await?;
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.fire(task_id, false).await;
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// Arm an in-process timer for the task's `next_run_at`, aborting any
    /// prior timer for the same id first.
    pub fn arm_task(&self, task: &ScheduledTask) -> ArmOutcome {
        if let Some((_, prior)) = self.inner.timers.remove(&task.id) {
            prior.abort();
        }

        let Some(next_run) = task.next_run_at else {
            return ArmOutcome::NotScheduled;
        };

        let delay_ms = (next_run - Utc::now()).num_milliseconds().max(0) as u64;
        if delay_ms > MAX_TIMER_DELAY_MS {
            // The timer primitive cannot represent this delay; the poll loop
            // picks the task up once it is within the pollable horizon.
            tracing::debug!(
                task_id = %task.id,
                delay_ms,
                "next run beyond timer ceiling, deferring to poll"
            );
            return ArmOutcome::DeferredToPoll;
        }

        let scheduler = self.clone();
        let task_id = task.id;
        let token = self.shutdown_token();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
                    scheduler.fire(task_id, true).await;
                }
            }
        });
        self.inner.timers.insert(task_id, handle);
        ArmOutcome::Armed
    }

    /// One backstop poll pass: fire due tasks that have no live timer and
    /// are not already in flight.
    async fn poll_once(&self) -> Result<(), SchedulerError> {
        let due = self.inner.tasks.list_due_tasks(Utc::now()).await?;
        for task in due {
            if self.inner.timers.contains_key(&task.id)
                || self.inner.in_flight.contains_key(&task.id)
            {
                continue;
            }
            tracing::debug!(task_id = %task.id, "poll firing due task");
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.fire(task.id, true).await;
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run procedure
    // -----------------------------------------------------------------------

    /// Execute one firing of a task. `reschedule` is false for `trigger_now`,
    /// which must leave `next_run_at` and the armed timer untouched.
    async fn fire(&self, task_id: Uuid, reschedule: bool) {
        // Scheduled paths retire their timer entry first, so a lost race
        // below can never strand a finished handle in the map (the poll
        // would skip the task forever).
        if reschedule {
            self.inner.timers.remove(&task_id);
        }
        // A single task never has two firings in flight.
        if self.inner.in_flight.insert(task_id, ()).is_some() {
            tracing::debug!(task_id = %task_id, "task already in flight, skipping fire");
            return;
        }

        if let Err(e) = self.run_task(task_id, reschedule).await {
            tracing::error!(task_id = %task_id, error = %e, "task run failed to record");
        }
        self.inner.in_flight.remove(&task_id);
    }

    async fn run_task(&self, task_id: Uuid, reschedule: bool) -> Result<(), SchedulerError> {
        let Some(mut task) = self.inner.tasks.get_task(&task_id).await? else {
            tracing::warn!(task_id = %task_id, "fired task no longer exists");
            return Ok(());
        };
        if !task.is_active {
            return Ok(());
        }

        let run = TaskRun {
            id: Uuid::now_v7(),
            task_id,
            status: TaskRunStatus::Running,
            output: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.inner.tasks.create_task_run(&run).await?;

        // Linked workflow -> hand off to the engine (which returns the
        // execution id immediately); otherwise echo the payload.
        let result: Result<Value, String> = match task.workflow_id {
            Some(workflow_id) => self
                .inner
                .engine
                .execute_with_trigger(
                    workflow_id,
                    Some(task_id.to_string()),
                    task.payload.clone(),
                )
                .await
                .map(|execution_id| json!({ "execution_id": execution_id.to_string() }))
                .map_err(|e| e.to_string()),
            None => Ok(task.payload.clone().unwrap_or(Value::Null)),
        };

        let completion = Utc::now();
        task.last_run_at = Some(completion);
        task.run_count += 1;

        match &result {
            Ok(output) => {
                self.inner
                    .tasks
                    .update_task_run(&run.id, TaskRunStatus::Completed, Some(output), None)
                    .await?;
            }
            Err(error) => {
                task.failure_count += 1;
                self.inner
                    .tasks
                    .update_task_run(&run.id, TaskRunStatus::Failed, None, Some(error))
                    .await?;
                tracing::warn!(
                    task_id = %task_id,
                    failures = task.failure_count,
                    error = error.as_str(),
                    "task run failed"
                );
            }
        }

        if task.max_retries > 0 && task.failure_count >= task.max_retries {
            task.is_active = false;
            tracing::warn!(
                task_id = %task_id,
                failures = task.failure_count,
                "task reached its failure budget, auto-pausing"
            );
        }

        if reschedule {
            let is_complete = task.task_type == TaskType::OneTime;
            match next_run_at(&task.schedule, completion, is_complete) {
                Ok(next) => task.next_run_at = next,
                Err(e) => {
                    // A schedule that stops resolving is fatal configuration.
                    tracing::error!(task_id = %task_id, error = %e, "schedule no longer resolves");
                    task.next_run_at = None;
                }
            }
        }

        task.updated_at = completion;
        self.inner.tasks.update_task(&task).await?;

        if reschedule && self.is_running() && task.is_active && task.next_run_at.is_some() {
            self.arm_task(&task);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::{MemoryTaskRepository, MemoryWorkflowRepository};
    use crate::workflow::step_runner::{DelayHandler, HandlerRegistry};
    use chrono::{Duration as ChronoDuration, Timelike};
    use conductor_types::workflow::{StepDefinition, StepType, WorkflowDefinition};
    use std::collections::HashMap;

    fn engine() -> WorkflowEngine<MemoryWorkflowRepository> {
        let mut registry = HandlerRegistry::new();
        registry.register(StepType::Delay, Arc::new(DelayHandler));
        WorkflowEngine::new(MemoryWorkflowRepository::new(), registry)
    }

    fn scheduler() -> Scheduler<MemoryTaskRepository, MemoryWorkflowRepository> {
        Scheduler::with_poll_interval(
            MemoryTaskRepository::new(),
            engine(),
            Duration::from_millis(20),
        )
    }

    fn interval_input(name: &str, interval_ms: u64) -> TaskInput {
        TaskInput {
            name: name.to_string(),
            schedule: ScheduleConfig::Interval { interval_ms },
            workflow_id: None,
            payload: Some(json!({ "hello": "world" })),
            max_retries: 0,
            created_by: None,
        }
    }

    async fn wait_for_runs(
        scheduler: &Scheduler<MemoryTaskRepository, MemoryWorkflowRepository>,
        task_id: Uuid,
        count: usize,
    ) -> Vec<TaskRun> {
        for _ in 0..500 {
            let runs = scheduler.tasks().list_task_runs(&task_id, 100).await.unwrap();
            if runs.len() >= count {
                return runs;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {task_id} never reached {count} run(s)");
    }

    // -------------------------------------------------------------------
    // create_task
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_create_cron_task_first_next_run() {
        let scheduler = scheduler();
        let now = Utc::now();
        let task_id = scheduler
            .create_task(TaskInput {
                name: "fives".to_string(),
                schedule: ScheduleConfig::Cron {
                    expression: "*/5 * * * *".to_string(),
                },
                workflow_id: None,
                payload: None,
                max_retries: 0,
                created_by: None,
            })
            .await
            .unwrap();

        let task = scheduler.get_task(task_id).await.unwrap();
        assert_eq!(task.task_type, TaskType::Cron);
        let next = task.next_run_at.unwrap();
        assert_eq!(next.minute() % 5, 0);
        assert!(next > now);
    }

    #[tokio::test]
    async fn test_create_task_rejects_malformed_cron_at_creation() {
        let scheduler = scheduler();
        let err = scheduler
            .create_task(TaskInput {
                name: "bad".to_string(),
                schedule: ScheduleConfig::Cron {
                    expression: "0 * * * * *".to_string(), // 6 fields
                },
                workflow_id: None,
                payload: None,
                max_retries: 0,
                created_by: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
    }

    #[tokio::test]
    async fn test_create_task_rejects_zero_interval() {
        let scheduler = scheduler();
        let err = scheduler
            .create_task(interval_input("zero", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
    }

    // -------------------------------------------------------------------
    // Timer ceiling
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_arm_beyond_ceiling_defers_to_poll() {
        let scheduler = scheduler();
        let task_id = scheduler
            .create_task(TaskInput {
                name: "far".to_string(),
                schedule: ScheduleConfig::At {
                    at: Utc::now() + ChronoDuration::days(30),
                },
                workflow_id: None,
                payload: None,
                max_retries: 0,
                created_by: None,
            })
            .await
            .unwrap();

        let task = scheduler.get_task(task_id).await.unwrap();
        assert_eq!(scheduler.arm_task(&task), ArmOutcome::DeferredToPoll);
        assert!(!scheduler.inner.timers.contains_key(&task_id));
    }

    #[tokio::test]
    async fn test_arm_without_next_run_is_not_scheduled() {
        let scheduler = scheduler();
        let task_id = scheduler
            .create_task(interval_input("t", 1000))
            .await
            .unwrap();
        let mut task = scheduler.get_task(task_id).await.unwrap();
        task.next_run_at = None;
        assert_eq!(scheduler.arm_task(&task), ArmOutcome::NotScheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_prior_timer() {
        let scheduler = scheduler();
        scheduler.start().await.unwrap();
        let task_id = scheduler
            .create_task(interval_input("t", 3_600_000))
            .await
            .unwrap();
        let task = scheduler.get_task(task_id).await.unwrap();

        assert_eq!(scheduler.arm_task(&task), ArmOutcome::Armed);
        assert_eq!(scheduler.arm_task(&task), ArmOutcome::Armed);
        assert_eq!(scheduler.inner.timers.len(), 1);
        scheduler.stop().await;
    }

    // -------------------------------------------------------------------
    // Firing
    // -------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_one_time_task_fires_once_and_retires() {
        let scheduler = scheduler();
        scheduler.start().await.unwrap();

        let task_id = scheduler
            .create_task(TaskInput {
                name: "once".to_string(),
                schedule: ScheduleConfig::At {
                    at: Utc::now() + ChronoDuration::milliseconds(50),
                },
                workflow_id: None,
                payload: Some(json!("payload-echo")),
                max_retries: 0,
                created_by: None,
            })
            .await
            .unwrap();

        let runs = wait_for_runs(&scheduler, task_id, 1).await;
        assert_eq!(runs[0].status, TaskRunStatus::Completed);
        assert_eq!(runs[0].output, Some(json!("payload-echo")));

        let task = scheduler.get_task(task_id).await.unwrap();
        assert_eq!(task.run_count, 1);
        assert!(task.next_run_at.is_none(), "one-time tasks never re-arm");
        assert!(task.last_run_at.is_some());
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_recurring_task_rearms_after_completion() {
        let scheduler = scheduler();
        scheduler.start().await.unwrap();

        let task_id = scheduler
            .create_task(interval_input("steady", 50))
            .await
            .unwrap();

        wait_for_runs(&scheduler, task_id, 3).await;
        let task = scheduler.get_task(task_id).await.unwrap();
        assert!(task.run_count >= 3);
        assert!(task.next_run_at.is_some(), "recurring tasks re-arm");
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_backstop_fires_task_without_timer() {
        let scheduler = scheduler();

        // Simulate a task left over from a previous process: due in the
        // past, no timer armed (created directly in the repository).
        let now = Utc::now();
        let task = ScheduledTask {
            id: Uuid::now_v7(),
            name: "orphan".to_string(),
            task_type: TaskType::Recurring,
            schedule: ScheduleConfig::Interval { interval_ms: 3_600_000 },
            workflow_id: None,
            payload: Some(json!("from-poll")),
            max_retries: 0,
            is_active: true,
            next_run_at: Some(now - ChronoDuration::seconds(30)),
            last_run_at: None,
            run_count: 0,
            failure_count: 0,
            created_by: None,
            created_at: now,
            updated_at: now,
        };
        scheduler.tasks().create_task(&task).await.unwrap();

        scheduler.start().await.unwrap();
        let runs = wait_for_runs(&scheduler, task.id, 1).await;
        assert_eq!(runs[0].output, Some(json!("from-poll")));
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_workflow_linked_task_starts_execution() {
        let engine = engine();
        let definition = WorkflowDefinition {
            id: Uuid::now_v7(),
            name: "scheduled-flow".to_string(),
            description: None,
            owner_id: Uuid::now_v7(),
            enabled: true,
            triggers: vec![],
            steps: vec![StepDefinition {
                id: "wait".to_string(),
                name: "Wait".to_string(),
                step_type: StepType::Delay,
                config: json!({ "delay_ms": 1 }),
                on_success: None,
                on_failure: None,
                retry: None,
            }],
            variables: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let workflow_id = engine
            .create_workflow(definition, Uuid::now_v7())
            .await
            .unwrap();

        let scheduler = Scheduler::with_poll_interval(
            MemoryTaskRepository::new(),
            engine.clone(),
            Duration::from_millis(20),
        );
        scheduler.start().await.unwrap();

        let task_id = scheduler
            .create_task(TaskInput {
                name: "drive-workflow".to_string(),
                schedule: ScheduleConfig::At {
                    at: Utc::now() + ChronoDuration::milliseconds(30),
                },
                workflow_id: Some(workflow_id),
                payload: Some(json!({ "from": "scheduler" })),
                max_retries: 0,
                created_by: None,
            })
            .await
            .unwrap();

        let runs = wait_for_runs(&scheduler, task_id, 1).await;
        assert_eq!(runs[0].status, TaskRunStatus::Completed);
        let execution_id: Uuid = runs[0].output.as_ref().unwrap()["execution_id"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();

        let execution = engine.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.workflow_id, workflow_id);
        assert_eq!(execution.trigger_id, Some(task_id.to_string()));
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_workflow_run_failure_increments_failure_count() {
        // Task linked to a nonexistent workflow: every run fails.
        let scheduler = scheduler();
        scheduler.start().await.unwrap();

        let task_id = scheduler
            .create_task(TaskInput {
                name: "broken".to_string(),
                schedule: ScheduleConfig::At {
                    at: Utc::now() + ChronoDuration::milliseconds(20),
                },
                workflow_id: Some(Uuid::now_v7()),
                payload: None,
                max_retries: 0,
                created_by: None,
            })
            .await
            .unwrap();

        let runs = wait_for_runs(&scheduler, task_id, 1).await;
        assert_eq!(runs[0].status, TaskRunStatus::Failed);
        assert!(runs[0].error.as_ref().unwrap().contains("not found"));

        let task = scheduler.get_task(task_id).await.unwrap();
        assert_eq!(task.failure_count, 1);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_budget_auto_pauses() {
        let scheduler = scheduler();
        scheduler.start().await.unwrap();

        let task_id = scheduler
            .create_task(TaskInput {
                name: "flaky".to_string(),
                schedule: ScheduleConfig::Interval { interval_ms: 20 },
                workflow_id: Some(Uuid::now_v7()), // never resolves
                payload: None,
                max_retries: 2,
                created_by: None,
            })
            .await
            .unwrap();

        for _ in 0..500 {
            let task = scheduler.get_task(task_id).await.unwrap();
            if !task.is_active {
                assert_eq!(task.failure_count, 2);
                scheduler.stop().await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task never auto-paused");
    }

    // -------------------------------------------------------------------
    // pause / resume / trigger_now
    // -------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_pause_clears_timer_and_deactivates() {
        let scheduler = scheduler();
        scheduler.start().await.unwrap();

        let task_id = scheduler
            .create_task(interval_input("pausable", 3_600_000))
            .await
            .unwrap();
        assert!(scheduler.inner.timers.contains_key(&task_id));

        scheduler.pause_task(task_id).await.unwrap();
        assert!(!scheduler.inner.timers.contains_key(&task_id));
        let task = scheduler.get_task(task_id).await.unwrap();
        assert!(!task.is_active);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_rearms_with_recomputed_next_run() {
        let scheduler = scheduler();
        scheduler.start().await.unwrap();

        let task_id = scheduler
            .create_task(interval_input("resumable", 3_600_000))
            .await
            .unwrap();
        scheduler.pause_task(task_id).await.unwrap();

        // Force the stored next run into the past to exercise recompute.
        let mut task = scheduler.get_task(task_id).await.unwrap();
        task.next_run_at = Some(Utc::now() - ChronoDuration::hours(1));
        scheduler.tasks().update_task(&task).await.unwrap();

        scheduler.resume_task(task_id).await.unwrap();
        let task = scheduler.get_task(task_id).await.unwrap();
        assert!(task.is_active);
        assert!(task.next_run_at.unwrap() > Utc::now());
        assert!(scheduler.inner.timers.contains_key(&task_id));
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_now_runs_without_disturbing_schedule() {
        let scheduler = scheduler();
        scheduler.start().await.unwrap();

        let task_id = scheduler
            .create_task(interval_input("manual", 3_600_000))
            .await
            .unwrap();
        let before = scheduler.get_task(task_id).await.unwrap();
        let scheduled_next = before.next_run_at.unwrap();

        scheduler.trigger_now(task_id).await.unwrap();
        let runs = wait_for_runs(&scheduler, task_id, 1).await;
        assert_eq!(runs[0].status, TaskRunStatus::Completed);

        let after = scheduler.get_task(task_id).await.unwrap();
        assert_eq!(after.run_count, 1);
        assert_eq!(
            after.next_run_at.unwrap(),
            scheduled_next,
            "trigger_now must not disturb the persisted next_run_at"
        );
        assert!(scheduler.inner.timers.contains_key(&task_id));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_operations_on_unknown_task_not_found() {
        let scheduler = scheduler();
        let missing = Uuid::now_v7();
        assert!(matches!(
            scheduler.pause_task(missing).await.unwrap_err(),
            SchedulerError::TaskNotFound(_)
        ));
        assert!(matches!(
            scheduler.resume_task(missing).await.unwrap_err(),
            SchedulerError::TaskNotFound(_)
        ));
        assert!(matches!(
            scheduler.trigger_now(missing).await.unwrap_err(),
            SchedulerError::TaskNotFound(_)
        ));
    }
}
