//! Elapsed-time tracking for tasks.
//!
//! A task stores only two timer fields: the accumulated `time_spent_ms` of
//! finished intervals and an optional `running_start` marker. Nothing ticks
//! in the background. Every observer derives the live value with
//! [`elapsed`] from those two fields and its own notion of "now". A task
//! left running across a restart keeps its marker and the same formula
//! still applies.
//!
//! Starting a running task and stopping an idle one are no-ops that report
//! [`Transition::AlreadyRunning`] / [`Transition::NotRunning`] instead of
//! failing.
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use studio_server::store::{NewClient, NewProject, NewTask, Store};
//! use studio_server::tracker::{self, elapsed};
//!
//! let store = Store::in_memory();
//! # let c = store.create_client(NewClient { name: "c".into(), contact: None }).unwrap();
//! # let p = store.create_project(NewProject { client_id: c.id, name: "p".into(),
//! #     status: None, owner: None, notes: None, due: None }).unwrap();
//! # let task = store.create_task(NewTask { project_id: p.id, title: "t".into(),
//! #     status: None, owner: None, prompt: None, due: None }).unwrap();
//! let t0 = Utc.timestamp_millis_opt(1_000).unwrap();
//! let t1 = Utc.timestamp_millis_opt(4_000).unwrap();
//!
//! let started = tracker::start(&store, task.id, t0).unwrap();
//! assert_eq!(elapsed(&started.task, t1), 3_000);
//!
//! let stopped = tracker::stop(&store, task.id, t1).unwrap();
//! assert_eq!(stopped.task.time_spent_ms, 3_000);
//! assert!(stopped.task.running_start.is_none());
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::store::{StoreError, TaskRepository};
use crate::types::Task;

/// Errors returned by timer operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The task id does not resolve to a stored task.
    #[error("task {0} not found")]
    NotFound(u64),

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a start or stop call did to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The timer was idle and is now running.
    Started,
    /// The timer was running; `added_ms` was folded into the total.
    Stopped { added_ms: u64 },
    /// Start on a running task. Nothing changed.
    AlreadyRunning,
    /// Stop on an idle task. Nothing changed.
    NotRunning,
}

impl Transition {
    /// Returns true if the call left the task untouched.
    pub fn is_noop(self) -> bool {
        matches!(self, Self::AlreadyRunning | Self::NotRunning)
    }

    /// Informational note for no-op transitions.
    pub fn note(self) -> Option<&'static str> {
        match self {
            Self::AlreadyRunning => Some("Already running."),
            Self::NotRunning => Some("Not running."),
            Self::Started | Self::Stopped { .. } => None,
        }
    }
}

/// Result of a start or stop call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerOutcome {
    /// The task as stored after the call.
    pub task: Task,
    pub transition: Transition,
}

/// Counts of running and total tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSummary {
    pub running_count: usize,
    pub total_task_count: usize,
}

/// Milliseconds from `from` to `to`, clamped at zero.
fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}

/// Total active duration of `task` as of `now`, in milliseconds.
///
/// Pure: depends only on the two persisted timer fields and `now`. A
/// `running_start` later than `now` (clock skew) contributes zero.
pub fn elapsed(task: &Task, now: DateTime<Utc>) -> u64 {
    match task.running_start {
        Some(start) => task.time_spent_ms.saturating_add(millis_between(start, now)),
        None => task.time_spent_ms,
    }
}

/// Starts the timer for `task_id` at `now`.
///
/// If the task is already running, nothing is written and the outcome is
/// [`Transition::AlreadyRunning`].
///
/// # Errors
///
/// Returns [`TrackerError::NotFound`] for an unknown id, or
/// [`TrackerError::Store`] if the write fails.
pub fn start<R>(repo: &R, task_id: u64, now: DateTime<Utc>) -> Result<TimerOutcome, TrackerError>
where
    R: TaskRepository + ?Sized,
{
    let task = repo.task(task_id)?.ok_or(TrackerError::NotFound(task_id))?;

    if task.is_running() {
        debug!(task_id, "Start requested but timer already running");
        return Ok(TimerOutcome {
            task,
            transition: Transition::AlreadyRunning,
        });
    }

    let task = repo.put_task(Task {
        running_start: Some(now),
        ..task
    })?;

    info!(task_id, started_at = %now, "Timer started");

    Ok(TimerOutcome {
        task,
        transition: Transition::Started,
    })
}

/// Stops the timer for `task_id` at `now`, folding the interval into the
/// accumulated total.
///
/// If the task is idle, nothing is written and the outcome is
/// [`Transition::NotRunning`].
///
/// # Errors
///
/// Returns [`TrackerError::NotFound`] for an unknown id, or
/// [`TrackerError::Store`] if the write fails.
pub fn stop<R>(repo: &R, task_id: u64, now: DateTime<Utc>) -> Result<TimerOutcome, TrackerError>
where
    R: TaskRepository + ?Sized,
{
    let task = repo.task(task_id)?.ok_or(TrackerError::NotFound(task_id))?;

    let Some(started_at) = task.running_start else {
        debug!(task_id, "Stop requested but timer not running");
        return Ok(TimerOutcome {
            task,
            transition: Transition::NotRunning,
        });
    };

    let added_ms = millis_between(started_at, now);
    let task = repo.put_task(Task {
        time_spent_ms: task.time_spent_ms.saturating_add(added_ms),
        running_start: None,
        ..task
    })?;

    info!(
        task_id,
        added_ms,
        total_ms = task.time_spent_ms,
        "Timer stopped"
    );

    Ok(TimerOutcome {
        task,
        transition: Transition::Stopped { added_ms },
    })
}

/// Counts running tasks against all tasks.
pub fn summary<R>(repo: &R) -> Result<TimerSummary, TrackerError>
where
    R: TaskRepository + ?Sized,
{
    let tasks = repo.tasks()?;
    Ok(TimerSummary {
        running_count: tasks.iter().filter(|t| t.is_running()).count(),
        total_task_count: tasks.len(),
    })
}

/// Renders a duration in milliseconds for display.
///
/// Three tiers: `"1h 2m"` once hours are present, `"3m 4s"` once minutes
/// are present, otherwise `"5s"`. Zero and negative input render `"0s"`.
pub fn format_duration(ms: i64) -> String {
    if ms <= 0 {
        return "0s".to_string();
    }
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// [`format_duration`] for floating-point input; NaN and infinities render
/// `"0s"`.
pub fn format_duration_f64(ms: f64) -> String {
    if !ms.is_finite() {
        return "0s".to_string();
    }
    // Saturating cast; fractions of a millisecond never show.
    format_duration(ms as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewClient, NewProject, NewTask, Store};
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn store_with_task() -> (Store, u64) {
        let store = Store::in_memory();
        let client = store
            .create_client(NewClient {
                name: "Client".to_string(),
                contact: None,
            })
            .unwrap();
        let project = store
            .create_project(NewProject {
                client_id: client.id,
                name: "Project".to_string(),
                status: None,
                owner: None,
                notes: None,
                due: None,
            })
            .unwrap();
        let task = store
            .create_task(NewTask {
                project_id: project.id,
                title: "Task".to_string(),
                status: None,
                owner: None,
                prompt: None,
                due: None,
            })
            .unwrap();
        (store, task.id)
    }

    fn task_with(time_spent_ms: u64, running_start: Option<i64>) -> Task {
        Task {
            id: 1,
            project_id: 1,
            title: "t".to_string(),
            status: None,
            owner: None,
            prompt: None,
            due: None,
            time_spent_ms,
            running_start: running_start.map(at),
            created_at: at(0),
        }
    }

    // ========================================================================
    // elapsed
    // ========================================================================

    #[test]
    fn elapsed_of_idle_task_is_accumulated_time() {
        let task = task_with(2500, None);
        assert_eq!(elapsed(&task, at(0)), 2500);
        assert_eq!(elapsed(&task, at(1_000_000)), 2500);
    }

    #[test]
    fn elapsed_of_running_task_adds_live_interval() {
        let task = task_with(2500, Some(10_000));
        assert_eq!(elapsed(&task, at(10_000)), 2500);
        assert_eq!(elapsed(&task, at(12_000)), 4500);
    }

    #[test]
    fn elapsed_clamps_clock_skew_to_zero() {
        let task = task_with(2500, Some(10_000));
        assert_eq!(elapsed(&task, at(9_000)), 2500);
    }

    #[test]
    fn elapsed_never_below_accumulated_and_non_decreasing() {
        let task = task_with(700, Some(5_000));
        let mut previous = 0;
        for now in (0..20_000).step_by(750) {
            let value = elapsed(&task, at(now));
            assert!(value >= task.time_spent_ms);
            assert!(value >= previous);
            previous = value;
        }
    }

    // ========================================================================
    // start / stop
    // ========================================================================

    #[test]
    fn start_wait_stop_scenario() {
        let (store, id) = store_with_task();

        let started = start(&store, id, at(1000)).unwrap();
        assert_eq!(started.transition, Transition::Started);
        assert_eq!(started.task.running_start, Some(at(1000)));
        assert_eq!(started.task.time_spent_ms, 0);

        assert_eq!(elapsed(&started.task, at(4000)), 3000);

        let stopped = stop(&store, id, at(4000)).unwrap();
        assert_eq!(stopped.transition, Transition::Stopped { added_ms: 3000 });
        assert_eq!(stopped.task.time_spent_ms, 3000);
        assert!(stopped.task.running_start.is_none());

        let stored = store.task(id).unwrap().unwrap();
        assert_eq!(stored, stopped.task);
    }

    #[test]
    fn start_then_immediate_stop_adds_nothing() {
        let (store, id) = store_with_task();
        start(&store, id, at(5000)).unwrap();
        let stopped = stop(&store, id, at(5000)).unwrap();
        assert_eq!(stopped.task.time_spent_ms, 0);
        assert!(stopped.task.running_start.is_none());
    }

    #[test]
    fn double_start_keeps_first_marker() {
        let (store, id) = store_with_task();
        start(&store, id, at(1000)).unwrap();
        let second = start(&store, id, at(2000)).unwrap();

        assert_eq!(second.transition, Transition::AlreadyRunning);
        assert!(second.transition.is_noop());
        assert_eq!(second.transition.note(), Some("Already running."));
        assert_eq!(second.task.running_start, Some(at(1000)));
        assert_eq!(
            store.task(id).unwrap().unwrap().running_start,
            Some(at(1000))
        );
    }

    #[test]
    fn stop_when_idle_is_noop() {
        let (store, id) = store_with_task();
        start(&store, id, at(0)).unwrap();
        stop(&store, id, at(1500)).unwrap();

        let again = stop(&store, id, at(9000)).unwrap();
        assert_eq!(again.transition, Transition::NotRunning);
        assert_eq!(again.transition.note(), Some("Not running."));
        assert_eq!(again.task.time_spent_ms, 1500);
    }

    #[test]
    fn repeated_cycles_accumulate() {
        let (store, id) = store_with_task();
        start(&store, id, at(0)).unwrap();
        stop(&store, id, at(1000)).unwrap();
        start(&store, id, at(5000)).unwrap();
        let outcome = stop(&store, id, at(7500)).unwrap();
        assert_eq!(outcome.task.time_spent_ms, 3500);
    }

    #[test]
    fn stop_with_skewed_clock_adds_zero() {
        let (store, id) = store_with_task();
        start(&store, id, at(10_000)).unwrap();
        let outcome = stop(&store, id, at(8_000)).unwrap();
        assert_eq!(outcome.transition, Transition::Stopped { added_ms: 0 });
        assert_eq!(outcome.task.time_spent_ms, 0);
        assert!(outcome.task.running_start.is_none());
    }

    #[test]
    fn unknown_task_is_not_found() {
        let (store, _) = store_with_task();
        assert!(matches!(
            start(&store, 404, at(0)),
            Err(TrackerError::NotFound(404))
        ));
        assert!(matches!(
            stop(&store, 404, at(0)),
            Err(TrackerError::NotFound(404))
        ));
    }

    #[test]
    fn summary_counts_running_tasks() {
        let (store, id) = store_with_task();
        assert_eq!(
            summary(&store).unwrap(),
            TimerSummary {
                running_count: 0,
                total_task_count: 1
            }
        );
        start(&store, id, at(0)).unwrap();
        assert_eq!(summary(&store).unwrap().running_count, 1);
    }

    #[test]
    fn works_through_trait_object() {
        let (store, id) = store_with_task();
        let repo: &dyn TaskRepository = &store;
        assert_eq!(
            start(repo, id, at(0)).unwrap().transition,
            Transition::Started
        );
    }

    // ========================================================================
    // format_duration
    // ========================================================================

    #[test]
    fn format_duration_tiers() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(45_000), "45s");
        assert_eq!(format_duration(125_000), "2m 5s");
        assert_eq!(format_duration(3_725_000), "1h 2m");
    }

    #[test]
    fn format_duration_edges() {
        assert_eq!(format_duration(-5), "0s");
        assert_eq!(format_duration(999), "0s");
        assert_eq!(format_duration(60_000), "1m 0s");
        assert_eq!(format_duration(3_600_000), "1h 0m");
        assert_eq!(format_duration(90_061_000), "25h 1m");
    }

    #[test]
    fn format_duration_f64_rejects_non_finite() {
        assert_eq!(format_duration_f64(f64::NAN), "0s");
        assert_eq!(format_duration_f64(f64::INFINITY), "0s");
        assert_eq!(format_duration_f64(-1.0), "0s");
        assert_eq!(format_duration_f64(125_000.9), "2m 5s");
    }
}
