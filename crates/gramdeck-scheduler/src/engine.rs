//! Scheduler Engine — arms a timer per task and drives each due task through
//! the concurrency gate, the handler call, and the retry policy.
//!
//! One `Scheduler` is built at startup and shared by cloning the handle.
//! All bookkeeping lives behind a single mutex that is never held across an
//! `.await`, so every status transition is atomic with respect to the others.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use gramdeck_core::config::SchedulerConfig;
use gramdeck_core::error::{GramdeckError, Result};

use crate::gate::ConcurrencyGate;
use crate::handler::HandlerRegistry;
use crate::store::TaskStore;
use crate::tasks::{Task, TaskId, TaskKind, TaskSpec, TaskStatus};

/// Lifecycle logging, silenced by `enable_logging = false`.
macro_rules! lifecycle {
    ($inner:expr, $level:ident, $($arg:tt)+) => {
        if $inner.config.enable_logging {
            tracing::$level!($($arg)+);
        }
    };
}

/// In-process task scheduler. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    handlers: HandlerRegistry,
    gate: ConcurrencyGate,
    state: Mutex<State>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct State {
    store: TaskStore,
    /// Armed timers, including dispatches queued at the gate.
    timers: HashMap<TaskId, JoinHandle<()>>,
    /// Executions in progress. Outlives the `running` status when a running task is cancelled.
    in_flight: HashMap<TaskId, CancellationToken>,
    recurrences: HashMap<String, CancellationToken>,
}

/// Aggregate scheduler statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub paused: usize,
    /// Executions still holding a slot.
    pub in_flight: usize,
    /// Due tasks queued for a free slot.
    pub waiting_for_slot: usize,
    pub max_concurrent_tasks: usize,
}

/// Returned by [`Scheduler::schedule_recurring`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringHandle {
    /// Pass to [`Scheduler::stop_recurring`].
    pub id: String,
    pub first_task_id: TaskId,
}

/// Where a finished attempt leaves its task.
enum Settled {
    Retry(TaskId),
    Terminal,
    Discarded,
}

impl Scheduler {
    /// Create a scheduler. Timers are spawned on the ambient tokio runtime.
    pub fn new(config: SchedulerConfig, handlers: HandlerRegistry) -> Self {
        let gate = ConcurrencyGate::new(config.max_concurrent_tasks);
        if config.enable_logging {
            tracing::info!(
                "⏰ Scheduler ready (max {} concurrent, retry delay {:?}, timeout {:?})",
                gate.max_concurrent(),
                config.retry_delay(),
                config.task_timeout()
            );
        }
        Self {
            inner: Arc::new(Inner {
                config,
                handlers,
                gate,
                state: Mutex::new(State::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Store a new `pending` task and arm its timer. Past times run at the next opportunity.
    pub fn schedule_task(&self, spec: TaskSpec) -> TaskId {
        let id = uuid::Uuid::new_v4().to_string();
        let task = Task::from_spec(id.clone(), spec);
        let scheduled_time = task.scheduled_time;

        lifecycle!(
            self.inner,
            info,
            "📅 Task scheduled: '{}' ({}) [{}] at {}",
            task.name,
            task.id,
            task.kind(),
            scheduled_time.to_rfc3339()
        );

        let mut guard = self.inner.lock();
        let state = &mut *guard;
        state.store.insert(task);
        self.inner.arm_locked(state, &id, delay_until(scheduled_time));
        id
    }

    /// Same as [`schedule_task`](Self::schedule_task) with the scheduled time set to now.
    pub fn schedule_immediate(&self, mut spec: TaskSpec) -> TaskId {
        spec.scheduled_time = Utc::now();
        self.schedule_task(spec)
    }

    /// Schedule `spec` now, then an independent copy every `interval`
    /// until `end_time` passes (forever when `None`) or the recurrence is stopped.
    pub fn schedule_recurring(
        &self,
        spec: TaskSpec,
        interval: Duration,
        end_time: Option<DateTime<Utc>>,
    ) -> RecurringHandle {
        let first_task_id = self.schedule_task(spec.clone());
        let id = format!("recurring-{}", uuid::Uuid::new_v4());
        let stop = self.inner.shutdown.child_token();
        self.inner
            .lock()
            .recurrences
            .insert(id.clone(), stop.clone());

        let interval = interval.max(Duration::from_millis(1));
        let deadline =
            end_time.map(|end| Instant::now() + (end - Utc::now()).to_std().unwrap_or_default());

        lifecycle!(
            self.inner,
            info,
            "🔄 Recurring '{}' every {:?}{}",
            spec.name,
            interval,
            end_time
                .map(|e| format!(" until {}", e.to_rfc3339()))
                .unwrap_or_default()
        );

        let scheduler = self.clone();
        let recurrence_id = id.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if deadline.is_some_and(|d| Instant::now() > d) {
                    lifecycle!(
                        scheduler.inner,
                        info,
                        "🏁 Recurring '{}' reached its end time",
                        spec.name
                    );
                    break;
                }
                let mut next = spec.clone();
                next.scheduled_time = Utc::now();
                scheduler.schedule_task(next);
            }
            scheduler.inner.lock().recurrences.remove(&recurrence_id);
        });

        RecurringHandle { id, first_task_id }
    }

    /// Stop a recurrence. Tasks it already created are left alone.
    pub fn stop_recurring(&self, recurrence_id: &str) -> bool {
        match self.inner.lock().recurrences.remove(recurrence_id) {
            Some(stop) => {
                stop.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_recurrences(&self) -> usize {
        self.inner.lock().recurrences.len()
    }

    /// Force a task to `failed` from any status, clearing its timer.
    /// A running execution is interrupted and its outcome discarded.
    pub fn cancel_task(&self, id: &str) -> bool {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        let Some(task) = state.store.get_mut(id) else {
            return false;
        };
        let previous = task.status;
        task.status = TaskStatus::Failed;
        task.last_error = Some(GramdeckError::Cancelled.to_string());
        lifecycle!(
            self.inner,
            info,
            "🛑 Task cancelled: '{}' ({}) was {}",
            task.name,
            task.id,
            previous
        );

        if let Some(timer) = state.timers.remove(id) {
            timer.abort();
        }
        if let Some(cancel) = state.in_flight.get(id) {
            cancel.cancel();
        }
        self.inner.enforce_retention(state);
        true
    }

    /// Pause a `pending` task. Running and finished tasks cannot be paused.
    pub fn pause_task(&self, id: &str) -> bool {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        let Some(task) = state.store.get_mut(id) else {
            return false;
        };
        match task.status {
            TaskStatus::Paused => true,
            TaskStatus::Pending => {
                task.status = TaskStatus::Paused;
                lifecycle!(self.inner, info, "⏸️ Task paused: '{}' ({})", task.name, task.id);
                if let Some(timer) = state.timers.remove(id) {
                    timer.abort();
                }
                true
            }
            TaskStatus::Running | TaskStatus::Completed | TaskStatus::Failed => false,
        }
    }

    /// Return a paused task to `pending`, re-armed for its original scheduled time.
    pub fn resume_task(&self, id: &str) -> bool {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        let Some(task) = state.store.get_mut(id) else {
            return false;
        };
        if task.status != TaskStatus::Paused {
            return false;
        }
        task.status = TaskStatus::Pending;
        let delay = delay_until(task.scheduled_time);
        lifecycle!(self.inner, info, "▶️ Task resumed: '{}' ({})", task.name, task.id);
        self.inner.arm_locked(state, id, delay);
        true
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.inner.lock().store.get(id).cloned()
    }

    /// Every task, in scheduling order.
    pub fn get_all_tasks(&self) -> Vec<Task> {
        self.inner.lock().store.iter().cloned().collect()
    }

    pub fn get_tasks_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.inner.lock().store.by_status(status)
    }

    pub fn get_tasks_by_type(&self, kind: TaskKind) -> Vec<Task> {
        self.inner.lock().store.by_kind(kind)
    }

    /// Remove all `completed` records. Returns how many were removed.
    pub fn clear_completed_tasks(&self) -> usize {
        let removed = self
            .inner
            .lock()
            .store
            .remove_with_status(TaskStatus::Completed);
        lifecycle!(self.inner, info, "🧹 Cleared {} completed task(s)", removed);
        removed
    }

    /// Remove all `failed` records. Returns how many were removed.
    pub fn clear_failed_tasks(&self) -> usize {
        let removed = self
            .inner
            .lock()
            .store
            .remove_with_status(TaskStatus::Failed);
        lifecycle!(self.inner, info, "🧹 Cleared {} failed task(s)", removed);
        removed
    }

    pub fn get_stats(&self) -> SchedulerStats {
        let state = self.inner.lock();
        let counts = state.store.counts();
        SchedulerStats {
            total: counts.total,
            pending: counts.pending,
            running: counts.running,
            completed: counts.completed,
            failed: counts.failed,
            paused: counts.paused,
            in_flight: state.in_flight.len(),
            waiting_for_slot: self.inner.gate.waiting(),
            max_concurrent_tasks: self.inner.gate.max_concurrent(),
        }
    }

    /// Abort armed timers, interrupt running executions, stop recurrences,
    /// and close the gate. Task records stay readable.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.gate.close();
        let mut state = self.inner.lock();
        let timers = state.timers.len();
        for (_, timer) in state.timers.drain() {
            timer.abort();
        }
        state.recurrences.clear();
        lifecycle!(
            self.inner,
            info,
            "⏹️ Scheduler shut down ({} timer(s) aborted, {} execution(s) interrupted)",
            timers,
            state.in_flight.len()
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the timer that dispatches `id` after `delay`, replacing any previous one.
    fn arm_locked(self: &Arc<Self>, state: &mut State, id: &str, delay: Duration) {
        if self.shutdown.is_cancelled() {
            tracing::debug!("Not arming {} after shutdown", id);
            return;
        }
        let inner = Arc::clone(self);
        let task_id = id.to_string();
        let timer = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            inner.dispatch(task_id).await;
        });
        if let Some(previous) = state.timers.insert(id.to_string(), timer) {
            previous.abort();
        }
    }

    /// Timer fired: wait for a slot, run one attempt, settle the outcome.
    async fn dispatch(self: Arc<Self>, id: TaskId) {
        let permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::debug!("Dispatch of {} dropped: {}", id, e);
                return;
            }
        };

        let Some((task, cancel)) = self.begin(&id) else {
            return;
        };

        lifecycle!(
            self,
            info,
            "🚀 Running '{}' ({}) [{}] attempt {}/{}",
            task.name,
            task.id,
            task.kind(),
            task.retry_count + 1,
            task.max_retries + 1
        );

        let outcome = self.execute(&task, cancel).await;
        let settled = self.settle(&id, outcome);
        drop(permit);

        if let Settled::Discarded = settled {
            tracing::debug!("Outcome of {} discarded", id);
        }
    }

    /// Move a still-pending task to `running`. Anything else aborts silently.
    fn begin(&self, id: &str) -> Option<(Task, CancellationToken)> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let task = state.store.get_mut(id)?;
        if task.status != TaskStatus::Pending {
            tracing::debug!("Skipping {}: status is {}", id, task.status);
            return None;
        }
        task.status = TaskStatus::Running;
        task.executed_time = Some(Utc::now());
        let snapshot = task.clone();

        // The timer that got us here is finished with; detach it.
        state.timers.remove(id);
        let cancel = self.shutdown.child_token();
        state.in_flight.insert(id.to_string(), cancel.clone());
        Some((snapshot, cancel))
    }

    /// Run the handler on its own task, racing it against the timeout and
    /// cancellation. A panicking handler fails the attempt like any error.
    async fn execute(&self, task: &Task, cancel: CancellationToken) -> Result<()> {
        let Some(handler) = self.handlers.get(task.kind()) else {
            return Err(GramdeckError::UnsupportedTask(task.kind().to_string()));
        };
        let attempt = {
            let task = task.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { handler.execute(&task, cancel).await })
        };
        let abort = attempt.abort_handle();

        let timeout = self.config.task_timeout();
        let result = tokio::select! {
            joined = attempt => match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(GramdeckError::Scheduler(format!(
                    "handler panicked: {}",
                    panic_message(e.into_panic())
                ))),
                Err(e) => Err(GramdeckError::Scheduler(format!("handler aborted: {e}"))),
            },
            _ = tokio::time::sleep(timeout) => Err(GramdeckError::Timeout(timeout)),
            _ = cancel.cancelled() => Err(GramdeckError::Cancelled),
        };
        abort.abort();
        cancel.cancel();
        result
    }

    /// Apply the outcome of an attempt, unless the task left `running` meanwhile.
    fn settle(self: &Arc<Self>, id: &str, outcome: Result<()>) -> Settled {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.in_flight.remove(id);
        if let Some(timer) = state.timers.remove(id) {
            timer.abort();
        }

        let Some(task) = state.store.get_mut(id) else {
            return Settled::Discarded;
        };
        if task.status != TaskStatus::Running {
            return Settled::Discarded;
        }

        let settled = match outcome {
            Ok(()) => {
                task.status = TaskStatus::Completed;
                task.last_error = None;
                lifecycle!(self, info, "✅ Task completed: '{}' ({})", task.name, task.id);
                Settled::Terminal
            }
            Err(e) if self.shutdown.is_cancelled() => {
                task.status = TaskStatus::Failed;
                task.last_error = Some(format!("scheduler shut down: {e}"));
                Settled::Terminal
            }
            Err(e) if task.retry_count < task.max_retries => {
                task.retry_count += 1;
                task.status = TaskStatus::Pending;
                lifecycle!(
                    self,
                    warn,
                    "🔁 Task '{}' ({}) failed: {}. Retry {}/{} in {:?}",
                    task.name,
                    task.id,
                    e,
                    task.retry_count,
                    task.max_retries,
                    self.config.retry_delay()
                );
                task.last_error = Some(e.to_string());
                Settled::Retry(task.id.clone())
            }
            Err(e) => {
                task.status = TaskStatus::Failed;
                lifecycle!(
                    self,
                    warn,
                    "❌ Task '{}' ({}) failed after {} attempt(s): {}",
                    task.name,
                    task.id,
                    task.retry_count + 1,
                    e
                );
                task.last_error = Some(e.to_string());
                Settled::Terminal
            }
        };

        match &settled {
            Settled::Retry(task_id) => self.arm_locked(state, task_id, self.config.retry_delay()),
            Settled::Terminal => self.enforce_retention(state),
            Settled::Discarded => {}
        }
        settled
    }

    fn enforce_retention(&self, state: &mut State) {
        if let Some(keep) = self.config.max_terminal_tasks {
            let evicted = state.store.evict_terminal(keep);
            if !evicted.is_empty() {
                tracing::debug!("🗑️ Evicted {} finished task record(s)", evicted.len());
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "non-string panic payload".into()),
    }
}

/// Time left until `at`, zero if it has passed.
fn delay_until(at: DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::TaskHandler;
    use crate::tasks::{TaskAction, Target};
    use async_trait::async_trait;

    struct Succeed;

    #[async_trait]
    impl TaskHandler for Succeed {
        async fn execute(&self, _task: &Task, _cancel: CancellationToken) -> Result<()> {
            Ok(())
        }
    }

    fn like_spec() -> TaskSpec {
        TaskSpec::new(
            "like",
            TaskAction::Like {
                target: Target::Hashtag("coffee".into()),
                account: None,
            },
        )
    }

    fn quiet_config() -> SchedulerConfig {
        SchedulerConfig {
            enable_logging: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_delay_until_past_is_zero() {
        let past = Utc::now() - chrono::Duration::seconds(10);
        assert_eq!(delay_until(past), Duration::ZERO);
        let future = Utc::now() + chrono::Duration::seconds(10);
        assert!(delay_until(future) > Duration::from_secs(9));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "non-string panic payload");
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let scheduler = Scheduler::new(quiet_config(), HandlerRegistry::new());
        assert!(!scheduler.cancel_task("nope"));
        assert!(!scheduler.pause_task("nope"));
        assert!(!scheduler.resume_task("nope"));
        assert!(scheduler.get_task("nope").is_none());
        assert!(!scheduler.stop_recurring("nope"));
        assert_eq!(scheduler.get_stats().total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_future_task_stays_pending() {
        let scheduler = Scheduler::new(
            quiet_config(),
            HandlerRegistry::with_handler(Arc::new(Succeed)),
        );
        let id = scheduler.schedule_task(like_spec().at(Utc::now() + chrono::Duration::hours(1)));
        tokio::time::sleep(Duration::from_secs(60)).await;
        let task = scheduler.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.executed_time.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_handler_consumes_retries() {
        let scheduler = Scheduler::new(quiet_config(), HandlerRegistry::new());
        let id = scheduler.schedule_immediate(like_spec().max_retries(2));
        tokio::time::sleep(Duration::from_secs(120)).await;

        let task = scheduler.get_task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 2);
        assert!(task.last_error.unwrap().contains("No handler registered"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_cap() {
        let config = SchedulerConfig {
            max_terminal_tasks: Some(2),
            ..quiet_config()
        };
        let scheduler = Scheduler::new(config, HandlerRegistry::with_handler(Arc::new(Succeed)));
        let ids: Vec<_> = (0..4)
            .map(|_| scheduler.schedule_immediate(like_spec()))
            .collect();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let stats = scheduler.get_stats();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.total, 2);
        assert!(scheduler.get_task(&ids[3]).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_dispatch() {
        let scheduler = Scheduler::new(
            quiet_config(),
            HandlerRegistry::with_handler(Arc::new(Succeed)),
        );
        let id = scheduler.schedule_task(like_spec().at(Utc::now() + chrono::Duration::seconds(5)));
        scheduler.shutdown();
        assert!(scheduler.is_shut_down());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(scheduler.get_task(&id).unwrap().status, TaskStatus::Pending);
    }
}
