//! Convenience and batch scheduling helpers.
//!
//! Per-type defaults for retries and priority, plus fan-out helpers that
//! stagger `scheduled_time` by `index * delay_between`. Choosing
//! `delay_between = rate_to_delay(per_hour)` gives a per-hour rate limit.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gramdeck_core::error::{GramdeckError, Result};

use crate::engine::Scheduler;
use crate::tasks::{Priority, TaskAction, TaskId, TaskSpec, Target};

/// Retry/priority defaults per task type.
pub const LIKE_DEFAULTS: (u32, Priority) = (3, Priority::Medium);
pub const COMMENT_DEFAULTS: (u32, Priority) = (2, Priority::Medium);
pub const FOLLOW_DEFAULTS: (u32, Priority) = (2, Priority::Medium);
pub const DM_DEFAULTS: (u32, Priority) = (1, Priority::High);

/// Optional overrides for the convenience helpers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOptions {
    #[serde(default)]
    pub device_id: Option<String>,
    /// Defaults to now. For batches, the time of the first task.
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

/// One recipient of a batch DM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub username: String,
    pub message: String,
}

/// Stagger between tasks that yields `rate_per_hour` tasks per hour.
pub fn rate_to_delay(rate_per_hour: u32) -> Result<Duration> {
    if rate_per_hour == 0 {
        return Err(GramdeckError::Scheduler(
            "rate per hour must be greater than 0".into(),
        ));
    }
    Ok(Duration::from_millis(3_600_000 / u64::from(rate_per_hour)))
}

fn build_spec(
    name: String,
    action: TaskAction,
    defaults: (u32, Priority),
    opts: &TaskOptions,
    scheduled_time: DateTime<Utc>,
) -> TaskSpec {
    TaskSpec {
        name,
        action,
        scheduled_time,
        max_retries: opts.max_retries.unwrap_or(defaults.0),
        priority: opts.priority.unwrap_or(defaults.1),
        device_id: opts.device_id.clone(),
    }
}

/// `base + index * delay_between`, saturating at the far future.
fn staggered(base: DateTime<Utc>, index: usize, delay_between: Duration) -> DateTime<Utc> {
    let offset_ms = delay_between
        .as_millis()
        .saturating_mul(index as u128)
        .min(i64::MAX as u128) as i64;
    base.checked_add_signed(chrono::Duration::milliseconds(offset_ms))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Scheduler {
    pub fn schedule_like_task(
        &self,
        target: Target,
        account: Option<String>,
        opts: TaskOptions,
    ) -> TaskId {
        let at = opts.scheduled_time.unwrap_or_else(Utc::now);
        self.schedule_task(build_spec(
            format!("Like {target}"),
            TaskAction::Like { target, account },
            LIKE_DEFAULTS,
            &opts,
            at,
        ))
    }

    pub fn schedule_comment_task(
        &self,
        target: Target,
        text: impl Into<String>,
        opts: TaskOptions,
    ) -> TaskId {
        let at = opts.scheduled_time.unwrap_or_else(Utc::now);
        self.schedule_task(build_spec(
            format!("Comment on {target}"),
            TaskAction::Comment {
                target,
                text: text.into(),
            },
            COMMENT_DEFAULTS,
            &opts,
            at,
        ))
    }

    pub fn schedule_follow_task(&self, username: impl Into<String>, opts: TaskOptions) -> TaskId {
        let username = username.into();
        let at = opts.scheduled_time.unwrap_or_else(Utc::now);
        self.schedule_task(build_spec(
            format!("Follow @{username}"),
            TaskAction::Follow { username },
            FOLLOW_DEFAULTS,
            &opts,
            at,
        ))
    }

    pub fn schedule_dm_task(
        &self,
        username: impl Into<String>,
        message: impl Into<String>,
        opts: TaskOptions,
    ) -> TaskId {
        let username = username.into();
        let at = opts.scheduled_time.unwrap_or_else(Utc::now);
        self.schedule_task(build_spec(
            format!("DM @{username}"),
            TaskAction::Dm {
                username,
                message: message.into(),
            },
            DM_DEFAULTS,
            &opts,
            at,
        ))
    }

    /// One like task per target, `delay_between` apart. Returns ids in target order.
    pub fn schedule_batch_likes(
        &self,
        targets: Vec<Target>,
        delay_between: Duration,
        opts: TaskOptions,
    ) -> Vec<TaskId> {
        let base = opts.scheduled_time.unwrap_or_else(Utc::now);
        let count = targets.len();
        let ids: Vec<TaskId> = targets
            .into_iter()
            .enumerate()
            .map(|(i, target)| {
                self.schedule_task(build_spec(
                    format!("Batch like {}/{}: {}", i + 1, count, target),
                    TaskAction::Like {
                        target,
                        account: None,
                    },
                    LIKE_DEFAULTS,
                    &opts,
                    staggered(base, i, delay_between),
                ))
            })
            .collect();
        tracing::debug!("📦 Batch of {} likes, {:?} apart", ids.len(), delay_between);
        ids
    }

    /// One follow task per username, `delay_between` apart.
    pub fn schedule_batch_follows(
        &self,
        usernames: Vec<String>,
        delay_between: Duration,
        opts: TaskOptions,
    ) -> Vec<TaskId> {
        let base = opts.scheduled_time.unwrap_or_else(Utc::now);
        let count = usernames.len();
        let ids: Vec<TaskId> = usernames
            .into_iter()
            .enumerate()
            .map(|(i, username)| {
                self.schedule_task(build_spec(
                    format!("Batch follow {}/{}: @{}", i + 1, count, username),
                    TaskAction::Follow { username },
                    FOLLOW_DEFAULTS,
                    &opts,
                    staggered(base, i, delay_between),
                ))
            })
            .collect();
        tracing::debug!("📦 Batch of {} follows, {:?} apart", ids.len(), delay_between);
        ids
    }

    /// One DM task per recipient, `delay_between` apart.
    pub fn schedule_batch_dms(
        &self,
        recipients: Vec<DirectMessage>,
        delay_between: Duration,
        opts: TaskOptions,
    ) -> Vec<TaskId> {
        let base = opts.scheduled_time.unwrap_or_else(Utc::now);
        let count = recipients.len();
        let ids: Vec<TaskId> = recipients
            .into_iter()
            .enumerate()
            .map(|(i, dm)| {
                self.schedule_task(build_spec(
                    format!("Batch DM {}/{}: @{}", i + 1, count, dm.username),
                    TaskAction::Dm {
                        username: dm.username,
                        message: dm.message,
                    },
                    DM_DEFAULTS,
                    &opts,
                    staggered(base, i, delay_between),
                ))
            })
            .collect();
        tracing::debug!("📦 Batch of {} DMs, {:?} apart", ids.len(), delay_between);
        ids
    }
}
