//! Job plans — a TOML file describing what `gramdeck run` should schedule.
//!
//! ```toml
//! [[job]]
//! kind = "batch_likes"
//! hashtags = ["streetphoto", "filmisnotdead"]
//! rate_per_hour = 30
//!
//! [[job]]
//! kind = "recurring"
//! every_secs = 3600
//! action = { type = "story_view" }
//! ```
//!
//! Times are quoted RFC 3339 strings, e.g. `scheduled_time = "2026-10-18T09:00:00Z"`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use gramdeck_scheduler::{
    DirectMessage, Scheduler, Target, TaskAction, TaskOptions, TaskSpec, rate_to_delay,
};

#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    #[serde(default, rename = "job")]
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    BatchLikes {
        #[serde(default)]
        hashtags: Vec<String>,
        #[serde(default)]
        users: Vec<String>,
        rate_per_hour: u32,
        #[serde(default)]
        options: TaskOptions,
    },
    BatchFollows {
        usernames: Vec<String>,
        rate_per_hour: u32,
        #[serde(default)]
        options: TaskOptions,
    },
    BatchDms {
        messages: Vec<DirectMessage>,
        rate_per_hour: u32,
        #[serde(default)]
        options: TaskOptions,
    },
    Comment {
        target: Target,
        text: String,
        #[serde(default)]
        options: TaskOptions,
    },
    StoryView {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        options: TaskOptions,
    },
    Recurring {
        #[serde(default)]
        name: Option<String>,
        every_secs: u64,
        #[serde(default)]
        until: Option<DateTime<Utc>>,
        action: TaskAction,
        #[serde(default)]
        options: TaskOptions,
    },
}

/// What a plan put on the scheduler.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub tasks: usize,
    pub recurrences: usize,
}

impl Plan {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid plan {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let plan: Plan = toml::from_str(content)?;
        for job in &plan.jobs {
            job.validate()?;
        }
        Ok(plan)
    }

    /// Put every job on `scheduler`.
    pub fn schedule(self, scheduler: &Scheduler) -> Result<Scheduled> {
        let mut scheduled = Scheduled::default();
        for job in self.jobs {
            match job {
                Job::BatchLikes {
                    hashtags,
                    users,
                    rate_per_hour,
                    options,
                } => {
                    let targets = hashtags
                        .into_iter()
                        .map(Target::Hashtag)
                        .chain(users.into_iter().map(Target::User))
                        .collect();
                    let delay = rate_to_delay(rate_per_hour)?;
                    let ids = scheduler.schedule_batch_likes(targets, delay, options);
                    scheduled.tasks += ids.len();
                }
                Job::BatchFollows {
                    usernames,
                    rate_per_hour,
                    options,
                } => {
                    let delay = rate_to_delay(rate_per_hour)?;
                    scheduled.tasks +=
                        scheduler.schedule_batch_follows(usernames, delay, options).len();
                }
                Job::BatchDms {
                    messages,
                    rate_per_hour,
                    options,
                } => {
                    let delay = rate_to_delay(rate_per_hour)?;
                    scheduled.tasks += scheduler.schedule_batch_dms(messages, delay, options).len();
                }
                Job::Comment {
                    target,
                    text,
                    options,
                } => {
                    scheduler.schedule_comment_task(target, text, options);
                    scheduled.tasks += 1;
                }
                Job::StoryView { username, options } => {
                    let name = match &username {
                        Some(u) => format!("View story @{}", u.trim_start_matches('@')),
                        None => "View story tray".to_string(),
                    };
                    let spec = with_options(
                        TaskSpec::new(name, TaskAction::StoryView { username }).max_retries(1),
                        &options,
                    );
                    scheduler.schedule_task(spec);
                    scheduled.tasks += 1;
                }
                Job::Recurring {
                    name,
                    every_secs,
                    until,
                    action,
                    options,
                } => {
                    let name = name.unwrap_or_else(|| format!("Recurring {}", action.kind()));
                    let spec = with_options(TaskSpec::new(name, action), &options);
                    scheduler.schedule_recurring(spec, Duration::from_secs(every_secs), until);
                    scheduled.tasks += 1;
                    scheduled.recurrences += 1;
                }
            }
        }
        Ok(scheduled)
    }
}

impl Job {
    fn validate(&self) -> Result<()> {
        match self {
            Job::BatchLikes { rate_per_hour, .. }
            | Job::BatchFollows { rate_per_hour, .. }
            | Job::BatchDms { rate_per_hour, .. } => {
                rate_to_delay(*rate_per_hour)?;
            }
            Job::Recurring { every_secs: 0, .. } => {
                anyhow::bail!("recurring job needs every_secs > 0");
            }
            _ => {}
        }
        Ok(())
    }
}

fn with_options(mut spec: TaskSpec, options: &TaskOptions) -> TaskSpec {
    if let Some(at) = options.scheduled_time {
        spec = spec.at(at);
    }
    if let Some(max_retries) = options.max_retries {
        spec = spec.max_retries(max_retries);
    }
    if let Some(priority) = options.priority {
        spec = spec.priority(priority);
    }
    if let Some(device) = &options.device_id {
        spec = spec.device(device.clone());
    }
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use gramdeck_core::config::SchedulerConfig;
    use gramdeck_scheduler::{HandlerRegistry, Priority, TaskKind};

    const SAMPLE: &str = include_str!("../plans/sample.toml");

    fn idle_scheduler() -> Scheduler {
        Scheduler::new(
            SchedulerConfig {
                enable_logging: false,
                ..Default::default()
            },
            HandlerRegistry::new(),
        )
    }

    #[test]
    fn test_sample_plan_parses() {
        let plan = Plan::parse(SAMPLE).unwrap();
        assert_eq!(plan.jobs.len(), 6);
        assert!(matches!(
            &plan.jobs[0],
            Job::BatchLikes { rate_per_hour: 30, hashtags, .. } if hashtags.len() == 2
        ));
    }

    #[test]
    fn test_zero_rate_rejected() {
        let err = Plan::parse(
            r#"
            [[job]]
            kind = "batch_follows"
            usernames = ["a"]
            rate_per_hour = 0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("rate per hour"));
    }

    #[tokio::test]
    async fn test_schedule_plan() {
        let plan = Plan::parse(
            r#"
            [[job]]
            kind = "batch_likes"
            hashtags = ["a", "b"]
            users = ["c"]
            rate_per_hour = 60
            [job.options]
            scheduled_time = "2099-01-01T00:00:00Z"
            device_id = "pixel"

            [[job]]
            kind = "story_view"
            username = "kai"
            [job.options]
            scheduled_time = "2099-01-01T00:00:00Z"
            priority = "high"
            "#,
        )
        .unwrap();

        let scheduler = idle_scheduler();
        let scheduled = plan.schedule(&scheduler).unwrap();
        assert_eq!(scheduled, Scheduled { tasks: 4, recurrences: 0 });

        let likes = scheduler.get_tasks_by_type(TaskKind::Like);
        assert_eq!(likes.len(), 3);
        assert!(likes.iter().all(|t| t.device_id.as_deref() == Some("pixel")));
        assert_eq!(
            (likes[2].scheduled_time - likes[0].scheduled_time).num_seconds(),
            120
        );

        let story = &scheduler.get_tasks_by_type(TaskKind::StoryView)[0];
        assert_eq!(story.name, "View story @kai");
        assert_eq!(story.priority, Priority::High);
        assert_eq!(story.max_retries, 1);
        scheduler.shutdown();
    }
}
