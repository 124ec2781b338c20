//! Task definitions — the core data model for scheduled automation work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, process-unique task identifier.
pub type TaskId = String;

/// A scheduled automation task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID, never reused.
    pub id: TaskId,
    /// Human-readable label.
    pub name: String,
    /// What to do on the device, with its typed payload.
    pub action: TaskAction,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// When the task becomes eligible to run.
    pub scheduled_time: DateTime<Utc>,
    /// Start of the most recent execution attempt.
    pub executed_time: Option<DateTime<Utc>>,
    /// Retries already consumed.
    pub retry_count: u32,
    /// Ceiling on `retry_count`.
    pub max_retries: u32,
    /// Recorded, but not consulted when dispatching.
    pub priority: Priority,
    /// Target device serial. Falls back to the configured default device.
    pub device_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Message of the latest failed attempt or cancellation.
    pub last_error: Option<String>,
}

impl Task {
    pub(crate) fn from_spec(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            name: spec.name,
            action: spec.action,
            status: TaskStatus::Pending,
            scheduled_time: spec.scheduled_time,
            executed_time: None,
            retry_count: 0,
            max_retries: spec.max_retries,
            priority: spec.priority,
            device_id: spec.device_id,
            created_at: Utc::now(),
            last_error: None,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.action.kind()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Everything a caller supplies to schedule a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub action: TaskAction,
    pub scheduled_time: DateTime<Utc>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub device_id: Option<String>,
}

impl TaskSpec {
    /// A spec due now, with no retries and medium priority.
    pub fn new(name: impl Into<String>, action: TaskAction) -> Self {
        Self {
            name: name.into(),
            action,
            scheduled_time: Utc::now(),
            max_retries: 0,
            priority: Priority::Medium,
            device_id: None,
        }
    }

    pub fn at(mut self, scheduled_time: DateTime<Utc>) -> Self {
        self.scheduled_time = scheduled_time;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// Where a like or comment lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "by", content = "value")]
pub enum Target {
    /// Top post of a hashtag search (without the leading `#`).
    Hashtag(String),
    /// Latest post of a user profile.
    User(String),
}

impl Target {
    /// The text typed into the search bar.
    pub fn search_query(&self) -> String {
        match self {
            Target::Hashtag(tag) => format!("#{}", tag.trim_start_matches('#')),
            Target::User(username) => username.trim_start_matches('@').to_string(),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Hashtag(tag) => write!(f, "#{}", tag.trim_start_matches('#')),
            Target::User(username) => write!(f, "@{}", username.trim_start_matches('@')),
        }
    }
}

/// What the task does when it runs. One variant per task type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TaskAction {
    Like {
        target: Target,
        /// Switch to this account before liking.
        #[serde(default)]
        account: Option<String>,
    },
    Comment {
        target: Target,
        text: String,
    },
    Follow {
        username: String,
    },
    Dm {
        username: String,
        message: String,
    },
    StoryView {
        /// Watch this user's story; `None` opens the first story in the tray.
        #[serde(default)]
        username: Option<String>,
    },
    Post {
        #[serde(default)]
        caption: Option<String>,
    },
}

impl TaskAction {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskAction::Like { .. } => TaskKind::Like,
            TaskAction::Comment { .. } => TaskKind::Comment,
            TaskAction::Follow { .. } => TaskKind::Follow,
            TaskAction::Dm { .. } => TaskKind::Dm,
            TaskAction::StoryView { .. } => TaskKind::StoryView,
            TaskAction::Post { .. } => TaskKind::Post,
        }
    }
}

/// Closed set of task types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Like,
    Comment,
    Follow,
    Dm,
    StoryView,
    Post,
}

impl TaskKind {
    pub const ALL: [TaskKind; 6] = [
        TaskKind::Like,
        TaskKind::Comment,
        TaskKind::Follow,
        TaskKind::Dm,
        TaskKind::StoryView,
        TaskKind::Post,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Like => "like",
            TaskKind::Comment => "comment",
            TaskKind::Follow => "follow",
            TaskKind::Dm => "dm",
            TaskKind::StoryView => "story_view",
            TaskKind::Post => "post",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle status.
///
/// ```text
/// pending ──► running ──► completed
///   ▲  │         │
///   │  │         └──► pending (retry budget left) / failed
///   │  └──► paused ──► pending (resume)
///   └─────────────── any ──► failed (cancel)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Paused => "paused",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}
