//! In-memory task registry.
//! Authoritative state for every task the scheduler knows about.
//! Nothing is persisted; records live until a caller clears them.

use std::collections::HashMap;

use serde::Serialize;

use crate::tasks::{Task, TaskId, TaskKind, TaskStatus};

/// Task records keyed by id, iterated in insertion order.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
}

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub paused: usize,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record. An existing record with the same id is replaced in place.
    pub fn insert(&mut self, task: Task) {
        if !self.tasks.contains_key(&task.id) {
            self.order.push(task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All tasks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.iter().filter(|t| t.status == status).cloned().collect()
    }

    pub fn by_kind(&self, kind: TaskKind) -> Vec<Task> {
        self.iter().filter(|t| t.kind() == kind).cloned().collect()
    }

    /// Remove every record in `status`. Returns how many were removed.
    pub fn remove_with_status(&mut self, status: TaskStatus) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, t| t.status != status);
        let tasks = &self.tasks;
        self.order.retain(|id| tasks.contains_key(id));
        before - self.tasks.len()
    }

    /// Evict the oldest completed/failed records until at most `keep` remain.
    /// Returns the evicted ids.
    pub fn evict_terminal(&mut self, keep: usize) -> Vec<TaskId> {
        let terminal: Vec<&TaskId> = self
            .order
            .iter()
            .filter(|id| self.tasks.get(*id).is_some_and(|t| t.is_terminal()))
            .collect();
        if terminal.len() <= keep {
            return Vec::new();
        }
        let evicted: Vec<TaskId> = terminal[..terminal.len() - keep]
            .iter()
            .map(|id| (*id).clone())
            .collect();
        for id in &evicted {
            self.tasks.remove(id);
        }
        let tasks = &self.tasks;
        self.order.retain(|id| tasks.contains_key(id));
        evicted
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts {
            total: self.tasks.len(),
            ..Default::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Paused => counts.paused += 1,
            }
        }
        counts
    }
}
