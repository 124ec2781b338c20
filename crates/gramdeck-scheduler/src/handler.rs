//! Task handlers — the side-effecting operation behind each task kind.
//!
//! The scheduler owns timing, retries and concurrency; a handler only knows
//! how to perform one attempt. Handlers receive a cancellation token that
//! fires when the task is cancelled, times out, or the scheduler shuts down.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use gramdeck_core::error::Result;

use crate::tasks::{Task, TaskKind};

/// Performs one execution attempt of a task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, task: &Task, cancel: CancellationToken) -> Result<()>;
}

/// Maps task kinds to the handler that runs them.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One handler for every task kind.
    pub fn with_handler(handler: Arc<dyn TaskHandler>) -> Self {
        let mut registry = Self::new();
        for kind in TaskKind::ALL {
            registry.register(kind, handler.clone());
        }
        registry
    }

    /// Register (or replace) the handler for `kind`.
    pub fn register(&mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) {
        tracing::debug!("🔧 Registered handler for '{}' tasks", kind);
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<TaskKind> {
        TaskKind::ALL
            .into_iter()
            .filter(|k| self.handlers.contains_key(k))
            .collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
