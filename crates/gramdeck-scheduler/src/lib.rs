//! # Gramdeck Scheduler
//!
//! In-process, timer-driven job queue for device automation tasks.
//!
//! ## Design Principles
//! - In-memory only: no persistence, one scheduler per process
//! - Tokio timers per task: nothing runs while idle
//! - Global concurrency cap with a FIFO waiter queue
//! - Bounded per-task retries, fixed per-attempt timeout
//! - Cancellation reaches into running handlers
//!
//! ## Architecture
//! ```text
//! schedule_task / batch helpers / schedule_recurring
//!   └── TaskStore (pending) + timer armed for scheduled_time
//!         └── timer fires → ConcurrencyGate (wait for slot)
//!               └── running → TaskHandler::execute  (raced against timeout + cancel)
//!                     ├── Ok            → completed
//!                     ├── Err, budget   → pending, re-armed after retry_delay
//!                     └── Err, no budget→ failed
//! ```

pub mod batch;
pub mod engine;
pub mod gate;
pub mod handler;
pub mod store;
pub mod tasks;

pub use batch::{DirectMessage, TaskOptions, rate_to_delay};
pub use engine::{RecurringHandle, Scheduler, SchedulerStats};
pub use gate::ConcurrencyGate;
pub use handler::{HandlerRegistry, TaskHandler};
pub use store::{StatusCounts, TaskStore};
pub use tasks::{Priority, Target, Task, TaskAction, TaskId, TaskKind, TaskSpec, TaskStatus};
