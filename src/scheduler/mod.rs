//! # Task Scheduler
//!
//! Durable at-least-once execution of pipeline steps: a [`TaskQueue`]
//! ([`MemoryQueue`] or [`PgQueue`]), per-class [`RetryPolicies`],
//! [`PreExecutionHook`]s (cancellation) and the [`Scheduler`] worker loop.

pub mod hooks;
pub mod queue;
pub mod retry;
#[allow(clippy::module_inception)]
pub mod scheduler;

pub use hooks::{CancellationHook, HookDecision, PreExecutionHook};
pub use queue::{MemoryQueue, PgQueue, QueuedJob, StepJob, TaskQueue};
pub use retry::{RetryClass, RetryPolicies, RetryPolicy};
pub use scheduler::{JobOutcome, Scheduler, SchedulerHandle};
