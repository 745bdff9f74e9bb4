//! # strata-sched
//!
//! Scheduling for Strata renders. The [`WorkerManager`] owns a pool of render
//! workers, a priority queue and the lifecycle of each task (timeouts,
//! retries, cancellation, resize). The [`RenderCoalescer`] sits in front of it
//! and turns bursts of interactive requests into one versioned task.

pub mod coalesce;
pub mod events;
pub mod manager;
pub mod queue;
pub mod task;

pub use coalesce::{RenderCoalescer, VersionTracker};
pub use events::RenderEvent;
pub use manager::WorkerManager;
pub use queue::TaskQueue;
pub use task::{
    QueueStats, RenderRequest, TaskOutcome, TaskStatus, Transition, CANVAS_SIGNATURE,
};
