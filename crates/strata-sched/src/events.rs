use std::sync::Arc;

use strata_core::TaskId;
use strata_render::Frame;

/// Notifications published by a worker manager. Every event names its task.
#[derive(Debug, Clone)]
pub enum RenderEvent {
    /// 0..=100, strictly increasing per task.
    Progress { task: TaskId, value: u8 },
    Success {
        task: TaskId,
        version: u64,
        frame: Arc<Frame>,
    },
    /// Terminal failure. Cancellations are never reported here.
    Error { task: TaskId, message: String },
}

impl RenderEvent {
    pub fn task(&self) -> TaskId {
        match self {
            RenderEvent::Progress { task, .. }
            | RenderEvent::Success { task, .. }
            | RenderEvent::Error { task, .. } => *task,
        }
    }
}
