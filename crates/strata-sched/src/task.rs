use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strata_core::{Priority, StrataError, TaskId};
use strata_fx::PassGraph;
use strata_ir::Document;
use strata_render::Frame;

/// Signature used when the caller does not name one: the whole canvas.
pub const CANVAS_SIGNATURE: &str = "canvas";

/// A request to render one frame of a document snapshot.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub document: Document,
    /// Pre-built pass graph; built from the document at dispatch when absent.
    pub graph: Option<PassGraph>,
    pub priority: Priority,
    /// Identifies the render target; newer versions supersede older ones.
    pub signature: String,
    pub version: u64,
    /// Reduced quality for drags.
    pub interactive: bool,
    /// Overrides the configured task timeout.
    pub timeout: Option<Duration>,
}

impl RenderRequest {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            graph: None,
            priority: Priority::Medium,
            signature: CANVAS_SIGNATURE.to_string(),
            version: 0,
            interactive: false,
            timeout: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_graph(mut self, graph: PassGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    pub fn size(&self) -> (u32, u32) {
        (self.document.width, self.document.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Queued,
    Active,
    Completed,
    Failed,
    Cancelled,
    NotFound,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Active)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Active => "active",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::NotFound => "not-found",
        };
        f.write_str(name)
    }
}

/// How a task ended.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed(Arc<Frame>),
    Failed(Arc<StrataError>),
    Cancelled,
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed(_) => TaskStatus::Completed,
            TaskOutcome::Failed(_) => TaskStatus::Failed,
            TaskOutcome::Cancelled => TaskStatus::Cancelled,
        }
    }

    pub fn frame(&self) -> Option<&Arc<Frame>> {
        match self {
            TaskOutcome::Completed(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&StrataError> {
        match self {
            TaskOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub active: usize,
    /// Every task the manager still tracks, terminal ones included.
    pub total: usize,
}

/// One entry of the state-transition log.
#[derive(Debug, Clone)]
pub struct Transition {
    pub task: TaskId,
    pub from: Option<TaskStatus>,
    pub to: TaskStatus,
    pub worker: Option<usize>,
    pub at: Instant,
}
