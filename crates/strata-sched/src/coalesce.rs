//! Request coalescing in front of the worker manager.
//!
//! Interactive edits produce bursts of render requests for the same target.
//! Within a window only the latest request per signature is submitted, under
//! a fresh version, and the task it replaces is cancelled first.

use std::collections::HashMap;
use std::future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use strata_core::{CoalesceConfig, StrataError, StrataResult, TaskId};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};

use crate::manager::WorkerManager;
use crate::task::RenderRequest;

struct Pending {
    request: RenderRequest,
    waiters: Vec<oneshot::Sender<Option<TaskId>>>,
    deadline: Instant,
}

#[derive(Default)]
struct Slot {
    pending: Option<Pending>,
    version: u64,
    last_task: Option<TaskId>,
}

struct Shared {
    manager: WorkerManager,
    window: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl Shared {
    fn accept(&self, request: RenderRequest, reply: oneshot::Sender<Option<TaskId>>) {
        let deadline = Instant::now() + self.window;
        let mut slots = self.slots.lock();
        let slot = slots.entry(request.signature.clone()).or_default();
        match &mut slot.pending {
            Some(pending) => {
                pending.request = request;
                pending.waiters.push(reply);
                pending.deadline = deadline;
            }
            None => {
                slot.pending = Some(Pending {
                    request,
                    waiters: vec![reply],
                    deadline,
                });
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .lock()
            .values()
            .filter_map(|slot| slot.pending.as_ref().map(|p| p.deadline))
            .min()
    }

    fn flush_due(&self, now: Instant) {
        let mut slots = self.slots.lock();
        for (signature, slot) in slots.iter_mut() {
            if !slot.pending.as_ref().is_some_and(|p| p.deadline <= now) {
                continue;
            }
            let Some(Pending {
                mut request,
                waiters,
                ..
            }) = slot.pending.take()
            else {
                continue;
            };

            slot.version += 1;
            request.version = slot.version;
            if let Some(previous) = slot.last_task.take() {
                self.manager.cancel_task(&previous);
            }

            let submitted = match self.manager.queue_render_task(request) {
                Ok(id) => {
                    tracing::debug!(
                        task = %id.short(),
                        %signature,
                        version = slot.version,
                        collapsed = waiters.len(),
                        "coalesced render submitted"
                    );
                    slot.last_task = Some(id);
                    Some(id)
                }
                Err(e) => {
                    tracing::warn!(%signature, error = %e, "coalesced render rejected");
                    None
                }
            };
            for waiter in waiters {
                let _ = waiter.send(submitted);
            }
        }
    }
}

enum Command {
    Request {
        request: RenderRequest,
        reply: oneshot::Sender<Option<TaskId>>,
    },
}

/// Collapses bursts of render requests into one task per signature.
///
/// A single actor task owns the timers; the coalescer stops when it is
/// dropped.
pub struct RenderCoalescer {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl RenderCoalescer {
    pub fn new(manager: WorkerManager, window: Duration) -> StrataResult<Self> {
        if window.is_zero() {
            return Err(StrataError::InvalidArgument(
                "coalescing window must be non-zero".into(),
            ));
        }
        let runtime = Handle::try_current().map_err(|_| {
            StrataError::Initialization("render coalescer needs a running tokio runtime".into())
        })?;
        let shared = Arc::new(Shared {
            manager,
            window,
            slots: Mutex::new(HashMap::new()),
        });
        let (commands, rx) = mpsc::unbounded_channel();
        runtime.spawn(run(shared.clone(), rx));
        Ok(Self { shared, commands })
    }

    pub fn from_config(manager: WorkerManager, config: &CoalesceConfig) -> StrataResult<Self> {
        Self::new(manager, Duration::from_millis(config.window_ms))
    }

    /// Submit through the coalescing window. Every caller whose request was
    /// folded into the same submission gets the same task id.
    ///
    /// The request enters the window when this is called, not when the
    /// returned future is first polled, so the last call wins.
    pub fn request(&self, request: RenderRequest) -> impl future::Future<Output = Option<TaskId>> {
        let (reply, rx) = oneshot::channel();
        // On a closed channel the reply sender is dropped and `rx` yields None.
        let _ = self.commands.send(Command::Request { request, reply });
        async move { rx.await.ok().flatten() }
    }

    /// Whether a request for `signature` is waiting in the window or its
    /// latest task has not finished.
    pub fn is_processing(&self, signature: &str) -> bool {
        let slots = self.shared.slots.lock();
        let Some(slot) = slots.get(signature) else {
            return false;
        };
        slot.pending.is_some()
            || slot
                .last_task
                .is_some_and(|id| self.shared.manager.task_status(&id).is_pending())
    }

    /// The last version assigned to `signature`, 0 if none.
    pub fn current_version(&self, signature: &str) -> u64 {
        self.shared
            .slots
            .lock()
            .get(signature)
            .map_or(0, |slot| slot.version)
    }

    pub fn manager(&self) -> &WorkerManager {
        &self.shared.manager
    }
}

async fn run(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Command>) {
    loop {
        let deadline = shared.next_deadline();
        let timer = async {
            match deadline {
                Some(at) => time::sleep_until(at).await,
                None => future::pending::<()>().await,
            }
        };
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Request { request, reply }) => shared.accept(request, reply),
                None => break,
            },
            _ = timer => shared.flush_due(Instant::now()),
        }
    }
    // Submit whatever is still waiting so no caller hangs.
    shared.flush_due(Instant::now() + shared.window);
}

/// Consumer-side filter for results that arrive out of order.
#[derive(Debug, Default)]
pub struct VersionTracker {
    latest: HashMap<String, u64>,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `version` was submitted for `signature`.
    pub fn observe(&mut self, signature: &str, version: u64) {
        let current = self.latest.entry(signature.to_string()).or_insert(0);
        *current = (*current).max(version);
    }

    /// Whether a result for `version` should be shown. Older versions than
    /// the tracked one are rejected; accepting advances the tracked version.
    pub fn accept(&mut self, signature: &str, version: u64) -> bool {
        let current = self.latest.entry(signature.to_string()).or_insert(0);
        if version < *current {
            return false;
        }
        *current = version;
        true
    }

    pub fn current(&self, signature: &str) -> Option<u64> {
        self.latest.get(signature).copied()
    }
}
