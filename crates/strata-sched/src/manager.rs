//! The worker manager: owns the worker pool, the priority queue and the
//! lifecycle of every render task.
//!
//! Tasks move `queued -> active -> {completed | failed | cancelled}`. A task
//! that fails transiently returns to `queued` after a backoff delay; a
//! renderer panic earns one retry. A task whose surface was resized under it
//! ends `cancelled`. Every transition is recorded so callers can check the
//! scheduling invariants.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use strata_core::{EngineConfig, Priority, StrataError, StrataResult, TaskId};
use strata_fx::{build_pass_graph, PluginRegistry, ShaderRegistry};
use strata_ir::validate_document;
use strata_render::{
    compositor_factory, Frame, RenderJob, RenderWorker, RendererFactory, SurfaceConfig,
    SurfaceHandle, WorkerEvent, WorkerHandle,
};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch, Notify};

use crate::events::RenderEvent;
use crate::queue::TaskQueue;
use crate::task::{QueueStats, RenderRequest, TaskOutcome, TaskStatus, Transition};

/// Terminal tasks kept around for status queries.
const RETAINED_TASKS: usize = 1024;
const TRANSITION_LOG_CAPACITY: usize = 8192;
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    ShutDown,
}

struct TaskEntry {
    request: RenderRequest,
    status: TaskStatus,
    attempts: u32,
    worker: Option<usize>,
    cancel_requested: bool,
    /// Waiting out a retry backoff; not in the queue yet.
    backing_off: bool,
    last_progress: Option<u8>,
    outcome: Option<TaskOutcome>,
    status_tx: watch::Sender<TaskStatus>,
}

struct WorkerSlot {
    handle: Option<WorkerHandle>,
    active: Option<TaskId>,
}

struct Assignment {
    task: TaskId,
    request: RenderRequest,
    attempt: u32,
}

enum Next {
    Stop,
    Idle,
    Run(Assignment),
}

struct State {
    phase: Phase,
    generation: u64,
    surface: Option<SurfaceHandle>,
    size: (u32, u32),
    runtime: Option<Handle>,
    queue: TaskQueue,
    tasks: HashMap<TaskId, TaskEntry>,
    finished: VecDeque<TaskId>,
    workers: Vec<WorkerSlot>,
    log: VecDeque<Transition>,
}

impl State {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            generation: 0,
            surface: None,
            size: (0, 0),
            runtime: None,
            queue: TaskQueue::new(),
            tasks: HashMap::new(),
            finished: VecDeque::new(),
            workers: Vec::new(),
            log: VecDeque::new(),
        }
    }

    fn record(&mut self, task: TaskId, from: Option<TaskStatus>, to: TaskStatus, worker: Option<usize>) {
        if self.log.len() == TRANSITION_LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(Transition {
            task,
            from,
            to,
            worker,
            at: Instant::now(),
        });
    }

    fn transition(&mut self, id: TaskId, to: TaskStatus, worker: Option<usize>) {
        let Some(entry) = self.tasks.get_mut(&id) else {
            return;
        };
        let from = entry.status;
        entry.status = to;
        entry.status_tx.send_replace(to);
        self.record(id, Some(from), to, worker);
        if to.is_terminal() {
            self.retire(id);
        }
    }

    fn retire(&mut self, id: TaskId) {
        self.finished.push_back(id);
        while self.finished.len() > RETAINED_TASKS {
            if let Some(old) = self.finished.pop_front() {
                self.tasks.remove(&old);
            }
        }
    }

    /// Cancel a queued task outright, or signal the worker running it.
    fn cancel(&mut self, id: &TaskId) -> bool {
        let Some(entry) = self.tasks.get_mut(id) else {
            return false;
        };
        match entry.status {
            TaskStatus::Queued => {
                entry.backing_off = false;
                entry.outcome = Some(TaskOutcome::Cancelled);
                self.queue.remove(id);
                self.transition(*id, TaskStatus::Cancelled, None);
                true
            }
            TaskStatus::Active => {
                if !entry.cancel_requested {
                    entry.cancel_requested = true;
                    if let Some(handle) = entry
                        .worker
                        .and_then(|w| self.workers.get(w))
                        .and_then(|slot| slot.handle.as_ref())
                    {
                        handle.cancel(*id);
                    }
                }
                true
            }
            _ => false,
        }
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|e| e.status == status).count()
    }

    fn next_assignment(&mut self, index: usize, generation: u64) -> Next {
        if self.phase != Phase::Running || self.generation != generation {
            return Next::Stop;
        }
        if self.workers.get(index).map_or(true, |slot| slot.active.is_some()) {
            return Next::Idle;
        }
        while let Some(id) = self.queue.pop() {
            let Some(entry) = self.tasks.get_mut(&id) else {
                continue;
            };
            if entry.status != TaskStatus::Queued {
                continue;
            }
            if entry.request.size() != self.size {
                tracing::debug!(
                    task = %id.short(),
                    requested = ?entry.request.size(),
                    surface = ?self.size,
                    "dropping stale task"
                );
                entry.outcome = Some(TaskOutcome::Cancelled);
                self.transition(id, TaskStatus::Cancelled, None);
                continue;
            }

            entry.attempts += 1;
            entry.worker = Some(index);
            let assignment = Assignment {
                task: id,
                request: entry.request.clone(),
                attempt: entry.attempts,
            };
            self.workers[index].active = Some(id);
            self.transition(id, TaskStatus::Active, Some(index));
            return Next::Run(assignment);
        }
        Next::Idle
    }
}

struct Inner {
    config: EngineConfig,
    factory: RwLock<RendererFactory>,
    registry: &'static ShaderRegistry,
    plugins: PluginRegistry,
    state: Mutex<State>,
    wake: Notify,
    events: broadcast::Sender<RenderEvent>,
}

/// Schedules render tasks onto a pool of render workers.
///
/// Clones share the same pool. Must be initialized inside a tokio runtime.
#[derive(Clone)]
pub struct WorkerManager {
    inner: Arc<Inner>,
}

impl WorkerManager {
    pub fn new(config: EngineConfig) -> Self {
        let factory = compositor_factory(&config);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                factory: RwLock::new(factory),
                registry: ShaderRegistry::global(),
                plugins: PluginRegistry::builtin(),
                state: Mutex::new(State::new()),
                wake: Notify::new(),
                events,
            }),
        }
    }

    /// Use a custom renderer for workers spawned from now on.
    pub fn with_renderer(self, factory: RendererFactory) -> Self {
        *self.inner.factory.write() = factory;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Bind the surface and start the worker pool.
    pub fn initialize(&self, surface: SurfaceHandle) -> StrataResult<bool> {
        let runtime = Handle::try_current().map_err(|_| {
            StrataError::Initialization("worker manager needs a running tokio runtime".into())
        })?;

        let mut state = self.inner.state.lock();
        if state.phase == Phase::Running {
            return Err(StrataError::Initialization(
                "worker manager is already initialized".into(),
            ));
        }
        if !surface.try_bind() {
            return Err(StrataError::Initialization(
                "surface is already bound to another worker manager".into(),
            ));
        }
        let (width, height) = surface.size();
        if width == 0 || height == 0 {
            surface.release();
            return Err(StrataError::Initialization(format!(
                "surface has no area ({}x{})",
                width, height
            )));
        }

        let count = self.inner.config.scheduler.workers.max(1);
        let factory = self.inner.factory.read().clone();
        let mut workers = Vec::with_capacity(count);
        for id in 0..count {
            match RenderWorker::spawn(id, surface.config(), factory.clone()) {
                Ok(handle) => workers.push(WorkerSlot {
                    handle: Some(handle),
                    active: None,
                }),
                Err(e) => {
                    surface.release();
                    return Err(e);
                }
            }
        }

        state.phase = Phase::Running;
        state.generation += 1;
        state.size = (width, height);
        state.surface = Some(surface);
        state.runtime = Some(runtime.clone());
        state.workers = workers;
        let generation = state.generation;
        drop(state);

        for index in 0..count {
            runtime.spawn(dispatch_loop(self.inner.clone(), index, generation));
        }
        tracing::info!(workers = count, width, height, "worker manager initialized");
        Ok(true)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().phase == Phase::Running
    }

    /// Queue a render. Returns as soon as the task is queued.
    pub fn queue_render_task(&self, request: RenderRequest) -> StrataResult<TaskId> {
        let mut state = self.inner.state.lock();
        match state.phase {
            Phase::Running => {}
            Phase::Idle => {
                return Err(StrataError::WorkerUnavailable(
                    "worker manager is not initialized".into(),
                ))
            }
            Phase::ShutDown => {
                return Err(StrataError::WorkerUnavailable(
                    "worker manager has been shut down".into(),
                ))
            }
        }
        if state.count(TaskStatus::Queued) >= self.inner.config.scheduler.queue_capacity {
            return Err(StrataError::WorkerUnavailable("render queue is full".into()));
        }

        let superseded: Vec<TaskId> = state
            .tasks
            .iter()
            .filter(|(_, e)| {
                e.status.is_pending()
                    && e.request.signature == request.signature
                    && e.request.version < request.version
            })
            .map(|(id, _)| *id)
            .collect();
        for old in superseded {
            tracing::debug!(task = %old.short(), version = request.version, "superseded by newer render");
            state.cancel(&old);
        }

        let id = TaskId::new();
        let priority = request.priority;
        tracing::debug!(
            task = %id.short(),
            %priority,
            version = request.version,
            signature = %request.signature,
            "queued render task"
        );
        let (status_tx, _) = watch::channel(TaskStatus::Queued);
        state.tasks.insert(
            id,
            TaskEntry {
                request,
                status: TaskStatus::Queued,
                attempts: 0,
                worker: None,
                cancel_requested: false,
                backing_off: false,
                last_progress: None,
                outcome: None,
                status_tx,
            },
        );
        state.record(id, None, TaskStatus::Queued, None);
        state.queue.push(id, priority);
        drop(state);

        self.inner.wake.notify_waiters();
        Ok(id)
    }

    /// Cancel a task. Queued tasks are removed without side effects; an
    /// active task is signalled and ends `cancelled` once its worker stops.
    pub fn cancel_task(&self, id: &TaskId) -> bool {
        let cancelled = self.inner.state.lock().cancel(id);
        if cancelled {
            tracing::debug!(task = %id.short(), "cancel requested");
        }
        cancelled
    }

    pub fn task_status(&self, id: &TaskId) -> TaskStatus {
        self.inner
            .state
            .lock()
            .tasks
            .get(id)
            .map_or(TaskStatus::NotFound, |e| e.status)
    }

    /// The request a task was queued with.
    pub fn task_request(&self, id: &TaskId) -> Option<RenderRequest> {
        self.inner
            .state
            .lock()
            .tasks
            .get(id)
            .map(|e| e.request.clone())
    }

    pub fn queue_stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            queued: state.count(TaskStatus::Queued),
            active: state.count(TaskStatus::Active),
            total: state.tasks.len(),
        }
    }

    /// True while any task is queued or running.
    pub fn is_processing(&self) -> bool {
        self.inner
            .state
            .lock()
            .tasks
            .values()
            .any(|e| e.status.is_pending())
    }

    /// Resize the surface. Workers apply it after the job they are running;
    /// queued tasks sized for the old surface are cancelled.
    pub fn resize(&self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Running {
            return false;
        }
        if state.size == (width, height) {
            return true;
        }
        state.size = (width, height);
        if let Some(surface) = &state.surface {
            surface.set_size(width, height);
        }
        for slot in &state.workers {
            if let Some(handle) = &slot.handle {
                if let Err(e) = handle.resize(width, height) {
                    tracing::warn!(worker = handle.id(), error = %e, "resize not delivered");
                }
            }
        }
        let stale: Vec<TaskId> = state
            .tasks
            .iter()
            .filter(|(_, e)| e.status == TaskStatus::Queued && e.request.size() != (width, height))
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            state.cancel(id);
        }
        tracing::info!(width, height, stale = stale.len(), "surface resized");
        true
    }

    /// Warm shader programs on every worker.
    pub async fn prepare(&self) -> StrataResult<()> {
        let pending = {
            let state = self.inner.state.lock();
            if state.phase != Phase::Running {
                return Err(StrataError::WorkerUnavailable(
                    "worker manager is not initialized".into(),
                ));
            }
            state
                .workers
                .iter()
                .filter_map(|slot| slot.handle.as_ref())
                .map(|handle| handle.prepare().map(|rx| (handle.id(), rx)))
                .collect::<StrataResult<Vec<_>>>()?
        };

        for (worker, rx) in pending {
            let built = rx
                .await
                .map_err(|_| StrataError::WorkerLost(format!("worker {worker} dropped prepare")))??;
            tracing::debug!(worker, programs = built, "worker prepared");
        }
        Ok(())
    }

    /// Cancel everything, stop the workers and release the surface.
    pub fn cleanup(&self) {
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Running {
            return;
        }
        state.phase = Phase::ShutDown;

        let pending: Vec<TaskId> = state
            .tasks
            .iter()
            .filter(|(_, e)| e.status.is_pending())
            .map(|(id, _)| *id)
            .collect();
        for id in &pending {
            state.cancel(id);
        }
        for slot in state.workers.iter_mut() {
            if let Some(mut handle) = slot.handle.take() {
                handle.shutdown();
            }
        }
        if let Some(surface) = state.surface.take() {
            surface.release();
        }
        state.runtime = None;
        drop(state);

        self.inner.wake.notify_waiters();
        tracing::info!(cancelled = pending.len(), "worker manager shut down");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RenderEvent> {
        self.inner.events.subscribe()
    }

    /// Wait for a task to reach a terminal state. `None` if it is unknown.
    pub async fn wait(&self, id: &TaskId) -> Option<TaskOutcome> {
        let mut rx = self.inner.state.lock().tasks.get(id)?.status_tx.subscribe();
        let reached = rx.wait_for(TaskStatus::is_terminal).await.is_ok();
        if !reached {
            return None;
        }
        self.inner
            .state
            .lock()
            .tasks
            .get(id)
            .and_then(|e| e.outcome.clone())
    }

    pub fn transition_log(&self) -> Vec<Transition> {
        self.inner.state.lock().log.iter().cloned().collect()
    }
}

async fn dispatch_loop(inner: Arc<Inner>, index: usize, generation: u64) {
    tracing::debug!(worker = index, "dispatch loop started");
    loop {
        let notified = inner.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let next = inner.state.lock().next_assignment(index, generation);
        match next {
            Next::Stop => break,
            Next::Idle => notified.await,
            Next::Run(assignment) => {
                let task = assignment.task;
                let result = inner.execute(index, assignment).await;
                inner.finish(index, task, result);
            }
        }
    }
    tracing::debug!(worker = index, "dispatch loop stopped");
}

impl Inner {
    /// Validate the request, build its pass graph and serialize the job.
    fn encode_job(&self, task: TaskId, request: RenderRequest) -> StrataResult<Vec<u8>> {
        if let Err(errors) = validate_document(&request.document) {
            let reasons: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(StrataError::InvalidDocument(reasons.join("; ")));
        }
        let graph = match request.graph {
            Some(graph) => graph,
            None => build_pass_graph(&request.document, &self.plugins),
        };
        graph.validate(self.registry)?;
        RenderJob::new(task, request.version, request.document, graph)
            .with_interactive(request.interactive)
            .to_bytes()
    }

    async fn execute(self: &Arc<Self>, index: usize, assignment: Assignment) -> StrataResult<Frame> {
        let Assignment {
            task,
            request,
            attempt,
        } = assignment;
        tracing::debug!(task = %task.short(), worker = index, attempt, "dispatching render");

        let size = request.size();
        let timeout = request
            .timeout
            .unwrap_or(Duration::from_millis(self.config.scheduler.task_timeout_ms));
        let encoder = Arc::clone(self);
        let job = tokio::task::spawn_blocking(move || encoder.encode_job(task, request))
            .await
            .map_err(|e| StrataError::Render(format!("job encoding aborted: {e}")))??;

        let mut rx = {
            let state = self.state.lock();
            if state.tasks.get(&task).map_or(true, |e| e.cancel_requested) {
                return Err(StrataError::Cancelled(format!("task {} cancelled before dispatch", task)));
            }
            if state.size != size {
                return Err(StrataError::Cancelled(format!(
                    "surface resized to {}x{} before dispatch",
                    state.size.0, state.size.1
                )));
            }
            let handle = state
                .workers
                .get(index)
                .and_then(|slot| slot.handle.as_ref())
                .ok_or_else(|| StrataError::WorkerUnavailable(format!("worker {index} is stopped")))?;
            handle.render(task, job)?
        };

        let started = tokio::time::Instant::now();
        let deadline = started + timeout;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Err(_) => {
                    return Err(StrataError::Timeout {
                        task: task.to_string(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    })
                }
                Ok(None) => {
                    return Err(StrataError::WorkerLost(format!(
                        "worker {index} closed the event channel"
                    )))
                }
                Ok(Some(WorkerEvent::Started)) => {}
                Ok(Some(WorkerEvent::Progress(value))) => self.progress(task, value),
                Ok(Some(WorkerEvent::Done(result))) => return result,
            }
        }
    }

    fn progress(&self, task: TaskId, value: u8) {
        let mut state = self.state.lock();
        let Some(entry) = state.tasks.get_mut(&task) else {
            return;
        };
        if entry.status != TaskStatus::Active || entry.cancel_requested {
            return;
        }
        if entry.last_progress.map_or(true, |last| value > last) {
            entry.last_progress = Some(value);
            tracing::trace!(task = %task.short(), value, "progress");
            let _ = self.events.send(RenderEvent::Progress { task, value });
        }
    }

    fn finish(self: &Arc<Self>, index: usize, task: TaskId, result: StrataResult<Frame>) {
        let mut state = self.state.lock();
        if let Some(slot) = state.workers.get_mut(index) {
            slot.active = None;
        }
        if matches!(result, Err(StrataError::Timeout { .. })) {
            self.replace_worker(&mut state, index, task);
        }

        let max_retries = self.config.scheduler.max_retries;
        let running = state.phase == Phase::Running;
        let size = state.size;
        let Some(entry) = state.tasks.get_mut(&task) else {
            drop(state);
            self.wake.notify_waiters();
            return;
        };
        if entry.status != TaskStatus::Active {
            drop(state);
            self.wake.notify_waiters();
            return;
        }
        let cancelled = entry.cancel_requested;
        let version = entry.request.version;

        match result {
            Ok(frame) if !cancelled => {
                let frame = Arc::new(frame);
                entry.outcome = Some(TaskOutcome::Completed(frame.clone()));
                state.transition(task, TaskStatus::Completed, Some(index));
                tracing::debug!(task = %task.short(), version, hash = %frame.hash, "render completed");
                let _ = self.events.send(RenderEvent::Success {
                    task,
                    version,
                    frame,
                });
            }
            Ok(_) => {
                tracing::debug!(task = %task.short(), "discarding frame of cancelled task");
                entry.outcome = Some(TaskOutcome::Cancelled);
                state.transition(task, TaskStatus::Cancelled, Some(index));
            }
            Err(e) if cancelled || e.is_cancellation() => {
                entry.outcome = Some(TaskOutcome::Cancelled);
                state.transition(task, TaskStatus::Cancelled, Some(index));
            }
            Err(e) if entry.request.size() != size => {
                tracing::debug!(task = %task.short(), error = %e, "surface resized under the task");
                entry.outcome = Some(TaskOutcome::Cancelled);
                state.transition(task, TaskStatus::Cancelled, Some(index));
            }
            Err(e) if running && entry.attempts <= e.retry_budget(max_retries) => {
                let attempt = entry.attempts;
                let priority = entry.request.priority;
                entry.backing_off = true;
                entry.worker = None;
                let delay = Duration::from_millis(self.config.scheduler.backoff_delay_ms(attempt));
                tracing::warn!(
                    task = %task.short(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "render failed, retrying"
                );
                state.transition(task, TaskStatus::Queued, None);
                if let Some(runtime) = state.runtime.clone() {
                    runtime.spawn(requeue_after(Arc::downgrade(self), task, priority, delay));
                }
            }
            Err(e) => {
                tracing::error!(task = %task.short(), attempts = entry.attempts, error = %e, "render failed");
                let message = e.to_string();
                entry.outcome = Some(TaskOutcome::Failed(Arc::new(e)));
                state.transition(task, TaskStatus::Failed, Some(index));
                let _ = self.events.send(RenderEvent::Error { task, message });
            }
        }
        drop(state);
        self.wake.notify_waiters();
    }

    /// Swap a stuck worker for a fresh thread. The old one is told to stop
    /// and left to exit on its own.
    fn replace_worker(&self, state: &mut State, index: usize, task: TaskId) {
        if state.phase != Phase::Running {
            return;
        }
        let config = SurfaceConfig {
            width: state.size.0,
            height: state.size.1,
        };
        let factory = self.factory.read().clone();
        let Some(slot) = state.workers.get_mut(index) else {
            return;
        };
        if let Some(mut old) = slot.handle.take() {
            old.cancel(task);
            old.shutdown();
        }
        match RenderWorker::spawn(index, config, factory) {
            Ok(handle) => {
                tracing::warn!(worker = index, "replaced unresponsive worker");
                slot.handle = Some(handle);
            }
            Err(e) => tracing::error!(worker = index, error = %e, "failed to replace worker"),
        }
    }
}

/// Put a task back on the queue once its backoff delay has elapsed.
async fn requeue_after(inner: Weak<Inner>, task: TaskId, priority: Priority, delay: Duration) {
    tokio::time::sleep(delay).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut state = inner.state.lock();
    let Some(entry) = state.tasks.get_mut(&task) else {
        return;
    };
    if entry.status != TaskStatus::Queued || !entry.backing_off {
        return;
    }
    entry.backing_off = false;
    state.queue.push_front(task, priority);
    drop(state);
    inner.wake.notify_waiters();
}
