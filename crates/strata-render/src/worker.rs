//! Render workers: one dedicated thread per execution context.
//!
//! A worker exclusively owns its [`Surface`] and renderer. All interaction
//! goes through its inbox; jobs arrive serialized and results leave through
//! a per-job event channel, so nothing mutable is shared with the host.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use strata_core::{EngineConfig, StrataError, StrataResult, TaskId};
use tokio::sync::{mpsc as event_mpsc, oneshot};

use crate::compositor::{Compositor, Frame, RenderJob};
use crate::executor::ExecControl;
use crate::surface::{Surface, SurfaceConfig};

/// The seam between a worker and whatever turns jobs into frames.
pub trait FrameRenderer: Send {
    /// Called once on the worker thread before the first message.
    fn startup(&mut self) -> StrataResult<usize> {
        Ok(0)
    }

    /// Pre-build resources ahead of the first real render.
    fn prepare(&mut self) -> StrataResult<usize> {
        Ok(0)
    }

    fn render(
        &mut self,
        job: &RenderJob,
        surface: &mut Surface,
        ctrl: &ExecControl<'_>,
    ) -> StrataResult<Frame>;
}

impl FrameRenderer for Compositor {
    fn startup(&mut self) -> StrataResult<usize> {
        Compositor::startup(self)
    }

    fn prepare(&mut self) -> StrataResult<usize> {
        Compositor::prepare(self)
    }

    fn render(
        &mut self,
        job: &RenderJob,
        surface: &mut Surface,
        ctrl: &ExecControl<'_>,
    ) -> StrataResult<Frame> {
        self.render_frame(job, surface, ctrl)
    }
}

/// Builds a fresh renderer for a worker (at spawn and after a panic).
pub type RendererFactory = Arc<dyn Fn() -> Box<dyn FrameRenderer> + Send + Sync>;

/// Factory producing [`Compositor`]s configured from `config`.
pub fn compositor_factory(config: &EngineConfig) -> RendererFactory {
    let config = config.clone();
    Arc::new(move || Box::new(Compositor::from_config(&config)) as Box<dyn FrameRenderer>)
}

pub enum WorkerMessage {
    Render {
        task: TaskId,
        job: Vec<u8>,
        events: event_mpsc::UnboundedSender<WorkerEvent>,
    },
    Cancel(TaskId),
    Resize {
        width: u32,
        height: u32,
        ack: oneshot::Sender<()>,
    },
    Prepare {
        ack: oneshot::Sender<StrataResult<usize>>,
    },
    Shutdown,
}

#[derive(Debug)]
pub enum WorkerEvent {
    Started,
    Progress(u8),
    Done(StrataResult<Frame>),
}

pub struct RenderWorker {
    id: usize,
    surface: Surface,
    renderer: Box<dyn FrameRenderer>,
    factory: RendererFactory,
    inbox: Receiver<WorkerMessage>,
    deferred: VecDeque<WorkerMessage>,
}

impl RenderWorker {
    /// Start a worker thread with its own surface and renderer.
    pub fn spawn(
        id: usize,
        config: SurfaceConfig,
        factory: RendererFactory,
    ) -> StrataResult<WorkerHandle> {
        let (sender, inbox) = mpsc::channel();
        let thread = thread::Builder::new()
            .name(format!("strata-worker-{id}"))
            .spawn(move || {
                let renderer = factory();
                let worker = RenderWorker {
                    id,
                    surface: Surface::new(config),
                    renderer,
                    factory,
                    inbox,
                    deferred: VecDeque::new(),
                };
                worker.run();
            })
            .map_err(|e| StrataError::Initialization(format!("failed to spawn worker {id}: {e}")))?;

        Ok(WorkerHandle {
            id,
            sender,
            thread: Some(thread),
        })
    }

    fn run(mut self) {
        match self.renderer.startup() {
            Ok(built) => tracing::debug!(worker = self.id, programs = built, "worker started"),
            Err(e) => tracing::warn!(worker = self.id, error = %e, "eager shader compile failed"),
        }

        loop {
            let message = match self.deferred.pop_front() {
                Some(m) => m,
                None => match self.inbox.recv() {
                    Ok(m) => m,
                    Err(_) => break,
                },
            };
            match message {
                WorkerMessage::Render { task, job, events } => self.render(task, &job, &events),
                // Nothing running under that id.
                WorkerMessage::Cancel(_) => {}
                WorkerMessage::Resize { width, height, ack } => {
                    self.surface.resize(width, height);
                    tracing::debug!(worker = self.id, width, height, "surface resized");
                    let _ = ack.send(());
                }
                WorkerMessage::Prepare { ack } => {
                    let _ = ack.send(self.renderer.prepare());
                }
                WorkerMessage::Shutdown => break,
            }
        }
        tracing::debug!(worker = self.id, "worker stopped");
    }

    fn render(
        &mut self,
        task: TaskId,
        bytes: &[u8],
        events: &event_mpsc::UnboundedSender<WorkerEvent>,
    ) {
        let _ = events.send(WorkerEvent::Started);
        let job = match RenderJob::from_bytes(bytes) {
            Ok(job) => job,
            Err(e) => {
                let _ = events.send(WorkerEvent::Done(Err(e)));
                return;
            }
        };

        let cancelled = Cell::new(false);
        let deferred = RefCell::new(Vec::new());
        let inbox = &self.inbox;
        let drain = || {
            while let Ok(message) = inbox.try_recv() {
                match message {
                    WorkerMessage::Cancel(id) if id == task => cancelled.set(true),
                    WorkerMessage::Cancel(_) => {}
                    WorkerMessage::Shutdown => {
                        cancelled.set(true);
                        deferred.borrow_mut().push(WorkerMessage::Shutdown);
                    }
                    other => deferred.borrow_mut().push(other),
                }
            }
            cancelled.get()
        };

        let progress = events.clone();
        let ctrl = ExecControl::new()
            .with_cancel_check(&drain)
            .with_progress(move |p| {
                let _ = progress.send(WorkerEvent::Progress(p));
            });

        let renderer = &mut self.renderer;
        let surface = &mut self.surface;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| renderer.render(&job, surface, &ctrl)));
        drop(ctrl);
        // A cancel that arrived during the last pass still discards the frame.
        drain();

        let mut result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(worker = self.id, task = %task.short(), %reason, "renderer panicked");
                self.renderer = (self.factory)();
                Err(StrataError::RendererPanic(format!(
                    "worker {}: {}",
                    self.id, reason
                )))
            }
        };
        if cancelled.get() && !matches!(result, Err(ref e) if e.is_cancellation()) {
            if result.is_ok() {
                tracing::debug!(task = %task.short(), "discarding frame of cancelled task");
            }
            result = Err(StrataError::Cancelled(format!("task {} cancelled", task)));
        }

        self.deferred.extend(deferred.into_inner());
        let _ = events.send(WorkerEvent::Done(result));
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Host-side handle to a worker thread.
pub struct WorkerHandle {
    id: usize,
    sender: Sender<WorkerMessage>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    fn send(&self, message: WorkerMessage) -> StrataResult<()> {
        self.sender
            .send(message)
            .map_err(|_| StrataError::WorkerLost(format!("worker {} is gone", self.id)))
    }

    /// Queue a serialized job; events for it arrive on the returned channel.
    pub fn render(
        &self,
        task: TaskId,
        job: Vec<u8>,
    ) -> StrataResult<event_mpsc::UnboundedReceiver<WorkerEvent>> {
        let (events, rx) = event_mpsc::unbounded_channel();
        self.send(WorkerMessage::Render { task, job, events })?;
        Ok(rx)
    }

    pub fn cancel(&self, task: TaskId) -> bool {
        self.send(WorkerMessage::Cancel(task)).is_ok()
    }

    /// Resize the worker's surface. Applied after the job in flight, if any.
    pub fn resize(&self, width: u32, height: u32) -> StrataResult<oneshot::Receiver<()>> {
        let (ack, rx) = oneshot::channel();
        self.send(WorkerMessage::Resize { width, height, ack })?;
        Ok(rx)
    }

    pub fn prepare(&self) -> StrataResult<oneshot::Receiver<StrataResult<usize>>> {
        let (ack, rx) = oneshot::channel();
        self.send(WorkerMessage::Prepare { ack })?;
        Ok(rx)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Ask the worker to stop after its current job. Does not wait.
    pub fn shutdown(&mut self) {
        let _ = self.sender.send(WorkerMessage::Shutdown);
        self.thread.take();
    }

    /// Stop the worker and wait for its thread to exit.
    pub fn join(mut self) {
        let _ = self.sender.send(WorkerMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.sender.send(WorkerMessage::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use strata_core::Color;
    use strata_fx::{build_pass_graph, PluginRegistry};
    use strata_ir::{Document, Layer};

    fn job_bytes(task: TaskId, w: u32, h: u32) -> Vec<u8> {
        let doc = Document::new(w, h).with_layer(Layer::solid("bg", Color::GREEN));
        let graph = build_pass_graph(&doc, &PluginRegistry::builtin());
        RenderJob::new(task, 1, doc, graph).to_bytes().unwrap()
    }

    fn config(w: u32, h: u32) -> SurfaceConfig {
        SurfaceConfig {
            width: w,
            height: h,
        }
    }

    fn finish(rx: &mut event_mpsc::UnboundedReceiver<WorkerEvent>) -> StrataResult<Frame> {
        loop {
            match rx.blocking_recv() {
                Some(WorkerEvent::Done(result)) => return result,
                Some(_) => continue,
                None => panic!("worker dropped the event channel"),
            }
        }
    }

    /// Sleeps between passes so tests can cancel mid-render.
    struct SlowRenderer {
        passes: usize,
    }

    impl FrameRenderer for SlowRenderer {
        fn render(
            &mut self,
            job: &RenderJob,
            surface: &mut Surface,
            ctrl: &ExecControl<'_>,
        ) -> StrataResult<Frame> {
            for i in 0..self.passes {
                ctrl.check_cancelled()?;
                thread::sleep(Duration::from_millis(20));
                ctrl.report(((i + 1) * 100 / self.passes) as u8);
            }
            Compositor::new().render_frame(job, surface, &ExecControl::new())
        }
    }

    struct PanickingRenderer;

    impl FrameRenderer for PanickingRenderer {
        fn render(&mut self, _: &RenderJob, _: &mut Surface, _: &ExecControl<'_>) -> StrataResult<Frame> {
            panic!("device lost");
        }
    }

    #[test]
    fn test_worker_renders_job() {
        let handle = RenderWorker::spawn(0, config(3, 3), compositor_factory(&EngineConfig::default()))
            .unwrap();
        let task = TaskId::new();
        let mut rx = handle.render(task, job_bytes(task, 3, 3)).unwrap();
        let frame = finish(&mut rx).unwrap();
        assert_eq!(frame.buffer.get_pixel(1, 1), Some([0, 255, 0, 255]));
        handle.join();
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let handle = RenderWorker::spawn(0, config(3, 3), compositor_factory(&EngineConfig::default()))
            .unwrap();
        let task = TaskId::new();
        let mut rx = handle.render(task, job_bytes(task, 5, 5)).unwrap();
        assert!(matches!(finish(&mut rx), Err(StrataError::InvalidArgument(_))));
        handle.join();
    }

    #[test]
    fn test_garbage_job_is_an_error() {
        let handle = RenderWorker::spawn(0, config(1, 1), compositor_factory(&EngineConfig::default()))
            .unwrap();
        let mut rx = handle.render(TaskId::new(), b"not json".to_vec()).unwrap();
        assert!(matches!(finish(&mut rx), Err(StrataError::Serialization(_))));
        handle.join();
    }

    #[test]
    fn test_cancel_mid_render() {
        let factory: RendererFactory = Arc::new(|| Box::new(SlowRenderer { passes: 50 }) as Box<dyn FrameRenderer>);
        let handle = RenderWorker::spawn(0, config(2, 2), factory).unwrap();
        let task = TaskId::new();
        let mut rx = handle.render(task, job_bytes(task, 2, 2)).unwrap();
        thread::sleep(Duration::from_millis(60));
        assert!(handle.cancel(task));
        assert!(finish(&mut rx).unwrap_err().is_cancellation());
        handle.join();
    }

    #[test]
    fn test_resize_waits_for_running_job() {
        let factory: RendererFactory = Arc::new(|| Box::new(SlowRenderer { passes: 5 }) as Box<dyn FrameRenderer>);
        let handle = RenderWorker::spawn(0, config(2, 2), factory).unwrap();
        let task = TaskId::new();
        let mut rx = handle.render(task, job_bytes(task, 2, 2)).unwrap();
        thread::sleep(Duration::from_millis(30));
        let ack = handle.resize(4, 4).unwrap();
        // The job keeps its original surface size.
        assert!(finish(&mut rx).is_ok());
        ack.blocking_recv().unwrap();

        let next = TaskId::new();
        let mut rx = handle.render(next, job_bytes(next, 4, 4)).unwrap();
        assert!(finish(&mut rx).is_ok());
        handle.join();
    }

    #[test]
    fn test_panic_reported_and_renderer_rebuilt() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let factory: RendererFactory = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::new(PanickingRenderer) as Box<dyn FrameRenderer>
        });
        let handle = RenderWorker::spawn(0, config(1, 1), factory).unwrap();
        let task = TaskId::new();
        let mut rx = handle.render(task, job_bytes(task, 1, 1)).unwrap();
        let err = finish(&mut rx).unwrap_err();
        assert!(matches!(err, StrataError::RendererPanic(ref m) if m.contains("device lost")));
        assert_eq!(err.retry_budget(3), 1);
        handle.join();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_prepare_compiles_warm_shaders() {
        let handle = RenderWorker::spawn(0, config(1, 1), compositor_factory(&EngineConfig::default()))
            .unwrap();
        let built = handle.prepare().unwrap().blocking_recv().unwrap().unwrap();
        assert_eq!(built, 4);
        handle.join();
    }
}
