//! End-to-end scheduling scenarios against real worker threads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use strata_core::{BackoffPolicy, Color, EngineConfig, FrameBuffer, Priority, StrataError, StrataResult, TaskId};
use strata_fx::{build_pass_graph, builtin, PluginRegistry};
use strata_ir::{Document, Layer, LayerId};
use strata_render::{
    Compositor, ExecControl, Frame, FrameRenderer, RenderJob, RendererFactory, Surface,
    SurfaceHandle,
};
use strata_sched::{
    RenderCoalescer, RenderEvent, RenderRequest, TaskOutcome, TaskStatus, VersionTracker,
    WorkerManager,
};
use tokio::sync::broadcast;

/// Sleeps between pretend passes, honouring cancellation, then composites.
struct SlowRenderer {
    passes: usize,
    pass_time: Duration,
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
            thread::sleep(self.pass_time);
            ctrl.report(((i + 1) * 90 / self.passes) as u8);
        }
        Compositor::new().render_frame(job, surface, ctrl)
    }
}

/// Never finishes in time and ignores cancellation.
struct HangingRenderer {
    calls: Arc<AtomicUsize>,
}

impl FrameRenderer for HangingRenderer {
    fn render(&mut self, _: &RenderJob, _: &mut Surface, _: &ExecControl<'_>) -> StrataResult<Frame> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(300));
        Err(StrataError::Render("finished far too late".into()))
    }
}

/// Panics on its first `failures` renders across all instances.
/// `usize::MAX` panics on every render.
struct FlakyRenderer {
    calls: Arc<AtomicUsize>,
    failures: usize,
}

impl FrameRenderer for FlakyRenderer {
    fn render(
        &mut self,
        job: &RenderJob,
        surface: &mut Surface,
        ctrl: &ExecControl<'_>,
    ) -> StrataResult<Frame> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            panic!("simulated device loss");
        }
        Compositor::new().render_frame(job, surface, ctrl)
    }
}

fn slow_factory(passes: usize, pass_ms: u64) -> RendererFactory {
    Arc::new(move || {
        Box::new(SlowRenderer {
            passes,
            pass_time: Duration::from_millis(pass_ms),
        }) as Box<dyn FrameRenderer>
    })
}

fn document(w: u32, h: u32) -> Document {
    Document::new(w, h).with_layer(Layer::solid("bg", Color::rgb(0.2, 0.4, 0.6)))
}

async fn started(manager: &WorkerManager, id: &TaskId) {
    for _ in 0..500 {
        if manager.task_status(id) == TaskStatus::Active {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("task {} never started", id);
}

fn drain(rx: &mut broadcast::Receiver<RenderEvent>) -> Vec<RenderEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn terminal_events_for(events: &[RenderEvent], task: TaskId) -> usize {
    events
        .iter()
        .filter(|e| e.task() == task)
        .filter(|e| !matches!(e, RenderEvent::Progress { .. }))
        .count()
}

/// Replays the transition log: every move is legal and no worker ever
/// holds two active tasks.
fn check_transitions(manager: &WorkerManager) {
    let mut status: HashMap<TaskId, TaskStatus> = HashMap::new();
    let mut running: HashMap<usize, TaskId> = HashMap::new();
    let mut placed: HashMap<TaskId, usize> = HashMap::new();

    for t in manager.transition_log() {
        let legal = matches!(
            (t.from, t.to),
            (None, TaskStatus::Queued)
                | (Some(TaskStatus::Queued), TaskStatus::Active)
                | (Some(TaskStatus::Queued), TaskStatus::Cancelled)
                | (Some(TaskStatus::Active), TaskStatus::Queued)
                | (Some(TaskStatus::Active), TaskStatus::Completed)
                | (Some(TaskStatus::Active), TaskStatus::Failed)
                | (Some(TaskStatus::Active), TaskStatus::Cancelled)
        );
        assert!(legal, "illegal transition {:?} -> {:?}", t.from, t.to);
        assert_eq!(status.get(&t.task).copied(), t.from);
        status.insert(t.task, t.to);

        if t.to == TaskStatus::Active {
            let worker = t.worker.expect("activation names its worker");
            assert!(
                running.insert(worker, t.task).is_none(),
                "worker {} ran two tasks at once",
                worker
            );
            placed.insert(t.task, worker);
        } else if t.from == Some(TaskStatus::Active) {
            let worker = placed.remove(&t.task).expect("active task had a worker");
            assert_eq!(running.remove(&worker), Some(t.task));
        }
    }
}

// Scenario A: a high-priority render completes with a success notification.
#[tokio::test]
async fn test_scenario_a_render_completes() {
    let manager = WorkerManager::new(EngineConfig::default());
    manager.initialize(SurfaceHandle::new(800, 600)).unwrap();
    let mut events = manager.subscribe();

    let photo = Layer::raster("photo", FrameBuffer::solid(800, 600, &Color::rgb(0.5, 0.3, 0.1)))
        .with_param("brightness", 150.0);
    let grade = Layer::adjustment("grade").with_param("grayscale", 50.0);
    let doc = Document::new(800, 600).with_layer(photo).with_layer(grade);

    let graph = build_pass_graph(&doc, &PluginRegistry::builtin());
    let steps = graph.for_layer(&LayerId::new("photo")).unwrap();
    let shaders: Vec<&str> = steps.iter().map(|s| s.shader.as_str()).collect();
    assert_eq!(
        shaders,
        vec![
            builtin::LINEARIZE,
            builtin::COPY,
            builtin::BASIC_ADJUSTMENTS,
            builtin::ENCODE
        ]
    );
    let brightness = steps[2].float("brightness").unwrap();
    assert!((brightness - 150.0).abs() < 1e-3);

    let id = manager
        .queue_render_task(
            RenderRequest::new(doc)
                .with_graph(graph)
                .with_priority(Priority::High)
                .with_version(1),
        )
        .unwrap();

    let outcome = manager.wait(&id).await.unwrap();
    let frame = outcome.frame().expect("render succeeded").clone();
    assert_eq!((frame.width, frame.height), (800, 600));
    assert_eq!(frame.version, 1);

    let seen = drain(&mut events);
    let progress: Vec<u8> = seen
        .iter()
        .filter_map(|e| match e {
            RenderEvent::Progress { task, value } if *task == id => Some(*value),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(progress.last(), Some(&100));
    assert!(seen.iter().any(|e| matches!(
        e,
        RenderEvent::Success { task, version: 1, .. } if *task == id
    )));

    assert_eq!(manager.task_status(&id), TaskStatus::Completed);
    assert!(!manager.is_processing());
    check_transitions(&manager);
    manager.cleanup();
}

// Scenario B: a newer submission supersedes one that has not started.
#[tokio::test]
async fn test_scenario_b_newer_submission_supersedes_queued() {
    let manager = WorkerManager::new(EngineConfig::default()).with_renderer(slow_factory(3, 10));
    manager.initialize(SurfaceHandle::new(16, 16)).unwrap();
    let mut events = manager.subscribe();

    // Both submitted before the dispatcher gets to run.
    let first = manager
        .queue_render_task(RenderRequest::new(document(16, 16)).with_version(1))
        .unwrap();
    let second = manager
        .queue_render_task(RenderRequest::new(document(16, 16)).with_version(2))
        .unwrap();
    assert_eq!(manager.task_status(&first), TaskStatus::Cancelled);

    let outcome = manager.wait(&second).await.unwrap();
    assert_eq!(outcome.frame().unwrap().version, 2);
    assert!(matches!(manager.wait(&first).await, Some(TaskOutcome::Cancelled)));

    let seen = drain(&mut events);
    assert_eq!(terminal_events_for(&seen, first), 0);
    assert!(seen.iter().all(|e| e.task() != first));
    check_transitions(&manager);
    manager.cleanup();
}

#[tokio::test]
async fn test_scenario_b_newer_submission_cancels_running() {
    let manager = WorkerManager::new(EngineConfig::default()).with_renderer(slow_factory(20, 10));
    manager.initialize(SurfaceHandle::new(16, 16)).unwrap();
    let mut events = manager.subscribe();

    let first = manager
        .queue_render_task(RenderRequest::new(document(16, 16)).with_version(1))
        .unwrap();
    started(&manager, &first).await;
    let second = manager
        .queue_render_task(RenderRequest::new(document(16, 16)).with_version(2))
        .unwrap();

    assert!(matches!(manager.wait(&first).await, Some(TaskOutcome::Cancelled)));
    assert!(manager.wait(&second).await.unwrap().frame().is_some());
    assert_eq!(terminal_events_for(&drain(&mut events), first), 0);
    check_transitions(&manager);
    manager.cleanup();
}

// Scenario C: a task that keeps timing out is retried, then fails.
#[tokio::test]
async fn test_scenario_c_timeout_retries_then_fails() {
    let mut config = EngineConfig::default();
    config.scheduler.task_timeout_ms = 40;
    config.scheduler.max_retries = 3;
    config.scheduler.backoff = BackoffPolicy::Fixed;
    config.scheduler.backoff_base_ms = 5;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let factory: RendererFactory = Arc::new(move || {
        Box::new(HangingRenderer {
            calls: counter.clone(),
        }) as Box<dyn FrameRenderer>
    });
    let manager = WorkerManager::new(config).with_renderer(factory);
    manager.initialize(SurfaceHandle::new(8, 8)).unwrap();
    let mut events = manager.subscribe();

    let id = manager
        .queue_render_task(RenderRequest::new(document(8, 8)))
        .unwrap();
    let outcome = manager.wait(&id).await.unwrap();
    assert!(matches!(
        outcome.error(),
        Some(StrataError::Timeout { .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    let activations = manager
        .transition_log()
        .iter()
        .filter(|t| t.task == id && t.to == TaskStatus::Active)
        .count();
    assert_eq!(activations, 4);

    let seen = drain(&mut events);
    assert!(seen
        .iter()
        .any(|e| matches!(e, RenderEvent::Error { task, .. } if *task == id)));
    assert!(!manager.is_processing());
    check_transitions(&manager);
    manager.cleanup();
}

#[tokio::test]
async fn test_renderer_panic_is_retried_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let factory: RendererFactory = Arc::new(move || {
        Box::new(FlakyRenderer {
            calls: counter.clone(),
            failures: 1,
        }) as Box<dyn FrameRenderer>
    });
    let mut config = EngineConfig::default();
    config.scheduler.backoff_base_ms = 1;
    let manager = WorkerManager::new(config).with_renderer(factory);
    manager.initialize(SurfaceHandle::new(4, 4)).unwrap();

    let id = manager
        .queue_render_task(RenderRequest::new(document(4, 4)))
        .unwrap();
    assert!(manager.wait(&id).await.unwrap().frame().is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    manager.cleanup();
}

#[tokio::test]
async fn test_repeated_panic_fails_after_one_retry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let factory: RendererFactory = Arc::new(move || {
        Box::new(FlakyRenderer {
            calls: counter.clone(),
            failures: usize::MAX,
        }) as Box<dyn FrameRenderer>
    });
    let mut config = EngineConfig::default();
    config.scheduler.backoff_base_ms = 1;
    config.scheduler.max_retries = 4;
    let manager = WorkerManager::new(config).with_renderer(factory);
    manager.initialize(SurfaceHandle::new(4, 4)).unwrap();

    let id = manager
        .queue_render_task(RenderRequest::new(document(4, 4)))
        .unwrap();
    let outcome = manager.wait(&id).await.unwrap();
    assert!(matches!(
        outcome,
        TaskOutcome::Failed(ref e) if matches!(**e, StrataError::RendererPanic(_))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    check_transitions(&manager);
    manager.cleanup();
}

#[tokio::test]
async fn test_deterministic_errors_are_not_retried() {
    let manager = WorkerManager::new(EngineConfig::default());
    manager.initialize(SurfaceHandle::new(4, 4)).unwrap();

    let doc = document(4, 4).with_layer(Layer::adjustment("fx").with_param("blur", 4.0));
    let mut graph = build_pass_graph(&doc, &PluginRegistry::builtin());
    graph.global.push(strata_fx::PassStep::new("not-a-shader"));
    let id = manager
        .queue_render_task(RenderRequest::new(doc).with_graph(graph))
        .unwrap();

    let outcome = manager.wait(&id).await.unwrap();
    assert!(matches!(outcome.error(), Some(StrataError::UnknownShader(_))));
    let activations = manager
        .transition_log()
        .iter()
        .filter(|t| t.task == id && t.to == TaskStatus::Active)
        .count();
    assert_eq!(activations, 1);
    manager.cleanup();
}

// Scenario D: resizing while a task runs.
#[tokio::test]
async fn test_scenario_d_resize_during_render() {
    let manager = WorkerManager::new(EngineConfig::default()).with_renderer(slow_factory(5, 10));
    let surface = SurfaceHandle::new(64, 64);
    manager.initialize(surface.clone()).unwrap();

    let running = manager
        .queue_render_task(RenderRequest::new(document(64, 64)))
        .unwrap();
    started(&manager, &running).await;
    let queued = manager
        .queue_render_task(RenderRequest::new(document(64, 64)).with_signature("thumbnail"))
        .unwrap();

    assert!(manager.resize(128, 128));
    assert_eq!(surface.size(), (128, 128));
    assert_eq!(manager.task_status(&queued), TaskStatus::Cancelled);

    // The running task finishes against the size it started with.
    let frame = manager.wait(&running).await.unwrap().frame().unwrap().clone();
    assert_eq!((frame.width, frame.height), (64, 64));

    let next = manager
        .queue_render_task(RenderRequest::new(document(128, 128)))
        .unwrap();
    let frame = manager.wait(&next).await.unwrap().frame().unwrap().clone();
    assert_eq!((frame.width, frame.height), (128, 128));
    check_transitions(&manager);
    manager.cleanup();
}

#[tokio::test]
async fn test_cancel_queued_task_has_no_side_effects() {
    let manager = WorkerManager::new(EngineConfig::default()).with_renderer(slow_factory(5, 10));
    manager.initialize(SurfaceHandle::new(8, 8)).unwrap();
    let mut events = manager.subscribe();

    let busy = manager
        .queue_render_task(RenderRequest::new(document(8, 8)).with_signature("a"))
        .unwrap();
    started(&manager, &busy).await;
    let waiting = manager
        .queue_render_task(RenderRequest::new(document(8, 8)).with_signature("b"))
        .unwrap();
    assert_eq!(manager.queue_stats().queued, 1);
    assert!(manager.cancel_task(&waiting));
    assert!(!manager.cancel_task(&waiting));
    assert_eq!(manager.task_status(&waiting), TaskStatus::Cancelled);

    manager.wait(&busy).await.unwrap();
    assert!(drain(&mut events).iter().all(|e| e.task() != waiting));
    let stats = manager.queue_stats();
    assert_eq!((stats.queued, stats.active, stats.total), (0, 0, 2));
    manager.cleanup();
}

#[tokio::test]
async fn test_priority_order_with_one_worker() {
    let manager = WorkerManager::new(EngineConfig::default()).with_renderer(slow_factory(2, 5));
    manager.initialize(SurfaceHandle::new(4, 4)).unwrap();

    let blocker = manager
        .queue_render_task(RenderRequest::new(document(4, 4)).with_signature("blocker"))
        .unwrap();
    started(&manager, &blocker).await;

    let low = manager
        .queue_render_task(
            RenderRequest::new(document(4, 4))
                .with_signature("low")
                .with_priority(Priority::Low),
        )
        .unwrap();
    let high = manager
        .queue_render_task(
            RenderRequest::new(document(4, 4))
                .with_signature("high")
                .with_priority(Priority::High),
        )
        .unwrap();
    manager.wait(&low).await.unwrap();
    manager.wait(&high).await.unwrap();

    let order: Vec<TaskId> = manager
        .transition_log()
        .iter()
        .filter(|t| t.to == TaskStatus::Active)
        .map(|t| t.task)
        .collect();
    assert_eq!(order, vec![blocker, high, low]);
    check_transitions(&manager);
    manager.cleanup();
}

#[tokio::test]
async fn test_cleanup_cancels_everything() {
    let manager = WorkerManager::new(EngineConfig::default()).with_renderer(slow_factory(50, 10));
    let surface = SurfaceHandle::new(8, 8);
    manager.initialize(surface.clone()).unwrap();
    let mut events = manager.subscribe();

    let running = manager
        .queue_render_task(RenderRequest::new(document(8, 8)).with_signature("a"))
        .unwrap();
    started(&manager, &running).await;
    let queued = manager
        .queue_render_task(RenderRequest::new(document(8, 8)).with_signature("b"))
        .unwrap();

    manager.cleanup();
    assert!(!surface.is_bound());
    assert_eq!(manager.task_status(&queued), TaskStatus::Cancelled);
    assert!(matches!(manager.wait(&running).await, Some(TaskOutcome::Cancelled)));
    assert!(!manager.is_processing());
    let seen = drain(&mut events);
    assert_eq!(terminal_events_for(&seen, running), 0);
}

#[tokio::test]
async fn test_two_workers_never_double_book() {
    let mut config = EngineConfig::default();
    config.scheduler.workers = 2;
    let manager = WorkerManager::new(config).with_renderer(slow_factory(2, 5));
    manager.initialize(SurfaceHandle::new(4, 4)).unwrap();

    let ids: Vec<TaskId> = (0..6)
        .map(|i| {
            manager
                .queue_render_task(RenderRequest::new(document(4, 4)).with_signature(format!("s{i}")))
                .unwrap()
        })
        .collect();
    for id in &ids {
        assert!(manager.wait(id).await.unwrap().frame().is_some());
    }
    let workers_used: std::collections::HashSet<usize> = manager
        .transition_log()
        .iter()
        .filter_map(|t| t.worker.filter(|_| t.to == TaskStatus::Active))
        .collect();
    assert!(!workers_used.is_empty());
    check_transitions(&manager);
    manager.cleanup();
}

#[tokio::test]
async fn test_coalescer_collapses_burst() {
    let manager = WorkerManager::new(EngineConfig::default());
    manager.initialize(SurfaceHandle::new(8, 8)).unwrap();
    let coalescer = Arc::new(RenderCoalescer::new(manager.clone(), Duration::from_millis(40)).unwrap());

    let mut handles = Vec::new();
    for step in 0..10 {
        let coalescer = coalescer.clone();
        let doc = document(8, 8).with_layer(
            Layer::adjustment("fx").with_param("brightness", 100.0 + step as f32),
        );
        handles.push(tokio::spawn(async move {
            coalescer.request(RenderRequest::new(doc)).await
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().expect("submitted"));
    }
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(manager.queue_stats().total, 1);
    assert_eq!(coalescer.current_version(strata_sched::CANVAS_SIGNATURE), 1);

    let frame = manager.wait(&ids[0]).await.unwrap().frame().unwrap().clone();
    assert_eq!(frame.version, 1);
    assert!(!coalescer.is_processing(strata_sched::CANVAS_SIGNATURE));
    manager.cleanup();
}

// The last request of a burst is the one submitted, whatever the timing.
#[tokio::test(start_paused = true)]
async fn test_coalescer_keeps_last_call() {
    let manager = WorkerManager::new(EngineConfig::default()).with_renderer(slow_factory(50, 10));
    manager.initialize(SurfaceHandle::new(8, 8)).unwrap();
    let coalescer = RenderCoalescer::new(manager.clone(), Duration::from_millis(50)).unwrap();

    let mut handles = Vec::new();
    for step in 0..10 {
        let doc = document(8, 8).with_layer(
            Layer::adjustment("fx").with_param("brightness", 100.0 + step as f32),
        );
        handles.push(tokio::spawn(coalescer.request(RenderRequest::new(doc))));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().expect("submitted"));
    }
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(manager.queue_stats().total, 1);

    let request = manager.task_request(&ids[0]).unwrap();
    assert_eq!(request.version, 1);
    let graph = build_pass_graph(&request.document, &PluginRegistry::builtin());
    let steps = graph.for_layer(&LayerId::new("fx")).unwrap();
    let basic = steps
        .iter()
        .find(|step| step.shader == builtin::BASIC_ADJUSTMENTS)
        .unwrap();
    assert_eq!(basic.float("brightness"), Some(109.0));
    manager.cleanup();
}

#[tokio::test]
async fn test_coalescer_versions_increase_and_cancel_previous() {
    let manager = WorkerManager::new(EngineConfig::default()).with_renderer(slow_factory(20, 10));
    manager.initialize(SurfaceHandle::new(8, 8)).unwrap();
    let coalescer = RenderCoalescer::new(manager.clone(), Duration::from_millis(10)).unwrap();
    let mut tracker = VersionTracker::new();
    let signature = strata_sched::CANVAS_SIGNATURE;

    let first = coalescer.request(RenderRequest::new(document(8, 8))).await.unwrap();
    tracker.observe(signature, coalescer.current_version(signature));
    started(&manager, &first).await;
    assert!(coalescer.is_processing(signature));

    let second = coalescer.request(RenderRequest::new(document(8, 8))).await.unwrap();
    tracker.observe(signature, coalescer.current_version(signature));
    assert_ne!(first, second);
    assert_eq!(coalescer.current_version(signature), 2);

    assert!(matches!(manager.wait(&first).await, Some(TaskOutcome::Cancelled)));
    let frame = manager.wait(&second).await.unwrap().frame().unwrap().clone();
    assert!(!tracker.accept(signature, 1));
    assert!(tracker.accept(signature, frame.version));
    assert!(!coalescer.is_processing(signature));
    manager.cleanup();
}

#[tokio::test]
async fn test_coalescer_reports_rejected_submission() {
    let manager = WorkerManager::new(EngineConfig::default());
    let coalescer = RenderCoalescer::new(manager, Duration::from_millis(5)).unwrap();
    assert_eq!(coalescer.request(RenderRequest::new(document(4, 4))).await, None);
}
