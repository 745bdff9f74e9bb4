//! Simulated slider drag: a burst of interactive renders through the
//! coalescer, followed by one full-quality render on release.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use strata_core::{EngineConfig, TaskId};
use strata_ir::{Document, LayerId, ParamValue};
use strata_render::SurfaceHandle;
use strata_sched::{
    RenderCoalescer, RenderEvent, RenderRequest, TaskOutcome, VersionTracker, WorkerManager,
    CANVAS_SIGNATURE,
};
use tokio::sync::broadcast::error::TryRecvError;

pub struct DragPlan {
    pub layer: String,
    pub param: String,
    pub from: f32,
    pub to: f32,
    pub steps: u32,
    /// Delay between slider positions.
    pub interval: Duration,
}

impl DragPlan {
    /// Parameter value at slider position `step`.
    pub fn value_at(&self, step: u32) -> f32 {
        if self.steps <= 1 {
            return self.to;
        }
        let t = step as f32 / (self.steps - 1) as f32;
        self.from + (self.to - self.from) * t
    }
}

#[derive(Debug, Default)]
pub struct DragReport {
    pub requests: u32,
    pub tasks: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub failed: usize,
    /// Frames that passed the version filter.
    pub presented: usize,
    pub final_version: u64,
}

fn with_value(doc: &Document, plan: &DragPlan, value: f32) -> Result<Document> {
    let mut doc = doc.clone();
    let layer = doc
        .layer_mut(&LayerId::new(plan.layer.clone()))
        .with_context(|| format!("layer '{}' not found in document", plan.layer))?;
    layer
        .params
        .insert(plan.param.clone(), ParamValue::Scalar(value));
    Ok(doc)
}

pub async fn run(doc: Document, plan: DragPlan, config: EngineConfig) -> Result<DragReport> {
    let manager = WorkerManager::new(config.clone());
    manager.initialize(SurfaceHandle::new(doc.width, doc.height))?;
    let coalescer = Arc::new(RenderCoalescer::from_config(manager.clone(), &config.coalesce)?);
    let mut events = manager.subscribe();

    let mut pending = Vec::new();
    for step in 0..plan.steps {
        let request = RenderRequest::new(with_value(&doc, &plan, plan.value_at(step))?).interactive();
        let coalescer = coalescer.clone();
        pending.push(tokio::spawn(async move { coalescer.request(request).await }));
        tokio::time::sleep(plan.interval).await;
    }

    // Releasing the slider commits the final value at full quality.
    let release = RenderRequest::new(with_value(&doc, &plan, plan.to)?);
    let final_task = coalescer
        .request(release)
        .await
        .context("final render was not accepted")?;

    let mut ids: BTreeSet<TaskId> = BTreeSet::new();
    for handle in pending {
        if let Some(id) = handle.await.context("drag step panicked")? {
            ids.insert(id);
        }
    }
    ids.insert(final_task);

    let mut report = DragReport {
        requests: plan.steps + 1,
        tasks: ids.len(),
        final_version: coalescer.current_version(CANVAS_SIGNATURE),
        ..DragReport::default()
    };
    for id in &ids {
        match manager.wait(id).await {
            Some(TaskOutcome::Completed(_)) => report.completed += 1,
            Some(TaskOutcome::Cancelled) => report.cancelled += 1,
            Some(TaskOutcome::Failed(e)) => {
                tracing::warn!(task = %id.short(), error = %e, "drag render failed");
                report.failed += 1;
            }
            None => {}
        }
    }

    let mut tracker = VersionTracker::new();
    tracker.observe(CANVAS_SIGNATURE, 0);
    loop {
        match events.try_recv() {
            Ok(RenderEvent::Success { version, .. }) => {
                if tracker.accept(CANVAS_SIGNATURE, version) {
                    report.presented += 1;
                }
            }
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    manager.cleanup();
    Ok(report)
}
