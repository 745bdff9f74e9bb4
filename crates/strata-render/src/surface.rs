use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_core::FrameBuffer;

/// Dimensions a worker's surface is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
}

/// Render target owned by exactly one worker.
#[derive(Debug)]
pub struct Surface {
    width: u32,
    height: u32,
    front: Option<FrameBuffer>,
    presented: u64,
}

impl Surface {
    pub fn new(config: SurfaceConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            front: None,
            presented: 0,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Change dimensions; the presented frame no longer matches and is dropped.
    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) != (self.width, self.height) {
            self.width = width;
            self.height = height;
            self.front = None;
        }
    }

    pub fn present(&mut self, frame: &FrameBuffer) {
        self.front = Some(frame.clone());
        self.presented += 1;
    }

    pub fn front(&self) -> Option<&FrameBuffer> {
        self.front.as_ref()
    }

    pub fn presented_count(&self) -> u64 {
        self.presented
    }
}

#[derive(Debug)]
struct SurfaceState {
    width: AtomicU32,
    height: AtomicU32,
    bound: AtomicBool,
}

/// Host-side handle to the display surface a worker manager renders for.
///
/// A handle can be bound to one manager at a time. Clones share state.
#[derive(Debug, Clone)]
pub struct SurfaceHandle {
    state: Arc<SurfaceState>,
}

impl SurfaceHandle {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Arc::new(SurfaceState {
                width: AtomicU32::new(width),
                height: AtomicU32::new(height),
                bound: AtomicBool::new(false),
            }),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (
            self.state.width.load(Ordering::Acquire),
            self.state.height.load(Ordering::Acquire),
        )
    }

    pub fn config(&self) -> SurfaceConfig {
        let (width, height) = self.size();
        SurfaceConfig { width, height }
    }

    pub fn set_size(&self, width: u32, height: u32) {
        self.state.width.store(width, Ordering::Release);
        self.state.height.store(height, Ordering::Release);
    }

    /// Claim the surface. Returns false if it is already bound.
    pub fn try_bind(&self) -> bool {
        self.state
            .bound
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.state.bound.store(false, Ordering::Release);
    }

    pub fn is_bound(&self) -> bool {
        self.state.bound.load(Ordering::Acquire)
    }
}
