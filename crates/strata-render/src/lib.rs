//! # strata-render
//!
//! The Strata rendering engine. Takes a document and its pass graph and
//! produces frames. Shader passes run on a wgpu device when the worker can
//! open one; every built-in shader also has a rayon-parallel software kernel
//! that serves as the fallback. Programs are compiled into a per-worker
//! cache, and each worker owns its surface on a dedicated thread.

pub mod blend;
pub mod compositor;
pub mod executor;
pub mod gpu;
pub mod kernels;
pub mod program;
pub mod surface;
pub mod worker;

pub use compositor::{mask_weights, Compositor, Frame, RenderJob};
pub use executor::ExecControl;
pub use gpu::{GpuContext, GpuPasses, TexturePool};
pub use program::{Kernel, ProgramCache, ShaderProgram};
pub use surface::{Surface, SurfaceConfig, SurfaceHandle};
pub use worker::{
    compositor_factory, FrameRenderer, RenderWorker, RendererFactory, WorkerEvent, WorkerHandle,
    WorkerMessage,
};
