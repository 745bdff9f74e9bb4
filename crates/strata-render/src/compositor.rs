use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strata_core::color::luminance;
use strata_core::{
    ContentHash, EngineConfig, FrameBuffer, Rect, RenderBackend, StrataError, StrataResult,
    TaskId, Texture,
};
use strata_fx::{builtin, CompilePolicy, LayerPasses, PassGraph, ShaderRegistry};
use strata_ir::{Document, Layer, LayerContent, LayerId};

use crate::blend;
use crate::executor::{run_pass_list, ExecControl, PassCounter, PassEnv};
use crate::gpu::GpuPasses;
use crate::kernels;
use crate::program::ProgramCache;
use crate::surface::Surface;

/// Everything a worker needs to render one frame. Crosses the worker
/// boundary serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJob {
    pub task: TaskId,
    pub version: u64,
    pub document: Document,
    pub graph: PassGraph,
    #[serde(default)]
    pub interactive: bool,
}

impl RenderJob {
    pub fn new(task: TaskId, version: u64, document: Document, graph: PassGraph) -> Self {
        Self {
            task,
            version,
            document,
            graph,
            interactive: false,
        }
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn to_bytes(&self) -> StrataResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> StrataResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.document.width, self.document.height)
    }
}

/// A rendered frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Document version the frame was rendered from.
    pub version: u64,
    pub buffer: FrameBuffer,
    pub hash: ContentHash,
}

enum Backend {
    Software,
    Gpu(GpuPasses),
    /// A GPU was required but could not be opened.
    Unavailable(String),
}

/// Runs pass graphs and blends layers bottom to top.
///
/// One instance per worker. Compiled programs are cached for the lifetime of
/// the compositor. Shader passes go to the worker's GPU device when it has
/// one; layer blending always runs on the CPU.
pub struct Compositor {
    registry: &'static ShaderRegistry,
    programs: ProgramCache,
    backend: Backend,
    interactive_stride: u32,
    warm_on_prepare: bool,
}

impl Compositor {
    /// Software-only compositor with default settings.
    pub fn new() -> Self {
        Self::software(&EngineConfig::default())
    }

    fn software(config: &EngineConfig) -> Self {
        Self {
            registry: ShaderRegistry::global(),
            programs: ProgramCache::new(),
            backend: Backend::Software,
            interactive_stride: config.render.interactive_blur_stride.max(1),
            warm_on_prepare: config.shaders.warm_on_prepare,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let backend = match config.render.backend {
            RenderBackend::Cpu => Backend::Software,
            RenderBackend::Auto => match GpuPasses::init() {
                Ok(gpu) => Backend::Gpu(gpu),
                Err(e) => {
                    tracing::info!(error = %e, "no gpu device, rendering in software");
                    Backend::Software
                }
            },
            RenderBackend::Gpu => match GpuPasses::init() {
                Ok(gpu) => Backend::Gpu(gpu),
                Err(e) => {
                    tracing::error!(error = %e, "gpu backend required but unavailable");
                    Backend::Unavailable(e.to_string())
                }
            },
        };
        Self {
            backend,
            ..Self::software(config)
        }
    }

    pub fn with_gpu(mut self, gpu: GpuPasses) -> Self {
        self.backend = Backend::Gpu(gpu);
        self
    }

    pub fn gpu(&self) -> Option<&GpuPasses> {
        match &self.backend {
            Backend::Gpu(gpu) => Some(gpu),
            _ => None,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Software => "software",
            Backend::Gpu(_) => "gpu",
            Backend::Unavailable(_) => "unavailable",
        }
    }

    pub fn with_registry(mut self, registry: &'static ShaderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    fn build_pipelines(&self) {
        let Some(gpu) = self.gpu() else {
            return;
        };
        for program in self.programs.programs() {
            if let Err(e) = gpu.prepare(&program) {
                tracing::warn!(stage = %program.stage.key(), error = %e, "gpu pipeline unavailable");
            }
        }
    }

    /// Load the `Eager` shaders, already compiled at registration. Called
    /// once when a worker starts.
    pub fn startup(&self) -> StrataResult<usize> {
        let built = self.programs.warm(self.registry, &[CompilePolicy::Eager])?;
        self.build_pipelines();
        Ok(built)
    }

    /// Compile the `Warm` shaders, unless disabled in configuration.
    pub fn prepare(&self) -> StrataResult<usize> {
        if !self.warm_on_prepare {
            return Ok(0);
        }
        let built = self
            .programs
            .warm(self.registry, &[CompilePolicy::Eager, CompilePolicy::Warm])?;
        self.build_pipelines();
        Ok(built)
    }

    /// Render one frame of `job` into `surface`.
    ///
    /// Layers are composited in display-encoded space; adjustment layers see
    /// the running composite linearized. Document passes run once over the
    /// final composite. The frame is presented to the surface on success.
    pub fn render_frame(
        &self,
        job: &RenderJob,
        surface: &mut Surface,
        ctrl: &ExecControl<'_>,
    ) -> StrataResult<Frame> {
        if let Backend::Unavailable(reason) = &self.backend {
            return Err(StrataError::Initialization(reason.clone()));
        }
        let doc = &job.document;
        let canvas = job.size();
        if canvas != surface.size() {
            return Err(StrataError::InvalidArgument(format!(
                "job is {}x{} but surface is {}x{}",
                canvas.0,
                canvas.1,
                surface.size().0,
                surface.size().1
            )));
        }

        let blur_stride = if job.interactive {
            ctrl.blur_stride().max(self.interactive_stride)
        } else {
            ctrl.blur_stride()
        };
        let blends = job.graph.layers.len() + job.graph.global_layers.len();
        let mut counter = PassCounter::new(job.graph.pass_count() + blends);

        let mut composite = Texture::new(canvas.0, canvas.1);
        for passes in job.graph.layers.iter().chain(job.graph.global_layers.iter()) {
            composite =
                self.composite_layer(doc, passes, composite, blur_stride, ctrl, &mut counter)?;
        }

        if !job.graph.global.is_empty() {
            let env = PassEnv {
                registry: self.registry,
                programs: &self.programs,
                backdrop: None,
                canvas,
                blur_stride,
                gpu: self.gpu(),
            };
            composite = run_pass_list(&job.graph.global, composite, &env, ctrl, &mut counter)?;
        }

        let buffer = composite.to_frame_buffer();
        let hash = buffer.content_hash();
        surface.present(&buffer);
        ctrl.report(100);
        tracing::debug!(
            task = %job.task.short(),
            version = job.version,
            hash = %hash.short(),
            "frame rendered"
        );
        Ok(Frame {
            width: canvas.0,
            height: canvas.1,
            version: job.version,
            buffer,
            hash,
        })
    }

    fn composite_layer(
        &self,
        doc: &Document,
        passes: &LayerPasses,
        backdrop: Texture,
        blur_stride: u32,
        ctrl: &ExecControl<'_>,
        counter: &mut PassCounter,
    ) -> StrataResult<Texture> {
        let canvas = (doc.width, doc.height);
        let layer = find_layer(doc, &passes.layer).ok_or_else(|| {
            StrataError::InvalidDocument(format!("pass graph names unknown layer '{}'", passes.layer))
        })?;

        let initial = match &layer.content {
            LayerContent::Raster { image } => Texture::from_frame_buffer(image),
            LayerContent::Solid { color } => Texture::filled(1, 1, color.to_array()),
            LayerContent::Adjustment => kernels::linearize(&backdrop, doc.profile),
            LayerContent::Mask { .. } | LayerContent::Group { .. } => return Ok(backdrop),
        };

        let env = PassEnv {
            registry: self.registry,
            programs: &self.programs,
            backdrop: Some(&backdrop),
            canvas,
            blur_stride,
            gpu: self.gpu(),
        };
        let rendered = run_pass_list(&passes.steps, initial, &env, ctrl, counter)?;
        if (rendered.width, rendered.height) != canvas {
            return Err(StrataError::Render(format!(
                "layer '{}' produced {}x{}, expected {}x{}",
                layer.id, rendered.width, rendered.height, canvas.0, canvas.1
            )));
        }

        let weights = mask_weights(doc, layer)?;
        ctrl.check_cancelled()?;
        self.programs
            .get_or_compile(self.registry, builtin::BLEND, None)?;
        let opacity = (layer.opacity / 100.0).clamp(0.0, 1.0);
        let out = blend::composite(
            &backdrop,
            &rendered,
            weights.as_deref(),
            layer.blend_mode,
            opacity,
        );
        counter.tick(ctrl);
        Ok(out)
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

fn find_layer<'d>(doc: &'d Document, id: &LayerId) -> Option<&'d Layer> {
    doc.layer(id)
        .or_else(|| doc.global_layers.iter().find(|l| &l.id == id))
}

/// Per-pixel mask weight of a layer, or `None` when it has no masks.
///
/// Each mask contributes `luminance × alpha` of its source, optionally
/// inverted, scaled by its opacity; the first mask seeds the weight and the
/// rest combine through their [`MaskMode`](strata_core::MaskMode).
pub fn mask_weights(doc: &Document, layer: &Layer) -> StrataResult<Option<Vec<f32>>> {
    if layer.masks.is_empty() {
        return Ok(None);
    }
    let (width, height) = (doc.width, doc.height);
    let mut acc: Option<Vec<f32>> = None;

    for mask in &layer.masks {
        let source = find_layer(doc, &mask.source).ok_or_else(|| {
            StrataError::InvalidDocument(format!(
                "layer '{}' is masked by unknown layer '{}'",
                layer.id, mask.source
            ))
        })?;
        let image = source.mask_image().ok_or_else(|| {
            StrataError::InvalidDocument(format!(
                "mask source '{}' has no image",
                mask.source
            ))
        })?;
        let texture = Texture::from_frame_buffer(image);
        let rect = source.placement.unwrap_or_else(|| Rect::canvas(width, height));
        let scale = (mask.opacity / 100.0).clamp(0.0, 1.0);

        let weights: Vec<f32> = (0..(width as usize) * (height as usize))
            .into_par_iter()
            .map(|i| {
                let x = (i % width as usize) as u32;
                let y = (i / width as usize) as u32;
                let mut w = if rect.contains(x as i64, y as i64) {
                    let (u, v) = rect.local_uv(x, y);
                    let px = texture.sample_bilinear(u, v);
                    luminance([px[0], px[1], px[2]]) * px[3]
                } else {
                    0.0
                };
                if mask.invert {
                    w = 1.0 - w;
                }
                (w * scale).clamp(0.0, 1.0)
            })
            .collect();

        acc = Some(match acc {
            None => weights,
            Some(prev) => prev
                .iter()
                .zip(weights.iter())
                .map(|(a, w)| mask.mode.combine(*a, *w))
                .collect(),
        });
    }
    Ok(acc)
}
