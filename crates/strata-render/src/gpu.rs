//! wgpu backend for shader passes.
//!
//! A worker owns one [`GpuPasses`]: a headless device, a texture pool and the
//! render pipelines built from compiled stages. Pass textures are
//! `Rgba32Float`, so the GPU path reads and writes the same linear floats as
//! the software kernels.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use strata_core::{StrataError, StrataResult, Texture};
use strata_fx::compile::{FRAGMENT_ENTRY, VERTEX_ENTRY};
use strata_fx::{CompiledStage, StageLayout, UniformBlock};
use wgpu::util::DeviceExt;

use crate::program::ShaderProgram;

const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const PIXEL_BYTES: u32 = 16;

fn pass_usage() -> wgpu::TextureUsages {
    wgpu::TextureUsages::TEXTURE_BINDING
        | wgpu::TextureUsages::RENDER_ATTACHMENT
        | wgpu::TextureUsages::COPY_DST
        | wgpu::TextureUsages::COPY_SRC
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

fn gpu_error(what: &str, err: impl std::fmt::Display) -> StrataError {
    StrataError::Render(format!("gpu {what}: {err}"))
}

#[derive(Hash, Eq, PartialEq, Clone, Copy)]
struct TextureKey {
    width: u32,
    height: u32,
}

/// Pass textures kept for reuse, keyed by size.
pub struct TexturePool {
    free: Mutex<HashMap<TextureKey, Vec<wgpu::Texture>>>,
}

impl TexturePool {
    pub fn new() -> Self {
        Self {
            free: Mutex::new(HashMap::new()),
        }
    }

    pub fn acquire(&self, device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
        let key = TextureKey { width, height };
        if let Some(texture) = self.free.lock().get_mut(&key).and_then(Vec::pop) {
            return texture;
        }
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some("strata pass texture"),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FORMAT,
            usage: pass_usage(),
            view_formats: &[],
        })
    }

    pub fn release(&self, texture: wgpu::Texture) {
        let key = TextureKey {
            width: texture.width(),
            height: texture.height(),
        };
        self.free.lock().entry(key).or_default().push(texture);
    }

    /// Textures currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.free.lock().values().map(Vec::len).sum()
    }
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}

/// A headless device shared by every pass of one worker.
pub struct GpuContext {
    pub adapter_info: wgpu::AdapterInfo,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub texture_pool: TexturePool,
}

impl GpuContext {
    /// Selects the best available backend (Metal, Vulkan, DX12, GL).
    pub fn init() -> StrataResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| StrataError::Initialization("no wgpu adapter available".into()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("strata headless device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
            },
            None,
        ))
        .map_err(|e| StrataError::Initialization(format!("wgpu device: {e}")))?;

        // Errors outside an error scope are logged instead of panicking.
        device.on_uncaptured_error(Box::new(|err| {
            tracing::error!(error = %err, "uncaptured wgpu error");
        }));

        let adapter_info = adapter.get_info();
        tracing::info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "gpu device ready"
        );
        Ok(Self {
            adapter_info,
            device,
            queue,
            texture_pool: TexturePool::new(),
        })
    }
}

/// Lay out uniform values the way the block expects them. Fields without a
/// value stay zero.
pub fn pack_uniforms(
    block: &UniformBlock,
    mut value: impl FnMut(&str) -> Option<Vec<f32>>,
) -> Vec<u8> {
    let mut words = vec![0.0f32; block.size.next_multiple_of(16) as usize / 4];
    for field in &block.fields {
        let Some(components) = value(&field.name) else {
            continue;
        };
        let start = field.offset as usize / 4;
        for (i, c) in components
            .into_iter()
            .take(field.components as usize)
            .enumerate()
        {
            if let Some(word) = words.get_mut(start + i) {
                *word = c;
            }
        }
    }
    bytemuck::cast_slice(&words).to_vec()
}

fn layout_entries(layout: &StageLayout) -> Vec<wgpu::BindGroupLayoutEntry> {
    let entry = |binding, ty| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty,
        count: None,
    };
    let mut entries: Vec<_> = layout
        .textures
        .iter()
        .map(|slot| {
            entry(
                slot.binding,
                wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
            )
        })
        .collect();
    entries.extend(layout.samplers.iter().map(|&binding| {
        entry(
            binding,
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
        )
    }));
    if let Some(block) = &layout.uniforms {
        entries.push(entry(
            block.binding,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        ));
    }
    entries
}

struct StagePipeline {
    version: u32,
    bind_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
}

fn build_pipeline(device: &wgpu::Device, stage: &CompiledStage) -> StagePipeline {
    let label = stage.key();
    let vs = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&label),
        source: wgpu::ShaderSource::Wgsl((&*stage.vertex).into()),
    });
    let fs = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&label),
        source: wgpu::ShaderSource::Wgsl((&*stage.fragment).into()),
    });

    let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&label),
        entries: &layout_entries(&stage.layout),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&label),
        bind_group_layouts: &[&bind_layout],
        push_constant_ranges: &[],
    });

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &vs,
            entry_point: VERTEX_ENTRY,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module: &fs,
            entry_point: FRAGMENT_ENTRY,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    });

    StagePipeline {
        version: stage.version,
        bind_layout,
        pipeline,
    }
}

/// Executes compiled stages as fullscreen render passes.
pub struct GpuPasses {
    ctx: GpuContext,
    sampler: wgpu::Sampler,
    pipelines: DashMap<String, Arc<StagePipeline>>,
}

impl GpuPasses {
    pub fn init() -> StrataResult<Self> {
        Ok(Self::new(GpuContext::init()?))
    }

    pub fn new(ctx: GpuContext) -> Self {
        let sampler = ctx.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("strata pass sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        Self {
            ctx,
            sampler,
            pipelines: DashMap::new(),
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn adapter_name(&self) -> &str {
        &self.ctx.adapter_info.name
    }

    /// Run `f` inside a validation error scope.
    fn scoped<T>(&self, what: &str, f: impl FnOnce(&wgpu::Device) -> T) -> StrataResult<T> {
        let device = &self.ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(device);
        match pollster::block_on(device.pop_error_scope()) {
            Some(err) => Err(gpu_error(what, err)),
            None => Ok(value),
        }
    }

    fn pipeline(&self, stage: &CompiledStage) -> StrataResult<Arc<StagePipeline>> {
        let key = stage.key();
        if let Some(existing) = self.pipelines.get(&key) {
            if existing.version >= stage.version {
                return Ok(existing.clone());
            }
        }
        let built = Arc::new(self.scoped("pipeline", |device| build_pipeline(device, stage))?);
        tracing::debug!(stage = %key, "built gpu pipeline");
        self.pipelines.insert(key, built.clone());
        Ok(built)
    }

    /// Build the pipeline for a program ahead of its first pass.
    pub fn prepare(&self, program: &ShaderProgram) -> StrataResult<()> {
        self.pipeline(&program.stage).map(|_| ())
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    fn upload(&self, texture: &Texture) -> wgpu::Texture {
        let gpu = self
            .ctx
            .texture_pool
            .acquire(&self.ctx.device, texture.width, texture.height);
        self.ctx.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &gpu,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&texture.pixels),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(texture.width * PIXEL_BYTES),
                rows_per_image: Some(texture.height),
            },
            extent(texture.width, texture.height),
        );
        gpu
    }

    /// Run one stage over `inputs`, which line up with the texture slots of
    /// the stage layout, and read the `size` output back.
    pub fn run(
        &self,
        program: &ShaderProgram,
        inputs: &[&Texture],
        uniforms: &[u8],
        size: (u32, u32),
    ) -> StrataResult<Texture> {
        let layout = &program.stage.layout;
        if inputs.len() != layout.textures.len() {
            return Err(StrataError::InvalidArgument(format!(
                "stage '{}' binds {} textures, got {}",
                program.stage.key(),
                layout.textures.len(),
                inputs.len()
            )));
        }
        let max = self.ctx.device.limits().max_texture_dimension_2d;
        let sizes = inputs.iter().map(|t| (t.width, t.height));
        for (w, h) in sizes.chain(std::iter::once(size)) {
            if w == 0 || h == 0 || w > max || h > max {
                return Err(gpu_error("texture", format!("{w}x{h} does not fit the device")));
            }
        }

        let pipeline = self.pipeline(&program.stage)?;
        let pool = &self.ctx.texture_pool;
        let sources: Vec<wgpu::Texture> = inputs.iter().map(|t| self.upload(t)).collect();
        let target = pool.acquire(&self.ctx.device, size.0, size.1);
        let padded = (size.0 * PIXEL_BYTES).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let submitted = self.scoped("pass", |device| {
            let readback = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("strata readback"),
                size: padded as u64 * size.1 as u64,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let uniform_buffer = layout.uniforms.as_ref().map(|_| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("strata pass uniforms"),
                    contents: uniforms,
                    usage: wgpu::BufferUsages::UNIFORM,
                })
            });

            let views: Vec<wgpu::TextureView> = sources
                .iter()
                .map(|t| t.create_view(&wgpu::TextureViewDescriptor::default()))
                .collect();
            let mut entries: Vec<wgpu::BindGroupEntry<'_>> = layout
                .textures
                .iter()
                .zip(&views)
                .map(|(slot, view)| wgpu::BindGroupEntry {
                    binding: slot.binding,
                    resource: wgpu::BindingResource::TextureView(view),
                })
                .collect();
            entries.extend(layout.samplers.iter().map(|&binding| wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            }));
            if let (Some(block), Some(buffer)) = (&layout.uniforms, &uniform_buffer) {
                entries.push(wgpu::BindGroupEntry {
                    binding: block.binding,
                    resource: buffer.as_entire_binding(),
                });
            }
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("strata pass bindings"),
                layout: &pipeline.bind_layout,
                entries: &entries,
            });

            let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("strata pass"),
            });
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("strata pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&pipeline.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
            encoder.copy_texture_to_buffer(
                wgpu::ImageCopyTexture {
                    texture: &target,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyBuffer {
                    buffer: &readback,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(padded),
                        rows_per_image: Some(size.1),
                    },
                },
                extent(size.0, size.1),
            );
            self.ctx.queue.submit(Some(encoder.finish()));
            readback
        });

        for texture in sources {
            pool.release(texture);
        }
        let result = submitted.and_then(|readback| self.read_back(&readback, size, padded));
        pool.release(target);
        result
    }

    fn read_back(
        &self,
        buffer: &wgpu::Buffer,
        (width, height): (u32, u32),
        padded: u32,
    ) -> StrataResult<Texture> {
        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.ctx.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(gpu_error("readback", e)),
            Err(_) => return Err(gpu_error("readback", "map callback dropped")),
        }

        let row_bytes = (width * PIXEL_BYTES) as usize;
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks(padded as usize).take(height as usize) {
                pixels.extend(bytemuck::pod_collect_to_vec::<u8, [f32; 4]>(&row[..row_bytes]));
            }
        }
        buffer.unmap();
        Ok(Texture {
            width,
            height,
            pixels,
        })
    }
}
