//! Pass-list execution. Stages run on the GPU when the worker has a device,
//! with the software kernels as fallback.

use std::collections::HashMap;

use strata_core::{Color, ColorProfile, Rect, StrataError, StrataResult, Texture};
use strata_fx::{execution_order, ChannelSemantic, PassStep, ShaderRegistry, UniformValue};

use crate::gpu::{pack_uniforms, GpuPasses};
use crate::kernels::{self, BasicParams, Direction, StylisticParams};
use crate::program::{Kernel, ProgramCache, ShaderProgram};

/// Caller-side control over a running frame: a cancellation check consulted
/// before each pass, a progress sink, and the interactive quality setting.
pub struct ExecControl<'a> {
    cancel_check: Box<dyn Fn() -> bool + 'a>,
    on_progress: Box<dyn Fn(u8) + 'a>,
    blur_stride: u32,
}

impl<'a> ExecControl<'a> {
    /// Never cancelled, progress discarded, full quality.
    pub fn new() -> Self {
        Self {
            cancel_check: Box::new(|| false),
            on_progress: Box::new(|_| {}),
            blur_stride: 1,
        }
    }

    pub fn with_cancel_check(mut self, check: impl Fn() -> bool + 'a) -> Self {
        self.cancel_check = Box::new(check);
        self
    }

    pub fn with_progress(mut self, sink: impl Fn(u8) + 'a) -> Self {
        self.on_progress = Box::new(sink);
        self
    }

    /// Reduced-quality rendering: blur passes sample every `stride`-th tap.
    pub fn interactive(mut self, stride: u32) -> Self {
        self.blur_stride = stride.max(1);
        self
    }

    pub fn blur_stride(&self) -> u32 {
        self.blur_stride
    }

    pub fn check_cancelled(&self) -> StrataResult<()> {
        if (self.cancel_check)() {
            return Err(StrataError::Cancelled("cancelled between passes".into()));
        }
        Ok(())
    }

    pub fn report(&self, percent: u8) {
        (self.on_progress)(percent.min(100));
    }
}

impl Default for ExecControl<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts executed passes against the frame total and reports percentages.
pub(crate) struct PassCounter {
    done: usize,
    total: usize,
    last: Option<u8>,
}

impl PassCounter {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            done: 0,
            total,
            last: None,
        }
    }

    pub(crate) fn tick(&mut self, ctrl: &ExecControl<'_>) {
        self.done += 1;
        let percent = if self.total == 0 {
            100
        } else {
            ((self.done * 100) / self.total).min(100) as u8
        };
        if self.last != Some(percent) {
            self.last = Some(percent);
            ctrl.report(percent);
        }
    }
}

/// Shared inputs for one pass list.
pub(crate) struct PassEnv<'r> {
    pub registry: &'r ShaderRegistry,
    pub programs: &'r ProgramCache,
    pub backdrop: Option<&'r Texture>,
    pub canvas: (u32, u32),
    pub blur_stride: u32,
    pub gpu: Option<&'r GpuPasses>,
}

fn float_or(step: &PassStep, name: &str, default: f32) -> f32 {
    step.float(name).unwrap_or(default)
}

fn rect_or(step: &PassStep, name: &str, default: Rect) -> Rect {
    match step.uniform(name).and_then(UniformValue::as_vec4) {
        Some([x, y, w, h]) => Rect::new(x as i32, y as i32, w.max(0.0) as u32, h.max(0.0) as u32),
        None => default,
    }
}

fn canvas_or(step: &PassStep, default: (u32, u32)) -> (u32, u32) {
    match step.uniform("canvas") {
        Some(UniformValue::Vec2([w, h])) => (w.max(0.0) as u32, h.max(0.0) as u32),
        _ => default,
    }
}

fn color_or(step: &PassStep, name: &str, default: Color) -> Color {
    match step.uniform(name) {
        Some(UniformValue::Color(c)) => *c,
        Some(UniformValue::Vec4(v)) => Color::from_array(*v),
        _ => default,
    }
}

fn run_kernel(
    kernel: Kernel,
    step: &PassStep,
    input: &Texture,
    env: &PassEnv<'_>,
) -> StrataResult<Texture> {
    let profile = ColorProfile::from_uniform_flag(float_or(step, "profile", 0.0));
    let out = match kernel {
        Kernel::Linearize => kernels::linearize(input, profile),
        Kernel::Encode => kernels::encode(input, profile),
        Kernel::Copy => {
            let canvas = canvas_or(step, env.canvas);
            let rect = rect_or(step, "rect", Rect::canvas(canvas.0, canvas.1));
            kernels::copy(input, rect, canvas)
        }
        Kernel::SolidFill => {
            let canvas = canvas_or(step, env.canvas);
            let rect = rect_or(step, "rect", Rect::canvas(canvas.0, canvas.1));
            kernels::solid_fill(input, rect, canvas)
        }
        Kernel::BasicAdjustments => {
            let d = BasicParams::default();
            kernels::basic_adjustments(
                input,
                &BasicParams {
                    brightness: float_or(step, "brightness", d.brightness),
                    contrast: float_or(step, "contrast", d.contrast),
                    saturation: float_or(step, "saturation", d.saturation),
                    hue: float_or(step, "hue", d.hue),
                    exposure: float_or(step, "exposure", d.exposure),
                    gamma: float_or(step, "gamma", d.gamma),
                },
            )
        }
        Kernel::StylisticEffects => kernels::stylistic_effects(
            input,
            &StylisticParams {
                vintage: float_or(step, "vintage", 0.0),
                sepia: float_or(step, "sepia", 0.0),
                grayscale: float_or(step, "grayscale", 0.0),
                invert: float_or(step, "invert", 0.0),
                vibrance: float_or(step, "vibrance", 0.0),
                noise: float_or(step, "noise", 0.0),
                grain: float_or(step, "grain", 0.0),
                recolor: float_or(step, "recolor", 0.0),
                recolor_color: color_or(step, "recolor_color", Color::WHITE),
            },
        ),
        Kernel::Vignette => kernels::vignette(input, float_or(step, "vignette", 0.0)),
        Kernel::BlurHorizontal | Kernel::BlurVertical => {
            let direction = if kernel == Kernel::BlurHorizontal {
                Direction::Horizontal
            } else {
                Direction::Vertical
            };
            let stride = step
                .float("stride")
                .map(|s| s.max(1.0) as u32)
                .unwrap_or(env.blur_stride);
            kernels::blur(input, float_or(step, "radius", 0.0), stride, direction)
        }
        Kernel::Blend => {
            return Err(StrataError::MalformedGraph(
                "blend runs at layer composition".into(),
            ))
        }
    };
    Ok(out)
}

/// Uniform components as the GPU sees them. `canvas`, `rect` and `stride`
/// fall back to the frame environment like the kernels do.
fn uniform_components(step: &PassStep, name: &str, env: &PassEnv<'_>) -> Option<Vec<f32>> {
    let value = match step.uniform(name) {
        Some(UniformValue::Float(v)) => vec![*v],
        Some(UniformValue::Bool(b)) => vec![if *b { 1.0 } else { 0.0 }],
        Some(UniformValue::Vec2(v)) => v.to_vec(),
        Some(UniformValue::Vec4(v)) => v.to_vec(),
        Some(UniformValue::Color(c)) => c.to_array().to_vec(),
        None => match name {
            "canvas" => vec![env.canvas.0 as f32, env.canvas.1 as f32],
            "rect" => vec![0.0, 0.0, env.canvas.0 as f32, env.canvas.1 as f32],
            "stride" => vec![env.blur_stride as f32],
            _ => return None,
        },
    };
    Some(value)
}

fn run_gpu(
    gpu: &GpuPasses,
    program: &ShaderProgram,
    step: &PassStep,
    inputs: &[&Texture],
    env: &PassEnv<'_>,
) -> StrataResult<Texture> {
    let layout = &program.stage.layout;
    let size = if layout.field("canvas").is_some() {
        canvas_or(step, env.canvas)
    } else {
        inputs
            .first()
            .map(|t| (t.width, t.height))
            .unwrap_or(env.canvas)
    };
    let uniforms = layout
        .uniforms
        .as_ref()
        .map(|block| pack_uniforms(block, |name| uniform_components(step, name, env)))
        .unwrap_or_default();
    gpu.run(program, inputs, &uniforms, size)
}

/// Execute a pass list over `initial` and return the last pass's output.
///
/// Steps run in [`execution_order`]. `CurrentLayer` bindings read the output
/// of the previously executed step, `PassResult` bindings the output of the
/// named step, `Backdrop` the running composite. Cancellation is checked
/// before every pass; a pass in flight always completes.
pub(crate) fn run_pass_list(
    steps: &[PassStep],
    initial: Texture,
    env: &PassEnv<'_>,
    ctrl: &ExecControl<'_>,
    counter: &mut PassCounter,
) -> StrataResult<Texture> {
    let order = execution_order(steps)?;
    let mut current = initial;
    let mut named: HashMap<String, Texture> = HashMap::new();

    for index in order {
        ctrl.check_cancelled()?;
        let step = &steps[index];
        let program = env
            .programs
            .get_or_compile(env.registry, &step.shader, step.pass_id.as_deref())?;

        if program.kernel == Some(Kernel::Blend) {
            return Err(StrataError::MalformedGraph(
                "blend runs at layer composition, not inside a pass list".into(),
            ));
        }

        let resolve = |texture: &str| {
            let semantic = program
                .binding(texture)
                .map(|b| b.semantic.clone())
                .unwrap_or(ChannelSemantic::CurrentLayer);
            match semantic {
                ChannelSemantic::CurrentLayer => Ok(&current),
                ChannelSemantic::PassResult(id) => named.get(&id).ok_or_else(|| {
                    StrataError::MalformedGraph(format!(
                        "pass '{}' reads '{}' before it ran",
                        step.step_id(index),
                        id
                    ))
                }),
                ChannelSemantic::Backdrop => env.backdrop.ok_or_else(|| {
                    StrataError::MalformedGraph(format!(
                        "pass '{}' binds the backdrop outside composition",
                        step.step_id(index)
                    ))
                }),
            }
        };

        let gpu_output = match env.gpu {
            Some(gpu) => {
                let inputs = program
                    .stage
                    .layout
                    .textures
                    .iter()
                    .map(|slot| resolve(&slot.name))
                    .collect::<StrataResult<Vec<_>>>()?;
                match run_gpu(gpu, &program, step, &inputs, env) {
                    Ok(texture) => Some(texture),
                    Err(e) if program.kernel.is_some() => {
                        tracing::warn!(
                            stage = %program.stage.key(),
                            error = %e,
                            "gpu pass failed, using software kernel"
                        );
                        None
                    }
                    Err(e) => return Err(e),
                }
            }
            None => None,
        };
        let output = match (gpu_output, program.kernel) {
            (Some(texture), _) => texture,
            (None, Some(kernel)) => run_kernel(kernel, step, resolve("t_input")?, env)?,
            (None, None) => {
                return Err(StrataError::invalid_shader(
                    &program.stage.key(),
                    "no software kernel for this stage and no gpu device",
                ))
            }
        };
        if let Some(id) = &step.pass_id {
            named.insert(id.clone(), output.clone());
        }
        current = output;
        counter.tick(ctrl);
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use strata_fx::builtin;

    fn env<'r>(programs: &'r ProgramCache) -> PassEnv<'r> {
        PassEnv {
            registry: ShaderRegistry::global(),
            programs,
            backdrop: None,
            canvas: (4, 4),
            blur_stride: 1,
            gpu: None,
        }
    }

    #[test]
    fn test_empty_list_returns_input() {
        let programs = ProgramCache::new();
        let tex = Texture::filled(4, 4, [0.1, 0.2, 0.3, 1.0]);
        let out = run_pass_list(
            &[],
            tex.clone(),
            &env(&programs),
            &ExecControl::new(),
            &mut PassCounter::new(0),
        )
        .unwrap();
        assert_eq!(out, tex);
    }

    #[test]
    fn test_cancel_before_first_pass() {
        let programs = ProgramCache::new();
        let steps = vec![PassStep::new(builtin::LINEARIZE)];
        let ctrl = ExecControl::new().with_cancel_check(|| true);
        let err = run_pass_list(
            &steps,
            Texture::new(4, 4),
            &env(&programs),
            &ctrl,
            &mut PassCounter::new(1),
        )
        .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[test]
    fn test_cancel_between_passes() {
        let programs = ProgramCache::new();
        let steps = vec![
            PassStep::new(builtin::LINEARIZE),
            PassStep::new(builtin::ENCODE),
        ];
        let checks = Cell::new(0);
        let ctrl = ExecControl::new().with_cancel_check(|| {
            checks.set(checks.get() + 1);
            checks.get() > 1
        });
        let result = run_pass_list(
            &steps,
            Texture::new(4, 4),
            &env(&programs),
            &ctrl,
            &mut PassCounter::new(2),
        );
        assert!(result.unwrap_err().is_cancellation());
        assert_eq!(checks.get(), 2);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let programs = ProgramCache::new();
        let steps = vec![
            PassStep::new(builtin::LINEARIZE),
            PassStep::new(builtin::BASIC_ADJUSTMENTS),
            PassStep::new(builtin::ENCODE),
        ];
        let seen = RefCell::new(Vec::new());
        let ctrl = ExecControl::new().with_progress(|p| seen.borrow_mut().push(p));
        run_pass_list(
            &steps,
            Texture::new(4, 4),
            &env(&programs),
            &ctrl,
            &mut PassCounter::new(3),
        )
        .unwrap();
        assert_eq!(*seen.borrow(), vec![33, 66, 100]);
    }

    #[test]
    fn test_two_pass_blur_reads_named_result() {
        let programs = ProgramCache::new();
        let steps = vec![
            PassStep::new(builtin::GAUSSIAN_BLUR)
                .with_pass_id(builtin::HORIZONTAL)
                .with_uniform("radius", UniformValue::Float(1.0)),
            PassStep::new(builtin::GAUSSIAN_BLUR)
                .with_pass_id(builtin::VERTICAL)
                .with_uniform("radius", UniformValue::Float(1.0))
                .after_previous(),
        ];
        let mut tex = Texture::new(4, 4);
        tex.pixels[5] = [1.0, 1.0, 1.0, 1.0];
        let out = run_pass_list(
            &steps,
            tex,
            &env(&programs),
            &ExecControl::new(),
            &mut PassCounter::new(2),
        )
        .unwrap();
        // Spread in both directions.
        assert!(out.get(1, 0).unwrap()[3] > 0.0);
        assert!(out.get(0, 1).unwrap()[3] > 0.0);
    }

    #[test]
    fn test_unknown_shader_fails() {
        let programs = ProgramCache::new();
        let steps = vec![PassStep::new("nope")];
        let err = run_pass_list(
            &steps,
            Texture::new(1, 1),
            &env(&programs),
            &ExecControl::new(),
            &mut PassCounter::new(1),
        )
        .unwrap_err();
        assert!(matches!(err, StrataError::UnknownShader(_)));
    }

    #[test]
    fn test_stage_without_kernel_needs_gpu() {
        let registry = ShaderRegistry::with_builtins();
        registry
            .register(strata_fx::ShaderDescriptor::single(
                "flat",
                builtin::FULLSCREEN_VS,
                "@fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }",
                vec![],
            ))
            .unwrap();
        let programs = ProgramCache::new();
        let env = PassEnv {
            registry: &registry,
            ..env(&programs)
        };
        let err = run_pass_list(
            &[PassStep::new("flat")],
            Texture::new(2, 2),
            &env,
            &ExecControl::new(),
            &mut PassCounter::new(1),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no gpu device"));
    }

    #[test]
    fn test_uniform_components_fall_back_to_frame() {
        let programs = ProgramCache::new();
        let env = env(&programs);
        let step = PassStep::new(builtin::COPY).with_uniform("radius", UniformValue::Float(3.0));
        assert_eq!(uniform_components(&step, "radius", &env), Some(vec![3.0]));
        assert_eq!(uniform_components(&step, "canvas", &env), Some(vec![4.0, 4.0]));
        assert_eq!(
            uniform_components(&step, "rect", &env),
            Some(vec![0.0, 0.0, 4.0, 4.0])
        );
        assert_eq!(uniform_components(&step, "brightness", &env), None);
    }
}
