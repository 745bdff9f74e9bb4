//! Compiled shader programs and the per-worker program cache.
//!
//! WGSL goes through the naga front end in `strata_fx::compile`; a program
//! couples the resulting stage with its software kernel, if one exists.

use std::sync::Arc;

use dashmap::DashMap;
use strata_core::{StrataError, StrataResult};
use strata_fx::builtin;
use strata_fx::{
    compile_descriptor, stage_key, ChannelBinding, CompilePolicy, CompiledStage, ShaderBody,
    ShaderDescriptor, ShaderRegistry,
};

/// Software kernel a program executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    Linearize,
    Encode,
    Copy,
    SolidFill,
    Blend,
    BasicAdjustments,
    StylisticEffects,
    Vignette,
    BlurHorizontal,
    BlurVertical,
}

impl Kernel {
    pub fn lookup(shader: &str, pass_id: Option<&str>) -> Option<Kernel> {
        let kernel = match (shader, pass_id) {
            (builtin::LINEARIZE, None) => Kernel::Linearize,
            (builtin::ENCODE, None) => Kernel::Encode,
            (builtin::COPY, None) => Kernel::Copy,
            (builtin::SOLID_FILL, None) => Kernel::SolidFill,
            (builtin::BLEND, None) => Kernel::Blend,
            (builtin::BASIC_ADJUSTMENTS, None) => Kernel::BasicAdjustments,
            (builtin::STYLISTIC_EFFECTS, None) => Kernel::StylisticEffects,
            (builtin::VIGNETTE, None) => Kernel::Vignette,
            (builtin::GAUSSIAN_BLUR, Some(builtin::HORIZONTAL)) => Kernel::BlurHorizontal,
            (builtin::GAUSSIAN_BLUR, Some(builtin::VERTICAL)) => Kernel::BlurVertical,
            _ => return None,
        };
        Some(kernel)
    }
}

/// A compiled stage of a shader plus the software kernel that can stand in
/// for it when no GPU device is available.
#[derive(Debug, Clone)]
pub struct ShaderProgram {
    pub stage: CompiledStage,
    pub kernel: Option<Kernel>,
}

impl ShaderProgram {
    fn new(stage: CompiledStage) -> Self {
        let kernel = Kernel::lookup(&stage.shader, stage.pass_id.as_deref());
        Self { stage, kernel }
    }

    pub fn shader(&self) -> &str {
        &self.stage.shader
    }

    pub fn version(&self) -> u32 {
        self.stage.version
    }

    /// The semantic bound to a texture variable, if any.
    pub fn binding(&self, uniform: &str) -> Option<&ChannelBinding> {
        self.stage.binding(uniform)
    }
}

/// Programs compiled so far, keyed by shader and sub-pass.
///
/// Compilation is idempotent; a program is built at most once per cache and
/// rebuilt only if the registry hands out a newer descriptor version.
/// Stages the registry already compiled at registration are adopted as-is.
pub struct ProgramCache {
    programs: DashMap<String, Arc<ShaderProgram>>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self {
            programs: DashMap::new(),
        }
    }

    fn needs_build(&self, stage: &CompiledStage) -> bool {
        match self.programs.get(&stage.key()) {
            Some(existing) => existing.version() < stage.version,
            None => true,
        }
    }

    fn install(&self, shader: &str, stages: &[CompiledStage]) -> usize {
        let mut built = 0;
        for stage in stages {
            if self.needs_build(stage) {
                self.programs
                    .insert(stage.key(), Arc::new(ShaderProgram::new(stage.clone())));
                built += 1;
            }
        }
        if built > 0 {
            tracing::debug!(shader = %shader, stages = built, "compiled shader program");
        }
        built
    }

    fn is_current(&self, desc: &ShaderDescriptor) -> bool {
        let current = |pass: Option<&str>| {
            self.programs
                .get(&stage_key(&desc.name, pass))
                .is_some_and(|p| p.version() >= desc.version)
        };
        match &desc.body {
            ShaderBody::Single { .. } => current(None),
            ShaderBody::MultiPass(passes) => passes.iter().all(|p| current(Some(&p.id))),
        }
    }

    /// Compile every stage of a descriptor. Returns the number of stages
    /// that were newly built.
    pub fn compile(&self, desc: &ShaderDescriptor) -> StrataResult<usize> {
        if self.is_current(desc) {
            return Ok(0);
        }
        let stages = compile_descriptor(desc)?;
        Ok(self.install(&desc.name, &stages))
    }

    fn load(&self, registry: &ShaderRegistry, desc: &ShaderDescriptor) -> StrataResult<usize> {
        match registry.compiled(&desc.name) {
            Some(stages) if stages.iter().all(|s| s.version == desc.version) => {
                Ok(self.install(&desc.name, &stages))
            }
            _ => self.compile(desc),
        }
    }

    /// The program for one stage, compiling the shader on first use.
    pub fn get_or_compile(
        &self,
        registry: &ShaderRegistry,
        shader: &str,
        pass_id: Option<&str>,
    ) -> StrataResult<Arc<ShaderProgram>> {
        let key = stage_key(shader, pass_id);
        if let Some(program) = self.programs.get(&key) {
            return Ok(program.clone());
        }
        let desc = registry.resolve(shader)?;
        if desc.is_multi_pass() && pass_id.is_none() {
            return Err(StrataError::MalformedGraph(format!(
                "multi-pass shader '{}' used without a sub-pass id",
                shader
            )));
        }
        self.load(registry, &desc)?;
        self.programs
            .get(&key)
            .map(|p| p.clone())
            .ok_or_else(|| {
                StrataError::MalformedGraph(format!("shader '{}' has no stage '{}'", shader, key))
            })
    }

    /// Compile every registered shader whose policy is in `policies`.
    pub fn warm(&self, registry: &ShaderRegistry, policies: &[CompilePolicy]) -> StrataResult<usize> {
        let mut built = 0;
        for desc in registry.descriptors() {
            if policies.contains(&desc.compile) {
                built += self.load(registry, &desc)?;
            }
        }
        Ok(built)
    }

    pub fn is_compiled(&self, shader: &str, pass_id: Option<&str>) -> bool {
        self.programs.contains_key(&stage_key(shader, pass_id))
    }

    /// Snapshot of every program built so far.
    pub fn programs(&self) -> Vec<Arc<ShaderProgram>> {
        self.programs.iter().map(|p| p.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

impl Default for ProgramCache {
    fn default() -> Self {
        Self::new()
    }
}
