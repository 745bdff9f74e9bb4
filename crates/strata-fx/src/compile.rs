//! WGSL front end.
//!
//! Every stage of a descriptor is parsed and validated with naga, checked
//! for its entry points, and reflected into a [`StageLayout`]: which
//! textures, samplers and uniform fields sit at which bindings of group 0.
//! Executors bind against the layout instead of guessing from names.

use std::sync::Arc;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, Module, ShaderStage, TypeInner};
use strata_core::{StrataError, StrataResult};

use crate::builtin::FULLSCREEN_VS;
use crate::shader::{ChannelBinding, ShaderBody, ShaderDescriptor};

pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureSlot {
    pub binding: u32,
    pub name: String,
}

/// One scalar or vector member of the uniform block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformField {
    pub name: String,
    /// Byte offset inside the block.
    pub offset: u32,
    /// 1 for `f32`, 2..=4 for vectors.
    pub components: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlock {
    pub binding: u32,
    /// Size of the block in bytes, padding included.
    pub size: u32,
    pub fields: Vec<UniformField>,
}

/// Group-0 resources of a fragment stage, ordered by binding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageLayout {
    pub textures: Vec<TextureSlot>,
    pub samplers: Vec<u32>,
    pub uniforms: Option<UniformBlock>,
}

impl StageLayout {
    pub fn texture(&self, name: &str) -> Option<&TextureSlot> {
        self.textures.iter().find(|t| t.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&UniformField> {
        self.uniforms
            .as_ref()
            .and_then(|block| block.fields.iter().find(|f| f.name == name))
    }
}

/// A validated stage, ready for a backend to build a pipeline from.
#[derive(Debug, Clone)]
pub struct CompiledStage {
    pub shader: String,
    pub pass_id: Option<String>,
    pub version: u32,
    pub vertex: Arc<str>,
    pub fragment: Arc<str>,
    pub layout: StageLayout,
    pub bindings: Vec<ChannelBinding>,
}

impl CompiledStage {
    pub fn key(&self) -> String {
        stage_key(&self.shader, self.pass_id.as_deref())
    }

    /// The semantic bound to a texture variable, if any.
    pub fn binding(&self, texture: &str) -> Option<&ChannelBinding> {
        self.bindings.iter().find(|b| b.uniform == texture)
    }
}

/// `shader` or `shader/pass`.
pub fn stage_key(shader: &str, pass_id: Option<&str>) -> String {
    match pass_id {
        Some(pass) => format!("{shader}/{pass}"),
        None => shader.to_string(),
    }
}

fn parse(stage: &str, kind: &str, source: &str) -> StrataResult<Module> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        StrataError::invalid_shader(
            stage,
            format!("{kind} stage: {}", e.emit_to_string(source).trim()),
        )
    })?;
    Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|e| StrataError::invalid_shader(stage, format!("{kind} stage: {e}")))?;
    Ok(module)
}

fn require_entry(module: &Module, stage: &str, entry: &str, kind: ShaderStage) -> StrataResult<()> {
    if module
        .entry_points
        .iter()
        .any(|ep| ep.name == entry && ep.stage == kind)
    {
        return Ok(());
    }
    Err(StrataError::invalid_shader(
        stage,
        format!("no {kind:?} entry point `{entry}`").to_lowercase(),
    ))
}

fn reflect(module: &Module) -> StageLayout {
    let mut layout = StageLayout::default();
    for (_, var) in module.global_variables.iter() {
        let (Some(binding), Some(name)) = (&var.binding, &var.name) else {
            continue;
        };
        if binding.group != 0 {
            continue;
        }
        match &module.types[var.ty].inner {
            TypeInner::Image { .. } => layout.textures.push(TextureSlot {
                binding: binding.binding,
                name: name.clone(),
            }),
            TypeInner::Sampler { .. } => layout.samplers.push(binding.binding),
            TypeInner::Struct { members, span } if var.space == AddressSpace::Uniform => {
                let fields = members
                    .iter()
                    .filter_map(|member| {
                        let components = match module.types[member.ty].inner {
                            TypeInner::Scalar(_) => 1,
                            TypeInner::Vector { size, .. } => size as u32,
                            _ => return None,
                        };
                        Some(UniformField {
                            name: member.name.clone()?,
                            offset: member.offset,
                            components,
                        })
                    })
                    .collect();
                layout.uniforms = Some(UniformBlock {
                    binding: binding.binding,
                    size: *span,
                    fields,
                });
            }
            _ => {}
        }
    }
    layout.textures.sort_by_key(|t| t.binding);
    layout.samplers.sort_unstable();
    layout
}

fn compile_stage(
    desc: &ShaderDescriptor,
    pass_id: Option<&str>,
    vertex: &str,
    fragment: &str,
    bindings: &[ChannelBinding],
) -> StrataResult<CompiledStage> {
    let key = stage_key(&desc.name, pass_id);

    let vs = parse(&key, "vertex", vertex)?;
    require_entry(&vs, &key, VERTEX_ENTRY, ShaderStage::Vertex)?;
    let fs = parse(&key, "fragment", fragment)?;
    require_entry(&fs, &key, FRAGMENT_ENTRY, ShaderStage::Fragment)?;

    let layout = reflect(&fs);
    for binding in bindings {
        if layout.texture(&binding.uniform).is_none() {
            return Err(StrataError::invalid_shader(
                &key,
                format!("bound texture '{}' is not declared", binding.uniform),
            ));
        }
    }

    Ok(CompiledStage {
        shader: desc.name.clone(),
        pass_id: pass_id.map(str::to_string),
        version: desc.version,
        vertex: Arc::from(vertex),
        fragment: Arc::from(fragment),
        layout,
        bindings: bindings.to_vec(),
    })
}

/// Compile every stage of a descriptor, in declaration order.
pub fn compile_descriptor(desc: &ShaderDescriptor) -> StrataResult<Vec<CompiledStage>> {
    match &desc.body {
        ShaderBody::Single {
            vertex,
            fragment,
            bindings,
        } => Ok(vec![compile_stage(desc, None, vertex, fragment, bindings)?]),
        ShaderBody::MultiPass(passes) => passes
            .iter()
            .map(|pass| {
                compile_stage(
                    desc,
                    Some(&pass.id),
                    pass.vertex.as_deref().unwrap_or(FULLSCREEN_VS),
                    &pass.fragment,
                    &pass.bindings,
                )
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{self, builtin_shaders};
    use crate::shader::{ChannelSemantic, SubPass};

    const FLAT_FS: &str = r#"
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#;

    #[test]
    fn test_builtins_compile() {
        for desc in builtin_shaders() {
            let stages = compile_descriptor(&desc)
                .unwrap_or_else(|e| panic!("{} failed to compile: {}", desc.name, e));
            assert_eq!(stages.len(), desc.sub_pass_ids().len().max(1));
        }
    }

    #[test]
    fn test_reflects_basic_adjustments_layout() {
        let desc = builtin_shaders()
            .into_iter()
            .find(|d| d.name == builtin::BASIC_ADJUSTMENTS)
            .unwrap();
        let stage = compile_descriptor(&desc).unwrap().remove(0);
        let layout = &stage.layout;
        assert_eq!(layout.texture("t_input").map(|t| t.binding), Some(0));
        assert_eq!(layout.samplers, vec![1]);
        let block = layout.uniforms.as_ref().unwrap();
        assert_eq!(block.binding, 2);
        assert_eq!(block.size, 24);
        assert_eq!(layout.field("brightness").map(|f| f.offset), Some(0));
        assert_eq!(layout.field("gamma").map(|f| f.offset), Some(20));
    }

    #[test]
    fn test_vector_fields_have_components() {
        let desc = builtin_shaders()
            .into_iter()
            .find(|d| d.name == builtin::COPY)
            .unwrap();
        let stage = compile_descriptor(&desc).unwrap().remove(0);
        let rect = stage.layout.field("rect").unwrap();
        let canvas = stage.layout.field("canvas").unwrap();
        assert_eq!((rect.offset, rect.components), (0, 4));
        assert_eq!((canvas.offset, canvas.components), (16, 2));
    }

    #[test]
    fn test_garbage_type_rejected() {
        let desc = ShaderDescriptor::single(
            "broken",
            FULLSCREEN_VS,
            r#"
@group(0) @binding(0) var t_input: <garbage>;
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#,
            vec![ChannelBinding::new("t_input", ChannelSemantic::CurrentLayer)],
        );
        let err = compile_descriptor(&desc).unwrap_err();
        assert!(matches!(err, StrataError::InvalidShader { ref name, .. } if name == "broken"));
        assert!(err.to_string().contains("fragment stage"));
    }

    #[test]
    fn test_type_error_rejected_by_validator() {
        let desc = ShaderDescriptor::single(
            "mismatch",
            FULLSCREEN_VS,
            "@fragment fn fs_main() -> @location(0) vec4<f32> { return 1u; }",
            vec![],
        );
        assert!(matches!(
            compile_descriptor(&desc),
            Err(StrataError::InvalidShader { .. })
        ));
    }

    #[test]
    fn test_missing_entry_point_rejected() {
        let desc = ShaderDescriptor::single(
            builtin::COPY,
            FULLSCREEN_VS,
            "@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(0.0); }",
            vec![],
        );
        let err = compile_descriptor(&desc).unwrap_err();
        assert!(err.to_string().contains("fs_main"));
    }

    #[test]
    fn test_undeclared_binding_rejected() {
        let desc = ShaderDescriptor::multi_pass(
            "lonely",
            vec![SubPass {
                id: "only".into(),
                fragment: FLAT_FS.into(),
                vertex: None,
                bindings: vec![ChannelBinding::new("t_missing", ChannelSemantic::CurrentLayer)],
                depends_on: vec![],
            }],
        );
        let err = compile_descriptor(&desc).unwrap_err();
        assert!(err.to_string().contains("t_missing"));
    }

    #[test]
    fn test_custom_shader_without_resources() {
        let desc = ShaderDescriptor::single("flat", FULLSCREEN_VS, FLAT_FS, vec![]);
        let stage = compile_descriptor(&desc).unwrap().remove(0);
        assert_eq!(stage.key(), "flat");
        assert_eq!(stage.layout, StageLayout::default());
    }
}
