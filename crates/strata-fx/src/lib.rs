//! # strata-fx
//!
//! Everything between a parameter map and an executable list of shader
//! passes: the shader registry with its built-in WGSL set, the WGSL front
//! end, the pass step model, adjustment plugins, and the builders that turn
//! layers and document parameters into a validated pass graph.

pub mod builder;
pub mod builtin;
pub mod compile;
pub mod graph;
pub mod pass;
pub mod plugin;
pub mod registry;
pub mod shader;

pub use builder::build_layer_passes;
pub use compile::{
    compile_descriptor, stage_key, CompiledStage, StageLayout, TextureSlot, UniformBlock,
    UniformField,
};
pub use graph::{build_pass_graph, execution_order, validate_steps, LayerPasses, PassGraph};
pub use pass::{PassStep, UniformValue, Uniforms};
pub use plugin::{build_document_passes, AdjustmentPlugin, PluginKind, PluginRegistry};
pub use registry::ShaderRegistry;
pub use shader::{
    ChannelBinding, ChannelSemantic, CompilePolicy, ShaderBody, ShaderDescriptor, SubPass,
};
