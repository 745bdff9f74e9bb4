use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strata_core::Color;
use strata_ir::ParamValue;

/// A uniform value handed to a shader pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec4([f32; 4]),
    Color(Color),
    Bool(bool),
}

impl UniformValue {
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            UniformValue::Float(v) => Some(*v),
            UniformValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_vec4(&self) -> Option<[f32; 4]> {
        match self {
            UniformValue::Vec4(v) => Some(*v),
            UniformValue::Color(c) => Some(c.to_array()),
            _ => None,
        }
    }
}

/// Uniforms of one pass, keyed by name.
pub type Uniforms = BTreeMap<String, UniformValue>;

/// Append a parameter value as uniform(s) under `key`. Colored values also
/// yield `<key>_color`.
pub fn push_param_uniform(uniforms: &mut Uniforms, key: &str, value: &ParamValue) {
    match value {
        ParamValue::Scalar(v) => {
            uniforms.insert(key.to_string(), UniformValue::Float(*v));
        }
        ParamValue::Toggle(b) => {
            uniforms.insert(key.to_string(), UniformValue::Bool(*b));
        }
        ParamValue::Colored { value, color } => {
            uniforms.insert(key.to_string(), UniformValue::Float(*value));
            uniforms.insert(format!("{key}_color"), UniformValue::Color(*color));
        }
    }
}

/// One shader invocation in a pass graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassStep {
    pub shader: String,
    /// Names the step; for multi-pass shaders this is also the sub-pass id.
    #[serde(default)]
    pub pass_id: Option<String>,
    #[serde(default)]
    pub uniforms: Uniforms,
    /// Ids of earlier steps whose outputs this step consumes.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Depends on the immediately preceding step.
    #[serde(default)]
    pub with_previous_pass: bool,
}

impl PassStep {
    pub fn new(shader: impl Into<String>) -> Self {
        Self {
            shader: shader.into(),
            pass_id: None,
            uniforms: Uniforms::new(),
            inputs: Vec::new(),
            with_previous_pass: false,
        }
    }

    pub fn with_pass_id(mut self, id: impl Into<String>) -> Self {
        self.pass_id = Some(id.into());
        self
    }

    pub fn with_uniform(mut self, name: impl Into<String>, value: UniformValue) -> Self {
        self.uniforms.insert(name.into(), value);
        self
    }

    pub fn with_uniforms(mut self, uniforms: Uniforms) -> Self {
        self.uniforms.extend(uniforms);
        self
    }

    pub fn with_input(mut self, id: impl Into<String>) -> Self {
        self.inputs.push(id.into());
        self
    }

    pub fn after_previous(mut self) -> Self {
        self.with_previous_pass = true;
        self
    }

    /// Identifier used for dependency resolution: the pass id, or `#index`.
    pub fn step_id(&self, index: usize) -> String {
        match &self.pass_id {
            Some(id) => id.clone(),
            None => format!("#{index}"),
        }
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        self.uniforms.get(name).and_then(UniformValue::as_f32)
    }
}
