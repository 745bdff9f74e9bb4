//! Shader descriptors.
//!
//! A descriptor names a shader and carries either one vertex/fragment pair
//! or an ordered list of named sub-passes with their own channel bindings
//! and prerequisites. Descriptors are immutable once registered.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use strata_core::{StrataError, StrataResult};

/// What a sampler uniform is bound to when a pass executes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "pass", rename_all = "snake_case")]
pub enum ChannelSemantic {
    /// The layer's current intermediate texture.
    CurrentLayer,
    /// Output of a named earlier sub-pass.
    PassResult(String),
    /// The running composite beneath the layer.
    Backdrop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBinding {
    /// Texture variable name in the WGSL source.
    pub uniform: String,
    pub semantic: ChannelSemantic,
}

impl ChannelBinding {
    pub fn new(uniform: impl Into<String>, semantic: ChannelSemantic) -> Self {
        Self {
            uniform: uniform.into(),
            semantic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubPass {
    pub id: String,
    pub fragment: String,
    #[serde(default)]
    pub vertex: Option<String>,
    #[serde(default)]
    pub bindings: Vec<ChannelBinding>,
    /// Sub-pass ids that must run first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderBody {
    Single {
        vertex: String,
        fragment: String,
        bindings: Vec<ChannelBinding>,
    },
    MultiPass(Vec<SubPass>),
}

/// When a shader's program is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilePolicy {
    /// On first use.
    #[default]
    Lazy,
    /// During `prepare`, before the first real render.
    Warm,
    /// When the shader is registered; registration fails if it does not
    /// compile.
    Eager,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderDescriptor {
    pub name: String,
    pub version: u32,
    pub body: ShaderBody,
    #[serde(default)]
    pub compile: CompilePolicy,
}

impl ShaderDescriptor {
    pub fn single(
        name: impl Into<String>,
        vertex: impl Into<String>,
        fragment: impl Into<String>,
        bindings: Vec<ChannelBinding>,
    ) -> Self {
        Self {
            name: name.into(),
            version: 1,
            body: ShaderBody::Single {
                vertex: vertex.into(),
                fragment: fragment.into(),
                bindings,
            },
            compile: CompilePolicy::Lazy,
        }
    }

    pub fn multi_pass(name: impl Into<String>, passes: Vec<SubPass>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            body: ShaderBody::MultiPass(passes),
            compile: CompilePolicy::Lazy,
        }
    }

    pub fn with_policy(mut self, compile: CompilePolicy) -> Self {
        self.compile = compile;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn is_multi_pass(&self) -> bool {
        matches!(self.body, ShaderBody::MultiPass(_))
    }

    pub fn sub_pass(&self, id: &str) -> Option<&SubPass> {
        match &self.body {
            ShaderBody::MultiPass(passes) => passes.iter().find(|p| p.id == id),
            ShaderBody::Single { .. } => None,
        }
    }

    pub fn sub_pass_ids(&self) -> Vec<&str> {
        match &self.body {
            ShaderBody::MultiPass(passes) => passes.iter().map(|p| p.id.as_str()).collect(),
            ShaderBody::Single { .. } => Vec::new(),
        }
    }

    /// Check the structural invariants: sub-pass ids are unique, every
    /// prerequisite and pass-result binding names a sibling, and the
    /// prerequisites form a DAG.
    pub fn validate(&self) -> StrataResult<()> {
        if self.name.trim().is_empty() {
            return Err(StrataError::invalid_shader(&self.name, "empty name"));
        }
        let passes = match &self.body {
            ShaderBody::Single {
                fragment, bindings, ..
            } => {
                if fragment.trim().is_empty() {
                    return Err(StrataError::invalid_shader(&self.name, "empty fragment source"));
                }
                if bindings
                    .iter()
                    .any(|b| matches!(b.semantic, ChannelSemantic::PassResult(_)))
                {
                    return Err(StrataError::invalid_shader(
                        &self.name,
                        "single-pass shader cannot bind a pass result",
                    ));
                }
                return Ok(());
            }
            ShaderBody::MultiPass(passes) => passes,
        };

        if passes.is_empty() {
            return Err(StrataError::invalid_shader(&self.name, "no sub-passes"));
        }

        let mut ids = HashSet::new();
        for pass in passes {
            if !ids.insert(pass.id.as_str()) {
                return Err(StrataError::invalid_shader(
                    &self.name,
                    format!("duplicate sub-pass id '{}'", pass.id),
                ));
            }
        }

        for pass in passes {
            for dep in &pass.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(StrataError::invalid_shader(
                        &self.name,
                        format!("sub-pass '{}' depends on unknown '{}'", pass.id, dep),
                    ));
                }
            }
            for binding in &pass.bindings {
                if let ChannelSemantic::PassResult(source) = &binding.semantic {
                    if !pass.depends_on.contains(source) {
                        return Err(StrataError::invalid_shader(
                            &self.name,
                            format!(
                                "sub-pass '{}' binds '{}' without depending on it",
                                pass.id, source
                            ),
                        ));
                    }
                }
            }
        }

        if let Some(id) = find_cycle(passes) {
            return Err(StrataError::invalid_shader(
                &self.name,
                format!("dependency cycle through sub-pass '{}'", id),
            ));
        }
        Ok(())
    }
}

/// Depth-first search over `depends_on`; returns a sub-pass on a cycle.
fn find_cycle(passes: &[SubPass]) -> Option<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        id: &'a str,
        deps: &HashMap<&'a str, &'a [String]>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Option<String> {
        match marks.get(id) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => return Some(id.to_string()),
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        for dep in deps.get(id).copied().unwrap_or(&[]) {
            if let Some(found) = visit(dep.as_str(), deps, marks) {
                return Some(found);
            }
        }
        marks.insert(id, Mark::Done);
        None
    }

    let deps: HashMap<&str, &[String]> = passes
        .iter()
        .map(|p| (p.id.as_str(), p.depends_on.as_slice()))
        .collect();
    let mut marks = HashMap::new();
    for pass in passes {
        if let Some(found) = visit(pass.id.as_str(), &deps, &mut marks) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(id: &str, deps: &[&str]) -> SubPass {
        SubPass {
            id: id.into(),
            fragment: "fn fs_main() {}".into(),
            vertex: None,
            bindings: vec![],
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_valid_multi_pass() {
        let desc = ShaderDescriptor::multi_pass("blur", vec![pass("h", &[]), pass("v", &["h"])]);
        assert!(desc.validate().is_ok());
        assert_eq!(desc.sub_pass_ids(), vec!["h", "v"]);
        assert!(desc.sub_pass("v").is_some());
    }

    #[test]
    fn test_duplicate_sub_pass_ids() {
        let desc = ShaderDescriptor::multi_pass("blur", vec![pass("h", &[]), pass("h", &[])]);
        let err = desc.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate sub-pass id"));
    }

    #[test]
    fn test_dependency_cycle() {
        let desc = ShaderDescriptor::multi_pass(
            "loop",
            vec![pass("a", &["c"]), pass("b", &["a"]), pass("c", &["b"])],
        );
        let err = desc.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_unknown_dependency() {
        let desc = ShaderDescriptor::multi_pass("x", vec![pass("a", &["ghost"])]);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_binding_requires_dependency() {
        let mut v = pass("v", &[]);
        v.bindings.push(ChannelBinding::new(
            "t_input",
            ChannelSemantic::PassResult("h".into()),
        ));
        let desc = ShaderDescriptor::multi_pass("blur", vec![pass("h", &[]), v]);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_single_pass_rejects_pass_result() {
        let desc = ShaderDescriptor::single(
            "s",
            "vs",
            "fs_main",
            vec![ChannelBinding::new("t", ChannelSemantic::PassResult("x".into()))],
        );
        assert!(desc.validate().is_err());
    }
}
