use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use strata_core::{Rect, StrataError, StrataResult};
use strata_ir::{Document, LayerId, ResolvedParams};

use crate::builder::build_layer_passes;
use crate::builtin;
use crate::pass::{PassStep, UniformValue};
use crate::plugin::PluginRegistry;
use crate::registry::ShaderRegistry;

/// The pass list of one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerPasses {
    pub layer: LayerId,
    pub steps: Vec<PassStep>,
}

/// Every pass a render executes: per-layer lists, document-level adjustment
/// layers, and the global passes run once over the final composite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassGraph {
    pub layers: Vec<LayerPasses>,
    #[serde(default)]
    pub global_layers: Vec<LayerPasses>,
    #[serde(default)]
    pub global: Vec<PassStep>,
}

impl PassGraph {
    pub fn for_layer(&self, id: &LayerId) -> Option<&[PassStep]> {
        self.layers
            .iter()
            .chain(self.global_layers.iter())
            .find(|lp| &lp.layer == id)
            .map(|lp| lp.steps.as_slice())
    }

    pub fn pass_count(&self) -> usize {
        self.layers
            .iter()
            .chain(self.global_layers.iter())
            .map(|lp| lp.steps.len())
            .sum::<usize>()
            + self.global.len()
    }

    /// Check every pass list against the registry.
    pub fn validate(&self, registry: &ShaderRegistry) -> StrataResult<()> {
        for lp in self.layers.iter().chain(self.global_layers.iter()) {
            validate_steps(&lp.steps, registry).map_err(|e| match e {
                StrataError::MalformedGraph(msg) => {
                    StrataError::MalformedGraph(format!("layer '{}': {}", lp.layer, msg))
                }
                other => other,
            })?;
        }
        validate_steps(&self.global, registry)
    }
}

/// Validate one pass list: shaders exist, multi-pass steps name a real
/// sub-pass with its prerequisites wired, step ids are unique, every input
/// names a step of the list, and the dependencies are acyclic.
pub fn validate_steps(steps: &[PassStep], registry: &ShaderRegistry) -> StrataResult<()> {
    let mut seen = HashSet::new();
    for (i, step) in steps.iter().enumerate() {
        if !seen.insert(step.step_id(i)) {
            return Err(StrataError::MalformedGraph(format!(
                "duplicate pass id '{}'",
                step.step_id(i)
            )));
        }
    }

    for (i, step) in steps.iter().enumerate() {
        let desc = registry.resolve(&step.shader)?;

        if step.with_previous_pass && i == 0 {
            return Err(StrataError::MalformedGraph(format!(
                "step {} ({}) follows a previous pass but is first",
                i, step.shader
            )));
        }
        for input in &step.inputs {
            if !seen.contains(input) {
                return Err(StrataError::MalformedGraph(format!(
                    "step {} ({}) consumes unknown pass '{}'",
                    i, step.shader, input
                )));
            }
        }

        if desc.is_multi_pass() {
            let Some(pass_id) = step.pass_id.as_deref() else {
                return Err(StrataError::MalformedGraph(format!(
                    "step {} uses multi-pass shader '{}' without a pass id",
                    i, step.shader
                )));
            };
            let Some(sub) = desc.sub_pass(pass_id) else {
                return Err(StrataError::MalformedGraph(format!(
                    "shader '{}' has no sub-pass '{}'",
                    step.shader, pass_id
                )));
            };
            for dep in &sub.depends_on {
                let via_previous = step.with_previous_pass
                    && steps[i - 1].shader == step.shader
                    && steps[i - 1].pass_id.as_deref() == Some(dep.as_str());
                if !via_previous && !step.inputs.contains(dep) {
                    return Err(StrataError::MalformedGraph(format!(
                        "sub-pass '{}' of '{}' requires '{}' as an input",
                        pass_id, step.shader, dep
                    )));
                }
            }
        }
    }

    execution_order(steps).map(|_| ())
}

/// Stable topological order of a pass list.
///
/// Edges come from `inputs` and `with_previous_pass`. Among ready steps the
/// lowest index runs first, so a list whose dependencies all point backwards
/// executes in list order.
pub fn execution_order(steps: &[PassStep]) -> StrataResult<Vec<usize>> {
    let ids: HashMap<String, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.step_id(i), i))
        .collect();

    let mut indegree = vec![0usize; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (i, step) in steps.iter().enumerate() {
        let mut deps = BTreeSet::new();
        if step.with_previous_pass && i > 0 {
            deps.insert(i - 1);
        }
        for input in &step.inputs {
            match ids.get(input) {
                Some(&j) => {
                    deps.insert(j);
                }
                None => {
                    return Err(StrataError::MalformedGraph(format!(
                        "unknown pass id '{}'",
                        input
                    )))
                }
            }
        }
        for j in deps {
            if j == i {
                return Err(StrataError::MalformedGraph(format!(
                    "pass '{}' depends on itself",
                    step.step_id(i)
                )));
            }
            indegree[i] += 1;
            dependents[j].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..steps.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(steps.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &d in &dependents[i] {
            indegree[d] -= 1;
            if indegree[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if order.len() != steps.len() {
        let stuck: Vec<String> = (0..steps.len())
            .filter(|i| indegree[*i] > 0)
            .map(|i| steps[i].step_id(i))
            .collect();
        return Err(StrataError::MalformedGraph(format!(
            "dependency cycle among passes {:?}",
            stuck
        )));
    }
    Ok(order)
}

fn rect_uniform(rect: Rect) -> UniformValue {
    UniformValue::Vec4([
        rect.x as f32,
        rect.y as f32,
        rect.width as f32,
        rect.height as f32,
    ])
}

/// Build the full pass graph of a document.
///
/// Placement steps receive the layer rectangle (`rect`) and canvas size
/// (`canvas`). Layers that will not render are left out. Global parameters
/// become document passes wrapped in linearize/encode.
pub fn build_pass_graph(doc: &Document, plugins: &PluginRegistry) -> PassGraph {
    let canvas = UniformValue::Vec2([doc.width as f32, doc.height as f32]);

    let mut layers = Vec::new();
    for layer in &doc.layers {
        let layer_type = layer.layer_type();
        if !layer_type.is_composited() || !doc.is_effectively_visible(layer) {
            continue;
        }
        let resolved = ResolvedParams::resolve(&layer.params);
        let mut steps = build_layer_passes(layer_type, &resolved, doc.profile);
        let rect = layer
            .placement
            .unwrap_or_else(|| Rect::canvas(doc.width, doc.height));
        for step in steps.iter_mut() {
            if step.shader == builtin::COPY || step.shader == builtin::SOLID_FILL {
                step.uniforms.insert("rect".into(), rect_uniform(rect));
                step.uniforms.insert("canvas".into(), canvas.clone());
            }
        }
        layers.push(LayerPasses {
            layer: layer.id.clone(),
            steps,
        });
    }

    let global_layers = doc
        .global_layers
        .iter()
        .filter(|l| l.visible && l.layer_type().is_composited())
        .map(|l| LayerPasses {
            layer: l.id.clone(),
            steps: build_layer_passes(
                l.layer_type(),
                &ResolvedParams::resolve(&l.params),
                doc.profile,
            ),
        })
        .collect();

    let document_passes = plugins.document_passes(&doc.global_params);
    let global = if document_passes.is_empty() {
        Vec::new()
    } else {
        let flag = UniformValue::Float(doc.profile.uniform_flag());
        let mut steps = Vec::with_capacity(document_passes.len() + 2);
        steps.push(PassStep::new(builtin::LINEARIZE).with_uniform("profile", flag.clone()));
        steps.extend(document_passes);
        steps.push(PassStep::new(builtin::ENCODE).with_uniform("profile", flag));
        steps
    };

    PassGraph {
        layers,
        global_layers,
        global,
    }
}
