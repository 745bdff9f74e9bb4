//! Adjustment plugins.
//!
//! Each plugin declares the parameter keys it owns, when it is a no-op, and
//! how its parameters become uniforms. The document pass builder only walks
//! the registered plugins, so new adjustment kinds plug in without touching
//! it.

use strata_core::{StrataError, StrataResult};
use strata_ir::params::{BASIC_KEYS, STYLISTIC_KEYS};
use strata_ir::{ParamMap, ResolvedParams};

use crate::builtin;
use crate::pass::{push_param_uniform, PassStep, UniformValue, Uniforms};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    /// One pass through the plugin's uniform mapping.
    Generic,
    /// Emits its own chain of passes.
    MultiPass,
}

/// A parameterized adjustment that contributes passes to a graph.
pub trait AdjustmentPlugin: Send + Sync {
    fn id(&self) -> &str;

    /// Parameter keys this plugin consumes (lowercase).
    fn keys(&self) -> &[&'static str];

    fn kind(&self) -> PluginKind {
        PluginKind::Generic
    }

    /// Shader the plugin's passes run.
    fn shader(&self) -> &str;

    /// True when the plugin would leave pixels unchanged at these values.
    fn is_no_op(&self, params: &ResolvedParams) -> bool;

    fn uniforms(&self, params: &ResolvedParams) -> Uniforms;

    /// Pass chain for multi-pass plugins. Empty when there is nothing to do.
    fn chain(&self, params: &ResolvedParams) -> Vec<PassStep> {
        if self.is_no_op(params) {
            return Vec::new();
        }
        vec![PassStep::new(self.shader()).with_uniforms(self.uniforms(params))]
    }
}

/// Brightness, contrast, saturation, hue, exposure and gamma.
pub struct BasicAdjustments;

impl AdjustmentPlugin for BasicAdjustments {
    fn id(&self) -> &str {
        "basic"
    }

    fn keys(&self) -> &[&'static str] {
        &BASIC_KEYS
    }

    fn shader(&self) -> &str {
        builtin::BASIC_ADJUSTMENTS
    }

    fn is_no_op(&self, params: &ResolvedParams) -> bool {
        params.basic_is_identity()
    }

    fn uniforms(&self, params: &ResolvedParams) -> Uniforms {
        let mut u = Uniforms::new();
        u.insert("brightness".into(), UniformValue::Float(params.brightness));
        u.insert("contrast".into(), UniformValue::Float(params.contrast));
        u.insert("saturation".into(), UniformValue::Float(params.saturation));
        u.insert("hue".into(), UniformValue::Float(params.hue));
        u.insert("exposure".into(), UniformValue::Float(params.exposure));
        u.insert("gamma".into(), UniformValue::Float(params.gamma));
        u
    }
}

/// The combined stylistic effects pass.
pub struct Stylize;

impl AdjustmentPlugin for Stylize {
    fn id(&self) -> &str {
        "stylize"
    }

    fn keys(&self) -> &[&'static str] {
        &STYLISTIC_KEYS
    }

    fn shader(&self) -> &str {
        builtin::STYLISTIC_EFFECTS
    }

    fn is_no_op(&self, params: &ResolvedParams) -> bool {
        params.stylistic.is_default()
    }

    fn uniforms(&self, params: &ResolvedParams) -> Uniforms {
        let s = &params.stylistic;
        let mut u = Uniforms::new();
        for (name, value) in [
            ("vintage", s.vintage),
            ("sepia", s.sepia),
            ("grayscale", s.grayscale),
            ("invert", s.invert),
            ("vibrance", s.vibrance),
            ("noise", s.noise),
            ("grain", s.grain),
            ("recolor", s.recolor),
        ] {
            u.insert(name.into(), UniformValue::Float(value));
        }
        u.insert("recolor_color".into(), UniformValue::Color(s.recolor_color));
        u
    }
}

pub struct Vignette;

impl AdjustmentPlugin for Vignette {
    fn id(&self) -> &str {
        "vignette"
    }

    fn keys(&self) -> &[&'static str] {
        &["vignette"]
    }

    fn shader(&self) -> &str {
        builtin::VIGNETTE
    }

    fn is_no_op(&self, params: &ResolvedParams) -> bool {
        params.vignette == 0.0
    }

    fn uniforms(&self, params: &ResolvedParams) -> Uniforms {
        let mut u = Uniforms::new();
        u.insert("vignette".into(), UniformValue::Float(params.vignette));
        u
    }
}

/// Separable gaussian blur; emits `horizontal` then `vertical`.
pub struct Gaussian;

impl AdjustmentPlugin for Gaussian {
    fn id(&self) -> &str {
        "gaussian"
    }

    fn keys(&self) -> &[&'static str] {
        &["gaussian", "blur"]
    }

    fn kind(&self) -> PluginKind {
        PluginKind::MultiPass
    }

    fn shader(&self) -> &str {
        builtin::GAUSSIAN_BLUR
    }

    fn is_no_op(&self, params: &ResolvedParams) -> bool {
        params.blur_radius() <= 0.0
    }

    fn uniforms(&self, params: &ResolvedParams) -> Uniforms {
        let mut u = Uniforms::new();
        u.insert("radius".into(), UniformValue::Float(params.blur_radius()));
        u
    }

    fn chain(&self, params: &ResolvedParams) -> Vec<PassStep> {
        if self.is_no_op(params) {
            return Vec::new();
        }
        let uniforms = self.uniforms(params);
        vec![
            PassStep::new(self.shader())
                .with_pass_id(builtin::HORIZONTAL)
                .with_uniforms(uniforms.clone()),
            PassStep::new(self.shader())
                .with_pass_id(builtin::VERTICAL)
                .with_uniforms(uniforms)
                .after_previous(),
        ]
    }
}

/// Ordered set of adjustment plugins.
pub struct PluginRegistry {
    plugins: Vec<Box<dyn AdjustmentPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// `basic`, `stylize`, `vignette`, `gaussian`, in that order.
    pub fn builtin() -> Self {
        Self {
            plugins: vec![
                Box::new(BasicAdjustments),
                Box::new(Stylize),
                Box::new(Vignette),
                Box::new(Gaussian),
            ],
        }
    }

    /// Append a plugin. Ids are unique.
    pub fn register(&mut self, plugin: Box<dyn AdjustmentPlugin>) -> StrataResult<()> {
        if self.get(plugin.id()).is_some() {
            return Err(StrataError::InvalidArgument(format!(
                "adjustment plugin '{}' already registered",
                plugin.id()
            )));
        }
        tracing::debug!(plugin = plugin.id(), "adjustment plugin registered");
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&dyn AdjustmentPlugin> {
        self.plugins
            .iter()
            .find(|p| p.id() == id)
            .map(|p| p.as_ref())
    }

    pub fn ids(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    fn declares(&self, key: &str) -> bool {
        self.plugins.iter().any(|p| p.keys().contains(&key))
    }

    /// Document-level passes for a parameter map.
    ///
    /// Each plugin sees only the keys it declares. Keys no plugin declares
    /// travel as custom uniforms on the basic adjustments pass, which is
    /// emitted for them even at identity values.
    pub fn document_passes(&self, params: &ParamMap) -> Vec<PassStep> {
        let unknown: ParamMap = params
            .iter()
            .filter(|(k, _)| !self.declares(&k.to_ascii_lowercase()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut unknown_pending = !unknown.is_empty();

        let mut steps = Vec::new();
        for plugin in &self.plugins {
            let subset: ParamMap = params
                .iter()
                .filter(|(k, _)| plugin.keys().contains(&k.to_ascii_lowercase().as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let resolved = ResolvedParams::resolve(&subset);

            match plugin.kind() {
                PluginKind::MultiPass => steps.extend(plugin.chain(&resolved)),
                PluginKind::Generic => {
                    let carries_unknown =
                        unknown_pending && plugin.shader() == builtin::BASIC_ADJUSTMENTS;
                    if plugin.is_no_op(&resolved) && !carries_unknown {
                        continue;
                    }
                    let mut step =
                        PassStep::new(plugin.shader()).with_uniforms(plugin.uniforms(&resolved));
                    if carries_unknown {
                        for (key, value) in &unknown {
                            push_param_uniform(&mut step.uniforms, key, value);
                        }
                        unknown_pending = false;
                    }
                    steps.push(step);
                }
            }
        }

        if unknown_pending {
            tracing::warn!(
                keys = ?unknown.keys().collect::<Vec<_>>(),
                "no basic adjustments plugin to carry custom parameters"
            );
        }
        steps
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Document-level passes using the built-in plugins.
pub fn build_document_passes(params: &ParamMap) -> Vec<PassStep> {
    PluginRegistry::builtin().document_passes(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_ir::ParamValue;

    fn params(entries: &[(&str, f32)]) -> ParamMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), ParamValue::Scalar(*v)))
            .collect()
    }

    #[test]
    fn test_default_params_emit_nothing() {
        assert!(build_document_passes(&ParamMap::new()).is_empty());
        let identity = params(&[("brightness", 100.0), ("sepia", 0.0), ("gaussian", 0.0)]);
        assert!(build_document_passes(&identity).is_empty());
    }

    #[test]
    fn test_gaussian_chain() {
        let steps = build_document_passes(&params(&[("gaussian", 6.0)]));
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].shader, builtin::GAUSSIAN_BLUR);
        assert_eq!(steps[0].pass_id.as_deref(), Some(builtin::HORIZONTAL));
        assert!(!steps[0].with_previous_pass);
        assert_eq!(steps[1].pass_id.as_deref(), Some(builtin::VERTICAL));
        assert!(steps[1].with_previous_pass);
        assert_eq!(steps[1].float("radius"), Some(6.0));
    }

    #[test]
    fn test_gaussian_non_positive_radius_is_empty() {
        assert!(Gaussian
            .chain(&ResolvedParams::resolve(&params(&[("gaussian", -3.0)])))
            .is_empty());
        assert!(build_document_passes(&params(&[("gaussian", 0.0)])).is_empty());
    }

    #[test]
    fn test_plugins_see_only_their_keys() {
        let steps = build_document_passes(&params(&[("contrast", 120.0), ("vignette", 40.0)]));
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].shader, builtin::BASIC_ADJUSTMENTS);
        assert_eq!(steps[0].float("contrast"), Some(120.0));
        assert!(steps[0].uniform("vignette").is_none());
        assert_eq!(steps[1].shader, builtin::VIGNETTE);
        assert_eq!(steps[1].float("vignette"), Some(40.0));
    }

    #[test]
    fn test_unknown_keys_ride_on_basic_pass() {
        let steps = build_document_passes(&params(&[("halftone", 8.0)]));
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].shader, builtin::BASIC_ADJUSTMENTS);
        assert_eq!(steps[0].float("halftone"), Some(8.0));
        assert_eq!(steps[0].float("brightness"), Some(100.0));
    }

    #[test]
    fn test_registry_rejects_duplicate_ids() {
        let mut registry = PluginRegistry::builtin();
        assert!(registry.register(Box::new(Vignette)).is_err());
        assert_eq!(registry.ids(), vec!["basic", "stylize", "vignette", "gaussian"]);
    }

    struct Posterize;

    impl AdjustmentPlugin for Posterize {
        fn id(&self) -> &str {
            "posterize"
        }
        fn keys(&self) -> &[&'static str] {
            &["posterize"]
        }
        fn shader(&self) -> &str {
            "posterize"
        }
        fn is_no_op(&self, params: &ResolvedParams) -> bool {
            !params.custom.contains_key("posterize")
        }
        fn uniforms(&self, params: &ResolvedParams) -> Uniforms {
            let mut u = Uniforms::new();
            if let Some(v) = params.custom.get("posterize") {
                push_param_uniform(&mut u, "levels", v);
            }
            u
        }
    }

    #[test]
    fn test_custom_plugin_extends_builder() {
        let mut registry = PluginRegistry::builtin();
        registry.register(Box::new(Posterize)).unwrap();
        let steps = registry.document_passes(&params(&[("posterize", 4.0)]));
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].shader, "posterize");
        assert_eq!(steps[0].float("levels"), Some(4.0));
    }
}
