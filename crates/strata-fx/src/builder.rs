use strata_core::{ColorProfile, LayerType};
use strata_ir::ResolvedParams;

use crate::builtin;
use crate::pass::{push_param_uniform, PassStep, UniformValue};
use crate::plugin::{AdjustmentPlugin, BasicAdjustments, Gaussian, Stylize, Vignette};

fn profile_step(shader: &str, profile: ColorProfile) -> PassStep {
    PassStep::new(shader).with_uniform("profile", UniformValue::Float(profile.uniform_flag()))
}

/// Ordered passes for one layer.
///
/// Raster and solid layers are linearized and then placed (`copy` or
/// `solid_fill`). Adjustment layers start from the linearized composite the
/// compositor hands them. Blur, stylistic effects and vignette are added
/// only when not a no-op; basic adjustments and the final encode always run.
/// Mask and group layers produce no passes.
pub fn build_layer_passes(
    layer_type: LayerType,
    params: &ResolvedParams,
    profile: ColorProfile,
) -> Vec<PassStep> {
    let mut steps = Vec::new();
    match layer_type {
        LayerType::Mask | LayerType::Group => return steps,
        LayerType::Raster => {
            steps.push(profile_step(builtin::LINEARIZE, profile));
            steps.push(PassStep::new(builtin::COPY));
        }
        LayerType::Solid => {
            steps.push(profile_step(builtin::LINEARIZE, profile));
            steps.push(PassStep::new(builtin::SOLID_FILL));
        }
        LayerType::Adjustment => {}
    }

    if !Gaussian.is_no_op(params) {
        let radius = UniformValue::Float(params.blur_radius());
        steps.push(
            PassStep::new(builtin::GAUSSIAN_BLUR)
                .with_pass_id(builtin::HORIZONTAL)
                .with_uniform("radius", radius.clone()),
        );
        steps.push(
            PassStep::new(builtin::GAUSSIAN_BLUR)
                .with_pass_id(builtin::VERTICAL)
                .with_uniform("radius", radius)
                .with_input(builtin::HORIZONTAL),
        );
    }

    if !Stylize.is_no_op(params) {
        steps.push(PassStep::new(builtin::STYLISTIC_EFFECTS).with_uniforms(Stylize.uniforms(params)));
    }

    if !Vignette.is_no_op(params) {
        steps.push(PassStep::new(builtin::VIGNETTE).with_uniforms(Vignette.uniforms(params)));
    }

    let mut basic =
        PassStep::new(builtin::BASIC_ADJUSTMENTS).with_uniforms(BasicAdjustments.uniforms(params));
    for (key, value) in &params.custom {
        push_param_uniform(&mut basic.uniforms, key, value);
    }
    steps.push(basic);

    steps.push(profile_step(builtin::ENCODE, profile));
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_ir::{ParamMap, ParamValue};

    fn resolved(entries: &[(&str, f32)]) -> ResolvedParams {
        let map: ParamMap = entries
            .iter()
            .map(|(k, v)| (k.to_string(), ParamValue::Scalar(*v)))
            .collect();
        ResolvedParams::resolve(&map)
    }

    fn shaders(steps: &[PassStep]) -> Vec<&str> {
        steps.iter().map(|s| s.shader.as_str()).collect()
    }

    #[test]
    fn test_raster_defaults_are_minimal() {
        let steps = build_layer_passes(
            LayerType::Raster,
            &ResolvedParams::default(),
            ColorProfile::Standard,
        );
        assert_eq!(
            shaders(&steps),
            vec![
                builtin::LINEARIZE,
                builtin::COPY,
                builtin::BASIC_ADJUSTMENTS,
                builtin::ENCODE
            ]
        );
        assert_eq!(steps[2].float("brightness"), Some(100.0));
        assert_eq!(steps[2].float("gamma"), Some(1.0));
    }

    #[test]
    fn test_solid_uses_solid_fill() {
        let steps = build_layer_passes(
            LayerType::Solid,
            &ResolvedParams::default(),
            ColorProfile::Standard,
        );
        assert_eq!(steps[1].shader, builtin::SOLID_FILL);
    }

    #[test]
    fn test_adjustment_layer_skips_linearize() {
        let steps = build_layer_passes(
            LayerType::Adjustment,
            &resolved(&[("grayscale", 50.0)]),
            ColorProfile::Standard,
        );
        assert_eq!(
            shaders(&steps),
            vec![
                builtin::STYLISTIC_EFFECTS,
                builtin::BASIC_ADJUSTMENTS,
                builtin::ENCODE
            ]
        );
        assert_eq!(steps[0].float("grayscale"), Some(50.0));
        assert_eq!(steps[0].float("sepia"), Some(0.0));
    }

    #[test]
    fn test_blur_adds_two_passes() {
        let steps = build_layer_passes(
            LayerType::Raster,
            &resolved(&[("blur", 4.0)]),
            ColorProfile::Standard,
        );
        assert_eq!(steps[2].pass_id.as_deref(), Some(builtin::HORIZONTAL));
        assert_eq!(steps[3].pass_id.as_deref(), Some(builtin::VERTICAL));
        assert_eq!(steps[3].inputs, vec![builtin::HORIZONTAL.to_string()]);
        assert_eq!(steps[3].float("radius"), Some(4.0));
    }

    #[test]
    fn test_mask_and_group_are_empty() {
        let params = resolved(&[("brightness", 150.0), ("blur", 2.0)]);
        assert!(build_layer_passes(LayerType::Mask, &params, ColorProfile::Standard).is_empty());
        assert!(build_layer_passes(LayerType::Group, &params, ColorProfile::Standard).is_empty());
    }

    #[test]
    fn test_profile_flag_on_color_steps() {
        let steps = build_layer_passes(
            LayerType::Raster,
            &ResolvedParams::default(),
            ColorProfile::Linear,
        );
        assert_eq!(steps[0].float("profile"), Some(1.0));
        assert_eq!(steps.last().unwrap().float("profile"), Some(1.0));
    }

    #[test]
    fn test_custom_params_reach_basic_pass() {
        let steps = build_layer_passes(
            LayerType::Raster,
            &resolved(&[("halftone", 3.0)]),
            ColorProfile::Standard,
        );
        let basic = steps
            .iter()
            .find(|s| s.shader == builtin::BASIC_ADJUSTMENTS)
            .unwrap();
        assert_eq!(basic.float("halftone"), Some(3.0));
    }
}
