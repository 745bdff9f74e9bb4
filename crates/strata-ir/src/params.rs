//! Adjustment parameters.
//!
//! Editors hand over parameter maps keyed by adjustment name with scalar,
//! boolean or `{value, color}` values. [`Adjustment`] is the typed reading of
//! one entry and [`ResolvedParams`] the typed view of a whole map with
//! identity defaults filled in. Keys that name no known adjustment are kept
//! as [`Adjustment::Custom`] so they can still reach a shader as uniforms.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strata_core::Color;

/// A single parameter value as supplied by the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Toggle(bool),
    Scalar(f32),
    Colored { value: f32, color: Color },
}

impl ParamValue {
    /// Numeric reading: toggles map to 0/100, colored values to their amount.
    pub fn as_scalar(&self) -> f32 {
        match self {
            ParamValue::Scalar(v) => *v,
            ParamValue::Toggle(b) => {
                if *b {
                    100.0
                } else {
                    0.0
                }
            }
            ParamValue::Colored { value, .. } => *value,
        }
    }

    pub fn color(&self) -> Option<Color> {
        match self {
            ParamValue::Colored { color, .. } => Some(*color),
            _ => None,
        }
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Scalar(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Toggle(v)
    }
}

/// Parameter map keyed by adjustment name. Sorted by key so that iteration,
/// and therefore pass order and uniform layout, is deterministic.
pub type ParamMap = BTreeMap<String, ParamValue>;

/// Basic tone/color adjustment keys, handled by a single shader pass.
pub const BASIC_KEYS: [&str; 6] = [
    "brightness",
    "contrast",
    "saturation",
    "hue",
    "exposure",
    "gamma",
];

/// Stylistic effect keys, combined into one pass when any is active.
pub const STYLISTIC_KEYS: [&str; 8] = [
    "vintage",
    "sepia",
    "grayscale",
    "invert",
    "vibrance",
    "noise",
    "grain",
    "recolor",
];

/// One typed adjustment.
///
/// Units: brightness, contrast and saturation are percentages with 100 as
/// identity; hue is a rotation in degrees; exposure is in stops; gamma is an
/// exponent with 1 as identity; blur radii are pixels; vignette and the
/// stylistic effects are strengths in 0..=100 with 0 as identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Adjustment {
    Brightness { value: f32 },
    Contrast { value: f32 },
    Saturation { value: f32 },
    Hue { degrees: f32 },
    Exposure { stops: f32 },
    Gamma { value: f32 },
    Blur { radius: f32 },
    Gaussian { radius: f32 },
    Vignette { amount: f32 },
    Vintage { amount: f32 },
    Sepia { amount: f32 },
    Grayscale { amount: f32 },
    Invert { amount: f32 },
    Vibrance { amount: f32 },
    Noise { amount: f32 },
    Grain { amount: f32 },
    Recolor { amount: f32, color: Color },
    Custom { key: String, value: ParamValue },
}

impl Adjustment {
    /// Read one parameter map entry.
    pub fn from_param(key: &str, value: &ParamValue) -> Adjustment {
        let v = value.as_scalar();
        match key.to_ascii_lowercase().as_str() {
            "brightness" => Adjustment::Brightness { value: v },
            "contrast" => Adjustment::Contrast { value: v },
            "saturation" => Adjustment::Saturation { value: v },
            "hue" => Adjustment::Hue { degrees: v },
            "exposure" => Adjustment::Exposure { stops: v },
            "gamma" => Adjustment::Gamma { value: v },
            "blur" => Adjustment::Blur { radius: v },
            "gaussian" => Adjustment::Gaussian { radius: v },
            "vignette" => Adjustment::Vignette { amount: v },
            "vintage" => Adjustment::Vintage { amount: v },
            "sepia" => Adjustment::Sepia { amount: v },
            "grayscale" => Adjustment::Grayscale { amount: v },
            "invert" => Adjustment::Invert { amount: v },
            "vibrance" => Adjustment::Vibrance { amount: v },
            "noise" => Adjustment::Noise { amount: v },
            "grain" => Adjustment::Grain { amount: v },
            "recolor" => Adjustment::Recolor {
                amount: v,
                color: value.color().unwrap_or(Color::WHITE),
            },
            _ => Adjustment::Custom {
                key: key.to_string(),
                value: value.clone(),
            },
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Adjustment::Brightness { .. } => "brightness",
            Adjustment::Contrast { .. } => "contrast",
            Adjustment::Saturation { .. } => "saturation",
            Adjustment::Hue { .. } => "hue",
            Adjustment::Exposure { .. } => "exposure",
            Adjustment::Gamma { .. } => "gamma",
            Adjustment::Blur { .. } => "blur",
            Adjustment::Gaussian { .. } => "gaussian",
            Adjustment::Vignette { .. } => "vignette",
            Adjustment::Vintage { .. } => "vintage",
            Adjustment::Sepia { .. } => "sepia",
            Adjustment::Grayscale { .. } => "grayscale",
            Adjustment::Invert { .. } => "invert",
            Adjustment::Vibrance { .. } => "vibrance",
            Adjustment::Noise { .. } => "noise",
            Adjustment::Grain { .. } => "grain",
            Adjustment::Recolor { .. } => "recolor",
            Adjustment::Custom { key, .. } => key,
        }
    }

    /// Whether this adjustment leaves pixels unchanged.
    pub fn is_identity(&self) -> bool {
        match self {
            Adjustment::Brightness { value }
            | Adjustment::Contrast { value }
            | Adjustment::Saturation { value } => *value == 100.0,
            Adjustment::Hue { degrees } => degrees.rem_euclid(360.0) == 0.0,
            Adjustment::Exposure { stops } => *stops == 0.0,
            Adjustment::Gamma { value } => *value == 1.0,
            Adjustment::Blur { radius } | Adjustment::Gaussian { radius } => *radius <= 0.0,
            Adjustment::Vignette { amount }
            | Adjustment::Vintage { amount }
            | Adjustment::Sepia { amount }
            | Adjustment::Grayscale { amount }
            | Adjustment::Invert { amount }
            | Adjustment::Vibrance { amount }
            | Adjustment::Noise { amount }
            | Adjustment::Grain { amount }
            | Adjustment::Recolor { amount, .. } => *amount == 0.0,
            Adjustment::Custom { .. } => false,
        }
    }
}

/// Strengths of the combined stylistic pass, each 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StylisticParams {
    pub vintage: f32,
    pub sepia: f32,
    pub grayscale: f32,
    pub invert: f32,
    pub vibrance: f32,
    pub noise: f32,
    pub grain: f32,
    pub recolor: f32,
    pub recolor_color: Color,
}

impl Default for StylisticParams {
    fn default() -> Self {
        Self {
            vintage: 0.0,
            sepia: 0.0,
            grayscale: 0.0,
            invert: 0.0,
            vibrance: 0.0,
            noise: 0.0,
            grain: 0.0,
            recolor: 0.0,
            recolor_color: Color::WHITE,
        }
    }
}

impl StylisticParams {
    /// True when every stylistic effect is at its default strength.
    pub fn is_default(&self) -> bool {
        [
            self.vintage,
            self.sepia,
            self.grayscale,
            self.invert,
            self.vibrance,
            self.noise,
            self.grain,
            self.recolor,
        ]
        .iter()
        .all(|v| *v == 0.0)
    }
}

/// Typed view of a [`ParamMap`] with identity defaults for absent keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedParams {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub hue: f32,
    pub exposure: f32,
    pub gamma: f32,
    pub blur: f32,
    pub gaussian: f32,
    pub vignette: f32,
    pub stylistic: StylisticParams,
    /// Unrecognized keys, forwarded to shaders as custom uniforms.
    pub custom: BTreeMap<String, ParamValue>,
}

impl Default for ResolvedParams {
    fn default() -> Self {
        Self {
            brightness: 100.0,
            contrast: 100.0,
            saturation: 100.0,
            hue: 0.0,
            exposure: 0.0,
            gamma: 1.0,
            blur: 0.0,
            gaussian: 0.0,
            vignette: 0.0,
            stylistic: StylisticParams::default(),
            custom: BTreeMap::new(),
        }
    }
}

impl ResolvedParams {
    pub fn resolve(params: &ParamMap) -> ResolvedParams {
        let mut out = ResolvedParams::default();
        for (key, value) in params {
            out.apply(Adjustment::from_param(key, value));
        }
        out
    }

    /// Fold one adjustment into the view; later entries win.
    pub fn apply(&mut self, adjustment: Adjustment) {
        let s = &mut self.stylistic;
        match adjustment {
            Adjustment::Brightness { value } => self.brightness = value,
            Adjustment::Contrast { value } => self.contrast = value,
            Adjustment::Saturation { value } => self.saturation = value,
            Adjustment::Hue { degrees } => self.hue = degrees,
            Adjustment::Exposure { stops } => self.exposure = stops,
            Adjustment::Gamma { value } => self.gamma = value,
            Adjustment::Blur { radius } => self.blur = radius,
            Adjustment::Gaussian { radius } => self.gaussian = radius,
            Adjustment::Vignette { amount } => self.vignette = amount,
            Adjustment::Vintage { amount } => s.vintage = amount,
            Adjustment::Sepia { amount } => s.sepia = amount,
            Adjustment::Grayscale { amount } => s.grayscale = amount,
            Adjustment::Invert { amount } => s.invert = amount,
            Adjustment::Vibrance { amount } => s.vibrance = amount,
            Adjustment::Noise { amount } => s.noise = amount,
            Adjustment::Grain { amount } => s.grain = amount,
            Adjustment::Recolor { amount, color } => {
                s.recolor = amount;
                s.recolor_color = color;
            }
            Adjustment::Custom { key, value } => {
                tracing::trace!(key = %key, "custom parameter passthrough");
                self.custom.insert(key, value);
            }
        }
    }

    /// Radius of the layer-local separable blur. Either blur key enables it.
    pub fn blur_radius(&self) -> f32 {
        self.blur.max(self.gaussian)
    }

    pub fn basic_is_identity(&self) -> bool {
        self.brightness == 100.0
            && self.contrast == 100.0
            && self.saturation == 100.0
            && self.hue.rem_euclid(360.0) == 0.0
            && self.exposure == 0.0
            && self.gamma == 1.0
    }
}
