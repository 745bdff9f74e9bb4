use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of content a layer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    /// A bitmap image placed on the canvas.
    Raster,
    /// Applies its parameters to everything composited below it.
    Adjustment,
    /// A solid color fill.
    Solid,
    /// Provides a mask texture for other layers; never composited itself.
    Mask,
    /// Organizes child layers; composited through its children.
    Group,
}

impl LayerType {
    /// Layer types whose own pixels enter the running composite.
    pub fn is_composited(&self) -> bool {
        !matches!(self, LayerType::Mask | LayerType::Group)
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerType::Raster => write!(f, "raster"),
            LayerType::Adjustment => write!(f, "adjustment"),
            LayerType::Solid => write!(f, "solid"),
            LayerType::Mask => write!(f, "mask"),
            LayerType::Group => write!(f, "group"),
        }
    }
}

/// Blend mode for layer compositing.
///
/// Deserializes from any string; names are matched case-insensitively and
/// unrecognized names fall back to [`BlendMode::Normal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BlendMode {
    /// Standard alpha blending (Porter-Duff "over").
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    /// Linear dodge.
    Add,
}

impl BlendMode {
    pub const ALL: [BlendMode; 7] = [
        BlendMode::Normal,
        BlendMode::Multiply,
        BlendMode::Screen,
        BlendMode::Overlay,
        BlendMode::Darken,
        BlendMode::Lighten,
        BlendMode::Add,
    ];

    /// Parse a blend mode name, logging and falling back to `Normal` when
    /// the name is unknown.
    pub fn parse_lenient(name: &str) -> BlendMode {
        name.parse().unwrap_or_else(|_| {
            tracing::warn!(blend_mode = name, "unknown blend mode, using normal");
            BlendMode::Normal
        })
    }

    /// Stable numeric code passed to the blend shader.
    pub fn code(&self) -> u32 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Multiply => 1,
            BlendMode::Screen => 2,
            BlendMode::Overlay => 3,
            BlendMode::Darken => 4,
            BlendMode::Lighten => 5,
            BlendMode::Add => 6,
        }
    }

    pub fn from_code(code: u32) -> Option<BlendMode> {
        BlendMode::ALL.iter().copied().find(|m| m.code() == code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown blend mode '{0}'")]
pub struct UnknownBlendMode(pub String);

impl FromStr for BlendMode {
    type Err = UnknownBlendMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" | "source-over" => Ok(BlendMode::Normal),
            "multiply" => Ok(BlendMode::Multiply),
            "screen" => Ok(BlendMode::Screen),
            "overlay" => Ok(BlendMode::Overlay),
            "darken" => Ok(BlendMode::Darken),
            "lighten" => Ok(BlendMode::Lighten),
            "add" | "linear-dodge" | "lighter" => Ok(BlendMode::Add),
            _ => Err(UnknownBlendMode(s.to_string())),
        }
    }
}

impl From<String> for BlendMode {
    fn from(s: String) -> Self {
        BlendMode::parse_lenient(&s)
    }
}

impl From<BlendMode> for String {
    fn from(mode: BlendMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlendMode::Normal => "normal",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
            BlendMode::Darken => "darken",
            BlendMode::Lighten => "lighten",
            BlendMode::Add => "add",
        };
        f.write_str(name)
    }
}

/// How a mask's weight combines with the weight accumulated from the
/// layer's earlier masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskMode {
    #[default]
    Add,
    Subtract,
    Intersect,
    Difference,
}

impl MaskMode {
    /// Combine the accumulated weight with this mask's weight; both in 0..1.
    pub fn combine(&self, acc: f32, w: f32) -> f32 {
        let out = match self {
            MaskMode::Add => acc + w,
            MaskMode::Subtract => acc - w,
            MaskMode::Intersect => acc * w,
            MaskMode::Difference => (acc - w).abs(),
        };
        out.clamp(0.0, 1.0)
    }
}

impl fmt::Display for MaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskMode::Add => write!(f, "add"),
            MaskMode::Subtract => write!(f, "subtract"),
            MaskMode::Intersect => write!(f, "intersect"),
            MaskMode::Difference => write!(f, "difference"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_type_display() {
        assert_eq!(format!("{}", LayerType::Raster), "raster");
        assert_eq!(format!("{}", LayerType::Solid), "solid");
        assert!(!LayerType::Mask.is_composited());
        assert!(LayerType::Adjustment.is_composited());
    }

    #[test]
    fn test_blend_mode_parse_case_insensitive() {
        assert_eq!("Multiply".parse::<BlendMode>(), Ok(BlendMode::Multiply));
        assert_eq!("SCREEN".parse::<BlendMode>(), Ok(BlendMode::Screen));
        assert_eq!("source-over".parse::<BlendMode>(), Ok(BlendMode::Normal));
        assert!("hard-mix".parse::<BlendMode>().is_err());
    }

    #[test]
    fn test_blend_mode_serde_fallback() {
        let mode: BlendMode = serde_json::from_str("\"Overlay\"").unwrap();
        assert_eq!(mode, BlendMode::Overlay);
        let mode: BlendMode = serde_json::from_str("\"color-burn\"").unwrap();
        assert_eq!(mode, BlendMode::Normal);
        assert_eq!(serde_json::to_string(&BlendMode::Darken).unwrap(), "\"darken\"");
    }

    #[test]
    fn test_blend_mode_codes_unique() {
        for mode in BlendMode::ALL {
            assert_eq!(BlendMode::from_code(mode.code()), Some(mode));
        }
    }

    #[test]
    fn test_mask_mode_combine() {
        assert_eq!(MaskMode::Add.combine(0.7, 0.6), 1.0);
        assert_eq!(MaskMode::Subtract.combine(0.5, 0.75), 0.0);
        assert!((MaskMode::Intersect.combine(0.5, 0.5) - 0.25).abs() < 1e-6);
        assert!((MaskMode::Difference.combine(0.25, 1.0) - 0.75).abs() < 1e-6);
    }
}
