use serde::{Deserialize, Serialize};

use crate::params::{ParamMap, ParamValue};
use strata_core::{BlendMode, Color, FrameBuffer, LayerType, MaskMode, Rect};

/// Unique identifier for a layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub String);

impl LayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The content of a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LayerContent {
    /// A bitmap, stretched into the layer's placement rectangle.
    Raster { image: FrameBuffer },
    /// Adjusts everything composited below it.
    Adjustment,
    /// A solid color fill.
    Solid { color: Color },
    /// Mask source referenced by other layers' [`LayerMask`]s.
    Mask { image: FrameBuffer },
    /// Groups other layers of the same document by id.
    Group { children: Vec<LayerId> },
}

/// A reference from a layer to a mask source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerMask {
    /// Id of the mask (or any raster) layer supplying the texture.
    pub source: LayerId,
    #[serde(default)]
    pub invert: bool,
    /// 0..=100
    #[serde(default = "full_opacity")]
    pub opacity: f32,
    #[serde(default)]
    pub mode: MaskMode,
}

impl LayerMask {
    pub fn new(source: LayerId) -> Self {
        Self {
            source,
            invert: false,
            opacity: 100.0,
            mode: MaskMode::Add,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_mode(mut self, mode: MaskMode) -> Self {
        self.mode = mode;
        self
    }
}

fn full_opacity() -> f32 {
    100.0
}

fn visible_default() -> bool {
    true
}

/// A layer of a document, as handed over by the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    #[serde(default)]
    pub name: String,
    pub content: LayerContent,
    #[serde(default = "visible_default")]
    pub visible: bool,
    #[serde(default)]
    pub locked: bool,
    /// 0..=100
    #[serde(default = "full_opacity")]
    pub opacity: f32,
    #[serde(default)]
    pub blend_mode: BlendMode,
    /// Canvas rectangle the content occupies; the whole canvas when absent.
    #[serde(default)]
    pub placement: Option<Rect>,
    #[serde(default)]
    pub params: ParamMap,
    #[serde(default)]
    pub masks: Vec<LayerMask>,
}

impl Layer {
    pub fn new(id: LayerId, content: LayerContent) -> Self {
        Self {
            name: id.0.clone(),
            id,
            content,
            visible: true,
            locked: false,
            opacity: 100.0,
            blend_mode: BlendMode::Normal,
            placement: None,
            params: ParamMap::new(),
            masks: Vec::new(),
        }
    }

    /// Convenience: an adjustment layer.
    pub fn adjustment(id: impl Into<String>) -> Self {
        Self::new(LayerId::new(id), LayerContent::Adjustment)
    }

    /// Convenience: a solid color layer.
    pub fn solid(id: impl Into<String>, color: Color) -> Self {
        Self::new(LayerId::new(id), LayerContent::Solid { color })
    }

    /// Convenience: a raster layer.
    pub fn raster(id: impl Into<String>, image: FrameBuffer) -> Self {
        Self::new(LayerId::new(id), LayerContent::Raster { image })
    }

    pub fn layer_type(&self) -> LayerType {
        match &self.content {
            LayerContent::Raster { .. } => LayerType::Raster,
            LayerContent::Adjustment => LayerType::Adjustment,
            LayerContent::Solid { .. } => LayerType::Solid,
            LayerContent::Mask { .. } => LayerType::Mask,
            LayerContent::Group { .. } => LayerType::Group,
        }
    }

    /// Image backing this layer when it is used as a mask source.
    pub fn mask_image(&self) -> Option<&FrameBuffer> {
        match &self.content {
            LayerContent::Mask { image } | LayerContent::Raster { image } => Some(image),
            _ => None,
        }
    }

    /// Builder: set opacity (0..=100).
    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_blend_mode(mut self, mode: BlendMode) -> Self {
        self.blend_mode = mode;
        self
    }

    pub fn with_placement(mut self, placement: Rect) -> Self {
        self.placement = Some(placement);
        self
    }

    /// Builder: set one parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_mask(mut self, mask: LayerMask) -> Self {
        self.masks.push(mask);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}
