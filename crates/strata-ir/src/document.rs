use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strata_core::{ColorProfile, StrataResult};

use crate::layer::{Layer, LayerContent, LayerId};
use crate::params::ParamMap;

/// A snapshot of a document as seen by the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub width: u32,
    pub height: u32,
    /// Layers ordered bottom to top.
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub selected_layer: Option<LayerId>,
    /// Document-level adjustment layers applied after compositing.
    #[serde(default)]
    pub global_layers: Vec<Layer>,
    #[serde(default)]
    pub global_params: ParamMap,
    #[serde(default)]
    pub profile: ColorProfile,
}

impl Document {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            layers: Vec::new(),
            selected_layer: None,
            global_layers: Vec::new(),
            global_params: ParamMap::new(),
            profile: ColorProfile::Standard,
        }
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn with_profile(mut self, profile: ColorProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn add_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    pub fn layer(&self, id: &LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| &l.id == id)
    }

    pub fn layer_mut(&mut self, id: &LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| &l.id == id)
    }

    /// Map from child id to the id of the group that lists it.
    fn parents(&self) -> HashMap<&LayerId, &LayerId> {
        let mut parents = HashMap::new();
        for layer in &self.layers {
            if let LayerContent::Group { children } = &layer.content {
                for child in children {
                    parents.insert(child, &layer.id);
                }
            }
        }
        parents
    }

    /// A layer renders only if it and every enclosing group are visible.
    pub fn is_effectively_visible(&self, layer: &Layer) -> bool {
        if !layer.visible {
            return false;
        }
        let parents = self.parents();
        let mut current = &layer.id;
        // Bounded walk so a malformed group cycle cannot spin forever.
        for _ in 0..self.layers.len() {
            let Some(parent) = parents.get(current) else {
                return true;
            };
            match self.layer(parent) {
                Some(group) if !group.visible => return false,
                Some(_) => current = *parent,
                None => return true,
            }
        }
        true
    }

    pub fn from_json_str(json: &str) -> StrataResult<Self> {
        let doc: Document = serde_json::from_str(json)?;
        Ok(doc)
    }

    pub fn load_from_file(path: &std::path::Path) -> StrataResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn to_json_string(&self) -> StrataResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
