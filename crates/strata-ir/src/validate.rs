use std::collections::HashSet;

use crate::document::Document;
use crate::layer::LayerContent;
use strata_core::StrataError;

/// Validate a document snapshot for structural correctness.
pub fn validate_document(doc: &Document) -> Result<(), Vec<StrataError>> {
    let mut errors = Vec::new();

    if doc.width == 0 || doc.height == 0 {
        errors.push(StrataError::InvalidDocument(
            "canvas dimensions must be non-zero".into(),
        ));
    }

    let mut ids = HashSet::new();
    for layer in doc.layers.iter().chain(doc.global_layers.iter()) {
        if !ids.insert(&layer.id) {
            errors.push(StrataError::InvalidDocument(format!(
                "duplicate layer id '{}'",
                layer.id
            )));
        }
        if !(0.0..=100.0).contains(&layer.opacity) {
            errors.push(StrataError::InvalidDocument(format!(
                "layer '{}' opacity {} outside 0..=100",
                layer.id, layer.opacity
            )));
        }
        for (key, value) in &layer.params {
            let color_ok = value
                .color()
                .map_or(true, |c| c.to_array().iter().all(|v| v.is_finite()));
            if !value.as_scalar().is_finite() || !color_ok {
                errors.push(StrataError::InvalidDocument(format!(
                    "layer '{}' parameter '{}' is not a finite number",
                    layer.id, key
                )));
            }
        }
        if let LayerContent::Raster { image } | LayerContent::Mask { image } = &layer.content {
            if !image.is_consistent() {
                errors.push(StrataError::InvalidDocument(format!(
                    "layer '{}' image data does not match {}x{}",
                    layer.id, image.width, image.height
                )));
            }
        }
    }

    for layer in &doc.layers {
        for mask in &layer.masks {
            match doc.layer(&mask.source) {
                Some(source) if source.mask_image().is_some() => {}
                Some(_) => errors.push(StrataError::InvalidDocument(format!(
                    "layer '{}' uses '{}' as a mask but it has no image",
                    layer.id, mask.source
                ))),
                None => errors.push(StrataError::InvalidDocument(format!(
                    "layer '{}' references unknown mask layer '{}'",
                    layer.id, mask.source
                ))),
            }
        }
        if let LayerContent::Group { children } = &layer.content {
            for child in children {
                if doc.layer(child).is_none() {
                    errors.push(StrataError::InvalidDocument(format!(
                        "group '{}' lists unknown child '{}'",
                        layer.id, child
                    )));
                }
            }
        }
    }

    if let Some(selected) = &doc.selected_layer {
        if doc.layer(selected).is_none() {
            errors.push(StrataError::InvalidDocument(format!(
                "selected layer '{}' does not exist",
                selected
            )));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
