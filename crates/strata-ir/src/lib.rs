//! # strata-ir
//!
//! The document model Strata renders from. Layers, masks and parameter maps
//! arrive from the surrounding editor as plain data; this crate gives them
//! types, a typed view over the stringly-keyed parameter maps, and
//! structural validation. It holds no scheduling or compositing logic.

pub mod document;
pub mod layer;
pub mod params;
pub mod validate;

pub use document::Document;
pub use layer::{Layer, LayerContent, LayerId, LayerMask};
pub use params::{Adjustment, ParamMap, ParamValue, ResolvedParams, StylisticParams};
pub use validate::validate_document;
