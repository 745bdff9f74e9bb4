//! # strata-core
//!
//! Core types and primitives for the Strata compositing engine.
//! This crate contains foundational types shared across all Strata crates:
//! colors and transfer functions, textures and frame buffers, blend and mask
//! modes, placement rectangles, task identity, content hashing, configuration, and errors.

pub mod color;
pub mod config;
pub mod error;
pub mod frame;
pub mod math;
pub mod task;
pub mod types;

pub use config::*;

pub use color::{Color, ColorProfile};
pub use error::{StrataError, StrataResult};
pub use frame::{ContentHash, FrameBuffer, Texture};
pub use math::Rect;
pub use task::{Priority, TaskId};
pub use types::{BlendMode, LayerType, MaskMode};
